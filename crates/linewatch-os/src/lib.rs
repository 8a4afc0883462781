//! Runs a `linewatch` sensor node on top of an operating system.
//!
//! This crate provides the platform facilities needed by the node core:
//!
//! - Monitored lines read from files, such as `sysfs` `GPIO` values
//! - A persistent configuration region backed by a file
//! - Outbound `TCP` connections for the notifications
//! - Link information discovered from the host network interfaces
//! - An `HTTP` front end forwarding the requests to the node tick
//! - An `mDNS-SD` announcement of the node
//!
//! A [`runner::Runner`] ties everything together on a `tokio` runtime.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

/// Outbound connections.
pub mod connector;
/// `mDNS-SD` announcement.
pub mod discovery;
/// Error management.
pub mod error;
/// Link information.
pub mod link;
/// Monitored lines backed by files.
pub mod lines;
/// The node runner.
pub mod runner;
/// The `HTTP` front end.
pub mod server;
/// File-backed persistent storage.
pub mod storage;

mod mac;
