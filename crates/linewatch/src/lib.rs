//! The core of a `linewatch` sensor node.
//!
//! A node watches a fixed set of digital input lines, keeps a bounded history
//! of their transitions, exposes their state over a small set of `HTTP` routes
//! and forwards every transition to a configurable remote endpoint.
//!
//! This crate provides APIs to:
//!
//! - Sample the monitored lines and detect level changes
//! - Record transitions in a fixed-capacity circular event log
//! - Dispatch outbound notifications, one request at a time, coalescing the
//!   requests that arrive while busy to the most recent one
//! - Persist the node credentials and the notification `URL` in a fixed
//!   byte region
//! - Render the node status as plain text and `JSON`
//! - Drive all of the above from a single cooperative tick
//!
//! Nothing in this crate blocks, and nothing allocates proportionally to the
//! node uptime. Every platform facility is reached through a trait:
//! [`embedded_hal::digital::InputPin`] for the lines, [`store::Storage`] for
//! the persistent region, [`dispatcher::Connector`] for outbound connections
//! and [`status::LinkInfo`] for the link-quality snapshot.
//!
//! This crate is `no_std` and only requires an allocator.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![no_std]

extern crate alloc;

pub mod dispatcher;
/// Error management.
pub mod error;
/// Fixed-capacity event log.
pub mod history;
/// Monitored lines and their sampling.
pub mod line;
pub mod node;
pub mod response;
pub mod status;
pub mod store;

/// Default maximum number of monitored lines.
pub const MAX_LINES: usize = 32;

/// Default capacity of the event log.
pub const EVENT_LOG_CAPACITY: usize = 31;
