//! The node context and its scheduler tick.
//!
//! A [`Node`] owns every piece of state: the monitored lines, the dispatcher,
//! the configuration store and the counters shown in the status views. The
//! platform drives it by calling [`Node::tick`] once per period, passing the
//! time elapsed since boot. Each tick
//!
//! 1. samples every line,
//! 2. requests a notification for the post-startup changes, if any,
//! 3. advances the in-flight notification,
//! 4. polls the external services in the given order,
//!
//! and never blocks.

use alloc::format;
use alloc::string::{String, ToString};

use core::fmt::Write as _;
use core::time::Duration;

use embedded_hal::digital::InputPin;

use log::{debug, info, warn};

use crate::dispatcher::{Connector, Dispatcher, Target};
use crate::error::Result;
use crate::line::{LineChange, LineMonitor};
use crate::response::{Method, Request, Response};
use crate::status::{LinkInfo, LinkSnapshot, StatusView};
use crate::store::{ConfigStore, PersistedConfig, Storage};
use crate::{EVENT_LOG_CAPACITY, MAX_LINES};

/// Delay between a restart request and the restart.
pub const RESET_DELAY: Duration = Duration::from_secs(3);

// Weight of a new sample in the smoothed load.
const LOAD_SMOOTHING: f32 = 1.0 / 16.0;

/// What the platform must do once a tick completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Keep ticking.
    Continue,
    /// Restart the node.
    Restart,
}

/// Request handling offered by the node to the external services.
pub trait Routes {
    /// Handles a single request.
    fn handle(&mut self, request: &Request<'_>, now: Duration) -> Response;
}

/// An external subsystem polled once per tick.
///
/// Services, such as the request-serving front end or the update checker,
/// must return as soon as they have nothing ready to process.
pub trait Service {
    /// Processes the work that is ready, if any.
    fn poll(&mut self, routes: &mut dyn Routes, now: Duration);
}

/// A sensor node.
pub struct Node<P, K, S, L, const N: usize = MAX_LINES, const M: usize = EVENT_LOG_CAPACITY>
where
    P: InputPin,
    K: Connector,
    S: Storage,
    L: LinkInfo,
{
    hostname: String,
    monitor: LineMonitor<P, N, M>,
    dispatcher: Dispatcher<K>,
    store: ConfigStore<S>,
    config: PersistedConfig,
    link: L,
    request_count: u32,
    load: f32,
    restart_at: Option<Duration>,
}

impl<P, K, S, L, const N: usize, const M: usize> Node<P, K, S, L, N, M>
where
    P: InputPin,
    K: Connector,
    S: Storage,
    L: LinkInfo,
{
    /// Creates a [`Node`], loading its configuration from `storage`.
    ///
    /// # Errors
    ///
    /// The storage needed to be formatted and the commit failed.
    pub fn new(
        hostname: impl Into<String>,
        monitor: LineMonitor<P, N, M>,
        connector: K,
        storage: S,
        link: L,
    ) -> Result<Self> {
        const {
            assert!(
                N <= MAX_LINES,
                "Notification URLs are sized for at most `MAX_LINES` lines"
            )
        };
        let store = ConfigStore::open(storage)?;
        let config = store.load();
        let hostname = hostname.into();

        info!(
            "Node `{hostname}` monitoring {} lines, notifications {}",
            monitor.lines().len(),
            if config.notify_url.is_empty() {
                "disabled"
            } else {
                "enabled"
            }
        );

        Ok(Self {
            hostname,
            monitor,
            dispatcher: Dispatcher::new(connector),
            store,
            config,
            link,
            request_count: 0,
            load: 0.0,
            restart_at: None,
        })
    }

    /// Runs one scheduler tick.
    ///
    /// `now` is the time elapsed since boot.
    pub fn tick(&mut self, now: Duration, services: &mut [&mut dyn Service]) -> TickOutcome {
        let changes = self.monitor.sample_all(now);
        if !changes.is_empty() {
            self.notify(&changes);
        }

        self.dispatcher.poll();

        for service in services.iter_mut() {
            service.poll(self, now);
        }

        match self.restart_at {
            Some(at) if now >= at => {
                info!("Restarting");
                TickOutcome::Restart
            }
            _ => TickOutcome::Continue,
        }
    }

    /// Feeds the smoothed load with the time spent in the last tick.
    pub fn record_load(&mut self, busy: Duration, period: Duration) {
        if period.is_zero() {
            return;
        }
        let sample = (busy.as_secs_f32() / period.as_secs_f32()).min(1.0);
        self.load += (sample - self.load) * LOAD_SMOOTHING;
    }

    /// Stores a new credentials pair.
    ///
    /// # Errors
    ///
    /// The pair is invalid or could not be persisted. The stored pair is
    /// left untouched.
    pub fn set_credentials(&mut self, identifier: &str, secret: &str) -> Result<()> {
        self.store.set_credentials(identifier, secret)?;
        self.config = self.store.load();
        Ok(())
    }

    /// Stores a new notification `URL`. An empty `URL` disables
    /// notifications.
    ///
    /// # Errors
    ///
    /// The `URL` is invalid or could not be persisted. The stored `URL` is
    /// left untouched.
    pub fn set_notify_url(&mut self, url: &str) -> Result<()> {
        if !url.is_empty() {
            let _ = Target::parse(&with_path(url))?;
        }
        self.store.set_notify_url(url)?;
        self.config = self.store.load();
        Ok(())
    }

    /// Restarts the node in place.
    ///
    /// The configuration is read again from storage, every line goes back to
    /// the unknown state, the event log is cleared, the in-flight and pending
    /// notifications are dropped and the counters are reset.
    pub fn reboot(&mut self) {
        self.config = self.store.load();
        self.monitor.reset();
        self.dispatcher.reset();
        self.request_count = 0;
        self.load = 0.0;
        self.restart_at = None;
    }

    /// Replaces the link information source.
    #[must_use]
    pub fn with_link<T: LinkInfo>(self, link: T) -> Node<P, K, S, T, N, M> {
        Node {
            hostname: self.hostname,
            monitor: self.monitor,
            dispatcher: self.dispatcher,
            store: self.store,
            config: self.config,
            link,
            request_count: self.request_count,
            load: self.load,
            restart_at: self.restart_at,
        }
    }

    /// Returns the node host name.
    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Returns the loaded configuration.
    #[must_use]
    pub const fn config(&self) -> &PersistedConfig {
        &self.config
    }

    /// Returns the line monitor.
    #[must_use]
    pub const fn monitor(&self) -> &LineMonitor<P, N, M> {
        &self.monitor
    }

    /// Returns the notification dispatcher.
    #[must_use]
    pub const fn dispatcher(&self) -> &Dispatcher<K> {
        &self.dispatcher
    }

    /// Returns the configuration store.
    #[must_use]
    pub const fn store(&self) -> &ConfigStore<S> {
        &self.store
    }

    /// Returns the number of status requests served.
    #[must_use]
    pub const fn request_count(&self) -> u32 {
        self.request_count
    }

    /// Returns the smoothed load.
    #[must_use]
    pub const fn load(&self) -> f32 {
        self.load
    }

    /// Returns the time at which a requested restart happens.
    #[must_use]
    pub const fn restart_at(&self) -> Option<Duration> {
        self.restart_at
    }

    /// Returns the notification `URL` reporting `changes`, if notifications
    /// are enabled.
    #[must_use]
    pub fn notification_url(&self, changes: &[LineChange]) -> Option<String> {
        let base = self.config.notify_url.as_str();
        if base.is_empty() || changes.is_empty() {
            return None;
        }

        let mut url = with_path(base);
        let mut separator = if base.contains('?') { '&' } else { '?' };
        for change in changes {
            // Writing into a `String` cannot fail.
            let _ = write!(
                url,
                "{separator}GPIO{}={}",
                change.line_id,
                change.state.label()
            );
            separator = '&';
        }
        Some(url)
    }

    fn notify(&mut self, changes: &[LineChange]) {
        match self.notification_url(changes) {
            Some(url) => {
                debug!("Requesting notification `{url}`");
                self.dispatcher.request(&url);
            }
            None => debug!("Notifications disabled, {} changes not sent", changes.len()),
        }
    }

    fn view<'a>(&'a self, now: Duration, link: &'a LinkSnapshot) -> StatusView<'a> {
        StatusView {
            host: &self.hostname,
            request_count: self.request_count,
            load: self.load,
            uptime: now,
            lines: self.monitor.lines(),
            link,
        }
    }

    fn notify_route(&mut self, request: &Request<'_>) -> Response {
        let Some(url) = request.arg("n") else {
            return Response::text(if self.config.notify_url.is_empty() {
                "Notifications disabled\n".to_string()
            } else {
                format!("Notification URL: {}\n", self.config.notify_url)
            });
        };

        match self.set_notify_url(&url) {
            Ok(()) if url.is_empty() => Response::text("Notifications disabled\n"),
            Ok(()) => Response::text(format!("Notification URL set to {url}\n")),
            Err(e) => {
                warn!("Notification URL rejected: {e}");
                Response::bad_request(format!("{e}\n"))
            }
        }
    }

    fn history_route(&self) -> Response {
        let mut body = String::new();
        // Writing into a `String` cannot fail.
        let _ = self.monitor.history().render(&mut body);
        Response::text(body)
    }

    fn reset_route(&mut self, now: Duration) -> Response {
        let at = now + RESET_DELAY;
        self.restart_at = Some(at);
        info!("Restart scheduled in {}s", RESET_DELAY.as_secs());
        Response::text(format!("Restarting in {} seconds\n", RESET_DELAY.as_secs()))
    }
}

// Returns `url` with a `/` path inserted when it has none, so that a query
// appended to it never lands in the host.
fn with_path(url: &str) -> String {
    let start = url.find("://").map_or(0, |index| index + 3);
    match url[start..].find(['/', '?']) {
        Some(index) if url[start + index..].starts_with('/') => url.to_string(),
        Some(index) => format!("{}/{}", &url[..start + index], &url[start + index..]),
        None => format!("{url}/"),
    }
}

impl<P, K, S, L, const N: usize, const M: usize> Routes for Node<P, K, S, L, N, M>
where
    P: InputPin,
    K: Connector,
    S: Storage,
    L: LinkInfo,
{
    fn handle(&mut self, request: &Request<'_>, now: Duration) -> Response {
        if request.method != Method::Get {
            return Response::not_allowed();
        }

        let route = request.route();
        debug!("Serving `{route}`");

        match route {
            "/" => {
                self.request_count = self.request_count.wrapping_add(1);
                let link = self.link.snapshot();
                Response::text(self.view(now, &link).to_text())
            }
            "/json" => {
                self.request_count = self.request_count.wrapping_add(1);
                let link = self.link.snapshot();
                match self.view(now, &link).to_json() {
                    Ok(json) => Response::json(json),
                    Err(e) => {
                        warn!("Unable to serialize the status: {e}");
                        Response::internal(format!("Unable to serialize the status: {e}\n"))
                    }
                }
            }
            "/notify" => self.notify_route(request),
            "/history" => self.history_route(),
            "/reset" => self.reset_route(now),
            _ => Response::not_found(route),
        }
    }
}
