use std::future::Future;
use std::net::{IpAddr, Ipv4Addr};
use std::time::{Duration, Instant};

use embedded_hal::digital::InputPin;

use linewatch::dispatcher::Connector;
use linewatch::node::{Node, Service, TickOutcome};
use linewatch::status::LinkInfo;
use linewatch::store::Storage;

use tokio::net::TcpListener;
use tokio::time::MissedTickBehavior;

use tracing::{error, info};

use crate::discovery::Mdns;
use crate::error::{Error, ErrorKind, Result};
use crate::server::{DEFAULT_QUEUE_SIZE, router};

/// Default `HTTP` port.
pub const DEFAULT_PORT: u16 = 80;

/// Default scheduler tick period.
pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_millis(100);

/// Drives a [`Node`] on a `tokio` runtime.
///
/// The `HTTP` front end runs on its own task, while the node is ticked
/// periodically on the task awaiting [`Runner::run`]. A restart request
/// reboots the node in place.
#[derive(Debug)]
pub struct Runner {
    address: IpAddr,
    port: u16,
    period: Duration,
    queue_size: usize,
    mdns: Option<Mdns>,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

impl Runner {
    /// Creates a [`Runner`] listening on every interface, on
    /// [`DEFAULT_PORT`].
    #[must_use]
    pub const fn new() -> Self {
        Self {
            address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            period: DEFAULT_TICK_PERIOD,
            queue_size: DEFAULT_QUEUE_SIZE,
            mdns: None,
        }
    }

    /// Sets the listening address.
    #[must_use]
    pub const fn address(mut self, address: IpAddr) -> Self {
        self.address = address;
        self
    }

    /// Sets the listening port. Port `0` picks a free one.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the scheduler tick period.
    #[must_use]
    pub const fn period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Sets how many requests can wait for the node.
    #[must_use]
    pub const fn queue_size(mut self, queue_size: usize) -> Self {
        self.queue_size = queue_size;
        self
    }

    /// Announces the node through `mDNS-SD`.
    #[must_use]
    pub fn mdns(mut self, mdns: Mdns) -> Self {
        self.mdns = Some(mdns);
        self
    }

    /// Runs the node until `Ctrl-C` is pressed.
    ///
    /// # Errors
    ///
    /// The listener could not be bound, the announcement could not be
    /// started or the front end failed.
    pub async fn run<P, K, S, L, const N: usize, const M: usize>(
        self,
        node: Node<P, K, S, L, N, M>,
    ) -> Result<()>
    where
        P: InputPin,
        K: Connector,
        S: Storage,
        L: LinkInfo,
    {
        self.run_until(node, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Unable to listen for Ctrl-C: {e}");
            }
        })
        .await
    }

    /// Runs the node until `shutdown` completes.
    ///
    /// # Errors
    ///
    /// The listener could not be bound, the announcement could not be
    /// started or the front end failed.
    pub async fn run_until<P, K, S, L, const N: usize, const M: usize>(
        self,
        mut node: Node<P, K, S, L, N, M>,
        shutdown: impl Future<Output = ()>,
    ) -> Result<()>
    where
        P: InputPin,
        K: Connector,
        S: Storage,
        L: LinkInfo,
    {
        let listener = TcpListener::bind((self.address, self.port)).await?;
        let local = listener.local_addr()?;
        info!("Node `{}` listening on {local}", node.hostname());

        // Dropping the handle stops the announcement.
        let _mdns = self.mdns.map(|mdns| mdns.register(local.port())).transpose()?;

        let (router, mut bridge) = router(self.queue_size);
        let mut server = tokio::spawn(async move { axum::serve(listener, router).await });

        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        let mut boot = Instant::now();
        let outcome = loop {
            tokio::select! {
                _ = interval.tick() => {}
                () = &mut shutdown => {
                    info!("Shutting down");
                    break Ok(());
                }
                result = &mut server => {
                    break match result {
                        Ok(Ok(())) => Err(Error::new(ErrorKind::Network, "HTTP server stopped")),
                        Ok(Err(e)) => Err(e.into()),
                        Err(e) => Err(Error::new(ErrorKind::Network, e.to_string())),
                    };
                }
            }

            let started = Instant::now();
            let mut services: [&mut dyn Service; 1] = [&mut bridge];
            let tick = node.tick(boot.elapsed(), &mut services);
            node.record_load(started.elapsed(), self.period);

            if tick == TickOutcome::Restart {
                node.reboot();
                boot = Instant::now();
                info!("Node `{}` restarted", node.hostname());
            }
        };

        server.abort();
        outcome
    }
}
