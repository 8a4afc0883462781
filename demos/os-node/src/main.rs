//! A door and window sensor node running on a Linux host.

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use linewatch::node::Node;

use linewatch_os::connector::TcpConnector;
use linewatch_os::discovery::Mdns;
use linewatch_os::error::Result;
use linewatch_os::lines::{LineSpec, monitor};
use linewatch_os::link::LinuxLink;
use linewatch_os::runner::Runner;
use linewatch_os::storage::FileStorage;

use tracing::{error, info, warn};

// Hostname.
const HOSTNAME: &str = "linewatch";

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Listening address.
    #[arg(long, default_value = "0.0.0.0")]
    address: IpAddr,

    /// Listening port.
    #[arg(short, long, default_value_t = 80)]
    port: u16,

    /// Node hostname.
    #[arg(long, default_value = HOSTNAME)]
    hostname: String,

    /// File holding the persistent configuration.
    #[arg(long, default_value = "linewatch.cfg")]
    storage: PathBuf,

    /// A monitored line, as `<id>=<value file>`. Can be repeated.
    #[arg(short, long = "line", required = true)]
    lines: Vec<LineSpec>,

    /// Scheduler tick period, in milliseconds.
    #[arg(long, default_value_t = 100)]
    tick_ms: u64,

    /// Stores a new network identifier, together with `--secret`.
    #[arg(long, requires = "secret")]
    identifier: Option<String>,

    /// Stores a new network secret, together with `--identifier`.
    #[arg(long, requires = "identifier")]
    secret: Option<String>,

    /// Stores a new notification URL. An empty URL disables notifications.
    #[arg(long)]
    notify_url: Option<String>,

    /// Announces the node through mDNS-SD.
    #[arg(long)]
    mdns: bool,
}

async fn run(cli: Cli) -> Result<()> {
    let storage = FileStorage::open(&cli.storage)?;
    let monitor = monitor::<{ linewatch::MAX_LINES }, { linewatch::EVENT_LOG_CAPACITY }>(
        &cli.lines,
    )?;

    // The access point name is only known once the configuration is loaded.
    let mut node = Node::new(
        cli.hostname.clone(),
        monitor,
        TcpConnector::new(),
        storage,
        LinuxLink::new(""),
    )?;

    if let (Some(identifier), Some(secret)) = (&cli.identifier, &cli.secret) {
        node.set_credentials(identifier, secret)?;
        info!("Credentials stored");
    }

    if let Some(url) = &cli.notify_url {
        node.set_notify_url(url)?;
        info!("Notification URL stored");
    }

    if node.config().identifier.is_empty() {
        warn!("No network identifier stored");
    }

    let link = LinuxLink::discover(node.config().identifier.clone());
    let node = node.with_link(link);

    let mut runner = Runner::new()
        .address(cli.address)
        .port(cli.port)
        .period(Duration::from_millis(cli.tick_ms.max(1)));

    if cli.mdns {
        runner = runner.mdns(Mdns::new(cli.hostname));
    }

    runner.run(node).await
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    if let Err(e) = run(cli).await {
        error!("{e}");
        std::process::exit(1);
    }
}
