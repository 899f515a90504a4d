/*!
 * dvremote command-line tool.
 *
 * Either lists DVRs advertised on the local network, or connects to one DVR
 * by address, sends a single command and prints the events the device
 * reports while the listen window is open.
 */
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use dvremote_core::config::{Config, ConfigBuilder};
use dvremote_devices::{
    Command, DeviceRegistry, DvrSession, MdnsBrowser, RegistryEvent, ServiceDescriptor,
    SharedDeviceRegistry, TcpConnector,
};

/// Remote control for network-attached DVRs
#[derive(Debug, Parser)]
#[command(name = "dvremote", version, about)]
struct Cli {
    /// Address of the DVR; required for everything but `discover`
    #[arg(short, long)]
    address: Option<IpAddr>,

    /// Remote-control port (defaults to the configured session port)
    #[arg(short, long)]
    port: Option<u16>,

    /// Serial number to tag the session with
    #[arg(long, default_value = "manual")]
    tsn: String,

    /// Friendly name to tag the session with
    #[arg(short, long, default_value = "DVR", value_parser = parse_name)]
    name: String,

    /// Configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seconds to keep printing device events after sending
    #[arg(short, long, default_value_t = 3)]
    listen: u64,

    #[command(subcommand)]
    action: Action,
}

#[derive(Debug, Subcommand)]
enum Action {
    /// Press a remote-control button
    Ircode {
        /// Code, e.g. UP, SELECT, TIVO
        code: String,
    },
    /// Send a keyboard key
    Keyboard {
        /// Keyboard code
        code: String,
    },
    /// Jump to a UI location, e.g. LIVETV or GUIDE
    Teleport {
        /// Destination name
        destination: String,
    },
    /// Change channel
    Channel {
        /// Channel number
        channel: String,
        /// Cancel a recording in progress if needed
        #[arg(long)]
        force: bool,
    },
    /// Print device events until interrupted
    Watch,
    /// List DVRs advertised on the local network until interrupted
    Discover,
}

impl Action {
    fn command(&self) -> Option<Command> {
        match self {
            Action::Ircode { code } => Some(Command::IrCode(code.clone())),
            Action::Keyboard { code } => Some(Command::Keyboard(code.clone())),
            Action::Teleport { destination } => Some(Command::Teleport(destination.clone())),
            Action::Channel { channel, force } => Some(Command::channel(channel.as_str(), *force)),
            Action::Watch | Action::Discover => None,
        }
    }
}

/// Names become the first label of the service name, so they cannot contain dots.
fn parse_name(name: &str) -> std::result::Result<String, String> {
    if name.is_empty() {
        return Err("name must not be empty".to_string());
    }
    if name.contains('.') {
        return Err(format!("name {:?} must not contain '.'", name));
    }
    Ok(name.to_string())
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let mut builder = ConfigBuilder::new().with_environment_prefix("dvremote");
    if let Some(path) = path {
        builder = builder.with_config_file(path);
    }
    builder.build().context("loading configuration")
}

fn manual_descriptor(cli: &Cli, address: IpAddr, config: &Config) -> ServiceDescriptor {
    ServiceDescriptor {
        query: vec![format!("{}._tcp.local", config.discovery.service_type)],
        full_name: format!("{}.{}._tcp.local", cli.name, config.discovery.service_type),
        txt: vec![format!("TSN={}", cli.tsn)],
        addresses: vec![address],
        port: cli.port.unwrap_or(config.session.port),
    }
}

fn print_registry_event(event: &RegistryEvent) {
    let (kind, session) = match event {
        RegistryEvent::DeviceFound(session) => ("found", session),
        RegistryEvent::DeviceLost(session) => ("lost", session),
    };
    let line = serde_json::json!({
        "event": kind,
        "name": session.name(),
        "id": session.id(),
        "address": session.ip_address(),
    });
    println!("{}", line);
}

async fn discover(config: &Config) -> Result<()> {
    let (browser, browser_events) =
        MdnsBrowser::new(&config.discovery.service_type, config.discovery.event_capacity)?;
    let browser = Arc::new(browser);

    let registry = SharedDeviceRegistry::new(DeviceRegistry::with_config(
        Arc::new(TcpConnector::new()),
        config,
    ));
    let mut events = registry.registry().subscribe();
    let runner = registry.spawn(browser.clone(), browser_events);
    info!("Browsing for {} devices, Ctrl-C to stop", config.discovery.service_type);

    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);

    loop {
        tokio::select! {
            _ = &mut interrupted => break,
            event = events.recv() => match event {
                Ok(event) => print_registry_event(&event),
                Err(RecvError::Lagged(skipped)) => warn!("Skipped {} registry events", skipped),
                Err(RecvError::Closed) => break,
            },
        }
    }

    browser.shutdown()?;
    runner.abort();
    registry.registry().shutdown()?;
    Ok(())
}

async fn control(cli: &Cli, address: IpAddr, config: &Config) -> Result<()> {
    let descriptor = manual_descriptor(cli, address, config);
    let session = DvrSession::open(&descriptor, &TcpConnector::new(), &config.session)
        .with_context(|| format!("opening session to {}", address))?;
    let mut events = session.subscribe();

    if let Some(command) = cli.action.command() {
        debug!("Sending {}", command);
        session.send(&command);
    }

    let window = async {
        match cli.action {
            Action::Watch => {
                let _ = tokio::signal::ctrl_c().await;
            }
            _ => tokio::time::sleep(Duration::from_secs(cli.listen)).await,
        }
    };
    tokio::pin!(window);

    loop {
        tokio::select! {
            _ = &mut window => break,
            event = events.recv() => match event {
                Ok(event) => println!("{}", serde_json::to_string(&event)?),
                Err(RecvError::Lagged(skipped)) => warn!("Skipped {} events", skipped),
                Err(RecvError::Closed) => break,
            },
        }
    }

    session.deinit();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    dvremote_core::init_with_config(&config)?;

    match (&cli.action, cli.address) {
        (Action::Discover, _) => discover(&config).await,
        (_, Some(address)) => control(&cli, address, &config).await,
        (_, None) => bail!("--address is required for this command"),
    }
}
