//! # REST Switch Agent
//!
//! Gateway process that keeps the relay board in step with its cloud shadow.
//!
//! ## Process Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         restswitch-agent                                │
//! │                                                                         │
//! │  main task:   ShadowSyncLoop::run ◄── WsShadowTransport (link task)     │
//! │                      ▲                                                  │
//! │  signal task: SIGINT / SIGTERM ──► SyncLoopHandle::shutdown             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

mod device;

use anyhow::{Context, Result};
use clap::Parser;
use std::future::Future;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use restswitch_sync::{
    AgentConfig, ShadowSyncLoop, SimulatedRegisters, TransportConfig, WsShadowTransport,
};

use crate::device::PidFile;

const DEFAULT_PID_FILE: &str = "/var/run/restswitch-agent.pid";
const DEFAULT_LOG_FILTER: &str = "info,restswitch=debug";

/// REST Switch gateway agent
#[derive(Parser, Debug)]
#[command(name = "restswitch-agent", version, about, long_about = None)]
struct Cli {
    /// Path to agent.toml (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Shadow gateway WebSocket URL
    #[arg(long)]
    url: Option<String>,

    /// Thing name, instead of reading it from the device
    #[arg(long)]
    thing_name: Option<String>,

    /// Pid file location
    #[arg(long, default_value = DEFAULT_PID_FILE)]
    pid_file: PathBuf,

    /// Do not write a pid file
    #[arg(long, default_value_t = false)]
    no_pid_file: bool,
}

impl Cli {
    /// Command line values take precedence over file and environment.
    fn apply(&self, config: &mut AgentConfig) {
        if let Some(ref url) = self.url {
            config.shadow.url = Some(url.clone());
        }
        if let Some(ref name) = self.thing_name {
            config.device.thing_name = Some(name.clone());
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    match run(cli).await {
        Ok(()) => {
            info!("Agent stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let mut shutdown = Box::pin(shutdown_signal());

    let mut config = AgentConfig::load(cli.config.clone()).context("loading configuration")?;
    cli.apply(&mut config);
    config.validate().context("validating configuration")?;

    let thing_name = device::resolve_thing_name(&config.device).context("resolving thing name")?;
    info!(%thing_name, version = env!("CARGO_PKG_VERSION"), "Starting REST Switch agent");

    let _pid_file = if cli.no_pid_file {
        None
    } else {
        Some(PidFile::create(&cli.pid_file)?)
    };

    let transport_config = TransportConfig::from_agent_config(&config, &thing_name)?;
    let mut transport = WsShadowTransport::spawn(transport_config);
    tokio::select! {
        connected = transport.connect() => {
            connected.context("connecting to shadow gateway")?;
        }
        () = &mut shutdown => {
            info!("Shutdown requested before the gateway connected");
            if let Err(e) = transport.shutdown().await {
                warn!(error = %e, "Shadow link already stopped");
            }
            return Ok(());
        }
    }

    let mut sync = ShadowSyncLoop::new(&config, thing_name, transport, SimulatedRegisters::new());
    let handle = sync.handle();
    tokio::spawn(async move {
        shutdown.await;
        handle.shutdown().await;
    });

    sync.run().await?;
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
///
/// Listeners are registered before this returns, so a signal during startup
/// is not handled by the default disposition.
fn shutdown_signal() -> impl Future<Output = ()> + Send + 'static {
    #[cfg(unix)]
    let listeners = {
        use tokio::signal::unix::{signal, SignalKind};
        (
            signal(SignalKind::interrupt()),
            signal(SignalKind::terminate()),
        )
    };

    async move {
        #[cfg(unix)]
        match listeners {
            (Ok(mut interrupt), Ok(mut terminate)) => {
                tokio::select! {
                    _ = interrupt.recv() => {},
                    _ = terminate.recv() => {},
                }
            }
            (Err(e), _) | (_, Err(e)) => {
                error!(error = %e, "Failed to install signal handlers");
                std::future::pending::<()>().await;
            }
        }

        #[cfg(not(unix))]
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }

        info!("Shutdown signal received");
    }
}
