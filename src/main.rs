//! Playground session daemon entry point.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use miette::Result;
use tracing::{Level, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use playground_sessions::sandbox::DockerRuntime;
use playground_sessions::server;
use playground_sessions::session::{SessionConfig, SessionManager};

/// Ephemeral playground sandbox session manager.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:8750")]
    listen: SocketAddr,

    /// Base image for playground containers.
    #[arg(long, default_value = "alpine:3.20")]
    image: String,

    /// Directory for session records.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Container engine binary.
    #[arg(long, default_value = "docker")]
    engine: String,

    /// Skip the container engine preflight check.
    #[arg(long, default_value = "false")]
    skip_checks: bool,

    /// Enable verbose logging.
    #[arg(short, long, default_value = "false")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing to stderr
    let filter = if args.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    info!("playground-sessions v{}", env!("CARGO_PKG_VERSION"));

    let runtime = DockerRuntime::new().with_binary(&args.engine);

    if args.skip_checks {
        warn!("Skipping container engine preflight (--skip-checks)");
        warn!("Provisioning will fail at request time if the engine is unreachable.");
    } else {
        match runtime.preflight() {
            Ok(version) => {
                info!(engine = %args.engine, %version, "container engine reachable");
            }
            Err(e) => {
                error!("container engine preflight failed");
                return Err(e.into());
            }
        }
    }

    let mut config = SessionConfig::default().with_image(&args.image);
    if let Some(data_dir) = args.data_dir {
        config = config.with_data_dir(data_dir);
    }

    let manager = SessionManager::new(Box::new(runtime), config)?;

    // Sessions armed before a restart lost their timers with the process.
    let recovered = manager.recover()?;
    if recovered > 0 {
        info!(recovered, "recovered sessions from previous run");
    }

    server::run(args.listen, manager).await?;
    Ok(())
}
