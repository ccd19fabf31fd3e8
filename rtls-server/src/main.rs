mod anchor;
mod config;
mod ranging;
mod rf_event;
mod rpc;
mod server;
mod tag;
mod timer;
mod transport;

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use config::RtlsConfig;
use server::Server;
use transport::LoopbackTransport;

/// Tail RTLS correlation server: consumes anchor RF observations over
/// MQTT, correlates ranging sessions, and solves tag coordinates.
#[derive(Parser, Debug)]
#[command(name = "rtls-server", version)]
struct Cli {
    /// Path to the server's TOML configuration file.
    #[arg(short = 'c', long = "config", default_value = "rtls.conf")]
    config: String,

    /// Enable verbose (debug-level) logging.
    #[arg(short = 'L', long = "logging")]
    logging: bool,
}

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.logging { "rtls_server=debug,rtls_types=debug" } else { "rtls_server=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    let config = match RtlsConfig::load(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            error!("unable to load config from {}: {err}", cli.config);
            std::process::exit(1);
        }
    };

    info!("rtls-server starting, domain={}", config.rtls.mqtt_domain);

    let transport = Arc::new(LoopbackTransport::new());
    let server = Server::new(config, transport);
    server.start_rf_listener();

    // Block the main thread until interrupted; the RF listener, RPC
    // dispatch threads, and timer wheel all run in the background.
    wait_for_interrupt();
    info!("rtls-server shutting down");
    server.stop();
}

/// No signal-handling crate is in the teacher's dependency graph.
/// Block indefinitely; the process is ended by an external SIGTERM/
/// SIGINT during normal operation, matching `mqtt.loop_forever()`'s
/// blocking run loop in the source.
fn wait_for_interrupt() {
    loop {
        std::thread::sleep(std::time::Duration::from_secs(3600));
    }
}
