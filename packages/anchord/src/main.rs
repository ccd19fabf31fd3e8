mod config;
mod daemon;
mod rpc;
mod transport;
mod wpan;

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use config::AnchordConfig;
use daemon::AnchorDaemon;
use rpc::RpcEndpoint;
use transport::{LoopbackTransport, MqttTransport};
use wpan::{SimulatedWpan, WpanInterface};

/// Tail anchor daemon: answers the server's RPC calls, drives the DW1000
/// WPAN interface, and forwards every RX/TX frame as an MQTT RF message.
#[derive(Parser, Debug)]
#[command(name = "anchord", version)]
struct Cli {
    /// Path to the anchor's TOML configuration file.
    #[arg(short = 'c', long = "config", default_value = "anchor.conf")]
    config: String,

    /// Enable verbose (debug-level) logging.
    #[arg(short = 'L', long = "logging")]
    logging: bool,
}

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.logging { "anchord=debug,rtls_types=debug" } else { "anchord=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    let config = match AnchordConfig::load(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            error!("unable to load config from {}: {err}", cli.config);
            std::process::exit(1);
        }
    };

    // A real deployment's EUI64 comes from the DW1000 chip itself
    // (`WPAN.EUI64()`); the modeled interface is seeded with a fixed
    // identity derived from the domain name instead.
    let eui64 = rtls_types::Eui64::from_bytes(domain_seed(&config.anchor.mqtt_domain));
    let wpan: Arc<dyn WpanInterface> = Arc::new(SimulatedWpan::new(eui64));

    if let Err(err) = apply_dw1000_config(&wpan, &config.dw1000) {
        error!("unable to program DW1000 attributes: {err}");
        std::process::exit(1);
    }

    let transport: Arc<dyn MqttTransport> = Arc::new(LoopbackTransport::new());
    let rpc = RpcEndpoint::new(transport.clone(), eui64.to_string());

    let daemon = AnchorDaemon::new(config.anchor.mqtt_domain.clone(), wpan, transport);
    daemon.register_handlers(&rpc);
    daemon.run();

    info!("anchord <{}> daemon starting, domain={}", daemon.uuid(), config.anchor.mqtt_domain);

    wait_for_interrupt();
    info!("anchord shutting down");
}

fn domain_seed(domain: &str) -> [u8; 8] {
    use md5::{Digest, Md5};
    let mut hasher = Md5::new();
    hasher.update(domain.as_bytes());
    let digest = hasher.finalize();
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

fn apply_dw1000_config(wpan: &Arc<dyn WpanInterface>, cfg: &config::Dw1000Section) -> anyhow::Result<()> {
    use serde_json::Value;
    wpan.set_dwattr("channel", Value::from(cfg.channel))?;
    wpan.set_dwattr("pcode", Value::from(cfg.pcode))?;
    wpan.set_dwattr("prf", Value::from(cfg.prf))?;
    wpan.set_dwattr("rate", Value::from(cfg.rate))?;
    wpan.set_dwattr("txpsr", Value::from(cfg.txpsr))?;
    wpan.set_dwattr("smart_power", Value::from(cfg.smart_power))?;
    wpan.set_dwattr("tx_power", Value::from(cfg.power))?;
    if let Some(profile) = &cfg.profile {
        wpan.set_dwattr("profile", Value::from(profile.clone()))?;
    }
    Ok(())
}

/// No signal-handling crate is in the teacher's dependency graph, the
/// same choice `rtls-server::main` makes. Block indefinitely; the
/// process is ended by an external SIGTERM/SIGINT, matching
/// `anchord.py`'s `socket_loop`'s own `while True`.
fn wait_for_interrupt() {
    loop {
        std::thread::sleep(std::time::Duration::from_secs(3600));
    }
}
