//! DHCP control channel daemon.
//!
//! # Architecture Overview
//!
//! ```text
//!                        ┌──────────────────────────────────────────────┐
//!                        │              dhcp-ctrl (one thread)          │
//!                        │                                              │
//!   POST {"command"}     │  ┌──────────┐   ┌────────────┐   ┌─────────┐ │
//!   ─────────────────────┼─▶│ listener │──▶│ connection │──▶│ command │ │
//!                        │  └──────────┘   │  + parser  │   │ creator │ │
//!   {"result", "text"}   │                 └─────┬──────┘   └────┬────┘ │
//!   ◀────────────────────┼───────────────────────┴───────────────┘      │
//!                        │                                              │
//!   SIGHUP/SIGTERM/      │  ┌──────────┐   ┌──────────────┐             │
//!   SIGINT ──────────────┼─▶│ capture  │──▶│ signal queue │──▶ reactor  │
//!                        │  └──────────┘   └──────────────┘    loop     │
//!                        └──────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use dhcp_ctrl::config::load_config;
use dhcp_ctrl::observability::{logging, metrics};
use dhcp_ctrl::Daemon;

#[derive(Parser)]
#[command(name = "dhcp-ctrl", version)]
#[command(about = "Control channel daemon for DHCP servers", long_about = None)]
struct Cli {
    /// Configuration file (TOML), re-read on SIGHUP.
    #[arg(short, long)]
    config: PathBuf,

    /// Validate the configuration and exit.
    #[arg(short = 't', long)]
    test_config: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {e}", cli.config.display());
            return ExitCode::FAILURE;
        }
    };
    if cli.test_config {
        println!("{}: configuration OK", cli.config.display());
        return ExitCode::SUCCESS;
    }

    logging::init_logging(&config.observability);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "dhcp-ctrl starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics exporter");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let daemon = match Daemon::start(&cli.config, config) {
        Ok(daemon) => daemon,
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            return ExitCode::FAILURE;
        }
    };
    if let Ok(addr) = daemon.local_addr() {
        tracing::info!(address = %addr, "Listening for control commands");
    }

    daemon.run();
    tracing::info!("Shutdown complete");
    ExitCode::SUCCESS
}
