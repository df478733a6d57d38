//! q2d device binary entry point.
//!
//! Connects to the server and applies the commands it pushes.

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};

use q2d_device::{Cli, DeviceClient};

fn main() {
    // Parse CLI arguments
    let cli = Cli::parse();
    if let Err(e) = cli.validate() {
        eprintln!("q2d-device: {}", e);
        std::process::exit(2);
    }

    // Initialize logging
    let log_format = cli.log_format.into();
    if let Err(e) = q2d_core::init_logging(cli.verbose, cli.log_file.as_deref(), log_format) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    info!(version = env!("CARGO_PKG_VERSION"), url = %cli.url, "q2d-device starting");

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    let client = DeviceClient::new(cli.client_config());
    let result = rt.block_on(async {
        let (stop, stop_rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            let _ = stop.send(true);
        });
        client.run(stop_rx).await
    });

    if let Err(e) = result {
        error!(error = %e, "Device client failed");
        eprintln!("q2d-device: {}", e);
        std::process::exit(1);
    }
}
