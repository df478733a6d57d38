//! q2d server binary entry point.
//!
//! Serves the query gateway and the device channel.

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use q2d_server::{Cli, Server, SqliteStore};

fn main() {
    // Parse CLI arguments
    let cli = Cli::parse();
    if let Err(e) = cli.validate() {
        eprintln!("q2d-server: {}", e);
        std::process::exit(2);
    }

    // Initialize logging
    let log_format = cli.log_format.into();
    if let Err(e) = q2d_core::init_logging(cli.verbose, cli.log_file.as_deref(), log_format) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    info!(version = env!("CARGO_PKG_VERSION"), "q2d-server starting");

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = rt.block_on(run_server(&cli)) {
        error!(error = %e, "Server failed");
        eprintln!("q2d-server: {}", e);
        std::process::exit(1);
    }
}

async fn run_server(cli: &Cli) -> q2d_core::Result<()> {
    let store = SqliteStore::open(&cli.db_path)?;
    if cli.no_seed {
        info!(path = %cli.db_path.display(), "Using existing tables");
    } else {
        store.seed()?;
    }

    let server = Server::bind(cli.server_config(), Arc::new(store)).await?;
    println!("q2d-server listening on http://{}", server.local_addr());

    server
        .run(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await
}
