//! Server CLI implementation.
//!
//! Provides command-line argument parsing for the q2d server.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser, ValueEnum};
use q2d_core::constants::{DEFAULT_API_KEY, DEFAULT_DB_PATH, DEFAULT_PORT, DEFAULT_WS_PATH};

use crate::link::LinkConfig;
use crate::server::{ServerConfig, check_ws_path};

/// Log output format for CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum CliLogFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// Structured JSON output.
    Json,
}

impl From<CliLogFormat> for q2d_core::LogFormat {
    fn from(fmt: CliLogFormat) -> Self {
        match fmt {
            CliLogFormat::Text => q2d_core::LogFormat::Text,
            CliLogFormat::Json => q2d_core::LogFormat::Json,
        }
    }
}

/// q2d server - query gateway and device link.
#[derive(Debug, Parser)]
#[command(
    name = "q2d-server",
    version,
    about = "q2d server - runs queries and forwards their results to a device"
)]
pub struct Cli {
    /// Address to listen on
    #[arg(short = 'b', long = "bind", default_value = "0.0.0.0")]
    pub bind_addr: IpAddr,

    /// Port to listen on
    #[arg(short = 'p', long = "port", default_value_t = DEFAULT_PORT, env = "PORT")]
    pub port: u16,

    /// Shared secret callers must present as API_KEY
    #[arg(
        long = "api-key",
        default_value = DEFAULT_API_KEY,
        env = "Q2D_API_KEY",
        hide_env_values = true
    )]
    pub api_key: String,

    /// SQLite database path (":memory:" for a private in-memory database)
    #[arg(
        long = "db-path",
        default_value = DEFAULT_DB_PATH,
        env = "Q2D_DB_PATH",
        value_name = "PATH"
    )]
    pub db_path: PathBuf,

    /// Keep existing tables instead of recreating the seed dataset
    #[arg(long = "no-seed")]
    pub no_seed: bool,

    /// Path of the device WebSocket endpoint
    #[arg(long = "ws-path", default_value = DEFAULT_WS_PATH)]
    pub ws_path: String,

    /// Seconds between device heartbeat pings
    #[arg(long = "heartbeat-secs", default_value = "20", value_name = "SECONDS")]
    pub heartbeat_secs: u64,

    /// Increase verbosity (can be repeated: -v, -vv, -vvv)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,

    /// Log to file instead of stderr
    #[arg(long = "log-file", value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Log output format
    #[arg(long = "log-format", default_value = "text")]
    pub log_format: CliLogFormat,
}

impl Cli {
    /// Get the socket address to bind to.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }

    /// Get the heartbeat interval as a [`Duration`].
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    /// Reject argument combinations clap cannot express.
    pub fn validate(&self) -> Result<(), String> {
        if self.heartbeat_secs == 0 {
            return Err("--heartbeat-secs must be greater than 0".to_string());
        }
        if self.api_key.is_empty() {
            return Err("--api-key must not be empty".to_string());
        }
        check_ws_path(&self.ws_path).map_err(|e| format!("--ws-path: {e}"))
    }

    /// Build the server configuration.
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            bind_addr: self.socket_addr(),
            api_key: self.api_key.clone(),
            ws_path: self.ws_path.clone(),
            link: LinkConfig {
                heartbeat_interval: self.heartbeat_interval(),
                ..LinkConfig::default()
            },
        }
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            api_key: DEFAULT_API_KEY.to_string(),
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            no_seed: false,
            ws_path: DEFAULT_WS_PATH.to_string(),
            heartbeat_secs: 20,
            verbose: 0,
            log_file: None,
            log_format: CliLogFormat::Text,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
