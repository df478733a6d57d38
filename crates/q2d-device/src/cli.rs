//! Device client CLI implementation.

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser, ValueEnum};
use q2d_core::constants::{DEFAULT_DEVICE_NAME, DEFAULT_SERVER_URL};

use crate::reconnectable::ClientConfig;

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

/// q2d device - keeps a controller connected to the q2d server.
#[derive(Debug, Parser)]
#[command(
    name = "q2d-device",
    version,
    about = "q2d device - receives commands from the q2d server"
)]
pub struct Cli {
    /// Server device channel URL
    #[arg(short = 'u', long = "url", default_value = DEFAULT_SERVER_URL, env = "Q2D_SERVER_URL")]
    pub url: String,

    /// Name announced to the server on connect
    #[arg(long = "name", default_value = DEFAULT_DEVICE_NAME)]
    pub device_name: String,

    /// Seconds between application heartbeats
    #[arg(long = "heartbeat-secs", default_value = "10", value_name = "SECONDS")]
    pub heartbeat_secs: u64,

    /// Milliseconds to wait before each reconnect attempt
    #[arg(long = "reconnect-delay-ms", default_value = "3000", value_name = "MILLIS")]
    pub reconnect_delay_ms: u64,

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
    /// Reject argument combinations clap cannot express.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(format!("--url must be a ws:// or wss:// URL, got {}", self.url));
        }
        if self.heartbeat_secs == 0 {
            return Err("--heartbeat-secs must be greater than 0".to_string());
        }
        if self.reconnect_delay_ms == 0 {
            return Err("--reconnect-delay-ms must be greater than 0".to_string());
        }
        if self.device_name.is_empty() {
            return Err("--name must not be empty".to_string());
        }
        Ok(())
    }

    /// Build the client configuration.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            url: self.url.clone(),
            heartbeat_interval: Duration::from_secs(self.heartbeat_secs),
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            device_name: self.device_name.clone(),
        }
    }
}
