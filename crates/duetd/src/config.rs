//! Daemon configuration: command line, environment and optional TOML file

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use tracing::Level;

pub const DEFAULT_BIND: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 5264;
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Duet relay - collaborative plain-text sync server
#[derive(Parser, Debug, Default)]
#[command(name = "duetd")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Bind address [default: 0.0.0.0]
    #[arg(long, env = "DUET_BIND")]
    pub bind: Option<String>,

    /// WebSocket port to listen on [default: 5264]
    #[arg(short, long, env = "DUET_PORT")]
    pub port: Option<u16>,

    /// Configuration file path
    #[arg(short, long, env = "DUET_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error) [default: info]
    #[arg(long, env = "DUET_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Initial document text
    #[arg(long, env = "DUET_SEED")]
    pub seed: Option<String>,
}

/// Contents of the TOML configuration file. Every key is optional.
#[derive(Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub bind: Option<String>,
    pub port: Option<u16>,
    pub log_level: Option<String>,
    pub seed: Option<String>,
}

impl FileConfig {
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).context("invalid configuration file")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("in {}", path.display()))
    }
}

/// Effective settings. Command line and environment win over the file,
/// the file wins over the defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub log_level: String,
    pub seed: String,
}

impl ServerConfig {
    /// Resolve from parsed arguments, reading the file they point to
    pub fn from_args(args: Args) -> Result<Self> {
        let file = match &args.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Ok(Self::merge(args, file))
    }

    pub fn merge(args: Args, file: FileConfig) -> Self {
        Self {
            bind: args
                .bind
                .or(file.bind)
                .unwrap_or_else(|| DEFAULT_BIND.to_string()),
            port: args.port.or(file.port).unwrap_or(DEFAULT_PORT),
            log_level: args
                .log_level
                .or(file.log_level)
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            seed: args.seed.or(file.seed).unwrap_or_default(),
        }
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.bind, self.port)
            .parse()
            .with_context(|| format!("invalid bind address {}:{}", self.bind, self.port))
    }

    /// Unknown names fall back to INFO
    pub fn level(&self) -> Level {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    }
}
