//! Process configuration
//!
//! Built once at process entry from the command line and passed explicitly
//! to the pipeline or the HTTP server.

use std::net::SocketAddr;
use std::path::PathBuf;

use crate::request::OperationRequest;

/// Default listen address of the HTTP endpoint
pub const DEFAULT_BIND: &str = "0.0.0.0:8080";

/// Environment variable pointing the Pub/Sub client at an emulator
pub const PUBSUB_EMULATOR_HOST: &str = "PUBSUB_EMULATOR_HOST";

/// Complete configuration of one process
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub mode: RunMode,
    pub gcp: GcpConfig,
}

/// What the process does after startup
#[derive(Debug, Clone)]
pub enum RunMode {
    /// Serve requests over HTTP until interrupted
    Webserver(ServerConfig),
    /// Run a single request and exit
    OneShot(OperationRequest),
}

/// HTTP endpoint configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}

/// Google Cloud client configuration shared by BigQuery and Pub/Sub
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcpConfig {
    /// Service account key file; Application Default Credentials otherwise
    pub credentials_file: Option<PathBuf>,
}

impl GcpConfig {
    pub fn with_credentials_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.credentials_file = Some(path.into());
        self
    }

    /// Pub/Sub emulator address, if one is configured
    pub fn pubsub_emulator_host() -> Option<String> {
        std::env::var(PUBSUB_EMULATOR_HOST)
            .ok()
            .filter(|h| !h.is_empty())
    }
}
