//! config
//!
//! Environment-driven service configuration.
//!
//! `NAMESPACE` is required; the process refuses to start without it.
//! `PORT` defaults to 8080. `CONTROL_PLANE_DIR` points the file-backed
//! control plane at an alternative root (useful for local runs and tests).

use std::env;
use std::path::PathBuf;

/// Default root for the file-backed control plane store.
const DEFAULT_CONTROL_PLANE_DIR: &str = "/etc/gitfusion";

/// Service configuration resolved from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Namespace the Git Server records live in.
    pub namespace: String,
    /// TCP port the HTTP server binds to.
    pub port: u16,
    /// Root directory of the control plane store.
    pub control_plane_dir: PathBuf,
}

impl Config {
    /// Load configuration from the environment.
    pub fn from_env() -> anyhow::Result<Self> {
        let namespace = env::var("NAMESPACE")
            .map_err(|_| anyhow::anyhow!("NAMESPACE environment variable is required"))?;

        if namespace.is_empty() {
            anyhow::bail!("NAMESPACE environment variable is required");
        }

        let port = match env::var("PORT") {
            Ok(raw) => raw
                .parse::<u16>()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid port number, got {raw:?}"))?,
            Err(_) => 8080,
        };

        let control_plane_dir = env::var("CONTROL_PLANE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONTROL_PLANE_DIR));

        Ok(Self {
            namespace,
            port,
            control_plane_dir,
        })
    }
}
