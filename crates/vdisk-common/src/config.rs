//! Configuration types for vdisk
//!
//! A node reads its configuration from an optional TOML file layered
//! with `VDISK__`-prefixed environment variables
//! (`VDISK__IO__WORKER_THREADS=8` overrides `io.worker_threads`).

use crate::error::{Error, Result};
use crate::types::{DEFAULT_COPIES, DEFAULT_OBJECT_SIZE};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Root configuration for a vdisk node
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Node configuration
    pub node: NodeConfig,
    /// Cluster-wide defaults
    pub cluster: ClusterConfig,
    /// Request processing
    pub io: IoConfig,
    /// Logging
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from `path` (if it exists) and the environment
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let loaded: Self = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(config::Environment::with_prefix("VDISK").separator("__"))
            .build()
            .and_then(config::Config::try_deserialize)
            .map_err(|e| Error::configuration(format!("{}: {e}", path.display())))?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if !self.cluster.object_size.is_power_of_two() {
            return Err(Error::configuration(format!(
                "object size {} is not a power of two",
                self.cluster.object_size
            )));
        }
        if self.cluster.copies == 0 {
            return Err(Error::configuration("copies must be at least 1"));
        }
        if self.io.worker_threads == 0 {
            return Err(Error::configuration("worker_threads must be at least 1"));
        }
        Ok(())
    }
}

/// Node identity and role configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Address this node is known by
    pub listen: SocketAddr,
    /// Failure zone
    pub zone: u32,
    /// Serve gateway requests only, store no objects
    pub gateway_only: bool,
    /// Directory for node state and the plain store
    pub data_dir: PathBuf,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 7000)),
            zone: 0,
            gateway_only: false,
            data_dir: PathBuf::from("/var/lib/vdisk"),
        }
    }
}

/// Cluster-wide defaults applied at format time
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Default number of copies for new VDIs
    pub copies: u8,
    /// Store driver used when formatting
    pub store: String,
    /// Object size in bytes (power of two)
    pub object_size: u64,
    /// Format the cluster at start-up if it is not formatted yet
    pub auto_format: bool,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            copies: DEFAULT_COPIES,
            store: "plain".to_string(),
            object_size: DEFAULT_OBJECT_SIZE,
            auto_format: false,
        }
    }
}

/// Request processing configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct IoConfig {
    /// Size of the work-stage worker pool
    pub worker_threads: usize,
    /// Depth of the main-stage queue
    pub main_queue_depth: usize,
    /// Keep a per-VDI object cache
    pub enable_object_cache: bool,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            worker_threads: 16,
            main_queue_depth: 1024,
            enable_object_cache: false,
        }
    }
}

/// Logging configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
    /// Emit JSON lines instead of text
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
