//! Bridge configuration
//!
//! Layered loading via figment: built-in defaults, then an optional YAML
//! file, then `KNXBRIDGE_`-prefixed environment variables. Every field
//! has a default so a bare environment still produces a runnable
//! simulation setup.

use std::path::Path;

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};
use crate::queue::OverflowPolicy;

/// Controller-side settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlcConfig {
    /// Controller endpoint address
    pub host: String,
    pub rack: u16,
    pub slot: u16,
    /// Data block number holding the point records
    pub db_number: u16,
    /// Offset of the first record; the bytes before it carry the block
    /// size header
    pub start_offset: usize,
    /// Poll period in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for PlcConfig {
    fn default() -> Self {
        Self {
            host: "192.168.0.1".to_string(),
            rack: 0,
            slot: 1,
            db_number: 100,
            start_offset: 2,
            poll_interval_ms: 100,
        }
    }
}

/// Bus-side settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnxConfig {
    /// IP gateway address
    pub gateway: String,
    pub port: u16,
    /// Physical address this bridge announces on the bus
    pub physical_address: String,
    /// Dispatcher tick in milliseconds; one queued item leaves per tick
    pub dispatch_interval_ms: u64,
}

impl Default for KnxConfig {
    fn default() -> Self {
        Self {
            gateway: "224.0.23.12".to_string(),
            port: 3671,
            physical_address: "1.1.255".to_string(),
            dispatch_interval_ms: 20,
        }
    }
}

/// Outbound queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub capacity: usize,
    pub overflow_policy: OverflowPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            overflow_policy: OverflowPolicy::DropOldest,
        }
    }
}

/// Top-level bridge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub plc: PlcConfig,
    pub knx: KnxConfig,
    pub queue: QueueConfig,
}

impl BridgeConfig {
    /// Load configuration: defaults, overlaid by `path` if it exists,
    /// overlaid by `KNXBRIDGE_`-prefixed environment variables
    /// (e.g. `KNXBRIDGE_PLC.POLL_INTERVAL_MS=50`).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let config: BridgeConfig = Figment::new()
            .merge(Serialized::defaults(BridgeConfig::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("KNXBRIDGE_").split("."))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.plc.host.is_empty() {
            return Err(BridgeError::config("plc.host must not be empty"));
        }
        if self.plc.poll_interval_ms == 0 {
            return Err(BridgeError::config("plc.poll_interval_ms must be > 0"));
        }
        if self.knx.dispatch_interval_ms == 0 {
            return Err(BridgeError::config("knx.dispatch_interval_ms must be > 0"));
        }
        if self.queue.capacity == 0 {
            return Err(BridgeError::config("queue.capacity must be > 0"));
        }
        Ok(())
    }
}
