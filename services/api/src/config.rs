//! Environment configuration consumed by the core
//!
//! Everything tunable lands in `BRIDGE_*` variables with conservative
//! defaults. Adapter-specific settings (RPC URLs, accounts) are passed at
//! adapter construction, never through globals.

use std::path::PathBuf;
use std::time::Duration;

use relay_engine::EngineConfig;
use transfer_manager::ManagerConfig;
use types::ChainConfig;

/// Core configuration resolved from the environment
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// `BRIDGE_REPLAY_PATH` - replay store log file
    pub replay_path: PathBuf,
    /// `BRIDGE_REPLAY_RETENTION_HOURS` - minimum fingerprint age before pruning
    pub replay_retention: Duration,
    /// `BRIDGE_DEADLINE_SWEEP_INTERVAL_SECONDS`
    pub sweep_interval: Duration,
    /// `BRIDGE_SUBMIT_TIMEOUT_SECONDS`
    pub submit_timeout: Duration,
    /// `BRIDGE_CONFIRM_POLL_INTERVAL_SECONDS`
    pub confirm_poll_interval: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            replay_path: PathBuf::from("./data/replay.log"),
            replay_retention: Duration::from_secs(48 * 3600),
            sweep_interval: Duration::from_secs(30),
            submit_timeout: Duration::from_secs(30),
            confirm_poll_interval: Duration::from_secs(5),
        }
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl BridgeConfig {
    /// Resolve from `BRIDGE_*` environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            replay_path: std::env::var("BRIDGE_REPLAY_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.replay_path),
            replay_retention: Duration::from_secs(env_u64("BRIDGE_REPLAY_RETENTION_HOURS", 48) * 3600),
            sweep_interval: Duration::from_secs(env_u64(
                "BRIDGE_DEADLINE_SWEEP_INTERVAL_SECONDS",
                30,
            )),
            submit_timeout: Duration::from_secs(env_u64("BRIDGE_SUBMIT_TIMEOUT_SECONDS", 30)),
            confirm_poll_interval: Duration::from_secs(env_u64(
                "BRIDGE_CONFIRM_POLL_INTERVAL_SECONDS",
                5,
            )),
        }
    }

    /// Retention must cover at least twice the longest chain finality;
    /// anything shorter is raised to that floor
    pub fn clamp_retention(&mut self, chains: &[ChainConfig]) {
        let longest = chains
            .iter()
            .map(|c| c.finality_window())
            .max()
            .unwrap_or_default();
        let floor = longest * 2;
        if self.replay_retention < floor {
            tracing::warn!(
                "replay retention {:?} below 2x longest finality; raised to {:?}",
                self.replay_retention,
                floor
            );
            self.replay_retention = floor;
        }
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            sweep_interval: self.sweep_interval,
            adapter_timeout: self.submit_timeout,
            ..ManagerConfig::default()
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            submit_timeout: self.submit_timeout,
            confirm_poll_interval: self.confirm_poll_interval,
            ..EngineConfig::default()
        }
    }
}
