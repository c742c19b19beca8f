//! Typed server configuration, serde-deserialized from a JSON file,
//! following the config-reload pattern of a JSON-backed `AppState`:
//! read the file, parse it, validate, replace the in-memory copy.
//! Unlike that hot-reloadable lobby config, the options here are only read once at startup — the server has no persisted
//! state to reconcile against a changed config mid-game.

use std::fs;
use std::net::SocketAddr;
use std::path::Path;

use ctf_common::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FriendlyFire {
    Off,
    On,
    OnGrief,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub max_players: u32,
    pub max_connections_per_ip: u32,
    pub max_score: u32,
    pub respawn_time: f64,
    pub refill_interval: f64,
    pub friendly_fire: FriendlyFire,
    pub friendly_fire_time: f64,
    pub server_prefix: String,
    pub speedhack_detect: bool,
    pub fog_color: (u8, u8, u8),
    pub name: String,
    pub version: i32,
    pub bind_addr: SocketAddr,
    pub update_frequency_hz: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_players: 20,
            max_connections_per_ip: 0,
            max_score: 10,
            respawn_time: 5.0,
            refill_interval: 20.0,
            friendly_fire: FriendlyFire::Off,
            friendly_fire_time: 2.0,
            server_prefix: "[*]".to_string(),
            speedhack_detect: true,
            fog_color: (128, 232, 255),
            name: "ctf server".to_string(),
            version: 3,
            bind_addr: "0.0.0.0:32887".parse().unwrap(),
            update_frequency_hz: crate::constants::UPDATE_FREQUENCY_HZ,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let text = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let config: Config = serde_json::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_players == 0 || self.max_players > 32 {
            return Err(ConfigError::OutOfRange {
                field: "max_players",
                reason: "must be in 1..=32".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn max_players_above_32_is_rejected() {
        let mut config = Config::default();
        config.max_players = 64;
        assert!(config.validate().is_err());
    }
}
