//! Simulation configuration loading and validation.
//!
//! The configuration is a TOML file with kebab-case keys. Every key is optional;
//! missing keys fall back to the defaults of the reference radio model
//! (250 kbit/s, error free channel, 64-bit headers, 5 ms backoff slots).
//!
//! ```toml
//! until = 15.0
//! timescale = 0.0
//! seed = 42
//! default-tx-range = 120.0
//!
//! [phy]
//! bitrate = 250000.0
//! ber = 0.0
//!
//! [mac]
//! slot-time = 0.005
//! max-retries = 7
//! ```

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::ConfigError;

/// Physical layer parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PhyConfig {
    /// Channel bitrate in bits per second.
    pub bitrate: f64,
    /// Independent per-bit error probability.
    pub ber: f64,
}

impl Default for PhyConfig {
    fn default() -> Self {
        Self { bitrate: 250e3, ber: 0.0 }
    }
}

/// Medium access layer parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct MacConfig {
    /// Header bits added to every frame; also the size of an ack frame.
    pub header_bits: u64,
    /// Backoff slot length in seconds.
    pub slot_time: f64,
    /// Extra time beyond the frame airtime to wait for an ack, in seconds.
    pub ack_guard: f64,
    /// Backoff windows stop doubling at `2^max_backoff_exponent` slots.
    pub max_backoff_exponent: u32,
    /// Give up on a unicast frame after this many retransmissions. `None` retries forever.
    pub max_retries: Option<u32>,
}

impl Default for MacConfig {
    fn default() -> Self {
        Self { header_bits: 64, slot_time: 5e-3, ack_guard: 1e-3, max_backoff_exponent: 10, max_retries: None }
    }
}

/// Network layer parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct NetConfig {
    pub header_bits: u64,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self { header_bits: 64 }
    }
}

/// Top level simulation configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SimConfig {
    /// Virtual time horizon in seconds.
    pub until: f64,
    /// Real seconds per virtual second. Zero or negative runs unpaced.
    pub timescale: f64,
    /// Seed of the simulation-wide random number generator.
    pub seed: u64,
    /// Transmit range given to nodes that do not set their own.
    pub default_tx_range: f64,
    /// Interval of time ticks sent to the scene, in virtual seconds. Zero disables ticks.
    pub scene_tick: f64,
    pub phy: PhyConfig,
    pub mac: MacConfig,
    pub net: NetConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            until: 100.0,
            timescale: 0.0,
            seed: 0,
            default_tx_range: 100.0,
            scene_tick: 0.1,
            phy: PhyConfig::default(),
            mac: MacConfig::default(),
            net: NetConfig::default(),
        }
    }
}

impl SimConfig {
    /// Default configuration with a different horizon.
    pub fn with_until(until: f64) -> Self {
        Self { until, ..Self::default() }
    }

    /// Load configuration from a TOML file.
    ///
    /// # Arguments
    /// * `config_path` - Path to the config.toml file
    ///
    /// # Returns
    /// * `Ok(SimConfig)` if the file was successfully loaded, parsed and validated
    /// * `Err(ConfigError)` with a descriptive error message otherwise
    pub fn load(config_path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))
            .map_err(|e| ConfigError::FileRead(format!("{:#}", e)))?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: SimConfig = toml::from_str(content)
            .context("Invalid TOML format")
            .map_err(|e| ConfigError::Parse(format!("{:#}", e)))?;
        config.validate().map_err(ConfigError::Validation)?;
        Ok(config)
    }

    /// Reject values the radio model cannot work with.
    ///
    /// # Returns
    ///
    /// `Ok(())` if validation passes, `Err(String)` with error description otherwise.
    pub fn validate(&self) -> Result<(), String> {
        const MAX_BACKOFF_EXPONENT: u32 = 32;

        if !(self.until >= 0.0) || !self.until.is_finite() {
            return Err(format!("Invalid until {}, must be a finite non-negative time", self.until));
        }
        if self.timescale.is_nan() {
            return Err("Invalid timescale, must be a number".to_string());
        }
        if !(self.default_tx_range >= 0.0) {
            return Err(format!("Invalid default-tx-range {}, must be non-negative", self.default_tx_range));
        }
        if !(self.scene_tick >= 0.0) {
            return Err(format!("Invalid scene-tick {}, must be non-negative", self.scene_tick));
        }
        if !(self.phy.bitrate > 0.0) || !self.phy.bitrate.is_finite() {
            return Err(format!("Invalid phy bitrate {}, must be positive", self.phy.bitrate));
        }
        if !(0.0..=1.0).contains(&self.phy.ber) {
            return Err(format!("Invalid phy ber {}, must be within 0-1", self.phy.ber));
        }
        if !(self.mac.slot_time >= 0.0) || !self.mac.slot_time.is_finite() {
            return Err(format!("Invalid mac slot-time {}, must be non-negative", self.mac.slot_time));
        }
        if !(self.mac.ack_guard >= 0.0) || !self.mac.ack_guard.is_finite() {
            return Err(format!("Invalid mac ack-guard {}, must be non-negative", self.mac.ack_guard));
        }
        if self.mac.max_backoff_exponent > MAX_BACKOFF_EXPONENT {
            return Err(format!(
                "Invalid mac max-backoff-exponent {}, must be at most {}",
                self.mac.max_backoff_exponent, MAX_BACKOFF_EXPONENT
            ));
        }
        Ok(())
    }
}
