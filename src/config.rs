//! Receiver configuration loading.
//!
//! The configuration is a flat TOML table with kebab-case keys. Every key is
//! optional; missing keys take the defaults below.
//!
//! ```toml
//! data-error-model-enabled = true
//! drop-rb-on-collision = false
//! sl-rx-gain-db = 0.0
//! transmission-mode = 0
//! seed = 42
//! ```

use serde::Deserialize;
use std::path::Path;

/// Number of supported transmission modes.
pub const NUM_TRANSMISSION_MODES: usize = 7;

/// Layers used by each transmission mode.
pub const TX_MODE_LAYERS: [u8; NUM_TRANSMISSION_MODES] = [1, 1, 2, 2, 2, 1, 1];

/// Runtime switches and constants of one receiver.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case", default)]
pub struct ReceiverConfig {
    /// Apply the error model to PDSCH/PUSCH transport blocks.
    pub data_error_model_enabled: bool,
    /// Apply the error model to downlink control.
    pub ctrl_error_model_enabled: bool,
    /// Corrupt every candidate touching an RB used by another candidate.
    pub drop_rb_on_collision: bool,
    pub sl_data_error_model_enabled: bool,
    pub sl_ctrl_error_model_enabled: bool,
    pub sl_discovery_error_model_enabled: bool,
    /// Sidelink receive gain in dB.
    pub sl_rx_gain_db: f64,
    /// Retransmissions per discovery message; also caps the discovery HARQ history.
    pub disc_num_retx: u8,
    /// Cap of the sidelink communication HARQ history.
    pub sl_max_harq_attempts: usize,
    /// Index of the current transmission mode (0-6).
    pub transmission_mode: u8,
    /// Per-mode SINR gain in dB.
    pub tx_mode_gains_db: [f64; NUM_TRANSMISSION_MODES],
    /// Seed of the decode RNG. Entropy-seeded when absent.
    pub seed: Option<u64>,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            data_error_model_enabled: true,
            ctrl_error_model_enabled: true,
            drop_rb_on_collision: false,
            sl_data_error_model_enabled: true,
            sl_ctrl_error_model_enabled: true,
            sl_discovery_error_model_enabled: true,
            sl_rx_gain_db: 0.0,
            disc_num_retx: 3,
            sl_max_harq_attempts: 3,
            transmission_mode: 0,
            tx_mode_gains_db: [0.0; NUM_TRANSMISSION_MODES],
            seed: None,
        }
    }
}

impl ReceiverConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Arguments
    /// * `config_path` - Path to the receiver TOML file
    ///
    /// # Returns
    /// * `Ok(ReceiverConfig)` if the file was read, parsed and validated
    /// * `Err(String)` with a descriptive error message otherwise
    pub fn load(config_path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(config_path).map_err(|e| format!("Failed to read config file: {}", e))?;

        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, String> {
        let config: ReceiverConfig = toml::from_str(content).map_err(|e| format!("Failed to parse config file: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), String> {
        if self.transmission_mode as usize >= NUM_TRANSMISSION_MODES {
            return Err(format!("Invalid transmission-mode {}, must be 0-{}", self.transmission_mode, NUM_TRANSMISSION_MODES - 1));
        }
        if self.disc_num_retx > 3 {
            return Err(format!("Invalid disc-num-retx {}, must be 0-3", self.disc_num_retx));
        }
        if self.sl_max_harq_attempts == 0 {
            return Err("Invalid sl-max-harq-attempts, must be positive".to_string());
        }
        if !self.sl_rx_gain_db.is_finite() {
            return Err("Invalid sl-rx-gain-db, must be finite".to_string());
        }
        if let Some(idx) = self.tx_mode_gains_db.iter().position(|g| !g.is_finite()) {
            return Err(format!("Invalid tx-mode-gains-db entry {}, must be finite", idx));
        }
        Ok(())
    }

    /// Number of layers of the configured transmission mode.
    pub fn layers(&self) -> u8 {
        TX_MODE_LAYERS.get(self.transmission_mode as usize).copied().unwrap_or(1)
    }
}
