//! Radio propagation calculations for the scenario runner.
//!
//! Contains helpers for:
//! - Log-distance path loss with optional log-normal shadowing
//! - Received power and per-RB power spectral densities
//! - dBm / mW conversions
//!
//! Units:
//! - Power: dBm, mW (conversion provided); PSD values are mW per resource block
//! - Distance: meters

use log::warn;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::Deserialize;

use crate::phy::SpectrumValue;

/// Parameters defining the radio channel propagation model.
///
/// The constants of a log-distance path loss model with log-normal shadowing.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct PathLossParameters {
    /// Path loss exponent (n).
    ///
    /// - n = 2.0: Free space
    /// - n = 2.7 to 3.5: Urban areas
    /// - n = 3.0 to 5.0: Indoor obstructed environments
    pub path_loss_exponent: f64,

    /// Standard deviation for log-normal shadowing (σ) in dB. 0.0 disables shadowing.
    pub shadowing_sigma: f64,

    /// Path loss at the reference distance d₀ = 1 m, in dB.
    pub path_loss_at_reference_distance: f64,

    /// Thermal noise power of the receiver in one resource block, in dBm.
    pub noise_floor: f64,
}

/// Calculate the path loss (in dB) at a given distance.
///
/// # Formula
///
/// ```text
/// PL(d) = PL(d₀) + 10 × n × log₁₀(d/d₀) + X_σ
/// where d₀ = 1 meter (reference distance)
/// ```
///
/// `X_σ` is sampled from Normal(0, σ) on every call, so repeated calls with the
/// same distance yield different results. Distances below 1 m return the
/// reference loss.
pub fn calculate_path_loss<R: Rng>(distance: f64, params: &PathLossParameters, rng: &mut R) -> f64 {
    if distance < 1.0 {
        return params.path_loss_at_reference_distance;
    }
    let path_loss = params.path_loss_at_reference_distance + 10.0 * params.path_loss_exponent * distance.log10();
    let shadowing = if params.shadowing_sigma > 0.0 {
        match Normal::new(0.0_f64, params.shadowing_sigma) {
            Ok(normal) => normal.sample(rng),
            Err(err) => {
                warn!("Shadowing disabled, invalid sigma {}: {}", params.shadowing_sigma, err);
                0.0
            }
        }
    } else {
        0.0
    };
    path_loss + shadowing
}

/// Received power (in dBm) for a transmission at `tx_power_dbm` over `distance`.
pub fn calculate_rssi<R: Rng>(distance: f64, tx_power_dbm: f64, params: &PathLossParameters, rng: &mut R) -> f64 {
    tx_power_dbm - calculate_path_loss(distance, params, rng)
}

/// PSD of a transmission spreading `power_dbm` evenly over `rbs`.
pub fn transmit_psd(num_rbs: usize, rbs: &[usize], power_dbm: f64) -> SpectrumValue {
    if rbs.is_empty() {
        return SpectrumValue::zeros(num_rbs);
    }
    SpectrumValue::on_rbs(num_rbs, rbs, dbm_to_mw(power_dbm) / rbs.len() as f64)
}

/// Flat noise PSD at the configured noise floor.
pub fn noise_psd(num_rbs: usize, params: &PathLossParameters) -> SpectrumValue {
    SpectrumValue::from_values(vec![dbm_to_mw(params.noise_floor); num_rbs])
}

/// Convert power from dBm to milliwatts: `P(mW) = 10^(P(dBm) / 10)`.
///
/// ```text
/// 0 dBm   → 1 mW
/// 20 dBm  → 100 mW
/// -10 dBm → 0.1 mW
/// ```
pub fn dbm_to_mw(dbm: f64) -> f64 {
    10f64.powf(dbm / 10.0)
}

/// Convert power from milliwatts to dBm: `P(dBm) = 10 × log₁₀(P(mW))`.
pub fn mw_to_dbm(mw: f64) -> f64 {
    10.0 * mw.log10()
}
