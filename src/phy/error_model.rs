//! Error-rate lookup used by the decode engine and the collision resolver.
//!
//! The receiver only depends on the [`ErrorModel`] trait. Two reference models
//! are provided:
//! - [`ThresholdErrorModel`]: step curve on the effective SINR, useful for deterministic tests
//! - [`LogisticErrorModel`]: smooth per-MCS BLER curve for scenario runs
//!
//! Both combine HARQ history by chase combining: the linear SINR metrics of all
//! previous attempts are added to the current one.

use super::harq::HarqAttempt;
use super::spectrum::{SpectrumValue, linear_to_db};

/// Effective coding rate per MCS index (0-28).
pub const EFFECTIVE_CODING_RATE: [f64; 29] = [
    0.08, 0.1, 0.11, 0.15, 0.19, 0.24, 0.3, 0.37, 0.44, 0.51, 0.3, 0.33, 0.37, 0.42, 0.48, 0.54, 0.6, 0.43, 0.45, 0.5, 0.55, 0.6, 0.65, 0.7,
    0.75, 0.8, 0.85, 0.89, 0.92,
];

/// Coding rate of `mcs`, clamped to the highest table entry.
pub fn effective_coding_rate(mcs: u8) -> f64 {
    EFFECTIVE_CODING_RATE[(mcs as usize).min(EFFECTIVE_CODING_RATE.len() - 1)]
}

/// Result of an error-model query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TbStats {
    /// Transport block error probability in `[0, 1]`.
    pub tbler: f64,
    /// Reliability metric of this attempt, stored in HARQ history.
    pub metric: f64,
}

/// Control-plane message families with their own error curves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageClass {
    DownlinkControl,
    SidelinkControl,
    SidelinkBroadcast,
    SidelinkDiscovery,
}

/// Inputs of a data transport-block query.
#[derive(Debug, Clone, Copy)]
pub struct DataQuery<'a> {
    pub mcs: u8,
    /// Payload size in bytes.
    pub size: u32,
    /// Per-RB linear SINR of the whole reception.
    pub sinr: &'a SpectrumValue,
    /// RBs the TB occupies.
    pub rb_map: &'a [usize],
    /// Earlier attempts of the same TB, oldest first. Empty for new data.
    pub history: &'a [HarqAttempt],
}

impl DataQuery<'_> {
    /// Mean linear SINR over the TB's RBs.
    pub fn mean_sinr(&self) -> f64 {
        self.sinr.mean_over(self.rb_map)
    }
}

/// Pluggable error-rate tables.
pub trait ErrorModel {
    /// Error statistics of a data TB (PDSCH, PUSCH, PSSCH).
    fn data_tb_stats(&self, query: &DataQuery<'_>) -> TbStats;

    /// Error statistics of a control, broadcast or discovery message.
    fn message_tb_stats(&self, class: MessageClass, mean_sinr: f64, history: &[HarqAttempt]) -> TbStats;

    fn effective_coding_rate(&self, mcs: u8) -> f64 {
        effective_coding_rate(mcs)
    }
}

fn combined_sinr(current: f64, history: &[HarqAttempt]) -> f64 {
    current + history.iter().map(|attempt| attempt.metric).sum::<f64>()
}

/// Step curve: a TB whose combined SINR reaches the threshold is always decoded,
/// anything below is always lost.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdErrorModel {
    pub threshold_db: f64,
}

impl ThresholdErrorModel {
    pub fn new(threshold_db: f64) -> Self {
        Self { threshold_db }
    }

    fn stats(&self, current: f64, history: &[HarqAttempt]) -> TbStats {
        let effective_db = linear_to_db(combined_sinr(current, history));
        let tbler = if effective_db >= self.threshold_db { 0.0 } else { 1.0 };
        TbStats { tbler, metric: current }
    }
}

impl ErrorModel for ThresholdErrorModel {
    fn data_tb_stats(&self, query: &DataQuery<'_>) -> TbStats {
        self.stats(query.mean_sinr(), query.history)
    }

    fn message_tb_stats(&self, _class: MessageClass, mean_sinr: f64, history: &[HarqAttempt]) -> TbStats {
        self.stats(mean_sinr, history)
    }
}

/// Logistic BLER curve `1 / (1 + exp(slope * (sinr_db - midpoint_db)))`.
///
/// The data midpoint grows with the MCS coding rate; each message class has a
/// fixed midpoint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogisticErrorModel {
    /// Steepness of the curve in 1/dB.
    pub slope: f64,
    /// Extra SINR (dB) the data curve requires on top of the coding-rate capacity bound.
    pub data_margin_db: f64,
}

impl Default for LogisticErrorModel {
    fn default() -> Self {
        Self { slope: 1.5, data_margin_db: 1.0 }
    }
}

impl LogisticErrorModel {
    fn bler(&self, sinr_db: f64, midpoint_db: f64) -> f64 {
        1.0 / (1.0 + (self.slope * (sinr_db - midpoint_db)).exp())
    }

    /// SINR at which a TB of `mcs` has a 50% error rate.
    pub fn data_midpoint_db(&self, mcs: u8) -> f64 {
        // Modulation order steps at MCS 10 and 17.
        let bits_per_symbol = match mcs {
            0..=9 => 2.0,
            10..=16 => 4.0,
            _ => 6.0,
        };
        let spectral_efficiency = bits_per_symbol * effective_coding_rate(mcs);
        linear_to_db(2f64.powf(spectral_efficiency) - 1.0) + self.data_margin_db
    }

    fn message_midpoint_db(class: MessageClass) -> f64 {
        match class {
            MessageClass::DownlinkControl => -4.0,
            MessageClass::SidelinkControl => -3.0,
            MessageClass::SidelinkBroadcast => -2.0,
            MessageClass::SidelinkDiscovery => -1.0,
        }
    }
}

impl ErrorModel for LogisticErrorModel {
    fn data_tb_stats(&self, query: &DataQuery<'_>) -> TbStats {
        let current = query.mean_sinr();
        let effective_db = linear_to_db(combined_sinr(current, query.history));
        TbStats { tbler: self.bler(effective_db, self.data_midpoint_db(query.mcs)), metric: current }
    }

    fn message_tb_stats(&self, class: MessageClass, mean_sinr: f64, history: &[HarqAttempt]) -> TbStats {
        let effective_db = linear_to_db(combined_sinr(mean_sinr, history));
        TbStats { tbler: self.bler(effective_db, Self::message_midpoint_db(class)), metric: mean_sinr }
    }
}
