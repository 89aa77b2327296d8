//! Transport-block decode engine.
//!
//! A TB is decided with exactly one uniform draw `u` in `[0, 1)` against the
//! error probability `p` returned by the error model: the TB is corrupted when
//! `u <= p`. The outcome is stored in the TB's `corrupted` field, which also
//! guards against deciding the same TB twice in one episode.

use log::debug;
use rand::Rng;

use super::error_model::{DataQuery, ErrorModel};
use super::harq::HarqAttempt;
use super::spectrum::SpectrumValue;
use super::types::{TbIdentity, TbInfo};
use crate::error::PhyError;

/// Result of deciding one TB.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TbOutcome {
    pub corrupted: bool,
    pub metric: f64,
    pub tbler: f64,
}

/// One Bernoulli draw: corrupted with probability `tbler`.
pub fn draw_corrupted<R: Rng>(rng: &mut R, tbler: f64) -> bool {
    let u: f64 = rng.gen_range(0.0..1.0);
    u <= tbler
}

/// Shared knobs of one decode pass.
pub struct DecodeEngine<'a, R: Rng> {
    pub error_model: &'a dyn ErrorModel,
    pub rng: &'a mut R,
    pub error_model_enabled: bool,
}

impl<R: Rng> DecodeEngine<'_, R> {
    /// Decide a unicast TB from the reception SINR.
    ///
    /// `history` is ignored for new data. With the error model disabled the
    /// TB is always correct and no draw is made.
    pub fn decode(&mut self, identity: TbIdentity, info: &mut TbInfo, sinr: &SpectrumValue, history: &[HarqAttempt]) -> Result<TbOutcome, PhyError> {
        if info.corrupted.is_some() {
            return Err(PhyError::DoubleDecode { identity });
        }
        let history: &[HarqAttempt] = if info.ndi { &[] } else { history };
        let outcome = if self.error_model_enabled {
            let stats = self.error_model.data_tb_stats(&DataQuery { mcs: info.mcs, size: info.size, sinr, rb_map: &info.rb_map, history });
            TbOutcome { corrupted: draw_corrupted(&mut *self.rng, stats.tbler), metric: stats.metric, tbler: stats.tbler }
        } else {
            TbOutcome { corrupted: false, metric: sinr.mean_over(&info.rb_map), tbler: 0.0 }
        };
        info.corrupted = Some(outcome.corrupted);
        info.metric = outcome.metric;
        debug!(
            "TB {:?}: mcs {} size {} rbs {} harq attempts {} tbler {:.4} corrupted {}",
            identity,
            info.mcs,
            info.size,
            info.rb_map.len(),
            history.len(),
            outcome.tbler,
            outcome.corrupted
        );
        Ok(outcome)
    }

    /// Decide a sidelink data TB.
    ///
    /// A TB on a collided RB is corrupted and a TB already delivered by an
    /// earlier attempt is correct; neither consumes a draw.
    pub fn decode_sidelink(
        &mut self,
        identity: TbIdentity,
        info: &mut TbInfo,
        sinr: &SpectrumValue,
        history: &[HarqAttempt],
        previously_decoded: bool,
        collided: bool,
    ) -> Result<TbOutcome, PhyError> {
        if info.corrupted.is_some() {
            return Err(PhyError::DoubleDecode { identity });
        }
        let history: &[HarqAttempt] = if info.ndi { &[] } else { history };
        let outcome = if self.error_model_enabled {
            let stats = self.error_model.data_tb_stats(&DataQuery { mcs: info.mcs, size: info.size, sinr, rb_map: &info.rb_map, history });
            let corrupted = if collided {
                true
            } else if previously_decoded {
                false
            } else {
                draw_corrupted(&mut *self.rng, stats.tbler)
            };
            TbOutcome { corrupted, metric: stats.metric, tbler: stats.tbler }
        } else {
            TbOutcome { corrupted: collided, metric: sinr.mean_over(&info.rb_map), tbler: 0.0 }
        };
        info.corrupted = Some(outcome.corrupted);
        info.metric = outcome.metric;
        info.sinr = outcome.metric;
        debug!(
            "SL TB {:?}: mcs {} rbs {:?} attempts {} tbler {:.4} collided {} previously decoded {} corrupted {}",
            identity,
            info.mcs,
            info.rb_map,
            history.len(),
            outcome.tbler,
            collided,
            previously_decoded,
            outcome.corrupted
        );
        Ok(outcome)
    }
}
