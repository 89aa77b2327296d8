//! HARQ bookkeeping.
//!
//! Two stores live here:
//! - `HarqPhy` for unicast processes: a NACK appends the attempt, an ACK clears the process
//! - `SlHarqPhy` for sidelink communication and discovery, which have no feedback:
//!   every attempt is appended up to a cap, and the history is cleared only when
//!   new data is registered for the identity. A "previously decoded" mark lets
//!   later blind retransmissions of an already delivered TB pass without a draw.

use std::collections::{HashMap, HashSet};

use super::types::Rnti;

/// One past transmission attempt of a transport block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HarqAttempt {
    /// Reliability metric of the attempt (mutual information or effective SINR).
    pub metric: f64,
    pub info_bits: u32,
    pub code_bits: u32,
    /// Effective SINR reported by the error model, only set for sidelink attempts.
    pub sinr: f64,
}

impl HarqAttempt {
    pub fn data(metric: f64, info_bytes: u32, code_bytes: u32) -> Self {
        Self { metric, info_bits: info_bytes * 8, code_bits: code_bytes * 8, sinr: 0.0 }
    }

    /// Sidelink attempts carry no sizes; the SINR doubles as the combining metric.
    pub fn sidelink(sinr: f64) -> Self {
        Self { metric: sinr, info_bits: 0, code_bits: 0, sinr }
    }
}

/// Unicast HARQ process identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HarqProcessKey {
    pub rnti: Rnti,
    pub harq_process_id: u8,
    pub layer: u8,
    pub downlink: bool,
}

#[derive(Debug, Default)]
pub struct HarqPhy {
    processes: HashMap<HarqProcessKey, Vec<HarqAttempt>>,
}

impl HarqPhy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Past attempts of the process, oldest first.
    pub fn history(&self, key: &HarqProcessKey) -> &[HarqAttempt] {
        self.processes.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn record_nack(&mut self, key: HarqProcessKey, attempt: HarqAttempt) {
        self.processes.entry(key).or_default().push(attempt);
    }

    /// Clear the process. Other layers of the same process keep their history.
    pub fn record_ack(&mut self, key: HarqProcessKey) {
        self.processes.remove(&key);
    }
}

/// Capped attempt history plus previously-decoded marks, keyed by (rnti, sub-identity).
#[derive(Debug)]
struct CappedHistory {
    cap: usize,
    histories: HashMap<(Rnti, u8), Vec<HarqAttempt>>,
    decoded: HashSet<(Rnti, u8)>,
}

impl CappedHistory {
    fn new(cap: usize) -> Self {
        Self { cap, histories: HashMap::new(), decoded: HashSet::new() }
    }

    fn history(&self, key: (Rnti, u8)) -> &[HarqAttempt] {
        self.histories.get(&key).map(Vec::as_slice).unwrap_or(&[])
    }

    fn update(&mut self, key: (Rnti, u8), attempt: HarqAttempt) {
        let history = self.histories.entry(key).or_default();
        if history.len() < self.cap {
            history.push(attempt);
        }
    }

    fn reset(&mut self, key: (Rnti, u8)) {
        self.histories.remove(&key);
        self.decoded.remove(&key);
    }
}

/// Sidelink communication and discovery HARQ state.
#[derive(Debug)]
pub struct SlHarqPhy {
    communication: CappedHistory,
    discovery: CappedHistory,
}

impl SlHarqPhy {
    pub fn new(sl_max_attempts: usize, disc_num_retx: u8) -> Self {
        Self { communication: CappedHistory::new(sl_max_attempts), discovery: CappedHistory::new(disc_num_retx as usize) }
    }

    pub fn set_disc_num_retx(&mut self, retx: u8) {
        self.discovery.cap = retx as usize;
    }

    pub fn sl_history(&self, rnti: Rnti, l1_dst: u8) -> &[HarqAttempt] {
        self.communication.history((rnti, l1_dst))
    }

    pub fn update_sl(&mut self, rnti: Rnti, l1_dst: u8, sinr: f64) {
        self.communication.update((rnti, l1_dst), HarqAttempt::sidelink(sinr));
    }

    pub fn is_sl_decoded(&self, rnti: Rnti, l1_dst: u8) -> bool {
        self.communication.decoded.contains(&(rnti, l1_dst))
    }

    pub fn mark_sl_decoded(&mut self, rnti: Rnti, l1_dst: u8) {
        self.communication.decoded.insert((rnti, l1_dst));
    }

    /// Forget history, decoded mark and TB counter of a sidelink identity.
    pub fn reset_sl(&mut self, rnti: Rnti, l1_dst: u8) {
        self.communication.reset((rnti, l1_dst));
    }

    pub fn disc_history(&self, rnti: Rnti, res_psdch: u8) -> &[HarqAttempt] {
        self.discovery.history((rnti, res_psdch))
    }

    pub fn update_disc(&mut self, rnti: Rnti, res_psdch: u8, sinr: f64) {
        self.discovery.update((rnti, res_psdch), HarqAttempt::sidelink(sinr));
    }

    pub fn is_disc_decoded(&self, rnti: Rnti, res_psdch: u8) -> bool {
        self.discovery.decoded.contains(&(rnti, res_psdch))
    }

    pub fn mark_disc_decoded(&mut self, rnti: Rnti, res_psdch: u8) {
        self.discovery.decoded.insert((rnti, res_psdch));
    }

    pub fn reset_disc(&mut self, rnti: Rnti, res_psdch: u8) {
        self.discovery.reset((rnti, res_psdch));
    }
}
