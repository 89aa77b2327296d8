//! Greedy collision resolution for broadcast control and discovery channels.
//!
//! When several messages arrive on the same RBs, the receiver cannot tell how
//! many transmissions overlapped. Candidates are tried strongest first:
//! - a candidate touching an RB already awarded to a decoded message is lost
//! - otherwise the caller's decision (error model, previous decode) applies
//! - a decoded candidate claims all of its RBs
//!
//! With drop-on-collision enabled, every RB used by more than one candidate
//! is marked collided up front and every candidate touching one is lost.

use log::debug;
use std::collections::HashSet;

/// A message competing for RBs.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// Arrival index within the episode. Breaks ties between equal SINRs.
    pub index: usize,
    /// Mean linear SINR over `rbs`.
    pub mean_sinr: f64,
    pub rbs: Vec<usize>,
}

/// Why a candidate was lost, or that it was decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Decoded,
    /// Failed the error-model draw.
    Corrupted,
    /// Shared an RB with a stronger decoded message.
    Overlapped,
    /// Touched an RB used by several candidates with drop-on-collision enabled.
    Collided,
}

impl Verdict {
    pub fn is_decoded(self) -> bool {
        self == Verdict::Decoded
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub index: usize,
    pub mean_sinr: f64,
    pub verdict: Verdict,
}

/// RBs used by more than one candidate.
pub fn collided_rbs<'a>(rb_sets: impl IntoIterator<Item = &'a [usize]>) -> HashSet<usize> {
    let mut seen = HashSet::new();
    let mut collided = HashSet::new();
    for rbs in rb_sets {
        // A message listing an RB twice does not collide with itself.
        let own: HashSet<usize> = rbs.iter().copied().collect();
        for rb in own {
            if !seen.insert(rb) {
                collided.insert(rb);
            }
        }
    }
    collided
}

/// Resolve `candidates` in descending mean-SINR order.
///
/// `decide` is called only for candidates that are neither collided nor
/// overlapping a claimed RB; it returns `true` when the candidate decodes.
/// Outcomes are returned in processing order.
pub fn resolve<F>(mut candidates: Vec<Candidate>, drop_on_collision: bool, mut decide: F) -> Vec<Outcome>
where
    F: FnMut(&Candidate) -> bool,
{
    candidates.sort_by(|a, b| b.mean_sinr.total_cmp(&a.mean_sinr).then(a.index.cmp(&b.index)));

    let collided = if drop_on_collision { collided_rbs(candidates.iter().map(|c| c.rbs.as_slice())) } else { HashSet::new() };
    let mut claimed: HashSet<usize> = HashSet::new();
    let mut outcomes = Vec::with_capacity(candidates.len());

    for candidate in candidates {
        let verdict = if candidate.rbs.iter().any(|rb| collided.contains(rb)) {
            Verdict::Collided
        } else if candidate.rbs.iter().any(|rb| claimed.contains(rb)) {
            Verdict::Overlapped
        } else if decide(&candidate) {
            claimed.extend(candidate.rbs.iter().copied());
            Verdict::Decoded
        } else {
            Verdict::Corrupted
        };
        debug!("Candidate {} (mean SINR {:.3}) on RBs {:?}: {:?}", candidate.index, candidate.mean_sinr, candidate.rbs, verdict);
        outcomes.push(Outcome { index: candidate.index, mean_sinr: candidate.mean_sinr, verdict });
    }
    outcomes
}
