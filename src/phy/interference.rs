//! Interference and SINR accumulation for one receive track.
//!
//! Every signal present on the medium is recorded with its start and end time,
//! whether or not the receiver locks onto it. Signals the receiver does lock
//! onto are additionally started as useful signals. When the reception ends,
//! the interval is split at every start/end instant and the per-RB SINR of
//! each piece is averaged, weighted by the piece duration.
//!
//! Two read-outs exist:
//! - combined: all useful signals together form one useful power (data, control, SRS)
//! - per signal: each useful signal gets its own SINR with the others as interference (sidelink)

use embassy_time::{Duration, Instant};

use super::spectrum::SpectrumValue;

#[derive(Debug, Clone)]
struct MediumSignal {
    psd: SpectrumValue,
    start: Instant,
    end: Instant,
}

#[derive(Debug, Default)]
pub struct InterferenceAccumulator {
    noise: SpectrumValue,
    signals: Vec<MediumSignal>,
    useful: Vec<SpectrumValue>,
    rx_start: Option<Instant>,
}

impl InterferenceAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_noise(&mut self, noise: SpectrumValue) {
        self.noise = noise;
    }

    /// Record a signal present on the medium during `[now, now + duration]`.
    pub fn add_signal(&mut self, psd: &SpectrumValue, now: Instant, duration: Duration) {
        // Signals over before the open reception (or now, when idle) can no longer contribute.
        let horizon = self.rx_start.unwrap_or(now);
        self.signals.retain(|s| s.end > horizon);
        self.signals.push(MediumSignal { psd: psd.clone(), start: now, end: now + duration });
    }

    /// Lock onto a signal already recorded with [`add_signal`](Self::add_signal).
    ///
    /// The first call opens the reception interval.
    pub fn start_rx(&mut self, psd: &SpectrumValue, now: Instant) {
        if self.rx_start.is_none() {
            self.rx_start = Some(now);
        }
        self.useful.push(psd.clone());
    }

    pub fn is_receiving(&self) -> bool {
        self.rx_start.is_some()
    }

    /// Close the interval and return the SINR of the summed useful signals.
    ///
    /// Returns an empty vector when nothing was started.
    pub fn end_rx_combined(&mut self, now: Instant) -> SpectrumValue {
        let mut combined = SpectrumValue::default();
        for psd in &self.useful {
            combined.add_assign(psd);
        }
        let result = match self.rx_start {
            Some(start) => self.average_sinr(start, now, &combined),
            None => SpectrumValue::default(),
        };
        self.finish(now);
        result
    }

    /// Close the interval and return one SINR vector per useful signal, in start order.
    pub fn end_rx(&mut self, now: Instant) -> Vec<SpectrumValue> {
        let result = match self.rx_start {
            Some(start) => self.useful.iter().map(|useful| self.average_sinr(start, now, useful)).collect(),
            None => Vec::new(),
        };
        self.finish(now);
        result
    }

    /// Drop the current reception and every recorded signal.
    pub fn reset(&mut self) {
        self.signals.clear();
        self.useful.clear();
        self.rx_start = None;
    }

    fn finish(&mut self, now: Instant) {
        self.useful.clear();
        self.rx_start = None;
        // Nothing ending by `now` can overlap a reception that starts at or after it.
        self.signals.retain(|s| s.end > now);
    }

    /// Time-weighted average of `useful / (all - useful + noise)` over `[start, end]`.
    fn average_sinr(&self, start: Instant, end: Instant, useful: &SpectrumValue) -> SpectrumValue {
        let mut breakpoints = vec![start, end];
        for signal in &self.signals {
            if signal.start > start && signal.start < end {
                breakpoints.push(signal.start);
            }
            if signal.end > start && signal.end < end {
                breakpoints.push(signal.end);
            }
        }
        breakpoints.sort();
        breakpoints.dedup();

        if breakpoints.len() < 2 {
            // Zero-length interval: evaluate the instantaneous medium at `start`.
            return self.chunk_sinr(start, start, useful);
        }

        let mut weighted = SpectrumValue::default();
        let mut total_ticks = 0u64;
        for pair in breakpoints.windows(2) {
            let ticks = (pair[1] - pair[0]).as_ticks();
            if ticks == 0 {
                continue;
            }
            let chunk = self.chunk_sinr(pair[0], pair[1], useful);
            weighted.add_assign(&chunk.scaled(ticks as f64));
            total_ticks += ticks;
        }
        if total_ticks > 0 {
            weighted = SpectrumValue::from_values(weighted.values().iter().map(|v| v / total_ticks as f64).collect());
        }
        weighted
    }

    fn chunk_sinr(&self, from: Instant, to: Instant, useful: &SpectrumValue) -> SpectrumValue {
        let mut all = SpectrumValue::default();
        for signal in self.signals.iter().filter(|s| s.start <= from && s.end >= to && s.end > from) {
            all.add_assign(&signal.psd);
        }
        all.sub_assign(useful);

        let num_rbs = useful.len().max(all.len()).max(self.noise.len());
        let values = (0..num_rbs)
            .map(|rb| {
                let signal = useful.get(rb);
                let denominator = all.get(rb) + self.noise.get(rb);
                if denominator > 0.0 {
                    signal / denominator
                } else if signal > 0.0 {
                    f64::INFINITY
                } else {
                    0.0
                }
            })
            .collect();
        SpectrumValue::from_values(values)
    }
}
