//! Receive-path state machine.
//!
//! The receiver owns one interference accumulator per receive track, the
//! registry of expected TBs and the HARQ stores. Signals are integrated as they
//! arrive; all decoding happens once, at the end-of-reception event of the
//! episode, after which the receiver is idle again.
//!
//! ## Tracks
//!
//! - data (PDSCH/PUSCH): combined SINR, TB decode, HARQ feedback
//! - control (PDCCH): one draw for the whole control region
//! - SRS: interference bookkeeping only
//! - sidelink: per-signal SINR, then PSCCH, PSSCH, PSDCH and PSBCH processing in that order
//!
//! Protocol violations (half-duplex, mismatched simultaneous receptions,
//! cross-track receptions, decoding a TB twice) are returned as [`PhyError`].

use embassy_time::{Duration, Instant};
use log::{debug, trace};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::mem;

use super::collision::{self, Candidate};
use super::decode::{DecodeEngine, draw_corrupted};
use super::error_model::{ErrorModel, MessageClass, TbStats};
use super::harq::{HarqAttempt, HarqPhy, HarqProcessKey, SlHarqPhy};
use super::interference::InterferenceAccumulator;
use super::listener::PhyListener;
use super::registry::TbRegistry;
use super::scheduler::{EventId, PhyEvent, Scheduler};
use super::spectrum::{SpectrumValue, db_to_linear, linear_to_db};
use super::types::{
    Channel, ControlMessage, DiscoveryPool, DownlinkControl, EpisodeAnchor, HarqFeedback, HarqStatus, Packet, ReceiverState, ReceptionStats, Rnti,
    Role, SidelinkFrame, SidelinkPayload, Signal, SignalKind, TbIdentity, TbInfo,
};
use crate::config::{NUM_TRANSMISSION_MODES, ReceiverConfig};
use crate::error::PhyError;

/// Discovery messages use a fixed QPSK modulation.
const DISCOVERY_MCS: u8 = 8;

/// A sidelink frame locked onto during the current episode.
#[derive(Debug)]
struct SidelinkReception {
    frame: SidelinkFrame,
    psd: SpectrumValue,
    rbs: Vec<usize>,
}

pub struct Receiver {
    node_id: u32,
    role: Role,
    cell_id: u16,
    slss_id: u16,
    config: ReceiverConfig,
    groups: HashSet<u32>,
    discovery_apps: HashSet<u32>,
    discovery_pools: Vec<DiscoveryPool>,

    scheduler: Box<dyn Scheduler>,
    listener: Box<dyn PhyListener>,
    error_model: Box<dyn ErrorModel>,
    rng: StdRng,

    state: ReceiverState,
    anchor: Option<EpisodeAnchor>,
    pending_event: Option<EventId>,
    tx_packets: Vec<Packet>,

    data_interference: InterferenceAccumulator,
    ctrl_interference: InterferenceAccumulator,
    sl_interference: InterferenceAccumulator,

    rx_packets: Vec<Packet>,
    rx_control: Vec<DownlinkControl>,
    sl_receptions: Vec<SidelinkReception>,

    registry: TbRegistry,
    harq: HarqPhy,
    sl_harq: SlHarqPhy,
}

impl Receiver {
    /// Create an idle receiver.
    ///
    /// # Parameters
    ///
    /// * `node_id` - Identity of the node owning this receiver; its own sidelink frames are ignored
    /// * `config` - Error-model switches, gains and RNG seed
    /// * `scheduler` - Discrete-event scheduler that delivers [`PhyEvent`]s back via [`handle_event`](Self::handle_event)
    /// * `listener` - Receives decode results, feedback and measurements
    /// * `error_model` - Error-rate lookup
    ///
    /// # Returns
    ///
    /// `Err(PhyError::InvalidTransmissionMode)` when the configured mode is out of range.
    pub fn new(
        node_id: u32,
        config: ReceiverConfig,
        scheduler: Box<dyn Scheduler>,
        listener: Box<dyn PhyListener>,
        error_model: Box<dyn ErrorModel>,
    ) -> Result<Self, PhyError> {
        if config.transmission_mode as usize >= NUM_TRANSMISSION_MODES {
            return Err(PhyError::InvalidTransmissionMode(config.transmission_mode));
        }
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let sl_harq = SlHarqPhy::new(config.sl_max_harq_attempts, config.disc_num_retx);
        Ok(Self {
            node_id,
            role: Role::Ue,
            cell_id: 0,
            slss_id: 0,
            config,
            groups: HashSet::new(),
            discovery_apps: HashSet::new(),
            discovery_pools: Vec::new(),
            scheduler,
            listener,
            error_model,
            rng,
            state: ReceiverState::Idle,
            anchor: None,
            pending_event: None,
            tx_packets: Vec::new(),
            data_interference: InterferenceAccumulator::new(),
            ctrl_interference: InterferenceAccumulator::new(),
            sl_interference: InterferenceAccumulator::new(),
            rx_packets: Vec::new(),
            rx_control: Vec::new(),
            sl_receptions: Vec::new(),
            registry: TbRegistry::new(),
            harq: HarqPhy::new(),
            sl_harq,
        })
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    pub fn node_id(&self) -> u32 {
        self.node_id
    }

    pub fn registry(&self) -> &TbRegistry {
        &self.registry
    }

    pub fn harq(&self) -> &HarqPhy {
        &self.harq
    }

    pub fn sl_harq(&self) -> &SlHarqPhy {
        &self.sl_harq
    }

    pub fn set_role(&mut self, role: Role) {
        self.role = role;
    }

    pub fn set_cell_id(&mut self, cell_id: u16) {
        self.cell_id = cell_id;
    }

    /// Sidelink synchronization signal identity this receiver is synchronized to.
    pub fn set_sync_identity(&mut self, slss_id: u16) {
        self.slss_id = slss_id;
    }

    pub fn add_group(&mut self, group: u32) {
        self.groups.insert(group);
    }

    pub fn remove_group(&mut self, group: u32) {
        self.groups.remove(&group);
    }

    /// Replace the set of joined sidelink groups.
    pub fn set_group_filter(&mut self, groups: impl IntoIterator<Item = u32>) {
        self.groups = groups.into_iter().collect();
    }

    pub fn set_discovery_apps(&mut self, app_codes: impl IntoIterator<Item = u32>) {
        self.discovery_apps = app_codes.into_iter().collect();
    }

    pub fn add_discovery_app(&mut self, app_code: u32) {
        self.discovery_apps.insert(app_code);
    }

    pub fn remove_discovery_app(&mut self, app_code: u32) {
        self.discovery_apps.remove(&app_code);
    }

    pub fn add_discovery_rx_pool(&mut self, pool: DiscoveryPool) {
        self.discovery_pools.push(pool);
    }

    pub fn set_disc_num_retx(&mut self, retx: u8) {
        self.config.disc_num_retx = retx;
        self.sl_harq.set_disc_num_retx(retx);
    }

    pub fn set_transmission_mode(&mut self, mode: u8) -> Result<(), PhyError> {
        if mode as usize >= NUM_TRANSMISSION_MODES {
            return Err(PhyError::InvalidTransmissionMode(mode));
        }
        self.config.transmission_mode = mode;
        Ok(())
    }

    /// Set the SINR gain of one transmission mode, in dB.
    pub fn set_tx_mode_gain_db(&mut self, mode: u8, gain_db: f64) -> Result<(), PhyError> {
        let slot = self.config.tx_mode_gains_db.get_mut(mode as usize).ok_or(PhyError::InvalidTransmissionMode(mode))?;
        *slot = gain_db;
        Ok(())
    }

    pub fn set_sl_rx_gain_db(&mut self, gain_db: f64) {
        self.config.sl_rx_gain_db = gain_db;
    }

    /// Noise PSD shared by all receive tracks.
    pub fn set_noise_psd(&mut self, noise: SpectrumValue) {
        self.data_interference.set_noise(noise.clone());
        self.ctrl_interference.set_noise(noise.clone());
        self.sl_interference.set_noise(noise);
    }

    /// Register a TB expected in an upcoming episode.
    ///
    /// Registering new data for a sidelink or discovery identity also clears
    /// its HARQ history and previously-decoded mark.
    pub fn register_expected_tb(&mut self, identity: TbIdentity, info: TbInfo) {
        match identity {
            TbIdentity::Sidelink { rnti, l1_dst } if info.ndi => self.sl_harq.reset_sl(rnti, l1_dst),
            TbIdentity::Discovery { rnti, res_psdch } if info.ndi => self.sl_harq.reset_disc(rnti, res_psdch),
            _ => {}
        }
        trace!("Node {}: expecting TB {:?} ({:?})", self.node_id, identity, info);
        self.registry.register(identity, info);
    }

    /// Forget every unicast TB expected from `rnti`.
    pub fn remove_expected_tb(&mut self, rnti: Rnti) {
        let removed = self.registry.remove_unicast(rnti);
        debug!("Node {}: removed {} expected TBs of RNTI {}", self.node_id, removed, rnti);
    }

    /// Cancel pending events and drop all episode state.
    pub fn reset(&mut self) {
        if let Some(id) = self.pending_event.take() {
            self.scheduler.cancel(id);
        }
        self.state = ReceiverState::Idle;
        self.anchor = None;
        self.tx_packets.clear();
        self.rx_packets.clear();
        self.rx_control.clear();
        self.sl_receptions.clear();
        self.registry.clear();
        self.data_interference.reset();
        self.ctrl_interference.reset();
        self.sl_interference.reset();
    }

    /// Start transmitting `packets` for `duration`.
    pub fn begin_transmission(&mut self, duration: Duration, packets: Vec<Packet>) -> Result<(), PhyError> {
        match self.state {
            ReceiverState::Idle => {
                self.state = ReceiverState::Transmitting;
                self.tx_packets = packets;
                self.pending_event = Some(self.scheduler.schedule(duration, PhyEvent::EndTx));
                Ok(())
            }
            ReceiverState::Transmitting => Err(PhyError::TxWhileTransmitting),
            state => Err(PhyError::TxWhileReceiving { state }),
        }
    }

    pub fn end_transmission(&mut self) -> Result<(), PhyError> {
        if self.state != ReceiverState::Transmitting {
            return Err(PhyError::UnexpectedEvent { event: PhyEvent::EndTx, state: self.state });
        }
        self.state = ReceiverState::Idle;
        self.pending_event = None;
        let packets = mem::take(&mut self.tx_packets);
        self.listener.on_transmission_end(packets);
        Ok(())
    }

    /// Dispatch an event previously scheduled by this receiver.
    pub fn handle_event(&mut self, event: PhyEvent) -> Result<(), PhyError> {
        match event {
            PhyEvent::EndTx => self.end_transmission(),
            PhyEvent::EndRxData => self.end_rx_data(),
            PhyEvent::EndRxControl => self.end_rx_control(),
            PhyEvent::EndRxSidelink => self.end_rx_sidelink(),
            PhyEvent::EndRxSrs => self.end_rx_srs(),
        }
    }

    /// Handle a signal reaching the antenna.
    ///
    /// Every signal contributes interference. A signal that matches this
    /// receiver's cell or sidelink synchronization opens or joins a reception
    /// episode on its track.
    pub fn on_signal_arrival(&mut self, signal: Signal) -> Result<(), PhyError> {
        let now = self.scheduler.now();
        let Signal { psd, duration, kind } = signal;

        match &kind {
            SignalKind::Data { .. } => self.data_interference.add_signal(&psd, now, duration),
            SignalKind::DlControl { .. } | SignalKind::UlSrs { .. } => self.ctrl_interference.add_signal(&psd, now, duration),
            SignalKind::Sidelink(_) => {
                self.sl_interference.add_signal(&psd, now, duration);
                self.data_interference.add_signal(&psd, now, duration);
            }
            SignalKind::Foreign => {
                self.data_interference.add_signal(&psd, now, duration);
                self.ctrl_interference.add_signal(&psd, now, duration);
                return Ok(());
            }
        }

        if self.state == ReceiverState::Transmitting {
            return Err(PhyError::RxWhileTransmitting);
        }

        match kind {
            SignalKind::Data { cell_id, packets, control } => {
                if cell_id != self.cell_id {
                    trace!("Node {}: data from cell {} treated as interference", self.node_id, cell_id);
                    return Ok(());
                }
                self.join_episode(ReceiverState::ReceivingData, now, duration)?;
                self.data_interference.start_rx(&psd, now);
                self.rx_packets.extend(packets);
                self.rx_control.extend(control);
            }
            SignalKind::DlControl { cell_id, pss, control } => {
                if pss && matches!(self.state, ReceiverState::Idle | ReceiverState::ReceivingControl) {
                    self.listener.on_measurement(cell_id, &psd);
                }
                if cell_id != self.cell_id {
                    return Ok(());
                }
                self.join_episode(ReceiverState::ReceivingControl, now, duration)?;
                self.ctrl_interference.start_rx(&psd, now);
                self.rx_control.extend(control);
            }
            SignalKind::UlSrs { cell_id } => {
                if cell_id != self.cell_id {
                    return Ok(());
                }
                self.join_episode(ReceiverState::ReceivingSrs, now, duration)?;
                self.ctrl_interference.start_rx(&psd, now);
            }
            SignalKind::Sidelink(frame) => {
                if !self.accepts_sidelink(&frame) {
                    trace!("Node {}: sidelink frame from node {} treated as interference", self.node_id, frame.node_id);
                    return Ok(());
                }
                self.join_episode(ReceiverState::ReceivingSidelink, now, duration)?;
                self.sl_interference.start_rx(&psd, now);
                let rbs = psd.occupied_rbs();
                self.sl_receptions.push(SidelinkReception { frame, psd, rbs });
            }
            SignalKind::Foreign => {}
        }
        Ok(())
    }

    fn accepts_sidelink(&self, frame: &SidelinkFrame) -> bool {
        if self.role == Role::Enb || frame.node_id == self.node_id {
            return false;
        }
        // Synchronization beacons are received by every terminal for measurement.
        if matches!(frame.payload, SidelinkPayload::Broadcast(_)) {
            return true;
        }
        if frame.slss_id != self.slss_id {
            return false;
        }
        match frame.group {
            Some(group) => self.groups.contains(&group),
            None => true,
        }
    }

    /// Open an episode on `track` or join the one in progress.
    fn join_episode(&mut self, track: ReceiverState, now: Instant, duration: Duration) -> Result<(), PhyError> {
        match self.state {
            ReceiverState::Idle => {
                let event = match track {
                    ReceiverState::ReceivingData => PhyEvent::EndRxData,
                    ReceiverState::ReceivingControl => PhyEvent::EndRxControl,
                    ReceiverState::ReceivingSidelink => PhyEvent::EndRxSidelink,
                    _ => PhyEvent::EndRxSrs,
                };
                self.state = track;
                self.anchor = Some(EpisodeAnchor { start: now, duration });
                self.pending_event = Some(self.scheduler.schedule(duration, event));
                debug!("Node {}: {} started at {}us for {}us", self.node_id, track, now.as_micros(), duration.as_micros());
                Ok(())
            }
            state if state == track => {
                let anchor = self.anchor.unwrap_or(EpisodeAnchor { start: Instant::from_ticks(0), duration: Duration::from_ticks(0) });
                if anchor.start == now && anchor.duration == duration {
                    return Ok(());
                }
                Err(PhyError::EpisodeMismatch {
                    anchor_start_us: anchor.start.as_micros(),
                    anchor_duration_us: anchor.duration.as_micros(),
                    start_us: now.as_micros(),
                    duration_us: duration.as_micros(),
                })
            }
            ReceiverState::Transmitting => Err(PhyError::RxWhileTransmitting),
            state => Err(PhyError::TrackMismatch { current: state, requested: track }),
        }
    }

    fn finish_episode(&mut self) {
        self.state = ReceiverState::Idle;
        self.anchor = None;
        self.pending_event = None;
    }

    fn tx_mode_gain(&self, mode: u8) -> f64 {
        db_to_linear(self.config.tx_mode_gains_db.get(mode as usize).copied().unwrap_or(0.0))
    }

    fn stats(&self, channel: Channel, rnti: Rnti, info: &TbInfo, layer: u8, correct: bool, mean_sinr: f64) -> ReceptionStats {
        ReceptionStats {
            timestamp: self.scheduler.now(),
            channel,
            cell_id: self.cell_id,
            rnti,
            layer,
            mcs: info.mcs,
            size: info.size,
            rv: info.rv,
            ndi: info.ndi,
            correct,
            sinr_db: linear_to_db(mean_sinr),
        }
    }

    fn end_rx_data(&mut self) -> Result<(), PhyError> {
        if self.state != ReceiverState::ReceivingData {
            return Err(PhyError::UnexpectedEvent { event: PhyEvent::EndRxData, state: self.state });
        }
        let now = self.scheduler.now();
        let mut sinr = self.data_interference.end_rx_combined(now);
        sinr.scale(self.tx_mode_gain(self.config.transmission_mode));

        let packets = mem::take(&mut self.rx_packets);
        let control = mem::take(&mut self.rx_control);

        // Nothing to decode when only control messages arrived.
        if !packets.is_empty() {
            let identities: Vec<TbIdentity> =
                self.registry.iter().filter(|(id, _)| matches!(id, TbIdentity::Unicast { .. })).map(|(id, _)| *id).collect();
            let mut trace_records = Vec::with_capacity(identities.len());
            for identity in identities {
                let TbIdentity::Unicast { rnti, layer } = identity else { continue };
                let Some(info) = self.registry.get_mut(&identity) else { continue };
                let key = HarqProcessKey { rnti, harq_process_id: info.harq_process_id, layer, downlink: info.downlink };
                let history = self.harq.history(&key);
                let mut engine = DecodeEngine { error_model: self.error_model.as_ref(), rng: &mut self.rng, error_model_enabled: self.config.data_error_model_enabled };
                let outcome = engine.decode(identity, info, &sinr, history)?;
                let channel = if info.downlink { Channel::Pdsch } else { Channel::Pusch };
                trace_records.push((channel, rnti, info.clone(), layer, !outcome.corrupted, sinr.mean_over(&info.rb_map)));
            }
            for (channel, rnti, info, layer, correct, mean_sinr) in trace_records {
                let stats = self.stats(channel, rnti, &info, layer, correct, mean_sinr);
                self.listener.on_reception_stats(&stats);
            }
        }

        let layers = self.config.layers() as usize;
        let mut decoded = Vec::new();
        let mut dl_feedback: BTreeMap<Rnti, (u8, Vec<HarqStatus>)> = BTreeMap::new();
        for packet in packets {
            let identity = TbIdentity::Unicast { rnti: packet.rnti, layer: packet.layer };
            let Some(info) = self.registry.get_mut(&identity) else {
                debug!("Node {}: no expected TB for {:?}, packet ignored", self.node_id, identity);
                continue;
            };
            let corrupted = info.corrupted.unwrap_or(false);
            if corrupted {
                self.listener.on_decode_error(&packet);
            } else {
                decoded.push(packet.clone());
            }

            if info.feedback_sent {
                continue;
            }
            info.feedback_sent = true;
            let key = HarqProcessKey { rnti: packet.rnti, harq_process_id: info.harq_process_id, layer: packet.layer, downlink: info.downlink };
            let status = HarqStatus::from_corrupted(corrupted);
            match status {
                HarqStatus::Nack => {
                    let code_bytes = (info.size as f64 / self.error_model.effective_coding_rate(info.mcs)) as u32;
                    self.harq.record_nack(key, HarqAttempt::data(info.metric, info.size, code_bytes));
                }
                HarqStatus::Ack => self.harq.record_ack(key),
            }
            if info.downlink {
                let entry = dl_feedback.entry(packet.rnti).or_insert_with(|| (info.harq_process_id, vec![HarqStatus::Ack; layers]));
                let layer = packet.layer as usize;
                if entry.1.len() <= layer {
                    entry.1.resize(layer + 1, HarqStatus::Ack);
                }
                entry.1[layer] = status;
            } else {
                self.listener.on_harq_feedback(HarqFeedback::Uplink { rnti: packet.rnti, status });
            }
        }

        if !decoded.is_empty() {
            self.listener.on_decode_ok(decoded);
        }
        for (rnti, (harq_process_id, statuses)) in dl_feedback {
            self.listener.on_harq_feedback(HarqFeedback::Downlink { rnti, harq_process_id, statuses });
        }
        if !control.is_empty() {
            self.listener.on_control_decode_ok(control.into_iter().map(ControlMessage::Downlink).collect());
        }

        self.registry.clear_unicast();
        self.finish_episode();
        Ok(())
    }

    fn end_rx_control(&mut self) -> Result<(), PhyError> {
        if self.state != ReceiverState::ReceivingControl {
            return Err(PhyError::UnexpectedEvent { event: PhyEvent::EndRxControl, state: self.state });
        }
        let now = self.scheduler.now();
        let mut sinr = self.ctrl_interference.end_rx_combined(now);
        // With MIMO the control region is always sent with transmit diversity.
        if self.config.transmission_mode > 0 {
            sinr.scale(self.tx_mode_gain(1));
        }
        let control = mem::take(&mut self.rx_control);

        let rbs = sinr.occupied_rbs();
        let mean_sinr = sinr.mean_over(&rbs);
        let corrupted = if self.config.ctrl_error_model_enabled {
            let stats = self.error_model.message_tb_stats(MessageClass::DownlinkControl, mean_sinr, &[]);
            draw_corrupted(&mut self.rng, stats.tbler)
        } else {
            false
        };
        debug!("Node {}: control region with {} messages corrupted {}", self.node_id, control.len(), corrupted);
        let stats = self.stats(Channel::Pdcch, 0, &TbInfo::new(true, 0, 0, rbs, 0), 0, !corrupted, mean_sinr);
        self.listener.on_reception_stats(&stats);
        if corrupted {
            self.listener.on_control_decode_error();
        } else {
            self.listener.on_control_decode_ok(control.into_iter().map(ControlMessage::Downlink).collect());
        }
        self.finish_episode();
        Ok(())
    }

    fn end_rx_srs(&mut self) -> Result<(), PhyError> {
        if self.state != ReceiverState::ReceivingSrs {
            return Err(PhyError::UnexpectedEvent { event: PhyEvent::EndRxSrs, state: self.state });
        }
        let now = self.scheduler.now();
        self.ctrl_interference.end_rx_combined(now);
        self.finish_episode();
        Ok(())
    }

    fn end_rx_sidelink(&mut self) -> Result<(), PhyError> {
        if self.state != ReceiverState::ReceivingSidelink {
            return Err(PhyError::UnexpectedEvent { event: PhyEvent::EndRxSidelink, state: self.state });
        }
        let now = self.scheduler.now();
        let gain = db_to_linear(self.config.sl_rx_gain_db);
        let sinrs: Vec<SpectrumValue> = self.sl_interference.end_rx(now).into_iter().map(|s| s.scaled(gain)).collect();
        let receptions = mem::take(&mut self.sl_receptions);

        let mut control = Vec::new();
        let mut data = Vec::new();
        let mut discovery = Vec::new();
        let mut broadcast = Vec::new();
        for (index, reception) in receptions.iter().enumerate() {
            match reception.frame.payload {
                SidelinkPayload::Control(_) => control.push(index),
                SidelinkPayload::Data(_) => data.push(index),
                SidelinkPayload::Discovery(_) => discovery.push(index),
                SidelinkPayload::Broadcast(_) => broadcast.push(index),
            }
        }

        let result = self.process_sidelink(&receptions, &sinrs, &control, &data, &discovery, &broadcast);
        self.registry.clear_sidelink();
        self.finish_episode();
        result
    }

    fn process_sidelink(
        &mut self,
        receptions: &[SidelinkReception],
        sinrs: &[SpectrumValue],
        control: &[usize],
        data: &[usize],
        discovery: &[usize],
        broadcast: &[usize],
    ) -> Result<(), PhyError> {
        if !control.is_empty() {
            self.rx_pscch(receptions, sinrs, control);
        }
        if !data.is_empty() {
            self.rx_pssch(receptions, sinrs, data)?;
        }
        if !discovery.is_empty() {
            self.rx_psdch(receptions, sinrs, discovery)?;
        }
        if !broadcast.is_empty() {
            self.rx_psbch(receptions, sinrs, broadcast);
        }
        Ok(())
    }

    /// Greedy resolution of control-like messages without HARQ.
    fn resolve_messages(
        &mut self,
        receptions: &[SidelinkReception],
        sinrs: &[SpectrumValue],
        indexes: &[usize],
        class: MessageClass,
    ) -> Vec<collision::Outcome> {
        let candidates: Vec<Candidate> = indexes
            .iter()
            .map(|&index| {
                let rbs = receptions[index].rbs.clone();
                let mean_sinr = sinrs.get(index).map(|s| s.mean_over(&rbs)).unwrap_or(0.0);
                Candidate { index, mean_sinr, rbs }
            })
            .collect();
        let enabled = self.config.sl_ctrl_error_model_enabled;
        let error_model = self.error_model.as_ref();
        let rng = &mut self.rng;
        collision::resolve(candidates, self.config.drop_rb_on_collision, |candidate| {
            if !enabled {
                return true;
            }
            let stats = error_model.message_tb_stats(class, candidate.mean_sinr, &[]);
            !draw_corrupted(rng, stats.tbler)
        })
    }

    fn rx_pscch(&mut self, receptions: &[SidelinkReception], sinrs: &[SpectrumValue], indexes: &[usize]) {
        let outcomes = self.resolve_messages(receptions, sinrs, indexes, MessageClass::SidelinkControl);
        let mut decoded = Vec::new();
        for outcome in &outcomes {
            let SidelinkPayload::Control(sci) = &receptions[outcome.index].frame.payload else { continue };
            let info = TbInfo::new(true, sci.tb_size, sci.mcs, sci.rb_map.clone(), 0);
            let stats = self.stats(Channel::Pscch, sci.rnti, &info, 0, outcome.verdict.is_decoded(), outcome.mean_sinr);
            self.listener.on_reception_stats(&stats);
            if outcome.verdict.is_decoded() {
                decoded.push(ControlMessage::SidelinkControl(sci.clone()));
            }
        }
        if decoded.is_empty() {
            self.listener.on_control_decode_error();
        } else {
            self.listener.on_control_decode_ok(decoded);
        }
    }

    fn rx_psbch(&mut self, receptions: &[SidelinkReception], sinrs: &[SpectrumValue], indexes: &[usize]) {
        for &index in indexes {
            self.listener.on_measurement(receptions[index].frame.slss_id, &receptions[index].psd);
        }
        let outcomes = self.resolve_messages(receptions, sinrs, indexes, MessageClass::SidelinkBroadcast);
        let mut decoded = Vec::new();
        for outcome in &outcomes {
            let frame = &receptions[outcome.index].frame;
            let SidelinkPayload::Broadcast(mib) = &frame.payload else { continue };
            let info = TbInfo::new(true, 0, 0, receptions[outcome.index].rbs.clone(), 0);
            let stats = self.stats(Channel::Psbch, mib.rnti, &info, 0, outcome.verdict.is_decoded(), outcome.mean_sinr);
            self.listener.on_reception_stats(&stats);
            if outcome.verdict.is_decoded() {
                decoded.push(ControlMessage::Broadcast { mib: mib.clone(), slss_id: frame.slss_id });
            }
        }
        if decoded.is_empty() {
            self.listener.on_control_decode_error();
        } else {
            self.listener.on_control_decode_ok(decoded);
        }
    }

    fn rx_pssch(&mut self, receptions: &[SidelinkReception], sinrs: &[SpectrumValue], indexes: &[usize]) -> Result<(), PhyError> {
        let mut tb_to_index: BTreeMap<TbIdentity, usize> = BTreeMap::new();
        for &index in indexes {
            if let SidelinkPayload::Data(packets) = &receptions[index].frame.payload {
                for packet in packets {
                    tb_to_index.insert(TbIdentity::sidelink(packet.rnti, packet.destination), index);
                }
            }
        }

        let collided = if self.config.drop_rb_on_collision {
            collision::collided_rbs(
                self.registry.iter().filter(|(id, _)| matches!(id, TbIdentity::Sidelink { .. })).map(|(_, info)| info.rb_map.as_slice()),
            )
        } else {
            HashSet::new()
        };

        let identities: Vec<TbIdentity> = self.registry.iter().filter(|(id, _)| matches!(id, TbIdentity::Sidelink { .. })).map(|(id, _)| *id).collect();
        let mut trace_records = Vec::new();
        for identity in identities {
            let TbIdentity::Sidelink { rnti, l1_dst } = identity else { continue };
            let Some(&index) = tb_to_index.get(&identity) else { continue };
            let Some(sinr) = sinrs.get(index) else { continue };
            let Some(info) = self.registry.get_mut(&identity) else { continue };
            let tb_collided = info.rb_map.iter().any(|rb| collided.contains(rb));
            let history = self.sl_harq.sl_history(rnti, l1_dst);
            let previously_decoded = self.sl_harq.is_sl_decoded(rnti, l1_dst);
            let mut engine = DecodeEngine { error_model: self.error_model.as_ref(), rng: &mut self.rng, error_model_enabled: self.config.sl_data_error_model_enabled };
            let outcome = engine.decode_sidelink(identity, info, sinr, history, previously_decoded, tb_collided)?;
            trace_records.push((rnti, info.clone(), !outcome.corrupted, sinr.mean_over(&info.rb_map)));
        }
        for (rnti, info, correct, mean_sinr) in trace_records {
            let stats = self.stats(Channel::Pssch, rnti, &info, 0, correct, mean_sinr);
            self.listener.on_reception_stats(&stats);
        }

        let mut decoded = Vec::new();
        for &index in indexes {
            let SidelinkPayload::Data(packets) = &receptions[index].frame.payload else { continue };
            for packet in packets {
                let identity = TbIdentity::sidelink(packet.rnti, packet.destination);
                let TbIdentity::Sidelink { rnti, l1_dst } = identity else { continue };
                let Some(info) = self.registry.get(&identity) else {
                    debug!("Node {}: no expected TB for {:?}, packet ignored", self.node_id, identity);
                    continue;
                };
                let corrupted = info.corrupted.unwrap_or(false);
                if !corrupted && !self.sl_harq.is_sl_decoded(rnti, l1_dst) {
                    self.sl_harq.mark_sl_decoded(rnti, l1_dst);
                    decoded.push(packet.clone());
                } else {
                    self.listener.on_decode_error(packet);
                }
                // No feedback on sidelink: history keeps growing until new data.
                self.sl_harq.update_sl(rnti, l1_dst, info.sinr);
            }
        }
        if !decoded.is_empty() {
            self.listener.on_decode_ok(decoded);
        }
        Ok(())
    }

    fn rx_psdch(&mut self, receptions: &[SidelinkReception], sinrs: &[SpectrumValue], indexes: &[usize]) -> Result<(), PhyError> {
        // Register the monitored messages that sit on a PSDCH transmission of a receive pool.
        for &index in indexes {
            let SidelinkPayload::Discovery(message) = &receptions[index].frame.payload else { continue };
            if !self.discovery_apps.contains(&message.app_code) {
                trace!("Node {}: discovery app code {} not monitored", self.node_id, message.app_code);
                continue;
            }
            let mut matched = None;
            for pool in &self.discovery_pools {
                let transmissions = pool.psdch_transmissions(message.res_psdch);
                if let Some(range) = transmissions.iter().find(|range| range.rbs() == receptions[index].rbs) {
                    if message.rv as usize > transmissions.len() {
                        return Err(PhyError::InvalidRedundancyVersion { rv: message.rv, max_retx: transmissions.len() as u8 });
                    }
                    matched = Some(range.rbs());
                    break;
                }
            }
            let Some(rb_map) = matched else {
                debug!("Node {}: discovery from RNTI {} outside any receive pool", self.node_id, message.rnti);
                continue;
            };
            let mut info = TbInfo::new(message.rv == 0, 0, DISCOVERY_MCS, rb_map, message.rv);
            info.rx_index = Some(index);
            self.register_expected_tb(TbIdentity::Discovery { rnti: message.rnti, res_psdch: message.res_psdch }, info);
        }

        let enabled = self.config.sl_discovery_error_model_enabled;
        let mut candidates = Vec::new();
        let mut prepared: HashMap<usize, (TbIdentity, TbStats, bool)> = HashMap::new();
        for (identity, info) in self.registry.iter() {
            let TbIdentity::Discovery { rnti, res_psdch } = *identity else { continue };
            let Some(index) = info.rx_index else { continue };
            if info.corrupted.is_some() {
                return Err(PhyError::DoubleDecode { identity: *identity });
            }
            let mean_sinr = sinrs.get(index).map(|s| s.mean_over(&info.rb_map)).unwrap_or(0.0);
            let history: &[HarqAttempt] = if info.ndi { &[] } else { self.sl_harq.disc_history(rnti, res_psdch) };
            let stats = if enabled { self.error_model.message_tb_stats(MessageClass::SidelinkDiscovery, mean_sinr, history) } else { TbStats { tbler: 0.0, metric: mean_sinr } };
            let previously_decoded = self.sl_harq.is_disc_decoded(rnti, res_psdch);
            prepared.insert(index, (*identity, stats, previously_decoded));
            candidates.push(Candidate { index, mean_sinr, rbs: info.rb_map.clone() });
        }

        let rng = &mut self.rng;
        let outcomes = collision::resolve(candidates, self.config.drop_rb_on_collision, |candidate| match prepared.get(&candidate.index) {
            Some((_, _, true)) => true,
            Some((_, stats, false)) => !enabled || !draw_corrupted(rng, stats.tbler),
            None => false,
        });

        let mut decoded = Vec::new();
        for outcome in &outcomes {
            let Some(&(identity, stats, previously_decoded)) = prepared.get(&outcome.index) else { continue };
            let TbIdentity::Discovery { rnti, res_psdch } = identity else { continue };
            let corrupted = !outcome.verdict.is_decoded();
            let Some(info) = self.registry.get_mut(&identity) else { continue };
            info.corrupted = Some(corrupted);
            info.metric = stats.metric;
            info.sinr = stats.metric;
            let info = info.clone();

            if !corrupted && !previously_decoded {
                self.sl_harq.mark_disc_decoded(rnti, res_psdch);
                if let SidelinkPayload::Discovery(message) = &receptions[outcome.index].frame.payload {
                    decoded.push(ControlMessage::Discovery(message.clone()));
                }
            }
            if enabled {
                self.sl_harq.update_disc(rnti, res_psdch, stats.metric);
            }
            let stats = self.stats(Channel::Psdch, rnti, &info, 0, !corrupted, outcome.mean_sinr);
            self.listener.on_reception_stats(&stats);
        }

        if decoded.is_empty() {
            self.listener.on_control_decode_error();
        } else {
            self.listener.on_control_decode_ok(decoded);
        }
        Ok(())
    }
}
