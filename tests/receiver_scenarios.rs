use embassy_time::{Duration, Instant};
use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use lte_rx_phy::config::ReceiverConfig;
use lte_rx_phy::error::PhyError;
use lte_rx_phy::phy::error_model::DataQuery;
use lte_rx_phy::phy::{
    ControlMessage, DiscoveryMessage, DiscoveryPool, DownlinkControl, ErrorModel, HarqAttempt, HarqFeedback, HarqProcessKey, HarqStatus,
    MessageClass, Packet, PhyListener, RbRange, Receiver, ReceiverState, ReceptionStats, Sci, SidelinkFrame, SidelinkPayload, Signal, SignalKind,
    SlMib, SpectrumValue, TbIdentity, TbInfo, TbStats, ThresholdErrorModel, db_to_linear,
};
use lte_rx_phy::simulation::event_queue::{Carrier, EventQueue, PhyScheduler, PhyTarget, SimEvent};

const NUM_RBS: usize = 8;
const CELL: u16 = 1;
const SUBFRAME_US: u64 = 1000;

#[derive(Default)]
struct Recorder {
    decoded: Vec<Packet>,
    errors: Vec<Packet>,
    control: Vec<Vec<ControlMessage>>,
    control_errors: usize,
    feedback: Vec<HarqFeedback>,
    measurements: Vec<u16>,
    tx_ended: Vec<Vec<Packet>>,
    stats: Vec<ReceptionStats>,
}

impl PhyListener for Recorder {
    fn on_decode_ok(&mut self, packets: Vec<Packet>) {
        self.decoded.extend(packets);
    }

    fn on_decode_error(&mut self, packet: &Packet) {
        self.errors.push(packet.clone());
    }

    fn on_control_decode_ok(&mut self, messages: Vec<ControlMessage>) {
        self.control.push(messages);
    }

    fn on_control_decode_error(&mut self) {
        self.control_errors += 1;
    }

    fn on_harq_feedback(&mut self, feedback: HarqFeedback) {
        self.feedback.push(feedback);
    }

    fn on_measurement(&mut self, id: u16, _psd: &SpectrumValue) {
        self.measurements.push(id);
    }

    fn on_transmission_end(&mut self, packets: Vec<Packet>) {
        self.tx_ended.push(packets);
    }

    fn on_reception_stats(&mut self, stats: &ReceptionStats) {
        self.stats.push(stats.clone());
    }
}

/// Returns scripted error rates and records the HARQ metrics it was shown.
#[derive(Default)]
struct ScriptedModel {
    tblers: RefCell<VecDeque<f64>>,
    histories: Rc<RefCell<Vec<Vec<f64>>>>,
}

impl ScriptedModel {
    fn new(tblers: &[f64]) -> (Self, Rc<RefCell<Vec<Vec<f64>>>>) {
        let histories = Rc::new(RefCell::new(Vec::new()));
        (Self { tblers: RefCell::new(tblers.iter().copied().collect()), histories: histories.clone() }, histories)
    }
}

impl ErrorModel for ScriptedModel {
    fn data_tb_stats(&self, query: &DataQuery<'_>) -> TbStats {
        self.histories.borrow_mut().push(query.history.iter().map(|attempt| attempt.metric).collect());
        let tbler = self.tblers.borrow_mut().pop_front().unwrap_or(0.0);
        TbStats { tbler, metric: query.mean_sinr() }
    }

    fn message_tb_stats(&self, _class: MessageClass, mean_sinr: f64, _history: &[HarqAttempt]) -> TbStats {
        TbStats { tbler: 0.0, metric: mean_sinr }
    }
}

/// Error rate chosen by MCS: odd MCS always fails, even MCS always passes.
struct McsParityModel;

impl ErrorModel for McsParityModel {
    fn data_tb_stats(&self, query: &DataQuery<'_>) -> TbStats {
        TbStats { tbler: if query.mcs % 2 == 1 { 1.0 } else { 0.0 }, metric: query.mean_sinr() }
    }

    fn message_tb_stats(&self, _class: MessageClass, mean_sinr: f64, _history: &[HarqAttempt]) -> TbStats {
        TbStats { tbler: 0.0, metric: mean_sinr }
    }
}

struct Harness {
    queue: Rc<RefCell<EventQueue<SimEvent>>>,
    rx: Receiver,
    log: Rc<RefCell<Recorder>>,
}

fn harness(config: ReceiverConfig, model: Box<dyn ErrorModel>) -> Harness {
    let queue = Rc::new(RefCell::new(EventQueue::new()));
    let log = Rc::new(RefCell::new(Recorder::default()));
    let scheduler = Box::new(PhyScheduler::new(queue.clone(), PhyTarget::Rx(1, Carrier::Downlink)));
    let mut rx = Receiver::new(1, config, scheduler, Box::new(log.clone()), model).unwrap();
    rx.set_cell_id(CELL);
    rx.set_noise_psd(SpectrumValue::from_values(vec![1.0; NUM_RBS]));
    Harness { queue, rx, log }
}

fn seeded() -> ReceiverConfig {
    ReceiverConfig { seed: Some(7), ..ReceiverConfig::default() }
}

impl Harness {
    /// Deliver every PHY event due by `at_us` and leave the clock there.
    fn run_until(&mut self, at_us: u64) -> Result<(), PhyError> {
        self.queue.borrow_mut().schedule_at(Instant::from_micros(at_us), SimEvent::Transmission(usize::MAX));
        loop {
            let next = self.queue.borrow_mut().pop();
            match next {
                Some((_, SimEvent::Phy { event, .. })) => self.rx.handle_event(event)?,
                Some((_, SimEvent::Transmission(_))) | None => return Ok(()),
            }
        }
    }

    fn deliver(&mut self, rbs: &[usize], power_db: f64, duration_us: u64, kind: SignalKind) -> Result<(), PhyError> {
        let psd = SpectrumValue::on_rbs(NUM_RBS, rbs, db_to_linear(power_db));
        self.rx.on_signal_arrival(Signal { psd, duration: Duration::from_micros(duration_us), kind })
    }
}

fn data(packets: Vec<Packet>) -> SignalKind {
    SignalKind::Data { cell_id: CELL, packets, control: Vec::new() }
}

fn sidelink(node_id: u32, payload: SidelinkPayload) -> SignalKind {
    SignalKind::Sidelink(SidelinkFrame { node_id, slss_id: 0, group: None, payload })
}

fn sci(rnti: u16, rbs: &[usize]) -> Sci {
    Sci { rnti, group_dst: 7, rb_map: rbs.to_vec(), mcs: 4, tb_size: 100 }
}

#[test]
fn disjoint_control_messages_are_decided_on_their_own_sinr() {
    let mut h = harness(seeded(), Box::new(ThresholdErrorModel::new(5.0)));
    h.deliver(&[0, 1], 10.0, SUBFRAME_US, sidelink(2, SidelinkPayload::Control(sci(20, &[0, 1])))).unwrap();
    h.deliver(&[4, 5], 2.0, SUBFRAME_US, sidelink(3, SidelinkPayload::Control(sci(30, &[4, 5])))).unwrap();
    assert_eq!(h.rx.state(), ReceiverState::ReceivingSidelink);
    h.run_until(SUBFRAME_US).unwrap();

    let log = h.log.borrow();
    assert_eq!(log.control, vec![vec![ControlMessage::SidelinkControl(sci(20, &[0, 1]))]]);
    let correct: BTreeMap<u16, bool> = log.stats.iter().map(|s| (s.rnti, s.correct)).collect();
    assert_eq!(correct, BTreeMap::from([(20, true), (30, false)]));
    assert_eq!(h.rx.state(), ReceiverState::Idle);
}

#[test]
fn only_strongest_of_overlapping_messages_survives() {
    let mut h = harness(seeded(), Box::new(ThresholdErrorModel::new(5.0)));
    h.deliver(&[2, 3], 12.0, SUBFRAME_US, sidelink(2, SidelinkPayload::Control(sci(20, &[2, 3])))).unwrap();
    h.deliver(&[3, 4], 9.0, SUBFRAME_US, sidelink(3, SidelinkPayload::Control(sci(30, &[3, 4])))).unwrap();
    h.run_until(SUBFRAME_US).unwrap();

    let log = h.log.borrow();
    assert_eq!(log.control, vec![vec![ControlMessage::SidelinkControl(sci(20, &[2, 3]))]]);
    // Both means are above the threshold, so the loser is lost to the overlap alone.
    let weaker = log.stats.iter().find(|s| s.rnti == 30).unwrap();
    assert!(weaker.sinr_db > 5.0);
    assert!(!weaker.correct);
}

#[test]
fn drop_on_collision_loses_both_overlapping_messages() {
    let config = ReceiverConfig { drop_rb_on_collision: true, ..seeded() };
    let mut h = harness(config, Box::new(ThresholdErrorModel::new(5.0)));
    h.deliver(&[2, 3], 12.0, SUBFRAME_US, sidelink(2, SidelinkPayload::Control(sci(20, &[2, 3])))).unwrap();
    h.deliver(&[3, 4], 9.0, SUBFRAME_US, sidelink(3, SidelinkPayload::Control(sci(30, &[3, 4])))).unwrap();
    h.run_until(SUBFRAME_US).unwrap();

    let log = h.log.borrow();
    assert!(log.control.is_empty());
    assert_eq!(log.control_errors, 1);
}

#[test]
fn retransmission_combines_previous_attempt_until_ack() {
    let (model, histories) = ScriptedModel::new(&[1.0, 0.0, 0.0]);
    let mut h = harness(seeded(), Box::new(model));
    let identity = TbIdentity::Unicast { rnti: 5, layer: 0 };
    let key = HarqProcessKey { rnti: 5, harq_process_id: 2, layer: 0, downlink: true };

    h.rx.register_expected_tb(identity, TbInfo::new(true, 100, 4, vec![0, 1], 0).with_harq_process(2, true));
    h.deliver(&[0, 1], 10.0, SUBFRAME_US, data(vec![Packet::unicast(5, 0, vec![1])])).unwrap();
    h.run_until(SUBFRAME_US).unwrap();
    assert_eq!(h.log.borrow().errors.len(), 1);
    assert_eq!(h.log.borrow().feedback, vec![HarqFeedback::Downlink { rnti: 5, harq_process_id: 2, statuses: vec![HarqStatus::Nack] }]);
    assert_eq!(h.rx.harq().history(&key).len(), 1);
    assert!(h.rx.registry().is_empty());

    // Retransmission sees the first attempt's metric.
    h.rx.register_expected_tb(identity, TbInfo::new(false, 100, 4, vec![0, 1], 1).with_harq_process(2, true));
    h.deliver(&[0, 1], 10.0, SUBFRAME_US, data(vec![Packet::unicast(5, 0, vec![1])])).unwrap();
    h.run_until(2 * SUBFRAME_US).unwrap();
    assert_eq!(h.log.borrow().decoded.len(), 1);
    assert!(h.rx.harq().history(&key).is_empty());

    // After the ACK a retransmission starts from an empty history.
    h.rx.register_expected_tb(identity, TbInfo::new(false, 100, 4, vec![0, 1], 2).with_harq_process(2, true));
    h.deliver(&[0, 1], 10.0, SUBFRAME_US, data(vec![Packet::unicast(5, 0, vec![1])])).unwrap();
    h.run_until(3 * SUBFRAME_US).unwrap();

    let histories = histories.borrow();
    assert_eq!(histories.len(), 3);
    assert!(histories[0].is_empty());
    assert_eq!(histories[1].len(), 1);
    assert!((histories[1][0] - 10.0).abs() < 1e-9);
    assert!(histories[2].is_empty());
}

#[test]
fn feedback_is_sent_once_per_transport_block() {
    let mut h = harness(seeded(), Box::new(ThresholdErrorModel::new(0.0)));
    h.rx.register_expected_tb(TbIdentity::Unicast { rnti: 5, layer: 0 }, TbInfo::new(true, 100, 4, vec![0, 1], 0));
    let packets = vec![Packet::unicast(5, 0, vec![1]), Packet::unicast(5, 0, vec![2])];
    h.deliver(&[0, 1], 10.0, SUBFRAME_US, data(packets)).unwrap();
    h.run_until(SUBFRAME_US).unwrap();

    let log = h.log.borrow();
    assert_eq!(log.decoded.len(), 2);
    assert_eq!(log.feedback, vec![HarqFeedback::Uplink { rnti: 5, status: HarqStatus::Ack }]);
    assert_eq!(log.stats.len(), 1);
}

#[test]
fn downlink_feedback_covers_every_layer_of_the_mode() {
    let config = ReceiverConfig { transmission_mode: 2, ..seeded() };
    let mut h = harness(config, Box::new(McsParityModel));
    h.rx.register_expected_tb(TbIdentity::Unicast { rnti: 5, layer: 0 }, TbInfo::new(true, 100, 3, vec![0, 1], 0).with_harq_process(1, true));
    h.rx.register_expected_tb(TbIdentity::Unicast { rnti: 5, layer: 1 }, TbInfo::new(true, 100, 4, vec![0, 1], 0).with_harq_process(1, true));
    let packets = vec![Packet::unicast(5, 0, vec![1]), Packet::unicast(5, 1, vec![2])];
    h.deliver(&[0, 1], 10.0, SUBFRAME_US, data(packets)).unwrap();
    h.run_until(SUBFRAME_US).unwrap();

    let log = h.log.borrow();
    assert_eq!(log.feedback, vec![HarqFeedback::Downlink { rnti: 5, harq_process_id: 1, statuses: vec![HarqStatus::Nack, HarqStatus::Ack] }]);
    assert_eq!(log.decoded, vec![Packet::unicast(5, 1, vec![2])]);
    assert_eq!(log.errors, vec![Packet::unicast(5, 0, vec![1])]);
}

#[test]
fn unregistered_packets_are_ignored() {
    let mut h = harness(seeded(), Box::new(ThresholdErrorModel::new(0.0)));
    h.deliver(&[0, 1], 10.0, SUBFRAME_US, data(vec![Packet::unicast(9, 0, vec![1])])).unwrap();
    h.run_until(SUBFRAME_US).unwrap();
    let log = h.log.borrow();
    assert!(log.decoded.is_empty() && log.errors.is_empty() && log.feedback.is_empty());
    assert_eq!(h.rx.state(), ReceiverState::Idle);
}

#[test]
fn half_duplex_violations_are_fatal() {
    let mut h = harness(seeded(), Box::new(ThresholdErrorModel::new(0.0)));
    h.rx.begin_transmission(Duration::from_micros(SUBFRAME_US), vec![Packet::unicast(1, 0, vec![])]).unwrap();
    assert_eq!(h.rx.begin_transmission(Duration::from_micros(SUBFRAME_US), Vec::new()), Err(PhyError::TxWhileTransmitting));
    // Non-LTE energy is only interference.
    h.deliver(&[0], 10.0, SUBFRAME_US, SignalKind::Foreign).unwrap();
    assert_eq!(h.deliver(&[0], 10.0, SUBFRAME_US, data(Vec::new())), Err(PhyError::RxWhileTransmitting));
    h.run_until(SUBFRAME_US).unwrap();
    assert_eq!(h.log.borrow().tx_ended.len(), 1);

    h.deliver(&[0], 10.0, SUBFRAME_US, data(Vec::new())).unwrap();
    assert_eq!(
        h.rx.begin_transmission(Duration::from_micros(SUBFRAME_US), Vec::new()),
        Err(PhyError::TxWhileReceiving { state: ReceiverState::ReceivingData })
    );
}

#[test]
fn any_lte_signal_while_transmitting_is_fatal() {
    let mut h = harness(seeded(), Box::new(ThresholdErrorModel::new(0.0)));
    h.rx.begin_transmission(Duration::from_micros(SUBFRAME_US), Vec::new()).unwrap();
    let other_cell = SignalKind::Data { cell_id: 9, packets: Vec::new(), control: Vec::new() };
    assert_eq!(h.deliver(&[0], 10.0, SUBFRAME_US, other_cell), Err(PhyError::RxWhileTransmitting));
    let other_control = SignalKind::DlControl { cell_id: 4, pss: false, control: Vec::new() };
    assert_eq!(h.deliver(&[1], 10.0, 200, other_control), Err(PhyError::RxWhileTransmitting));
    let other_group = SignalKind::Sidelink(SidelinkFrame { node_id: 2, slss_id: 0, group: Some(2), payload: SidelinkPayload::Control(sci(20, &[2])) });
    assert_eq!(h.deliver(&[2], 10.0, SUBFRAME_US, other_group), Err(PhyError::RxWhileTransmitting));
    assert_eq!(h.rx.state(), ReceiverState::Transmitting);
}

#[test]
fn simultaneous_receptions_must_share_the_episode() {
    let mut h = harness(seeded(), Box::new(ThresholdErrorModel::new(0.0)));
    h.deliver(&[0], 10.0, SUBFRAME_US, data(Vec::new())).unwrap();
    // Same instant, same duration: joins the episode.
    h.deliver(&[1], 10.0, SUBFRAME_US, data(Vec::new())).unwrap();
    let err = h.deliver(&[2], 10.0, SUBFRAME_US / 2, data(Vec::new())).unwrap_err();
    assert_eq!(err, PhyError::EpisodeMismatch { anchor_start_us: 0, anchor_duration_us: SUBFRAME_US, start_us: 0, duration_us: SUBFRAME_US / 2 });

    let err = h.deliver(&[3], 10.0, SUBFRAME_US, sidelink(2, SidelinkPayload::Control(sci(20, &[3])))).unwrap_err();
    assert_eq!(err, PhyError::TrackMismatch { current: ReceiverState::ReceivingData, requested: ReceiverState::ReceivingSidelink });
}

#[test]
fn late_signal_cannot_join_an_open_episode() {
    let mut h = harness(seeded(), Box::new(ThresholdErrorModel::new(0.0)));
    h.deliver(&[0], 10.0, SUBFRAME_US, data(Vec::new())).unwrap();
    h.run_until(SUBFRAME_US / 2).unwrap();
    assert_eq!(h.rx.state(), ReceiverState::ReceivingData);

    let err = h.deliver(&[1], 10.0, SUBFRAME_US, data(Vec::new())).unwrap_err();
    assert_eq!(err, PhyError::EpisodeMismatch { anchor_start_us: 0, anchor_duration_us: SUBFRAME_US, start_us: SUBFRAME_US / 2, duration_us: SUBFRAME_US });
}

#[test]
fn end_event_in_wrong_state_is_rejected() {
    let mut h = harness(seeded(), Box::new(ThresholdErrorModel::new(0.0)));
    assert_eq!(
        h.rx.handle_event(lte_rx_phy::phy::PhyEvent::EndRxData),
        Err(PhyError::UnexpectedEvent { event: lte_rx_phy::phy::PhyEvent::EndRxData, state: ReceiverState::Idle })
    );
}

#[test]
fn foreign_cell_data_is_interference_only() {
    let mut h = harness(seeded(), Box::new(ThresholdErrorModel::new(0.0)));
    h.deliver(&[0], 10.0, SUBFRAME_US, SignalKind::Data { cell_id: 9, packets: Vec::new(), control: Vec::new() }).unwrap();
    assert_eq!(h.rx.state(), ReceiverState::Idle);
}

#[test]
fn downlink_control_and_pss_measurement() {
    let mut h = harness(seeded(), Box::new(ThresholdErrorModel::new(0.0)));
    let control = vec![DownlinkControl::Mib { cell_id: CELL }];
    h.deliver(&[0, 1, 2], 10.0, 200, SignalKind::DlControl { cell_id: CELL, pss: true, control: control.clone() }).unwrap();
    // A neighbour's PSS is measured even though its control region is not received.
    h.deliver(&[5], 3.0, 200, SignalKind::DlControl { cell_id: 4, pss: true, control: Vec::new() }).unwrap();
    h.run_until(200).unwrap();

    let log = h.log.borrow();
    assert_eq!(log.measurements, vec![CELL, 4]);
    assert_eq!(log.control, vec![vec![ControlMessage::Downlink(DownlinkControl::Mib { cell_id: CELL })]]);
}

#[test]
fn corrupted_control_region_reports_error() {
    let mut h = harness(seeded(), Box::new(ThresholdErrorModel::new(30.0)));
    h.deliver(&[0, 1], 10.0, 200, SignalKind::DlControl { cell_id: CELL, pss: false, control: vec![DownlinkControl::Rar { rnti: 5 }] }).unwrap();
    h.run_until(200).unwrap();
    assert_eq!(h.log.borrow().control_errors, 1);
    assert!(h.log.borrow().control.is_empty());
}

#[test]
fn srs_episode_returns_to_idle() {
    let mut h = harness(seeded(), Box::new(ThresholdErrorModel::new(0.0)));
    h.deliver(&[0], 10.0, 70, SignalKind::UlSrs { cell_id: CELL }).unwrap();
    assert_eq!(h.rx.state(), ReceiverState::ReceivingSrs);
    h.run_until(70).unwrap();
    assert_eq!(h.rx.state(), ReceiverState::Idle);
}

#[test]
fn sidelink_retransmission_of_delivered_tb_is_not_delivered_again() {
    let (model, _) = ScriptedModel::new(&[0.0, 1.0]);
    let mut h = harness(seeded(), Box::new(model));
    h.rx.add_group(0x107);
    let identity = TbIdentity::sidelink(20, 0x107);
    let frame = |payload: SidelinkPayload| SignalKind::Sidelink(SidelinkFrame { node_id: 2, slss_id: 0, group: Some(0x107), payload });
    let packet = Packet::sidelink(20, 0x107, vec![1]);

    h.rx.register_expected_tb(identity, TbInfo::new(true, 100, 4, vec![0, 1], 0));
    h.deliver(&[0, 1], 10.0, SUBFRAME_US, frame(SidelinkPayload::Data(vec![packet.clone()]))).unwrap();
    h.run_until(SUBFRAME_US).unwrap();
    assert_eq!(h.log.borrow().decoded, vec![packet.clone()]);
    assert!(h.rx.sl_harq().is_sl_decoded(20, 0x07));

    // The scripted 1.0 would fail a draw; a previously decoded TB skips it.
    h.rx.register_expected_tb(identity, TbInfo::new(false, 100, 4, vec![0, 1], 1));
    h.deliver(&[0, 1], 10.0, SUBFRAME_US, frame(SidelinkPayload::Data(vec![packet.clone()]))).unwrap();
    h.run_until(2 * SUBFRAME_US).unwrap();
    assert_eq!(h.log.borrow().decoded.len(), 1);
    assert_eq!(h.log.borrow().errors, vec![packet]);
    assert_eq!(h.rx.sl_harq().sl_history(20, 0x07).len(), 2);

    // New data clears the sidelink HARQ state.
    h.rx.register_expected_tb(identity, TbInfo::new(true, 100, 4, vec![0, 1], 0));
    assert!(!h.rx.sl_harq().is_sl_decoded(20, 0x07));
    assert!(h.rx.sl_harq().sl_history(20, 0x07).is_empty());
}

#[test]
fn sidelink_frames_for_other_groups_are_interference() {
    let mut h = harness(seeded(), Box::new(ThresholdErrorModel::new(0.0)));
    h.rx.add_group(1);
    let kind = SignalKind::Sidelink(SidelinkFrame { node_id: 2, slss_id: 0, group: Some(2), payload: SidelinkPayload::Control(sci(20, &[0])) });
    h.deliver(&[0], 10.0, SUBFRAME_US, kind).unwrap();
    assert_eq!(h.rx.state(), ReceiverState::Idle);

    // Own frames are never received either.
    h.deliver(&[0], 10.0, SUBFRAME_US, sidelink(1, SidelinkPayload::Control(sci(10, &[0])))).unwrap();
    assert_eq!(h.rx.state(), ReceiverState::Idle);
}

fn discovery_harness(config: ReceiverConfig, threshold_db: f64) -> Harness {
    let mut h = harness(config, Box::new(ThresholdErrorModel::new(threshold_db)));
    h.rx.set_discovery_apps([42]);
    h.rx.add_discovery_rx_pool(DiscoveryPool { transmissions: BTreeMap::from([(3, vec![RbRange { start: 0, len: 2 }])]) });
    h
}

#[test]
fn monitored_discovery_message_is_decoded_once() {
    let mut h = discovery_harness(seeded(), 0.0);
    let message = DiscoveryMessage { rnti: 20, res_psdch: 3, app_code: 42, rv: 0 };
    h.deliver(&[0, 1], 10.0, SUBFRAME_US, sidelink(2, SidelinkPayload::Discovery(message.clone()))).unwrap();
    // Not monitored: no candidate.
    let other = DiscoveryMessage { rnti: 30, res_psdch: 3, app_code: 7, rv: 0 };
    h.deliver(&[4, 5], 10.0, SUBFRAME_US, sidelink(3, SidelinkPayload::Discovery(other))).unwrap();
    h.run_until(SUBFRAME_US).unwrap();

    assert_eq!(h.log.borrow().control, vec![vec![ControlMessage::Discovery(message.clone())]]);
    assert!(h.rx.sl_harq().is_disc_decoded(20, 3));

    // A retransmission of a decoded message is not reported again.
    let retx = DiscoveryMessage { rv: 1, ..message };
    h.deliver(&[0, 1], 10.0, SUBFRAME_US, sidelink(2, SidelinkPayload::Discovery(retx))).unwrap();
    h.run_until(2 * SUBFRAME_US).unwrap();
    assert_eq!(h.log.borrow().control.len(), 1);
    assert_eq!(h.log.borrow().control_errors, 1);
}

#[test]
fn discovery_redundancy_version_beyond_pool_is_fatal() {
    let mut h = discovery_harness(seeded(), 0.0);
    let message = DiscoveryMessage { rnti: 20, res_psdch: 3, app_code: 42, rv: 2 };
    h.deliver(&[0, 1], 10.0, SUBFRAME_US, sidelink(2, SidelinkPayload::Discovery(message))).unwrap();
    assert_eq!(h.run_until(SUBFRAME_US), Err(PhyError::InvalidRedundancyVersion { rv: 2, max_retx: 1 }));
    assert_eq!(h.rx.state(), ReceiverState::Idle);
}

#[test]
fn reset_cancels_pending_reception() {
    let mut h = harness(seeded(), Box::new(ThresholdErrorModel::new(0.0)));
    h.rx.register_expected_tb(TbIdentity::Unicast { rnti: 5, layer: 0 }, TbInfo::new(true, 100, 4, vec![0], 0));
    h.deliver(&[0], 10.0, SUBFRAME_US, data(vec![Packet::unicast(5, 0, vec![])])).unwrap();
    h.rx.reset();
    assert_eq!(h.rx.state(), ReceiverState::Idle);
    assert!(h.rx.registry().is_empty());
    assert!(h.queue.borrow().is_empty());
}

#[test]
fn transmission_mode_is_range_checked() {
    let mut h = harness(seeded(), Box::new(ThresholdErrorModel::new(0.0)));
    assert_eq!(h.rx.set_transmission_mode(7), Err(PhyError::InvalidTransmissionMode(7)));
    assert_eq!(h.rx.set_transmission_mode(6), Ok(()));
}

#[test]
fn broadcast_from_other_sync_identity_is_measured_and_decoded() {
    let mut h = harness(seeded(), Box::new(ThresholdErrorModel::new(0.0)));
    h.rx.set_sync_identity(1);
    let mib = SlMib { rnti: 20, direct_frame_no: 12, direct_subframe_no: 3 };
    let frame = SidelinkFrame { node_id: 2, slss_id: 9, group: Some(77), payload: SidelinkPayload::Broadcast(mib.clone()) };
    h.deliver(&[0, 1], 10.0, SUBFRAME_US, SignalKind::Sidelink(frame)).unwrap();
    assert_eq!(h.rx.state(), ReceiverState::ReceivingSidelink);
    h.run_until(SUBFRAME_US).unwrap();

    let log = h.log.borrow();
    assert_eq!(log.measurements, vec![9]);
    assert_eq!(log.control, vec![vec![ControlMessage::Broadcast { mib, slss_id: 9 }]]);
}

#[test]
fn transmission_mode_gain_lifts_data_above_threshold() {
    for (gain_db, decoded) in [(0.0, false), (3.0, true)] {
        let mut config = ReceiverConfig { transmission_mode: 2, ..seeded() };
        config.tx_mode_gains_db[2] = gain_db;
        let mut h = harness(config, Box::new(ThresholdErrorModel::new(5.0)));
        h.rx.register_expected_tb(TbIdentity::Unicast { rnti: 5, layer: 0 }, TbInfo::new(true, 100, 4, vec![0, 1], 0));
        h.deliver(&[0, 1], 3.0, SUBFRAME_US, data(vec![Packet::unicast(5, 0, vec![1])])).unwrap();
        h.run_until(SUBFRAME_US).unwrap();

        let log = h.log.borrow();
        assert_eq!(log.decoded.len(), usize::from(decoded), "gain {gain_db} dB");
        assert_eq!(log.errors.len(), usize::from(!decoded), "gain {gain_db} dB");
    }
}

#[test]
fn control_uses_transmit_diversity_gain_only_with_mimo() {
    for (mode, decoded) in [(0, false), (2, true)] {
        let mut config = ReceiverConfig { transmission_mode: mode, ..seeded() };
        config.tx_mode_gains_db[1] = 3.0;
        let mut h = harness(config, Box::new(ThresholdErrorModel::new(5.0)));
        h.deliver(&[0, 1], 3.0, 200, SignalKind::DlControl { cell_id: CELL, pss: false, control: vec![DownlinkControl::Rar { rnti: 5 }] }).unwrap();
        h.run_until(200).unwrap();

        let log = h.log.borrow();
        assert_eq!(log.control.len(), usize::from(decoded), "mode {mode}");
        assert_eq!(log.control_errors, usize::from(!decoded), "mode {mode}");
    }
}

#[test]
fn sidelink_rx_gain_lifts_control_above_threshold() {
    for (gain_db, decoded) in [(0.0, false), (3.0, true)] {
        let config = ReceiverConfig { sl_rx_gain_db: gain_db, ..seeded() };
        let mut h = harness(config, Box::new(ThresholdErrorModel::new(5.0)));
        h.deliver(&[0, 1], 3.0, SUBFRAME_US, sidelink(2, SidelinkPayload::Control(sci(20, &[0, 1])))).unwrap();
        h.run_until(SUBFRAME_US).unwrap();

        let log = h.log.borrow();
        assert_eq!(log.control.len(), usize::from(decoded), "gain {gain_db} dB");
        assert_eq!(log.control_errors, usize::from(!decoded), "gain {gain_db} dB");
    }
}

#[test]
fn disabled_error_models_never_corrupt() {
    // Every reception below sits far under the 30 dB threshold.
    let config = ReceiverConfig {
        ctrl_error_model_enabled: false,
        sl_ctrl_error_model_enabled: false,
        sl_data_error_model_enabled: false,
        sl_discovery_error_model_enabled: false,
        ..seeded()
    };

    let mut h = harness(config.clone(), Box::new(ThresholdErrorModel::new(30.0)));
    h.deliver(&[0, 1], 3.0, 200, SignalKind::DlControl { cell_id: CELL, pss: false, control: vec![DownlinkControl::Rar { rnti: 5 }] }).unwrap();
    h.run_until(200).unwrap();
    assert_eq!(h.log.borrow().control, vec![vec![ControlMessage::Downlink(DownlinkControl::Rar { rnti: 5 })]]);

    let mut h = harness(config.clone(), Box::new(ThresholdErrorModel::new(30.0)));
    h.deliver(&[0, 1], 3.0, SUBFRAME_US, sidelink(2, SidelinkPayload::Control(sci(20, &[0, 1])))).unwrap();
    h.run_until(SUBFRAME_US).unwrap();
    assert_eq!(h.log.borrow().control, vec![vec![ControlMessage::SidelinkControl(sci(20, &[0, 1]))]]);

    let mut h = harness(config.clone(), Box::new(ThresholdErrorModel::new(30.0)));
    h.rx.add_group(0x107);
    let packet = Packet::sidelink(20, 0x107, vec![1]);
    h.rx.register_expected_tb(TbIdentity::sidelink(20, 0x107), TbInfo::new(true, 100, 4, vec![0, 1], 0));
    let frame = SidelinkFrame { node_id: 2, slss_id: 0, group: Some(0x107), payload: SidelinkPayload::Data(vec![packet.clone()]) };
    h.deliver(&[0, 1], 3.0, SUBFRAME_US, SignalKind::Sidelink(frame)).unwrap();
    h.run_until(SUBFRAME_US).unwrap();
    assert_eq!(h.log.borrow().decoded, vec![packet]);

    let mut h = discovery_harness(config, 30.0);
    let message = DiscoveryMessage { rnti: 20, res_psdch: 3, app_code: 42, rv: 0 };
    h.deliver(&[0, 1], 3.0, SUBFRAME_US, sidelink(2, SidelinkPayload::Discovery(message.clone()))).unwrap();
    h.run_until(SUBFRAME_US).unwrap();
    assert_eq!(h.log.borrow().control, vec![vec![ControlMessage::Discovery(message)]]);
}
