//! Discrete-event scenario runner.
//!
//! Every node gets a transmit PHY that only tracks its own transmissions and a
//! receive PHY per carrier it listens on: terminals listen on the downlink and
//! on the uplink carrier (which carries the sidelink), base stations only on
//! the uplink carrier. The runner plays the MAC: when a transmission starts it registers the
//! expected TBs at the intended receivers, then delivers the signal with the
//! propagated PSD. Sidelink signals are not delivered to a node whose
//! transmit PHY is busy, since a terminal cannot hear the sidelink while
//! transmitting on it.

use anyhow::Context;
use embassy_time::{Duration, Instant};
use log::{debug, error, info};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use super::event_queue::{Carrier, EventQueue, PhyScheduler, PhyTarget, SimEvent};
use super::geometry::distance;
use super::signal_calculations::{calculate_path_loss, dbm_to_mw, noise_psd, transmit_psd};
use super::types::{FrameSpec, NodeConfig, Scenario, TransmissionSpec, validate_scenario};
use crate::config::ReceiverConfig;
use crate::phy::{
    ControlMessage, DiscoveryMessage, DownlinkControl, HarqFeedback, HarqStatus, Packet, PhyListener, Receiver, ReceiverState, ReceptionStats, Role, Sci,
    SidelinkFrame, SidelinkPayload, Signal, SignalKind, SlMib, SpectrumValue, TbIdentity, TbInfo,
};
use crate::time_driver;

/// Per-node counters collected from the receive and transmit PHYs.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct NodeCounters {
    pub packets_ok: u64,
    pub packets_error: u64,
    pub control_messages_ok: u64,
    pub control_errors: u64,
    pub harq_acks: u64,
    pub harq_nacks: u64,
    pub measurements: u64,
    pub transmissions: u64,
    pub receptions: u64,
    pub correct_receptions: u64,
    /// Messages of the last successful control decode, for inspection.
    pub last_control: Vec<ControlMessage>,
}

impl PhyListener for NodeCounters {
    fn on_decode_ok(&mut self, packets: Vec<Packet>) {
        self.packets_ok += packets.len() as u64;
    }

    fn on_decode_error(&mut self, _packet: &Packet) {
        self.packets_error += 1;
    }

    fn on_control_decode_ok(&mut self, messages: Vec<ControlMessage>) {
        self.control_messages_ok += messages.len() as u64;
        self.last_control = messages;
    }

    fn on_control_decode_error(&mut self) {
        self.control_errors += 1;
    }

    fn on_harq_feedback(&mut self, feedback: HarqFeedback) {
        let statuses = match feedback {
            HarqFeedback::Downlink { statuses, .. } => statuses,
            HarqFeedback::Uplink { status, .. } => vec![status],
        };
        for status in statuses {
            match status {
                HarqStatus::Ack => self.harq_acks += 1,
                HarqStatus::Nack => self.harq_nacks += 1,
            }
        }
    }

    fn on_measurement(&mut self, _id: u16, _psd: &SpectrumValue) {
        self.measurements += 1;
    }

    fn on_transmission_end(&mut self, _packets: Vec<Packet>) {
        self.transmissions += 1;
    }

    fn on_reception_stats(&mut self, stats: &ReceptionStats) {
        self.receptions += 1;
        if stats.correct {
            self.correct_receptions += 1;
        }
    }
}

/// Result of a finished scenario.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioSummary {
    pub end_time: Instant,
    pub nodes: BTreeMap<u32, NodeCounters>,
}

impl ScenarioSummary {
    pub fn log(&self) {
        info!("Scenario finished at {} us", self.end_time.as_micros());
        for (node_id, counters) in &self.nodes {
            info!(
                "Node {}: packets ok {} error {}, control ok {} error {}, HARQ ack {} nack {}, measurements {}, transmissions {}, receptions {}/{} correct",
                node_id,
                counters.packets_ok,
                counters.packets_error,
                counters.control_messages_ok,
                counters.control_errors,
                counters.harq_acks,
                counters.harq_nacks,
                counters.measurements,
                counters.transmissions,
                counters.correct_receptions,
                counters.receptions
            );
        }
    }
}

struct NodePhys {
    config: NodeConfig,
    tx: Receiver,
    /// Absent on base stations.
    downlink_rx: Option<Receiver>,
    uplink_rx: Receiver,
    counters: Rc<RefCell<NodeCounters>>,
}

impl NodePhys {
    fn rx_mut(&mut self, carrier: Carrier) -> Option<&mut Receiver> {
        match carrier {
            Carrier::Downlink => self.downlink_rx.as_mut(),
            Carrier::Uplink => Some(&mut self.uplink_rx),
        }
    }
}

pub struct ScenarioRunner<'a> {
    scenario: &'a Scenario,
    queue: Rc<RefCell<EventQueue<SimEvent>>>,
    nodes: BTreeMap<u32, NodePhys>,
    /// Transmission indices in start order; `next_tx` points at the next one to schedule.
    order: Vec<usize>,
    next_tx: usize,
    rng: StdRng,
}

impl<'a> ScenarioRunner<'a> {
    pub fn new(scenario: &'a Scenario) -> anyhow::Result<Self> {
        validate_scenario(scenario).map_err(|err| anyhow::anyhow!("Invalid scenario configuration: {err}"))?;

        let queue = Rc::new(RefCell::new(EventQueue::new()));
        let noise = noise_psd(scenario.num_rbs, &scenario.path_loss_parameters);
        let mut nodes = BTreeMap::new();
        for node in &scenario.nodes {
            let counters = Rc::new(RefCell::new(NodeCounters::default()));
            let mut config = scenario.receiver_config.clone();
            // Distinct but reproducible draws per node.
            config.seed = config.seed.map(|seed| seed.wrapping_add(u64::from(node.node_id)));

            let tx = Self::build_phy(scenario, node, config.clone(), &queue, PhyTarget::Tx(node.node_id), &counters, &noise)?;
            let downlink_rx = match node.role {
                Role::Ue => {
                    let target = PhyTarget::Rx(node.node_id, Carrier::Downlink);
                    Some(Self::build_phy(scenario, node, config.clone(), &queue, target, &counters, &noise)?)
                }
                Role::Enb => None,
            };
            let uplink_rx = Self::build_phy(scenario, node, config, &queue, PhyTarget::Rx(node.node_id, Carrier::Uplink), &counters, &noise)?;
            nodes.insert(node.node_id, NodePhys { config: node.clone(), tx, downlink_rx, uplink_rx, counters });
        }

        let mut order: Vec<usize> = (0..scenario.transmissions.len()).collect();
        order.sort_by_key(|&idx| scenario.transmissions[idx].start_us);

        let rng = match scenario.receiver_config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut runner = Self { scenario, queue, nodes, order, next_tx: 0, rng };
        runner.schedule_next_transmission();
        Ok(runner)
    }

    /// Transmissions are queued one at a time so that reception ends due at
    /// the same instant as a transmission start are handled first.
    fn schedule_next_transmission(&mut self) {
        if let Some(&idx) = self.order.get(self.next_tx) {
            self.next_tx += 1;
            let start = Instant::from_micros(self.scenario.transmissions[idx].start_us);
            self.queue.borrow_mut().schedule_at(start, SimEvent::Transmission(idx));
        }
    }

    fn build_phy(
        scenario: &Scenario,
        node: &NodeConfig,
        config: ReceiverConfig,
        queue: &Rc<RefCell<EventQueue<SimEvent>>>,
        target: PhyTarget,
        counters: &Rc<RefCell<NodeCounters>>,
        noise: &SpectrumValue,
    ) -> anyhow::Result<Receiver> {
        let scheduler = Box::new(PhyScheduler::new(queue.clone(), target));
        let mut phy = Receiver::new(node.node_id, config, scheduler, Box::new(counters.clone()), scenario.error_model.build())
            .with_context(|| format!("Failed to create PHY for node {}", node.node_id))?;
        phy.set_role(node.role);
        phy.set_cell_id(node.cell_id);
        phy.set_sync_identity(node.slss_id);
        phy.set_group_filter(node.groups.iter().copied());
        phy.set_discovery_apps(node.discovery_apps.iter().copied());
        if node.role == Role::Ue {
            for pool in &scenario.discovery_pools {
                phy.add_discovery_rx_pool(pool.clone());
            }
        }
        phy.set_noise_psd(noise.clone());
        Ok(phy)
    }

    /// Run until the event queue drains.
    pub fn run(mut self) -> anyhow::Result<ScenarioSummary> {
        info!("Running scenario with {} nodes and {} transmissions", self.nodes.len(), self.scenario.transmissions.len());
        loop {
            let next = self.queue.borrow_mut().pop();
            let Some((at, event)) = next else { break };
            time_driver::set_virtual_now(at);
            if let Err(err) = self.dispatch(event) {
                error!("Simulation stopped at {} us: {:#}", at.as_micros(), err);
                return Err(err);
            }
        }

        let end_time = self.queue.borrow().now();
        let nodes = self.nodes.iter().map(|(id, phys)| (*id, phys.counters.borrow().clone())).collect();
        Ok(ScenarioSummary { end_time, nodes })
    }

    fn dispatch(&mut self, event: SimEvent) -> anyhow::Result<()> {
        match event {
            SimEvent::Transmission(idx) => {
                let scenario = self.scenario;
                let spec = scenario.transmissions.get(idx).with_context(|| format!("Unknown transmission {idx}"))?;
                self.start_transmission(idx, spec)?;
                self.schedule_next_transmission();
                Ok(())
            }
            SimEvent::Phy { target, event } => {
                let (node_id, side) = match target {
                    PhyTarget::Tx(id) => (id, "transmit"),
                    PhyTarget::Rx(id, Carrier::Downlink) => (id, "downlink receive"),
                    PhyTarget::Rx(id, Carrier::Uplink) => (id, "uplink receive"),
                };
                let phys = self.nodes.get_mut(&node_id).with_context(|| format!("Event for unknown node {node_id}"))?;
                let phy = match target {
                    PhyTarget::Tx(_) => Some(&mut phys.tx),
                    PhyTarget::Rx(_, carrier) => phys.rx_mut(carrier),
                };
                let phy = phy.with_context(|| format!("Node {node_id} has no {side} PHY"))?;
                phy.handle_event(event).with_context(|| format!("Node {node_id} {side} PHY failed on {event:?}"))
            }
        }
    }

    fn start_transmission(&mut self, idx: usize, spec: &TransmissionSpec) -> anyhow::Result<()> {
        let sender = self.nodes.get(&spec.sender).map(|phys| phys.config.clone()).with_context(|| format!("Unknown sender {}", spec.sender))?;
        let duration = Duration::from_micros(spec.duration_us);
        let (kind, packets) = self.build_signal(&sender, spec)?;
        debug!("Transmission {} from node {} on RBs {:?}: {:?}", idx, sender.node_id, spec.rbs, spec.frame);

        if let Some(phys) = self.nodes.get_mut(&sender.node_id) {
            phys.tx.begin_transmission(duration, packets).with_context(|| format!("Node {} cannot start transmission {}", sender.node_id, idx))?;
        }
        self.register_expected_tbs(&sender, spec);

        let tx_psd = transmit_psd(self.scenario.num_rbs, &spec.rbs, sender.tx_power);
        let sidelink = spec.frame.is_sidelink();
        let carriers = carriers(&spec.frame, &sender);
        for phys in self.nodes.values_mut() {
            if phys.config.node_id == sender.node_id || !reaches(&spec.frame, &sender, &phys.config) {
                continue;
            }
            if sidelink && phys.tx.state() == ReceiverState::Transmitting {
                debug!("Node {} is transmitting, sidelink transmission {} not heard", phys.config.node_id, idx);
                continue;
            }
            let path_loss = calculate_path_loss(distance(&sender.position, &phys.config.position), &self.scenario.path_loss_parameters, &mut self.rng);
            let psd = tx_psd.scaled(dbm_to_mw(-path_loss));
            let node_id = phys.config.node_id;
            for &carrier in carriers {
                let Some(rx) = phys.rx_mut(carrier) else { continue };
                let signal = Signal { psd: psd.clone(), duration, kind: kind.clone() };
                rx.on_signal_arrival(signal).with_context(|| format!("Node {} {:?} receive PHY rejected transmission {}", node_id, carrier, idx))?;
            }
        }
        Ok(())
    }

    fn build_signal(&self, sender: &NodeConfig, spec: &TransmissionSpec) -> anyhow::Result<(SignalKind, Vec<Packet>)> {
        let sidelink = |payload: SidelinkPayload, group: Option<u32>| SignalKind::Sidelink(SidelinkFrame { node_id: sender.node_id, slss_id: sender.slss_id, group, payload });
        let signal = match spec.frame {
            FrameSpec::Data { target, size, layer, .. } => {
                let target = self.scenario.node(target).with_context(|| format!("Unknown target {target}"))?;
                let rnti = if sender.role == Role::Ue { sender.rnti } else { target.rnti };
                let packets = vec![Packet::unicast(rnti, layer, vec![0; size as usize])];
                (SignalKind::Data { cell_id: sender.cell_id, packets: packets.clone(), control: Vec::new() }, packets)
            }
            FrameSpec::Control { pss } => {
                let control = vec![DownlinkControl::Mib { cell_id: sender.cell_id }];
                (SignalKind::DlControl { cell_id: sender.cell_id, pss, control }, Vec::new())
            }
            FrameSpec::Srs => (SignalKind::UlSrs { cell_id: sender.cell_id }, Vec::new()),
            FrameSpec::SidelinkControl { group, mcs, size } => {
                let sci = Sci { rnti: sender.rnti, group_dst: group, rb_map: spec.rbs.clone(), mcs, tb_size: size };
                (sidelink(SidelinkPayload::Control(sci), Some(group)), Vec::new())
            }
            FrameSpec::SidelinkData { group, size, .. } => {
                let packets = vec![Packet::sidelink(sender.rnti, group, vec![0; size as usize])];
                (sidelink(SidelinkPayload::Data(packets.clone()), Some(group)), packets)
            }
            FrameSpec::Discovery { res_psdch, app_code, rv } => {
                let message = DiscoveryMessage { rnti: sender.rnti, res_psdch, app_code, rv };
                (sidelink(SidelinkPayload::Discovery(message), None), Vec::new())
            }
            FrameSpec::SidelinkBroadcast { frame_no, subframe_no } => {
                let mib = SlMib { rnti: sender.rnti, direct_frame_no: frame_no, direct_subframe_no: subframe_no };
                (sidelink(SidelinkPayload::Broadcast(mib), None), Vec::new())
            }
            FrameSpec::Foreign => (SignalKind::Foreign, Vec::new()),
        };
        Ok(signal)
    }

    /// Register the TBs the scheduled receivers expect, as their MAC would.
    fn register_expected_tbs(&mut self, sender: &NodeConfig, spec: &TransmissionSpec) {
        match spec.frame {
            FrameSpec::Data { target, mcs, size, layer, ndi, rv, harq_process_id } => {
                let downlink = sender.role == Role::Enb;
                let Some(phys) = self.nodes.get_mut(&target) else { return };
                let rnti = if downlink { phys.config.rnti } else { sender.rnti };
                let carrier = if downlink { Carrier::Downlink } else { Carrier::Uplink };
                let info = TbInfo::new(ndi, size, mcs, spec.rbs.clone(), rv).with_harq_process(harq_process_id, downlink);
                if let Some(rx) = phys.rx_mut(carrier) {
                    rx.register_expected_tb(TbIdentity::Unicast { rnti, layer }, info);
                }
            }
            FrameSpec::SidelinkData { group, mcs, size, ndi, rv } => {
                for phys in self.nodes.values_mut() {
                    if phys.config.node_id == sender.node_id || phys.config.role != Role::Ue || !phys.config.groups.contains(&group) {
                        continue;
                    }
                    let info = TbInfo::new(ndi, size, mcs, spec.rbs.clone(), rv);
                    phys.uplink_rx.register_expected_tb(TbIdentity::sidelink(sender.rnti, group), info);
                }
            }
            _ => {}
        }
    }
}

/// Carriers a transmission occupies. Non-LTE energy is present on both.
fn carriers(frame: &FrameSpec, sender: &NodeConfig) -> &'static [Carrier] {
    match frame {
        FrameSpec::Data { .. } if sender.role == Role::Enb => &[Carrier::Downlink],
        FrameSpec::Control { .. } => &[Carrier::Downlink],
        FrameSpec::Foreign => &[Carrier::Downlink, Carrier::Uplink],
        _ => &[Carrier::Uplink],
    }
}

/// Whether a transmission from `sender` reaches `receiver` at all.
///
/// Uplink data and SRS are only listened to by base stations; the sidelink
/// reaches base stations too, where it is interference.
fn reaches(frame: &FrameSpec, sender: &NodeConfig, receiver: &NodeConfig) -> bool {
    match frame {
        FrameSpec::Data { .. } => sender.role != receiver.role,
        FrameSpec::Control { .. } => receiver.role == Role::Ue,
        FrameSpec::Srs => receiver.role == Role::Enb,
        _ => true,
    }
}

/// Run a scenario to completion.
pub fn run_scenario(scenario: &Scenario) -> anyhow::Result<ScenarioSummary> {
    ScenarioRunner::new(scenario)?.run()
}
