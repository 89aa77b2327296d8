//! Type definitions for the receive path.
//!
//! Contains the data structures shared by the receiver and its collaborators:
//! - Receiver state and node role
//! - Transport-block identities and expected decoding parameters
//! - Signals, packets and control messages carried on the medium
//! - HARQ feedback and reception statistics reported to the listener

use embassy_time::{Duration, Instant};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;

use super::spectrum::SpectrumValue;

/// Radio network temporary identifier.
pub type Rnti = u16;

/// Receiver mode. Exactly one receiver owns this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    Idle,
    Transmitting,
    ReceivingData,
    ReceivingControl,
    ReceivingSidelink,
    ReceivingSrs,
}

impl ReceiverState {
    pub fn is_receiving(self) -> bool {
        matches!(
            self,
            ReceiverState::ReceivingData | ReceiverState::ReceivingControl | ReceiverState::ReceivingSidelink | ReceiverState::ReceivingSrs
        )
    }
}

impl fmt::Display for ReceiverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReceiverState::Idle => "IDLE",
            ReceiverState::Transmitting => "TX",
            ReceiverState::ReceivingData => "RX_DATA",
            ReceiverState::ReceivingControl => "RX_CTRL",
            ReceiverState::ReceivingSidelink => "RX_SL",
            ReceiverState::ReceivingSrs => "RX_SRS",
        };
        f.write_str(name)
    }
}

/// Whether the device is a base station or a terminal.
///
/// Base stations never receive sidelink frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Ue,
    Enb,
}

/// Identity of one transport block within a reception episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TbIdentity {
    /// Unicast uplink or downlink TB.
    Unicast { rnti: Rnti, layer: u8 },
    /// Sidelink group TB, addressed by the low byte of the destination group id.
    Sidelink { rnti: Rnti, l1_dst: u8 },
    /// Sidelink discovery TB, addressed by its PSDCH resource index.
    Discovery { rnti: Rnti, res_psdch: u8 },
}

impl TbIdentity {
    pub fn rnti(&self) -> Rnti {
        match self {
            TbIdentity::Unicast { rnti, .. } | TbIdentity::Sidelink { rnti, .. } | TbIdentity::Discovery { rnti, .. } => *rnti,
        }
    }

    /// Identity of a sidelink TB sent to the given layer-2 group.
    pub fn sidelink(rnti: Rnti, destination: u32) -> Self {
        TbIdentity::Sidelink { rnti, l1_dst: (destination & 0xFF) as u8 }
    }
}

/// Expected decoding parameters of a transport block.
///
/// Registered by the MAC before the signal carrying the TB arrives and
/// resolved by the end-of-reception event of the same episode.
#[derive(Debug, Clone, PartialEq)]
pub struct TbInfo {
    /// New-data indicator. `false` marks a retransmission.
    pub ndi: bool,
    /// Payload size in bytes.
    pub size: u32,
    pub mcs: u8,
    /// Resource blocks the TB occupies.
    pub rb_map: Vec<usize>,
    /// Redundancy version.
    pub rv: u8,
    pub harq_process_id: u8,
    /// Link direction of a unicast TB.
    pub downlink: bool,
    /// Reliability metric returned by the error model.
    pub metric: f64,
    /// `None` until the TB has been decoded in this episode.
    pub corrupted: Option<bool>,
    pub feedback_sent: bool,
    /// Mean SINR snapshot (linear), kept for sidelink and discovery diagnostics.
    pub sinr: f64,
    /// Arrival index of the signal that carried the TB (discovery only).
    pub rx_index: Option<usize>,
}

impl TbInfo {
    pub fn new(ndi: bool, size: u32, mcs: u8, rb_map: Vec<usize>, rv: u8) -> Self {
        Self {
            ndi,
            size,
            mcs,
            rb_map,
            rv,
            harq_process_id: 0,
            downlink: false,
            metric: 0.0,
            corrupted: None,
            feedback_sent: false,
            sinr: 0.0,
            rx_index: None,
        }
    }

    pub fn with_harq_process(mut self, harq_process_id: u8, downlink: bool) -> Self {
        self.harq_process_id = harq_process_id;
        self.downlink = downlink;
        self
    }
}

/// A MAC PDU carried in a data signal.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub rnti: Rnti,
    pub layer: u8,
    /// Layer-2 destination group for sidelink packets, 0 for unicast.
    pub destination: u32,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn unicast(rnti: Rnti, layer: u8, payload: Vec<u8>) -> Self {
        Self { rnti, layer, destination: 0, payload }
    }

    pub fn sidelink(rnti: Rnti, destination: u32, payload: Vec<u8>) -> Self {
        Self { rnti, layer: 0, destination, payload }
    }
}

/// Downlink control messages carried on PDCCH or piggybacked on data.
#[derive(Debug, Clone, PartialEq)]
pub enum DownlinkControl {
    DlDci { rnti: Rnti, rb_map: Vec<usize>, mcs: u8, tb_size: u32, ndi: bool, harq_process_id: u8 },
    UlDci { rnti: Rnti, rb_map: Vec<usize>, mcs: u8, tb_size: u32, ndi: bool },
    Rar { rnti: Rnti },
    Mib { cell_id: u16 },
    Sib1 { cell_id: u16 },
}

/// Sidelink control information (SCI format 0) announcing a PSSCH transmission.
#[derive(Debug, Clone, PartialEq)]
pub struct Sci {
    pub rnti: Rnti,
    /// Destination group id of the announced data.
    pub group_dst: u32,
    pub rb_map: Vec<usize>,
    pub mcs: u8,
    pub tb_size: u32,
}

/// One discovery announcement on PSDCH.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryMessage {
    pub rnti: Rnti,
    pub res_psdch: u8,
    pub app_code: u32,
    pub rv: u8,
}

/// Sidelink master information block carried on PSBCH.
#[derive(Debug, Clone, PartialEq)]
pub struct SlMib {
    pub rnti: Rnti,
    pub direct_frame_no: u16,
    pub direct_subframe_no: u8,
}

/// Successfully decoded control-plane message reported to the listener.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    Downlink(DownlinkControl),
    SidelinkControl(Sci),
    Discovery(DiscoveryMessage),
    Broadcast { mib: SlMib, slss_id: u16 },
}

/// Payload of a sidelink frame.
#[derive(Debug, Clone, PartialEq)]
pub enum SidelinkPayload {
    Control(Sci),
    Data(Vec<Packet>),
    Discovery(DiscoveryMessage),
    Broadcast(SlMib),
}

/// Sidelink frame as seen on the medium.
#[derive(Debug, Clone, PartialEq)]
pub struct SidelinkFrame {
    /// Node that transmitted the frame.
    pub node_id: u32,
    pub slss_id: u16,
    /// Group restriction. `None` reaches every receiver.
    pub group: Option<u32>,
    pub payload: SidelinkPayload,
}

/// What a signal carries.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalKind {
    Data { cell_id: u16, packets: Vec<Packet>, control: Vec<DownlinkControl> },
    DlControl { cell_id: u16, pss: bool, control: Vec<DownlinkControl> },
    UlSrs { cell_id: u16 },
    Sidelink(SidelinkFrame),
    /// Non-LTE energy. Only ever counted as interference.
    Foreign,
}

/// A signal arriving at the receiver antenna.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub psd: SpectrumValue,
    pub duration: Duration,
    pub kind: SignalKind,
}

/// Acknowledgement state of one transport block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarqStatus {
    Ack,
    Nack,
}

impl HarqStatus {
    pub fn from_corrupted(corrupted: bool) -> Self {
        if corrupted { HarqStatus::Nack } else { HarqStatus::Ack }
    }
}

/// HARQ feedback produced once per identity per episode.
#[derive(Debug, Clone, PartialEq)]
pub enum HarqFeedback {
    /// One status per layer of the current transmission mode.
    Downlink { rnti: Rnti, harq_process_id: u8, statuses: Vec<HarqStatus> },
    Uplink { rnti: Rnti, status: HarqStatus },
}

/// Physical channel a reception statistic refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Pdsch,
    Pusch,
    Pdcch,
    Pscch,
    Pssch,
    Psdch,
    Psbch,
}

/// Trace record for one decoded TB or control message.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceptionStats {
    pub timestamp: Instant,
    pub channel: Channel,
    pub cell_id: u16,
    pub rnti: Rnti,
    pub layer: u8,
    pub mcs: u8,
    pub size: u32,
    pub rv: u8,
    pub ndi: bool,
    pub correct: bool,
    /// Mean SINR over the TB's RBs in dB.
    pub sinr_db: f64,
}

/// Contiguous block of resource blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RbRange {
    pub start: usize,
    pub len: usize,
}

impl RbRange {
    pub fn rbs(&self) -> Vec<usize> {
        (self.start..self.start + self.len).collect()
    }
}

/// Discovery receive pool: the PSDCH transmissions (one per redundancy
/// version) allotted to each discovery resource index.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DiscoveryPool {
    pub transmissions: BTreeMap<u8, Vec<RbRange>>,
}

impl DiscoveryPool {
    pub fn psdch_transmissions(&self, res_psdch: u8) -> &[RbRange] {
        self.transmissions.get(&res_psdch).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Start time and duration shared by all receptions of one episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpisodeAnchor {
    pub start: Instant,
    pub duration: Duration,
}
