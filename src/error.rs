//! Protocol violations raised by the receiver.
//!
//! Every variant marks a broken invariant of the surrounding simulation
//! (half-duplex, episode consistency, decode-once). None of them describes a
//! radio outcome: corrupted or colliding transport blocks are reported through
//! the listener instead.

use crate::phy::{PhyEvent, ReceiverState, TbIdentity};

/// Fatal receiver error. The simulation step that produced it must stop.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PhyError {
    /// Transmission requested while a reception is in progress.
    #[error("Cannot start transmission while in state {state}")]
    TxWhileReceiving { state: ReceiverState },

    #[error("Cannot start transmission while already transmitting")]
    TxWhileTransmitting,

    /// An LTE signal arrived during our own transmission, whatever its cell or
    /// group. Only non-LTE energy is tolerated.
    #[error("Signal arrived while transmitting (half-duplex violation)")]
    RxWhileTransmitting,

    /// A matching signal for one receive track arrived while another track is active.
    #[error("Signal for {requested} arrived while in state {current}")]
    TrackMismatch { current: ReceiverState, requested: ReceiverState },

    /// A simultaneous reception did not share the episode's start time and duration.
    #[error(
        "Simultaneous reception mismatch: episode started at {anchor_start_us}us for {anchor_duration_us}us, signal started at {start_us}us for {duration_us}us"
    )]
    EpisodeMismatch { anchor_start_us: u64, anchor_duration_us: u64, start_us: u64, duration_us: u64 },

    #[error("Transport block {identity:?} decoded twice in one reception")]
    DoubleDecode { identity: TbIdentity },

    #[error("Event {event:?} fired in state {state}")]
    UnexpectedEvent { event: PhyEvent, state: ReceiverState },

    #[error("Discovery redundancy version {rv} exceeds {max_retx} retransmissions")]
    InvalidRedundancyVersion { rv: u8, max_retx: u8 },

    #[error("Transmission mode {0} out of range (0-6)")]
    InvalidTransmissionMode(u8),
}
