//! Upward interface of the receiver.
//!
//! Every method has an empty default so a listener only implements the
//! notifications it cares about.

use std::cell::RefCell;
use std::rc::Rc;

use super::spectrum::SpectrumValue;
use super::types::{ControlMessage, HarqFeedback, Packet, ReceptionStats};

pub trait PhyListener {
    /// Packets of correctly decoded transport blocks.
    fn on_decode_ok(&mut self, _packets: Vec<Packet>) {}

    /// One packet of a corrupted transport block.
    fn on_decode_error(&mut self, _packet: &Packet) {}

    /// All control messages decoded on one channel in one episode.
    fn on_control_decode_ok(&mut self, _messages: Vec<ControlMessage>) {}

    /// No control message of a channel could be decoded.
    fn on_control_decode_error(&mut self) {}

    fn on_harq_feedback(&mut self, _feedback: HarqFeedback) {}

    /// PSS (cell id) or SLSS (SLSS id) measurement.
    fn on_measurement(&mut self, _id: u16, _psd: &SpectrumValue) {}

    /// Packets whose transmission just ended.
    fn on_transmission_end(&mut self, _packets: Vec<Packet>) {}

    fn on_reception_stats(&mut self, _stats: &ReceptionStats) {}
}

/// Listener that drops every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullListener;

impl PhyListener for NullListener {}

/// Shared listener, so the owner can inspect what the receiver reported.
impl<T: PhyListener> PhyListener for Rc<RefCell<T>> {
    fn on_decode_ok(&mut self, packets: Vec<Packet>) {
        self.borrow_mut().on_decode_ok(packets)
    }

    fn on_decode_error(&mut self, packet: &Packet) {
        self.borrow_mut().on_decode_error(packet)
    }

    fn on_control_decode_ok(&mut self, messages: Vec<ControlMessage>) {
        self.borrow_mut().on_control_decode_ok(messages)
    }

    fn on_control_decode_error(&mut self) {
        self.borrow_mut().on_control_decode_error()
    }

    fn on_harq_feedback(&mut self, feedback: HarqFeedback) {
        self.borrow_mut().on_harq_feedback(feedback)
    }

    fn on_measurement(&mut self, id: u16, psd: &SpectrumValue) {
        self.borrow_mut().on_measurement(id, psd)
    }

    fn on_transmission_end(&mut self, packets: Vec<Packet>) {
        self.borrow_mut().on_transmission_end(packets)
    }

    fn on_reception_stats(&mut self, stats: &ReceptionStats) {
        self.borrow_mut().on_reception_stats(stats)
    }
}
