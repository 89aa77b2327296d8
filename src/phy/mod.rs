//! LTE / sidelink receive-path physical layer.
//!
//! ## Structure
//!
//! - `receiver`: the state machine driven by signal arrivals and scheduled end events
//! - `interference`: per-track time-weighted SINR accumulation
//! - `registry`: transport blocks the MAC expects in the current episode
//! - `decode`: one-draw decoding of a TB against the error model
//! - `collision`: greedy resolution of messages competing for RBs
//! - `harq`: unicast and sidelink HARQ histories
//! - `error_model`: the error-rate lookup seam and two reference models
//! - `scheduler`, `listener`: downward and upward interfaces

pub mod collision;
pub mod decode;
pub mod error_model;
pub mod harq;
pub mod interference;
pub mod listener;
pub mod receiver;
pub mod registry;
pub mod scheduler;
pub mod spectrum;
pub mod types;

pub use error_model::{ErrorModel, LogisticErrorModel, MessageClass, TbStats, ThresholdErrorModel};
pub use harq::{HarqAttempt, HarqProcessKey};
pub use listener::{NullListener, PhyListener};
pub use receiver::Receiver;
pub use scheduler::{EventId, PhyEvent, Scheduler};
pub use spectrum::{SpectrumValue, db_to_linear, linear_to_db};
pub use types::*;
