//! Receive-path physical layer of an LTE device with sidelink (D2D) support.
//!
//! The [`phy::Receiver`] integrates interference over each reception,
//! decides transport blocks against a pluggable error model, resolves
//! colliding sidelink messages and keeps HARQ state. The [`simulation`]
//! module runs scripted multi-node scenarios on a virtual clock.

pub mod config;
pub mod error;
pub mod phy;
pub mod simulation;
pub mod time_driver;

pub use config::ReceiverConfig;
pub use error::PhyError;
