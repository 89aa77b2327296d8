//! Scenario simulation around the receive PHY.
//!
//! Drives a set of nodes through a scripted list of transmissions on a
//! discrete-event clock. It integrates:
//! - Scenario loading and validation
//! - Log-distance propagation with log-normal shadowing
//! - One transmit and one receive PHY per node, sharing an event queue
//! - Per-node reception counters
//!
//! ## Module Organization
//!
//! - `types`: Scenario model (nodes, transmissions, parameters)
//! - `signal_calculations`: Path loss and power conversions
//! - `geometry`: Distances between nodes
//! - `event_queue`: Discrete-event queue and the PHY scheduler adapter
//! - `runner`: The event loop

pub mod event_queue;
pub mod geometry;
pub mod runner;
pub mod signal_calculations;
pub mod types;

pub use runner::{NodeCounters, ScenarioRunner, ScenarioSummary, run_scenario};
pub use types::{Scenario, load_scenario, validate_scenario};
