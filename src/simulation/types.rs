//! Type definitions for the scenario runner.
//!
//! Contains the JSON scenario model:
//! - Propagation parameters and resource grid size
//! - Receiver configuration and error model selection
//! - Nodes (position, power, role, cell and sidelink membership)
//! - Scripted transmissions

use anyhow::{Context, anyhow};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use super::signal_calculations::PathLossParameters;
use crate::config::ReceiverConfig;
use crate::phy::{DiscoveryPool, ErrorModel, LogisticErrorModel, Rnti, Role, ThresholdErrorModel};

/// LTE carries at most 100 resource blocks (20 MHz).
pub const MAX_RBS: usize = 100;
const MAX_NODES: usize = 10000;
const MIN_TX_POWER: f64 = -50.0;
const MAX_TX_POWER: f64 = 50.0;

/// Root structure of a scenario file.
#[derive(Debug, Deserialize)]
pub struct Scenario {
    pub path_loss_parameters: PathLossParameters,
    /// Number of resource blocks of the carrier.
    pub num_rbs: usize,
    #[serde(default)]
    pub receiver_config: ReceiverConfig,
    #[serde(default)]
    pub error_model: ErrorModelConfig,
    pub nodes: Vec<NodeConfig>,
    /// Discovery receive pools configured on every terminal.
    #[serde(default)]
    pub discovery_pools: Vec<DiscoveryPool>,
    pub transmissions: Vec<TransmissionSpec>,
}

impl Scenario {
    pub fn node(&self, node_id: u32) -> Option<&NodeConfig> {
        self.nodes.iter().find(|node| node.node_id == node_id)
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ErrorModelConfig {
    Threshold {
        threshold_db: f64,
    },
    #[default]
    Logistic,
}

impl ErrorModelConfig {
    pub fn build(&self) -> Box<dyn ErrorModel> {
        match *self {
            ErrorModelConfig::Threshold { threshold_db } => Box::new(ThresholdErrorModel::new(threshold_db)),
            ErrorModelConfig::Logistic => Box::new(LogisticErrorModel::default()),
        }
    }
}

/// Position in meters.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NodeConfig {
    pub node_id: u32,
    pub rnti: Rnti,
    pub position: Point,
    /// Transmit power in dBm.
    pub tx_power: f64,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub cell_id: u16,
    #[serde(default)]
    pub slss_id: u16,
    /// Sidelink groups the node has joined.
    #[serde(default)]
    pub groups: Vec<u32>,
    /// Discovery application codes the node monitors.
    #[serde(default)]
    pub discovery_apps: Vec<u32>,
}

fn default_duration_us() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

/// One scripted transmission.
#[derive(Debug, Deserialize, Clone)]
pub struct TransmissionSpec {
    pub start_us: u64,
    pub sender: u32,
    #[serde(default = "default_duration_us")]
    pub duration_us: u64,
    pub rbs: Vec<usize>,
    pub frame: FrameSpec,
}

/// What a transmission carries. Expected TBs are registered at the
/// receivers as a MAC would after scheduling them.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FrameSpec {
    /// Unicast data between a base station and one terminal, in either direction.
    Data {
        target: u32,
        mcs: u8,
        size: u32,
        #[serde(default)]
        layer: u8,
        #[serde(default = "default_true")]
        ndi: bool,
        #[serde(default)]
        rv: u8,
        #[serde(default)]
        harq_process_id: u8,
    },
    /// Downlink control region, optionally with the primary synchronization signal.
    Control {
        #[serde(default)]
        pss: bool,
    },
    Srs,
    SidelinkControl { group: u32, mcs: u8, size: u32 },
    SidelinkData {
        group: u32,
        mcs: u8,
        size: u32,
        #[serde(default = "default_true")]
        ndi: bool,
        #[serde(default)]
        rv: u8,
    },
    Discovery {
        res_psdch: u8,
        app_code: u32,
        #[serde(default)]
        rv: u8,
    },
    SidelinkBroadcast {
        #[serde(default)]
        frame_no: u16,
        #[serde(default)]
        subframe_no: u8,
    },
    /// Non-LTE energy on the carrier.
    Foreign,
}

impl FrameSpec {
    pub fn is_sidelink(&self) -> bool {
        matches!(
            self,
            FrameSpec::SidelinkControl { .. } | FrameSpec::SidelinkData { .. } | FrameSpec::Discovery { .. } | FrameSpec::SidelinkBroadcast { .. }
        )
    }
}

/// Validate scenario configuration for correctness and consistency.
///
/// # Returns
///
/// `Ok(())` if validation passes, `Err(String)` with error description if validation fails.
pub fn validate_scenario(scenario: &Scenario) -> Result<(), String> {
    if scenario.nodes.is_empty() {
        return Err("Scenario must contain at least one node".to_string());
    }
    if scenario.nodes.len() > MAX_NODES {
        return Err(format!("Node count {} exceeds maximum of {}", scenario.nodes.len(), MAX_NODES));
    }
    if scenario.num_rbs == 0 || scenario.num_rbs > MAX_RBS {
        return Err(format!("Invalid num_rbs {}, must be 1-{}", scenario.num_rbs, MAX_RBS));
    }

    let mut node_ids = HashSet::new();
    let mut rntis = HashSet::new();
    for node in &scenario.nodes {
        if !node_ids.insert(node.node_id) {
            return Err(format!("Duplicate node_id found: {}", node.node_id));
        }
        if !rntis.insert(node.rnti) {
            return Err(format!("Duplicate rnti found: {}", node.rnti));
        }
        if !(MIN_TX_POWER..=MAX_TX_POWER).contains(&node.tx_power) {
            return Err(format!(
                "Node {} tx_power {} dBm outside realistic range ({} to {} dBm)",
                node.node_id, node.tx_power, MIN_TX_POWER, MAX_TX_POWER
            ));
        }
    }

    if scenario.path_loss_parameters.path_loss_exponent <= 0.0 {
        return Err("Invalid path_loss_exponent, must be positive".to_string());
    }
    if scenario.path_loss_parameters.shadowing_sigma < 0.0 {
        return Err("Invalid shadowing_sigma, must be non-negative".to_string());
    }
    scenario.receiver_config.validate()?;

    for (idx, tx) in scenario.transmissions.iter().enumerate() {
        let sender = scenario.node(tx.sender).ok_or_else(|| format!("Transmission {} has unknown sender {}", idx, tx.sender))?;
        if tx.duration_us == 0 {
            return Err(format!("Transmission {} has zero duration", idx));
        }
        if tx.rbs.is_empty() {
            return Err(format!("Transmission {} uses no resource blocks", idx));
        }
        if let Some(rb) = tx.rbs.iter().find(|&&rb| rb >= scenario.num_rbs) {
            return Err(format!("Transmission {} uses RB {} outside the carrier (0-{})", idx, rb, scenario.num_rbs - 1));
        }
        match &tx.frame {
            FrameSpec::Data { target, .. } => {
                let target_node = scenario.node(*target).ok_or_else(|| format!("Transmission {} has unknown target {}", idx, target))?;
                if sender.role == target_node.role {
                    return Err(format!("Transmission {} must link a base station and a terminal", idx));
                }
                if sender.cell_id != target_node.cell_id {
                    return Err(format!("Transmission {} links nodes of different cells", idx));
                }
            }
            FrameSpec::Control { .. } if sender.role != Role::Enb => {
                return Err(format!("Transmission {}: only base stations send downlink control", idx));
            }
            FrameSpec::Srs if sender.role != Role::Ue => {
                return Err(format!("Transmission {}: only terminals send SRS", idx));
            }
            frame if frame.is_sidelink() && sender.role != Role::Ue => {
                return Err(format!("Transmission {}: only terminals transmit on the sidelink", idx));
            }
            _ => {}
        }
    }
    Ok(())
}

/// Read, parse and validate a scenario file.
pub fn load_scenario(path: &Path) -> anyhow::Result<Scenario> {
    let data = fs::read_to_string(path).with_context(|| format!("Failed to read file: {}", path.display()))?;
    let scenario = serde_json::from_str::<Scenario>(&data).context("Invalid JSON format")?;
    validate_scenario(&scenario).map_err(|err| anyhow!("Invalid scenario configuration: {err}"))?;
    Ok(scenario)
}
