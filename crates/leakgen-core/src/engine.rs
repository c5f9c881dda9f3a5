//! The interface to the external hydraulic solver.
//!
//! The solver is an opaque collaborator: it parses a network description,
//! accepts leak emitters, and produces per-node and per-link time series.
//! Everything this crate knows about it goes through the [`Engine`] trait.

use rustc_hash::FxHashMap;

/// Simulation clock settings, in seconds.
#[derive(
    Debug, Clone, Copy, serde::Serialize, serde::Deserialize, typed_builder::TypedBuilder,
)]
pub struct SimClock {
    /// Total simulated duration.
    pub duration_s: u64,
    /// Hydraulic solver step.
    #[builder(default = 3600)]
    #[serde(default = "default_timestep_s")]
    pub hydraulic_timestep_s: u64,
    /// Reporting step for the exported series.
    #[builder(default = 3600)]
    #[serde(default = "default_timestep_s")]
    pub report_timestep_s: u64,
}

fn default_timestep_s() -> u64 {
    3600
}

/// How a node participates in the network, as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeClass {
    /// A consumer node. Only junctions can host leak emitters.
    Junction,
    Reservoir,
    Tank,
}

/// A leak emitter, in engine-native units and identifiers.
#[derive(Debug, Clone)]
pub struct LeakParams {
    /// Raw engine identifier of the target node.
    pub node: String,
    /// Orifice aperture area (m²).
    pub area_m2: f64,
    /// Discharge coefficient Cd.
    pub discharge_coeff: f64,
    pub start_s: u64,
    pub end_s: u64,
}

/// One report-step sample for a node. Pressure and head are in meters;
/// volumetric rates are in m³/s.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeSample {
    pub time_s: u64,
    pub pressure_m: f64,
    pub head_m: f64,
    pub demand_m3s: f64,
    /// Leak discharge as reported by the engine, when it reports one at all.
    pub leak_demand_m3s: Option<f64>,
}

/// One report-step sample for a link.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkSample {
    pub time_s: u64,
    pub flow_m3s: f64,
}

/// Raw engine output, keyed by engine-native identifiers.
#[derive(Debug, Default)]
pub struct EngineOutput {
    pub nodes: FxHashMap<String, Vec<NodeSample>>,
    pub links: FxHashMap<String, Vec<LinkSample>>,
}

/// An interface for hydraulic solvers.
pub trait Engine: Sync {
    /// The engine-native network object. One per scenario; never shared
    /// between workers.
    type Net: Send;

    /// Parses a network description into a native network object.
    fn load(&self, description: &[u8]) -> Result<Self::Net, EngineError>;

    /// Serializes a network back into a description the engine can re-parse.
    fn serialize(&self, net: &Self::Net) -> Result<Vec<u8>, EngineError>;

    /// Lists every node with its class, in engine-native identifiers.
    fn nodes(&self, net: &Self::Net) -> Vec<(String, NodeClass)>;

    /// Injects a leak emitter into the network.
    fn apply_leak(&self, net: &mut Self::Net, leak: &LeakParams) -> Result<(), EngineError>;

    /// Runs the hydraulics for the whole clock in one invocation.
    fn run(&self, net: &Self::Net, clock: SimClock) -> Result<EngineOutput, EngineError>;
}

/// Errors surfaced by an engine implementation.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("failed to parse network description: {0}")]
    Parse(String),

    #[error("unknown node {0}")]
    UnknownNode(String),

    #[error("hydraulic solver failed to produce a result: {0}")]
    Diverged(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
