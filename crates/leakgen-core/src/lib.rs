#![warn(unreachable_pub, missing_debug_implementations)]

//! The core leakgen library. This crate defines [the pipeline](Orchestrator)
//! that turns a network model and a [`BatchConfig`] into a labeled synthetic
//! leak dataset.

mod batch;
mod config;
mod engine;
mod export;
mod ident;
mod model;
mod noise;
mod orifice;
mod scenario;
mod sim;

#[cfg(test)]
pub(crate) mod testing;

pub use batch::{BatchError, BatchSummary, Orchestrator, ScenarioOutcome};
pub use config::{
    AreaRange, BatchConfig, ConfigError, ExportConfig, ExportFormat, LeakFlowPolicy, ModelConfig,
    NoiseConfig, ParallelConfig, ScenarioConfig, TimeRange,
};
pub use engine::{
    Engine, EngineError, EngineOutput, LeakParams, LinkSample, NodeClass, NodeSample, SimClock,
};
pub use export::{BatchTables, DatasetWriter, ExportError};
pub use ident::{IdPolicy, LinkId, NodeId};
pub use model::{InvalidModelError, ModelRepository};
pub use noise::NoiseInjector;
pub use orifice::{leak_flow, GRAVITY_M_S2};
pub use scenario::{LeakSpec, ScenarioDescriptor, ScenarioGenerator};
pub use sim::{
    LinkPoint, LinkSeries, NodePoint, NodeSeries, SimulationError, SimulationRunner,
    TimeSeriesResult,
};
