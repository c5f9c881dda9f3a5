//! Leak injection and scenario simulation.
//!
//! A [`SimulationRunner`] clones the shared template, injects the scenario's
//! leak emitters, invokes the engine once for the whole duration, and turns
//! the raw output into a [`TimeSeriesResult`] with canonical identifiers and
//! internally sorted, deduplicated series.

use crate::config::LeakFlowPolicy;
use crate::engine::{Engine, EngineError, LeakParams, NodeClass, SimClock};
use crate::ident::{LinkId, NodeId};
use crate::model::{InvalidModelError, ModelRepository};
use crate::orifice;
use crate::scenario::ScenarioDescriptor;

/// One exported sample for a node. Internal rates stay in m³/s; conversion to
/// L/s happens at the persistence boundary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodePoint {
    pub time_s: u64,
    pub pressure_m: f64,
    pub head_m: f64,
    pub demand_m3s: f64,
    /// Reconciled leak discharge (see [`LeakFlowPolicy`]).
    pub leak_demand_m3s: f64,
    /// Engine-reported leak discharge, kept for cross-checking.
    pub engine_leak_m3s: Option<f64>,
    /// Orifice-equation estimate, kept for cross-checking.
    pub estimated_leak_m3s: f64,
    /// Pre-noise values, populated by the noise injector.
    pub pressure_raw_m: Option<f64>,
    pub demand_raw_m3s: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkPoint {
    pub time_s: u64,
    pub flow_m3s: f64,
    pub flow_raw_m3s: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct NodeSeries {
    pub node: NodeId,
    pub points: Vec<NodePoint>,
}

#[derive(Debug, Clone)]
pub struct LinkSeries {
    pub link: LinkId,
    pub points: Vec<LinkPoint>,
}

/// Per-scenario time series. Lives only inside a single worker's scenario
/// execution; it is persisted and dropped, never sent to the coordinator.
#[derive(Debug, Clone)]
pub struct TimeSeriesResult {
    /// Sorted by node id; each series sorted and deduplicated by timestamp.
    pub nodes: Vec<NodeSeries>,
    /// Sorted by link id; each series sorted and deduplicated by timestamp.
    pub links: Vec<LinkSeries>,
}

#[derive(Debug)]
pub struct SimulationRunner<'a, E: Engine> {
    engine: &'a E,
    repo: &'a ModelRepository,
    clock: SimClock,
    policy: LeakFlowPolicy,
}

impl<'a, E: Engine> SimulationRunner<'a, E> {
    pub fn new(
        engine: &'a E,
        repo: &'a ModelRepository,
        clock: SimClock,
        policy: LeakFlowPolicy,
    ) -> Self {
        Self {
            engine,
            repo,
            clock,
            policy,
        }
    }

    /// Runs one scenario end to end and returns its time series.
    pub fn run(&self, scenario: &ScenarioDescriptor) -> Result<TimeSeriesResult, SimulationError> {
        let mut net = self.repo.clone_template(self.engine)?;
        let applied = self.apply_leaks(&mut net, scenario)?;
        tracing::debug!(
            scenario_id = scenario.scenario_id,
            leaks = applied,
            "running hydraulic simulation"
        );
        let output = self
            .engine
            .run(&net, self.clock)
            .map_err(SimulationError::Diverged)?;
        Ok(self.collect(scenario, output))
    }

    /// Injects every leak in the scenario. A non-junction target fails a
    /// single-leak scenario outright; in the multi-leak path the offending
    /// leak is skipped with a warning, and the scenario fails only if no
    /// leak could be applied at all.
    fn apply_leaks(
        &self,
        net: &mut E::Net,
        scenario: &ScenarioDescriptor,
    ) -> Result<usize, SimulationError> {
        let multi = scenario.leaks.len() > 1;
        let mut applied = 0;
        for leak in &scenario.leaks {
            let raw = match (self.repo.node_class(&leak.node), self.repo.raw_id(&leak.node)) {
                (Some(NodeClass::Junction), Some(raw)) => raw,
                _ if multi => {
                    tracing::warn!(
                        scenario_id = scenario.scenario_id,
                        node = %leak.node,
                        "leak target is not a junction; skipping this leak"
                    );
                    continue;
                }
                _ => {
                    return Err(SimulationError::InvalidNode {
                        node: leak.node.clone(),
                    })
                }
            };
            self.engine
                .apply_leak(
                    net,
                    &LeakParams {
                        node: raw.to_owned(),
                        area_m2: leak.area_m2,
                        discharge_coeff: leak.discharge_coeff,
                        start_s: leak.start_s,
                        end_s: leak.end_s(),
                    },
                )
                .map_err(SimulationError::Leak)?;
            applied += 1;
        }
        if applied == 0 {
            return Err(SimulationError::InvalidNode {
                node: scenario.primary().node.clone(),
            });
        }
        Ok(applied)
    }

    /// Normalizes identifiers, sorts and deduplicates every series, and
    /// reconciles leak flow between the engine report and the orifice
    /// estimate. Leak flow is nonzero only at a leak node inside its window.
    fn collect(
        &self,
        scenario: &ScenarioDescriptor,
        output: crate::engine::EngineOutput,
    ) -> TimeSeriesResult {
        let id_policy = self.repo.id_policy();

        let mut nodes = Vec::with_capacity(output.nodes.len());
        for (raw, mut samples) in output.nodes {
            let node = NodeId::new(&raw, id_policy);
            samples.sort_by_key(|s| s.time_s);
            samples.dedup_by_key(|s| s.time_s);
            let points = samples
                .into_iter()
                .map(|sample| {
                    let engine_leak = sample.leak_demand_m3s.filter(|v| v.is_finite());
                    let (estimated, reconciled) = match scenario.leak_at(&node, sample.time_s) {
                        Some(leak) => {
                            let estimated = orifice::leak_flow(
                                sample.pressure_m,
                                leak.area_m2,
                                leak.discharge_coeff,
                            );
                            let reconciled = match self.policy {
                                LeakFlowPolicy::PreferEngine => engine_leak
                                    .filter(|&v| v > 0.0)
                                    .unwrap_or(estimated),
                                LeakFlowPolicy::PreferEstimate => estimated,
                            };
                            (estimated, reconciled)
                        }
                        None => (0.0, 0.0),
                    };
                    NodePoint {
                        time_s: sample.time_s,
                        pressure_m: sample.pressure_m,
                        head_m: sample.head_m,
                        demand_m3s: sample.demand_m3s,
                        leak_demand_m3s: reconciled,
                        engine_leak_m3s: engine_leak,
                        estimated_leak_m3s: estimated,
                        pressure_raw_m: None,
                        demand_raw_m3s: None,
                    }
                })
                .collect();
            nodes.push(NodeSeries { node, points });
        }
        nodes.sort_by(|a, b| a.node.cmp(&b.node));

        let mut links = Vec::with_capacity(output.links.len());
        for (raw, mut samples) in output.links {
            let link = LinkId::new(&raw, id_policy);
            samples.sort_by_key(|s| s.time_s);
            samples.dedup_by_key(|s| s.time_s);
            let points = samples
                .into_iter()
                .map(|sample| LinkPoint {
                    time_s: sample.time_s,
                    flow_m3s: sample.flow_m3s,
                    flow_raw_m3s: None,
                })
                .collect();
            links.push(LinkSeries { link, points });
        }
        links.sort_by(|a, b| a.link.cmp(&b.link));

        TimeSeriesResult { nodes, links }
    }
}

/// Scenario-local simulation failures. These never abort sibling scenarios.
#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("failed to materialize a network copy")]
    Template(#[from] InvalidModelError),

    #[error("node {node} is not a consumer junction")]
    InvalidNode { node: NodeId },

    #[error("failed to inject leak")]
    Leak(#[source] EngineError),

    #[error("hydraulic simulation diverged")]
    Diverged(#[source] EngineError),
}
