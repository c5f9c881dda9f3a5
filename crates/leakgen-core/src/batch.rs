//! Batch orchestration.
//!
//! The [`Orchestrator`] ties the pipeline together: it loads the network
//! model once, samples a batch of leak scenarios, and fans the simulations
//! out over a worker pool. Each worker persists its own scenario's partition
//! and sends back only a small outcome record, so full time series never
//! accumulate in memory. One scenario failing never aborts the batch.

use std::path::PathBuf;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use rustc_hash::FxHashSet;

use crate::config::BatchConfig;
use crate::engine::Engine;
use crate::export::{DatasetWriter, ExportError};
use crate::ident::NodeId;
use crate::model::{InvalidModelError, ModelRepository};
use crate::noise::NoiseInjector;
use crate::scenario::{ScenarioDescriptor, ScenarioGenerator};
use crate::sim::SimulationRunner;

/// Decorrelates per-scenario RNG streams derived from the batch seed.
const SEED_MIX: u64 = 0x9e37_79b9_7f4a_7c15;

/// The result of one scenario, as reported back by a worker. Deliberately
/// small: the time series itself is already on disk by the time this exists.
#[derive(Debug, Clone)]
pub struct ScenarioOutcome {
    pub scenario_id: u32,
    pub success: bool,
    pub error: Option<String>,
    pub descriptor: ScenarioDescriptor,
}

impl ScenarioOutcome {
    pub(crate) fn ok(descriptor: ScenarioDescriptor) -> Self {
        Self {
            scenario_id: descriptor.scenario_id,
            success: true,
            error: None,
            descriptor,
        }
    }

    pub(crate) fn failed(descriptor: ScenarioDescriptor, error: impl ToString) -> Self {
        Self {
            scenario_id: descriptor.scenario_id,
            success: false,
            error: Some(error.to_string()),
            descriptor,
        }
    }
}

/// Aggregate report for a finished batch.
#[derive(Debug)]
pub struct BatchSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub seed: u64,
    pub out_dir: PathBuf,
    pub metadata_path: Option<PathBuf>,
    pub labels_path: Option<PathBuf>,
    pub outcomes: Vec<ScenarioOutcome>,
}

#[derive(Debug)]
pub struct Orchestrator<E> {
    engine: E,
    config: BatchConfig,
}

impl<E: Engine> Orchestrator<E> {
    pub fn new(engine: E, config: BatchConfig) -> Result<Self, BatchError> {
        config.validate()?;
        Ok(Self { engine, config })
    }

    /// Runs the full pipeline: load, sample, simulate in parallel, export.
    pub fn run_batch(&self) -> Result<BatchSummary, BatchError> {
        let repo = ModelRepository::load(
            &self.engine,
            &self.config.model.path,
            self.config.model.id_policy,
        )?;
        let nodes = self.eligible_nodes(&repo)?;

        let seed = self
            .config
            .scenarios
            .seed
            .unwrap_or_else(|| rand::thread_rng().gen());
        tracing::info!(
            seed,
            scenarios = self.config.scenarios.count,
            nodes = nodes.len(),
            "starting batch"
        );

        let mut generator =
            ScenarioGenerator::new(nodes, &self.config.scenarios, StdRng::seed_from_u64(seed));
        let descriptors = generator.generate(
            self.config.scenarios.count,
            self.config.simulation.duration_s,
            self.config.scenarios.ensure_all_nodes_covered,
        );

        let writer = DatasetWriter::new(&self.config.export.out_dir, self.config.export.format)?;
        let mut outcomes = self.run_scenarios(&repo, &writer, descriptors, seed)?;
        outcomes.sort_by_key(|outcome| outcome.scenario_id);

        let tables = writer.write_batch_metadata(&outcomes)?;
        let successful = outcomes.iter().filter(|o| o.success).count();
        let summary = BatchSummary {
            total: outcomes.len(),
            successful,
            failed: outcomes.len() - successful,
            seed,
            out_dir: writer.out_dir().to_owned(),
            metadata_path: tables.as_ref().map(|t| t.metadata_path.clone()),
            labels_path: tables.map(|t| t.labels_path),
            outcomes,
        };
        tracing::info!(
            total = summary.total,
            successful = summary.successful,
            failed = summary.failed,
            "batch finished"
        );
        Ok(summary)
    }

    fn run_scenarios(
        &self,
        repo: &ModelRepository,
        writer: &DatasetWriter,
        descriptors: Vec<ScenarioDescriptor>,
        seed: u64,
    ) -> Result<Vec<ScenarioOutcome>, BatchError> {
        if !self.config.parallel.enabled {
            return Ok(descriptors
                .into_iter()
                .map(|descriptor| self.execute(repo, writer, descriptor, seed))
                .collect());
        }

        let workers = self.config.parallel.workers();
        tracing::debug!(workers, "running scenarios on worker pool");
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| BatchError::WorkerPool(e.to_string()))?;
        let (s, r) = crossbeam_channel::unbounded();
        pool.install(|| {
            descriptors.into_par_iter().for_each_with(s, |s, descriptor| {
                let outcome = self.execute(repo, writer, descriptor, seed);
                s.send(outcome).unwrap(); // the channel should never become disconnected
            })
        });
        Ok(r.iter().collect())
    }

    /// Simulates one scenario end to end and persists its partition. Every
    /// failure mode is folded into the outcome so siblings keep running.
    fn execute(
        &self,
        repo: &ModelRepository,
        writer: &DatasetWriter,
        descriptor: ScenarioDescriptor,
        seed: u64,
    ) -> ScenarioOutcome {
        let runner = SimulationRunner::new(
            &self.engine,
            repo,
            self.config.simulation,
            self.config.leak_flow,
        );
        let mut series = match runner.run(&descriptor) {
            Ok(series) => series,
            Err(e) => {
                tracing::error!(scenario_id = descriptor.scenario_id, error = %e, "simulation failed");
                return ScenarioOutcome::failed(descriptor, e);
            }
        };

        // Each scenario gets its own stream off the batch seed so results do
        // not depend on worker scheduling order.
        let mut rng =
            StdRng::seed_from_u64(seed ^ (descriptor.scenario_id as u64).wrapping_mul(SEED_MIX));
        NoiseInjector::new(&self.config.noise).apply(&mut series, &mut rng);

        match writer.write_scenario(&descriptor, &series) {
            Ok(()) => ScenarioOutcome::ok(descriptor),
            Err(e) => {
                tracing::error!(scenario_id = descriptor.scenario_id, error = %e, "export failed");
                ScenarioOutcome::failed(descriptor, e)
            }
        }
    }

    /// Junctions eligible to host leaks, honoring an explicit node list when
    /// configured. Unknown or non-junction entries are dropped with a warning
    /// rather than failing the batch. The result holds each node at most
    /// once, whatever the list's spelling; downstream coverage and multi-leak
    /// distinctness both rely on this.
    fn eligible_nodes(&self, repo: &ModelRepository) -> Result<Vec<NodeId>, BatchError> {
        let nodes = match &self.config.scenarios.node_list {
            None => repo.junctions().to_vec(),
            Some(list) => {
                let mut seen = FxHashSet::default();
                let mut nodes = Vec::with_capacity(list.len());
                for raw in list {
                    let id = NodeId::new(raw, repo.id_policy());
                    if !repo.junctions().contains(&id) {
                        tracing::warn!(node = raw.as_str(), "skipping unknown or non-junction node");
                    } else if seen.insert(id.clone()) {
                        nodes.push(id);
                    }
                }
                nodes
            }
        };
        if nodes.is_empty() {
            return Err(BatchError::NoEligibleNodes);
        }
        Ok(nodes)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("invalid configuration")]
    Config(#[from] crate::config::ConfigError),

    #[error("failed to load network model")]
    Model(#[from] InvalidModelError),

    #[error("no eligible leak nodes after filtering")]
    NoEligibleNodes,

    #[error("failed to build worker pool: {0}")]
    WorkerPool(String),

    #[error("failed to export dataset")]
    Export(#[from] ExportError),
}
