//! Scenario descriptors and their randomized generation.

use rand::prelude::*;

use crate::config::ScenarioConfig;
use crate::ident::NodeId;

/// One leak emitter in a scenario.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct LeakSpec {
    pub node: NodeId,
    /// Orifice aperture area (m²).
    pub area_m2: f64,
    pub start_s: u64,
    pub duration_s: u64,
    pub discharge_coeff: f64,
}

impl LeakSpec {
    pub fn end_s(&self) -> u64 {
        self.start_s + self.duration_s
    }

    /// Whether this leak is active at `time_s`. Both endpoints inclusive.
    pub fn covers(&self, time_s: u64) -> bool {
        (self.start_s..=self.end_s()).contains(&time_s)
    }
}

/// One synthetic experiment: at least one leak over a bounded time window.
///
/// Single- and multi-leak scenarios share this one representation; the
/// "primary" leak is always `leaks[0]` and is what coverage guarantees and
/// backward-compatible reporting refer to.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ScenarioDescriptor {
    pub scenario_id: u32,
    /// Non-empty; node ids are pairwise distinct.
    pub leaks: Vec<LeakSpec>,
}

impl ScenarioDescriptor {
    pub fn primary(&self) -> &LeakSpec {
        &self.leaks[0]
    }

    /// The leak active on `node` at `time_s`, if any.
    pub fn leak_at(&self, node: &NodeId, time_s: u64) -> Option<&LeakSpec> {
        self.leaks
            .iter()
            .find(|leak| leak.node == *node && leak.covers(time_s))
    }

    /// Exact ground-truth label for a node-timestamp row: positive iff the
    /// node hosts a leak whose window contains the timestamp.
    pub fn is_leak_row(&self, node: &NodeId, time_s: u64) -> bool {
        self.leak_at(node, time_s).is_some()
    }
}

/// Produces a batch of [`ScenarioDescriptor`]s from the eligible node set.
#[derive(Debug)]
pub struct ScenarioGenerator<R> {
    nodes: Vec<NodeId>,
    config: ScenarioConfig,
    rng: R,
}

impl<R: Rng> ScenarioGenerator<R> {
    pub fn new(nodes: Vec<NodeId>, config: &ScenarioConfig, rng: R) -> Self {
        Self {
            nodes,
            config: config.clone(),
            rng,
        }
    }

    /// Generates `n_scenarios` descriptors over `simulation_duration_s`.
    ///
    /// With `ensure_all_nodes`, Phase 1 assigns exactly one scenario per
    /// eligible node in shuffled order (raising `n_scenarios` to the node
    /// count if needed), and Phase 2 fills any remaining budget with nodes
    /// drawn uniformly with replacement.
    pub fn generate(
        &mut self,
        n_scenarios: usize,
        simulation_duration_s: u64,
        ensure_all_nodes: bool,
    ) -> Vec<ScenarioDescriptor> {
        if self.nodes.is_empty() {
            return Vec::new();
        }
        let duration_h = simulation_duration_s as f64 / 3600.0;
        let mut n_scenarios = n_scenarios;
        let mut scenarios = Vec::new();

        if ensure_all_nodes {
            if n_scenarios < self.nodes.len() {
                tracing::warn!(
                    requested = n_scenarios,
                    nodes = self.nodes.len(),
                    "raising scenario count to cover every eligible node"
                );
                n_scenarios = self.nodes.len();
            }
            let mut order = self.nodes.clone();
            order.shuffle(&mut self.rng);
            for node in order {
                let id = scenarios.len() as u32 + 1;
                let scenario = self.create_scenario(id, node, duration_h);
                scenarios.push(scenario);
            }
        }

        while scenarios.len() < n_scenarios {
            let node = self.nodes[self.rng.gen_range(0..self.nodes.len())].clone();
            let id = scenarios.len() as u32 + 1;
            let scenario = self.create_scenario(id, node, duration_h);
            scenarios.push(scenario);
        }

        tracing::info!(
            scenarios = scenarios.len(),
            nodes = self.nodes.len(),
            ensure_all_nodes,
            "generated leak scenarios"
        );
        scenarios
    }

    fn create_scenario(
        &mut self,
        scenario_id: u32,
        primary: NodeId,
        duration_h: f64,
    ) -> ScenarioDescriptor {
        let mut leaks = Vec::with_capacity(self.config.leaks_per_scenario);
        leaks.push(self.sample_leak(primary.clone(), duration_h));

        let extra = self.config.leaks_per_scenario.saturating_sub(1);
        if extra > 0 {
            // Additional leaks land on distinct nodes, sampled without
            // replacement from the rest of the eligible set. If the set runs
            // short, the count is reduced rather than erroring.
            let pool: Vec<NodeId> = self
                .nodes
                .iter()
                .filter(|node| **node != primary)
                .cloned()
                .collect();
            let chosen: Vec<NodeId> = pool
                .choose_multiple(&mut self.rng, extra.min(pool.len()))
                .cloned()
                .collect();
            for node in chosen {
                let leak = self.sample_leak(node, duration_h);
                leaks.push(leak);
            }
        }

        ScenarioDescriptor { scenario_id, leaks }
    }

    fn sample_leak(&mut self, node: NodeId, duration_h: f64) -> LeakSpec {
        let (area_min, area_max) = (self.config.area_m2.min, self.config.area_m2.max);
        let area_m2 = self.sample_log_uniform(area_min, area_max);
        let (start_s, duration_s) = self.sample_window(duration_h);
        LeakSpec {
            node,
            area_m2,
            start_s,
            duration_s,
            discharge_coeff: self.config.discharge_coeff,
        }
    }

    /// Samples a leak window, in hours, floored to whole seconds. The bounds
    /// guarantee `end_s <= simulation_duration_s` by construction.
    fn sample_window(&mut self, duration_h: f64) -> (u64, u64) {
        let time = self.config.time_h;
        let start_lo = time.start_min.min((duration_h - 1.0).max(0.0));
        let start_hi = time.start_max.min(duration_h - 1.0);
        let start_h = if start_hi > start_lo {
            self.rng.gen_range(start_lo..start_hi)
        } else {
            start_lo
        };

        let dur_lo = time.duration_min;
        let dur_hi = time.duration_max.min(duration_h - start_h);
        let leak_duration_h = if dur_hi > dur_lo {
            self.rng.gen_range(dur_lo..dur_hi)
        } else {
            dur_lo.min(dur_hi)
        };

        let start_s = (start_h * 3600.0) as u64;
        let duration_s = ((leak_duration_h * 3600.0) as u64).max(1);
        (start_s, duration_s)
    }

    /// Log-uniform draw: `u ~ Uniform(ln min, ln max)`, sample `= e^u`.
    /// Matches realistic leak-size distributions, where small leaks are far
    /// more common than large ones.
    fn sample_log_uniform(&mut self, min: f64, max: f64) -> f64 {
        debug_assert!(min > 0.0 && max >= min);
        let (lo, hi) = (min.ln(), max.ln());
        let u = if hi > lo { self.rng.gen_range(lo..hi) } else { lo };
        u.exp()
    }
}
