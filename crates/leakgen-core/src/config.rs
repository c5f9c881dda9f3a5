//! Batch configuration.
//!
//! A [`BatchConfig`] is the single explicit input to the
//! [`Orchestrator`](crate::Orchestrator) — there is no ambient or global
//! state. Configs deserialize from JSON and can also be assembled in code via
//! the typed builders.

use std::path::{Path, PathBuf};

use crate::engine::SimClock;
use crate::ident::IdPolicy;

/// Everything a batch run needs.
#[derive(Debug, Clone, serde::Deserialize, typed_builder::TypedBuilder)]
pub struct BatchConfig {
    pub model: ModelConfig,
    pub scenarios: ScenarioConfig,
    pub simulation: SimClock,
    #[builder(default)]
    #[serde(default)]
    pub noise: NoiseConfig,
    #[builder(default)]
    #[serde(default)]
    pub parallel: ParallelConfig,
    pub export: ExportConfig,
    #[builder(default)]
    #[serde(default)]
    pub leak_flow: LeakFlowPolicy,
}

/// Where the base network description lives and how its ids are read.
#[derive(Debug, Clone, serde::Deserialize, typed_builder::TypedBuilder)]
pub struct ModelConfig {
    /// Path to the network description consumed by the engine.
    pub path: PathBuf,
    /// Canonical identifier type. The underlying format does not pin this
    /// down, so it is a configuration choice rather than a guess.
    #[builder(default)]
    #[serde(default)]
    pub id_policy: IdPolicy,
}

/// Randomized experiment design parameters.
#[derive(Debug, Clone, serde::Deserialize, typed_builder::TypedBuilder)]
pub struct ScenarioConfig {
    /// Number of scenarios to generate.
    pub count: usize,
    /// Concurrent leaks per scenario.
    #[builder(default = 1)]
    #[serde(default = "default_leaks_per_scenario")]
    pub leaks_per_scenario: usize,
    /// Guarantee every eligible node appears as a primary leak.
    #[builder(default)]
    #[serde(default)]
    pub ensure_all_nodes_covered: bool,
    /// Restrict leaks to these nodes. `None` uses every junction in the model.
    #[builder(default)]
    #[serde(default)]
    pub node_list: Option<Vec<String>>,
    /// Leak aperture area range (m²), sampled log-uniformly.
    pub area_m2: AreaRange,
    /// Leak window sampling bounds, in hours.
    pub time_h: TimeRange,
    /// Discharge coefficient Cd applied to every leak.
    #[builder(default = 0.75)]
    #[serde(default = "default_discharge_coeff")]
    pub discharge_coeff: f64,
    /// Seed for the scenario and noise RNG streams. `None` draws one from
    /// entropy; the seed used is always reported in logs.
    #[builder(default)]
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Copy, serde::Deserialize)]
pub struct AreaRange {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Copy, serde::Deserialize)]
pub struct TimeRange {
    pub start_min: f64,
    pub start_max: f64,
    pub duration_min: f64,
    pub duration_max: f64,
}

/// Calibrated Gaussian measurement noise.
#[derive(Debug, Clone, Copy, serde::Deserialize)]
#[serde(default)]
pub struct NoiseConfig {
    /// Standard deviation for pressure channels (m).
    pub pressure_sigma: f64,
    /// Standard deviation for demand/flow channels (L/s).
    pub flow_sigma: f64,
    pub enabled: bool,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            pressure_sigma: 0.0,
            flow_sigma: 0.0,
            enabled: false,
        }
    }
}

/// Worker pool sizing.
#[derive(Debug, Clone, Copy, serde::Deserialize)]
#[serde(default)]
pub struct ParallelConfig {
    pub enabled: bool,
    /// Pool size. `None` uses the available CPU cores.
    pub max_workers: Option<usize>,
}

impl ParallelConfig {
    pub fn workers(&self) -> usize {
        self.max_workers.unwrap_or_else(num_cpus::get).max(1)
    }
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_workers: None,
        }
    }
}

/// Output location and format.
#[derive(Debug, Clone, serde::Deserialize, typed_builder::TypedBuilder)]
pub struct ExportConfig {
    pub out_dir: PathBuf,
    #[builder(default)]
    #[serde(default)]
    pub format: ExportFormat,
}

/// Columnar file format for per-scenario partitions.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExportFormat {
    #[default]
    Csv,
    JsonLines,
}

/// Which leak-flow source wins when the engine reports one and the orifice
/// estimate disagrees. Both values are retained on every sample either way.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LeakFlowPolicy {
    /// Use the engine's nonzero report, falling back to the estimate.
    #[default]
    PreferEngine,
    /// Always use the orifice-equation estimate.
    PreferEstimate,
}

fn default_leaks_per_scenario() -> usize {
    1
}

fn default_discharge_coeff() -> f64 {
    0.75
}

impl BatchConfig {
    /// Loads a config from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        let config: Self = serde_json::from_slice(&bytes)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field invariants a deserializer cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.scenarios;
        if s.count == 0 {
            return Err(ConfigError::invalid("scenarios.count must be at least 1"));
        }
        if s.leaks_per_scenario == 0 {
            return Err(ConfigError::invalid(
                "scenarios.leaks_per_scenario must be at least 1",
            ));
        }
        if !(s.area_m2.min > 0.0) || !(s.area_m2.max >= s.area_m2.min) {
            return Err(ConfigError::invalid(
                "scenarios.area_m2 requires 0 < min <= max",
            ));
        }
        if !(s.discharge_coeff > 0.0 && s.discharge_coeff <= 1.0) {
            return Err(ConfigError::invalid(
                "scenarios.discharge_coeff must be in (0, 1]",
            ));
        }
        let t = &s.time_h;
        if !(t.start_min >= 0.0 && t.start_max >= t.start_min) {
            return Err(ConfigError::invalid(
                "scenarios.time_h requires 0 <= start_min <= start_max",
            ));
        }
        if !(t.duration_min > 0.0 && t.duration_max >= t.duration_min) {
            return Err(ConfigError::invalid(
                "scenarios.time_h requires 0 < duration_min <= duration_max",
            ));
        }
        if self.simulation.duration_s == 0
            || self.simulation.report_timestep_s == 0
            || self.simulation.hydraulic_timestep_s == 0
        {
            return Err(ConfigError::invalid(
                "simulation clock steps and duration must be positive",
            ));
        }
        if !(self.noise.pressure_sigma >= 0.0 && self.noise.flow_sigma >= 0.0) {
            return Err(ConfigError::invalid("noise sigmas must be non-negative"));
        }
        Ok(())
    }
}

/// Configuration errors. All of these abort the batch before any scenario
/// runs.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

impl ConfigError {
    fn invalid(msg: &str) -> Self {
        Self::Invalid(msg.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_json() -> &'static str {
        r#"{
            "model": { "path": "net.inp" },
            "scenarios": {
                "count": 10,
                "area_m2": { "min": 0.0001, "max": 0.01 },
                "time_h": { "start_min": 2.0, "start_max": 6.0,
                            "duration_min": 1.0, "duration_max": 12.0 }
            },
            "simulation": { "duration_s": 86400 },
            "export": { "out_dir": "out" }
        }"#
    }

    fn parse(json: &str) -> BatchConfig {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn defaults_fill_in() {
        let config = parse(minimal_json());
        assert!(config.validate().is_ok());
        assert_eq!(config.scenarios.leaks_per_scenario, 1);
        assert_eq!(config.scenarios.discharge_coeff, 0.75);
        assert_eq!(config.model.id_policy, IdPolicy::Integer);
        assert_eq!(config.simulation.report_timestep_s, 3600);
        assert_eq!(config.export.format, ExportFormat::Csv);
        assert_eq!(config.leak_flow, LeakFlowPolicy::PreferEngine);
        assert!(config.parallel.enabled);
        assert!(!config.noise.enabled);
    }

    #[test]
    fn builder_matches_serde_defaults() {
        let config = BatchConfig::builder()
            .model(ModelConfig::builder().path("net.inp".into()).build())
            .scenarios(
                ScenarioConfig::builder()
                    .count(5)
                    .area_m2(AreaRange {
                        min: 0.0001,
                        max: 0.01,
                    })
                    .time_h(TimeRange {
                        start_min: 2.0,
                        start_max: 6.0,
                        duration_min: 1.0,
                        duration_max: 12.0,
                    })
                    .build(),
            )
            .simulation(SimClock::builder().duration_s(86400).build())
            .export(ExportConfig::builder().out_dir("out".into()).build())
            .build();
        assert!(config.validate().is_ok());
        assert_eq!(config.scenarios.discharge_coeff, 0.75);
    }

    #[test]
    fn zero_area_rejected() {
        let mut config = parse(minimal_json());
        config.scenarios.area_m2.min = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn out_of_range_discharge_coeff_rejected() {
        let mut config = parse(minimal_json());
        config.scenarios.discharge_coeff = 1.5;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn zero_count_rejected() {
        let mut config = parse(minimal_json());
        config.scenarios.count = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
