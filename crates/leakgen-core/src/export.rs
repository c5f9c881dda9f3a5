//! Dataset persistence.
//!
//! Each scenario's time series is written to columnar files under its own
//! uniquely named partition directory. Partitions are staged in a temporary
//! directory and renamed into place, so a crash mid-write never leaves a
//! partially written, mislabeled partition visible. Batch-level metadata and
//! label tables are aggregated once all scenarios complete.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::batch::ScenarioOutcome;
use crate::config::ExportFormat;
use crate::scenario::ScenarioDescriptor;
use crate::sim::TimeSeriesResult;

const M3S_TO_LPS: f64 = 1000.0;

#[derive(Debug)]
pub struct DatasetWriter {
    out_dir: PathBuf,
    format: ExportFormat,
}

/// One row of a per-scenario node partition. Rates are in L/s here; the
/// conversion from engine-native m³/s happens at this boundary only.
#[derive(Debug, serde::Serialize)]
struct NodeRow<'a> {
    timestamp: u64,
    node_id: &'a str,
    pressure: f64,
    head: f64,
    demand: f64,
    leak_demand: f64,
    scenario_id: u32,
    leak_node: &'a str,
    /// Ground-truth label: 1 iff this node hosts a leak active at this
    /// timestamp.
    leak: u8,
    pressure_raw: Option<f64>,
    demand_raw: Option<f64>,
}

#[derive(Debug, serde::Serialize)]
struct LinkRow<'a> {
    timestamp: u64,
    link_id: &'a str,
    flow: f64,
    flow_raw: Option<f64>,
    scenario_id: u32,
}

/// One row of the batch metadata table: one per leak instance, so multi-leak
/// scenarios contribute several rows.
#[derive(Debug, serde::Serialize)]
struct MetadataRow<'a> {
    scenario_id: u32,
    n_leaks: usize,
    leak_index: usize,
    leak_node: &'a str,
    leak_area_m2: f64,
    start_time_s: u64,
    duration_s: u64,
    end_time_s: u64,
    start_time_h: f64,
    duration_h: f64,
    end_time_h: f64,
    discharge_coeff: f64,
}

/// One row of the ML label table, derived from metadata.
#[derive(Debug, serde::Serialize)]
struct LabelRow<'a> {
    scenario_id: u32,
    has_leak: bool,
    leak_node: &'a str,
    leak_area_m2: f64,
    leak_start_time_s: u64,
    leak_duration_s: u64,
    leak_end_time_s: u64,
    leak_start_time_h: f64,
    leak_duration_h: f64,
    leak_end_time_h: f64,
    discharge_coeff: f64,
}

/// Paths of the aggregate tables written by
/// [`DatasetWriter::write_batch_metadata`].
#[derive(Debug, Clone)]
pub struct BatchTables {
    pub metadata_path: PathBuf,
    pub labels_path: PathBuf,
}

impl DatasetWriter {
    pub fn new(out_dir: impl Into<PathBuf>, format: ExportFormat) -> Result<Self, ExportError> {
        let out_dir = out_dir.into();
        fs::create_dir_all(&out_dir)?;
        tracing::info!(out_dir = %out_dir.display(), ?format, "initialized dataset writer");
        Ok(Self { out_dir, format })
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    pub fn scenario_dir(&self, scenario_id: u32) -> PathBuf {
        self.out_dir.join(format!("scenario_{scenario_id:05}"))
    }

    /// Writes one scenario's node and link partitions atomically: both files
    /// are staged in a temp directory inside the output root and the whole
    /// partition is renamed into place only once complete.
    pub fn write_scenario(
        &self,
        scenario: &ScenarioDescriptor,
        series: &TimeSeriesResult,
    ) -> Result<(), ExportError> {
        let dest = self.scenario_dir(scenario.scenario_id);
        if dest.exists() {
            return Err(ExportError::PartitionExists(dest));
        }
        let staging = tempfile::Builder::new()
            .prefix(".scenario")
            .tempdir_in(&self.out_dir)?;

        self.write_rows(
            &staging.path().join(self.file_name("nodes")),
            &self.node_rows(scenario, series),
        )?;
        self.write_rows(
            &staging.path().join(self.file_name("links")),
            &self.link_rows(scenario, series),
        )?;

        // Complete-then-visible. If the rename fails the staging guard cleans
        // up; if it succeeds the guard's removal of the old path is a no-op.
        fs::rename(staging.path(), &dest)?;
        tracing::debug!(
            scenario_id = scenario.scenario_id,
            partition = %dest.display(),
            "exported scenario partition"
        );
        Ok(())
    }

    /// Writes the aggregate `metadata` and `labels` tables for every
    /// successful scenario. Returns `None` when there is nothing to write.
    pub fn write_batch_metadata(
        &self,
        outcomes: &[ScenarioOutcome],
    ) -> Result<Option<BatchTables>, ExportError> {
        let mut descriptors: Vec<&ScenarioDescriptor> = outcomes
            .iter()
            .filter(|outcome| outcome.success)
            .map(|outcome| &outcome.descriptor)
            .collect();
        if descriptors.is_empty() {
            return Ok(None);
        }
        descriptors.sort_by_key(|d| d.scenario_id);

        let mut metadata = Vec::new();
        let mut labels = Vec::new();
        for descriptor in &descriptors {
            let n_leaks = descriptor.leaks.len();
            for (leak_index, leak) in descriptor.leaks.iter().enumerate() {
                metadata.push(MetadataRow {
                    scenario_id: descriptor.scenario_id,
                    n_leaks,
                    leak_index,
                    leak_node: leak.node.as_str(),
                    leak_area_m2: leak.area_m2,
                    start_time_s: leak.start_s,
                    duration_s: leak.duration_s,
                    end_time_s: leak.end_s(),
                    start_time_h: leak.start_s as f64 / 3600.0,
                    duration_h: leak.duration_s as f64 / 3600.0,
                    end_time_h: leak.end_s() as f64 / 3600.0,
                    discharge_coeff: leak.discharge_coeff,
                });
                labels.push(LabelRow {
                    scenario_id: descriptor.scenario_id,
                    has_leak: true,
                    leak_node: leak.node.as_str(),
                    leak_area_m2: leak.area_m2,
                    leak_start_time_s: leak.start_s,
                    leak_duration_s: leak.duration_s,
                    leak_end_time_s: leak.end_s(),
                    leak_start_time_h: leak.start_s as f64 / 3600.0,
                    leak_duration_h: leak.duration_s as f64 / 3600.0,
                    leak_end_time_h: leak.end_s() as f64 / 3600.0,
                    discharge_coeff: leak.discharge_coeff,
                });
            }
        }
        labels.sort_by_key(|l| (l.scenario_id, l.leak_start_time_s));

        // Aggregate tables are always CSV, whatever the partition format.
        let tables = BatchTables {
            metadata_path: self.out_dir.join("metadata.csv"),
            labels_path: self.out_dir.join("labels.csv"),
        };
        write_csv(&tables.metadata_path, &metadata)?;
        write_csv(&tables.labels_path, &labels)?;
        tracing::info!(
            scenarios = descriptors.len(),
            leaks = metadata.len(),
            "exported batch metadata and labels"
        );
        Ok(Some(tables))
    }

    fn node_rows<'a>(
        &self,
        scenario: &'a ScenarioDescriptor,
        series: &'a TimeSeriesResult,
    ) -> Vec<NodeRow<'a>> {
        let leak_node = scenario.primary().node.as_str();
        let mut rows: Vec<NodeRow<'a>> = series
            .nodes
            .iter()
            .flat_map(|node_series| {
                node_series.points.iter().map(move |point| NodeRow {
                    timestamp: point.time_s,
                    node_id: node_series.node.as_str(),
                    pressure: point.pressure_m,
                    head: point.head_m,
                    demand: point.demand_m3s * M3S_TO_LPS,
                    leak_demand: point.leak_demand_m3s * M3S_TO_LPS,
                    scenario_id: scenario.scenario_id,
                    leak_node,
                    leak: scenario.is_leak_row(&node_series.node, point.time_s) as u8,
                    pressure_raw: point.pressure_raw_m,
                    demand_raw: point.demand_raw_m3s.map(|v| v * M3S_TO_LPS),
                })
            })
            .collect();
        rows.sort_by(|a, b| (a.timestamp, a.node_id).cmp(&(b.timestamp, b.node_id)));
        rows
    }

    fn link_rows<'a>(
        &self,
        scenario: &ScenarioDescriptor,
        series: &'a TimeSeriesResult,
    ) -> Vec<LinkRow<'a>> {
        let mut rows: Vec<LinkRow<'a>> = series
            .links
            .iter()
            .flat_map(|link_series| {
                link_series.points.iter().map(move |point| LinkRow {
                    timestamp: point.time_s,
                    link_id: link_series.link.as_str(),
                    flow: point.flow_m3s * M3S_TO_LPS,
                    flow_raw: point.flow_raw_m3s.map(|v| v * M3S_TO_LPS),
                    scenario_id: scenario.scenario_id,
                })
            })
            .collect();
        rows.sort_by(|a, b| (a.timestamp, a.link_id).cmp(&(b.timestamp, b.link_id)));
        rows
    }

    fn file_name(&self, stem: &str) -> String {
        match self.format {
            ExportFormat::Csv => format!("{stem}.csv"),
            ExportFormat::JsonLines => format!("{stem}.jsonl"),
        }
    }

    fn write_rows<T: serde::Serialize>(&self, path: &Path, rows: &[T]) -> Result<(), ExportError> {
        match self.format {
            ExportFormat::Csv => write_csv(path, rows),
            ExportFormat::JsonLines => {
                let mut writer = BufWriter::new(File::create(path)?);
                for row in rows {
                    serde_json::to_writer(&mut writer, row)?;
                    writer.write_all(b"\n")?;
                }
                writer.flush()?;
                Ok(())
            }
        }
    }
}

fn write_csv<T: serde::Serialize>(path: &Path, rows: &[T]) -> Result<(), ExportError> {
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Persistence failures. Surfaced, never swallowed: a batch that looks
/// complete but is missing data is worse than a failed one.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("failed to write dataset file")]
    Io(#[from] std::io::Error),

    #[error("failed to encode CSV row")]
    Csv(#[from] csv::Error),

    #[error("failed to encode JSON row")]
    Json(#[from] serde_json::Error),

    #[error("scenario partition already exists at {0}")]
    PartitionExists(PathBuf),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::{IdPolicy, LinkId, NodeId};
    use crate::scenario::LeakSpec;
    use crate::sim::{LinkPoint, LinkSeries, NodePoint, NodeSeries};

    fn scenario() -> ScenarioDescriptor {
        ScenarioDescriptor {
            scenario_id: 3,
            leaks: vec![LeakSpec {
                node: NodeId::new("42", IdPolicy::Integer),
                area_m2: 0.0005,
                start_s: 7200,
                duration_s: 18_000,
                discharge_coeff: 0.75,
            }],
        }
    }

    fn series() -> TimeSeriesResult {
        let node = |id: &str| NodeSeries {
            node: NodeId::new(id, IdPolicy::Integer),
            points: (0..8)
                .map(|i| NodePoint {
                    time_s: i * 3600,
                    pressure_m: 30.0,
                    head_m: 130.0,
                    demand_m3s: 0.002,
                    leak_demand_m3s: 0.001,
                    engine_leak_m3s: None,
                    estimated_leak_m3s: 0.001,
                    pressure_raw_m: None,
                    demand_raw_m3s: None,
                })
                .collect(),
        };
        TimeSeriesResult {
            nodes: vec![node("42"), node("7")],
            links: vec![LinkSeries {
                link: LinkId::new("P1", IdPolicy::Integer),
                points: (0..8)
                    .map(|i| LinkPoint {
                        time_s: i * 3600,
                        flow_m3s: 0.01,
                        flow_raw_m3s: None,
                    })
                    .collect(),
            }],
        }
    }

    fn read_csv(path: &Path) -> Vec<std::collections::HashMap<String, String>> {
        let mut reader = csv::Reader::from_path(path).unwrap();
        let headers = reader.headers().unwrap().clone();
        reader
            .records()
            .map(|record| {
                let record = record.unwrap();
                headers
                    .iter()
                    .zip(record.iter())
                    .map(|(h, v)| (h.to_owned(), v.to_owned()))
                    .collect()
            })
            .collect()
    }

    #[test]
    fn partition_layout_and_headers() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let writer = DatasetWriter::new(dir.path(), ExportFormat::Csv)?;
        writer.write_scenario(&scenario(), &series())?;

        let partition = writer.scenario_dir(3);
        assert!(partition.join("nodes.csv").exists());
        assert!(partition.join("links.csv").exists());

        let header = std::fs::read_to_string(partition.join("nodes.csv"))?
            .lines()
            .next()
            .unwrap()
            .to_owned();
        insta::assert_snapshot!(header, @"timestamp,node_id,pressure,head,demand,leak_demand,scenario_id,leak_node,leak,pressure_raw,demand_raw");
        Ok(())
    }

    #[test]
    fn node_rows_carry_exact_labels_and_lps_rates() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let writer = DatasetWriter::new(dir.path(), ExportFormat::Csv)?;
        writer.write_scenario(&scenario(), &series())?;

        let rows = read_csv(&writer.scenario_dir(3).join("nodes.csv"));
        assert_eq!(rows.len(), 16);
        for row in &rows {
            let expected = row["node_id"] == "42"
                && (7200..=25_200).contains(&row["timestamp"].parse::<u64>()?);
            assert_eq!(row["leak"] == "1", expected, "row {row:?}");
            assert_eq!(row["leak_node"], "42");
            // 0.002 m³/s -> 2 L/s at the persistence boundary.
            assert_eq!(row["demand"].parse::<f64>()?, 2.0);
        }
        // Sorted by (timestamp, node_id).
        let keys: Vec<_> = rows
            .iter()
            .map(|r| (r["timestamp"].parse::<u64>().unwrap(), r["node_id"].clone()))
            .collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        Ok(())
    }

    #[test]
    fn duplicate_partition_is_rejected() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let writer = DatasetWriter::new(dir.path(), ExportFormat::Csv)?;
        writer.write_scenario(&scenario(), &series())?;
        let err = writer.write_scenario(&scenario(), &series()).unwrap_err();
        assert!(matches!(err, ExportError::PartitionExists(_)));
        Ok(())
    }

    #[test]
    fn no_staging_residue_after_write() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let writer = DatasetWriter::new(dir.path(), ExportFormat::Csv)?;
        writer.write_scenario(&scenario(), &series())?;
        let entries: Vec<_> = std::fs::read_dir(dir.path())?
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(entries, vec!["scenario_00003".to_owned()]);
        Ok(())
    }

    #[test]
    fn jsonl_partitions_round_trip() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let writer = DatasetWriter::new(dir.path(), ExportFormat::JsonLines)?;
        writer.write_scenario(&scenario(), &series())?;
        let contents = std::fs::read_to_string(writer.scenario_dir(3).join("nodes.jsonl"))?;
        let first: serde_json::Value = serde_json::from_str(contents.lines().next().unwrap())?;
        assert_eq!(first["timestamp"], 0);
        assert_eq!(first["scenario_id"], 3);
        Ok(())
    }

    #[test]
    fn metadata_has_one_row_per_leak() -> anyhow::Result<()> {
        use crate::batch::ScenarioOutcome;

        let dir = tempfile::tempdir()?;
        let writer = DatasetWriter::new(dir.path(), ExportFormat::Csv)?;
        let mut multi = scenario();
        multi.scenario_id = 4;
        multi.leaks.push(LeakSpec {
            node: NodeId::new("7", IdPolicy::Integer),
            area_m2: 0.001,
            start_s: 0,
            duration_s: 3600,
            discharge_coeff: 0.75,
        });
        let outcomes = vec![
            ScenarioOutcome::ok(scenario()),
            ScenarioOutcome::failed(
                ScenarioDescriptor {
                    scenario_id: 9,
                    leaks: scenario().leaks,
                },
                "diverged",
            ),
            ScenarioOutcome::ok(multi),
        ];
        let tables = writer.write_batch_metadata(&outcomes)?.unwrap();

        let metadata = read_csv(&tables.metadata_path);
        // Scenario 3 contributes one row, scenario 4 two; the failed
        // scenario 9 contributes none.
        assert_eq!(metadata.len(), 3);
        assert!(metadata.iter().all(|r| r["scenario_id"] != "9"));

        let labels = read_csv(&tables.labels_path);
        assert_eq!(labels.len(), 3);
        assert!(labels.iter().all(|r| r["has_leak"] == "true"));
        // Labels sorted by (scenario_id, start).
        assert_eq!(labels[1]["scenario_id"], "4");
        assert_eq!(labels[1]["leak_start_time_s"], "0");
        Ok(())
    }

    #[test]
    fn empty_batch_writes_no_tables() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let writer = DatasetWriter::new(dir.path(), ExportFormat::Csv)?;
        assert!(writer.write_batch_metadata(&[])?.is_none());
        assert!(!dir.path().join("metadata.csv").exists());
        Ok(())
    }
}
