//! CSV export of recorded results.
//!
//! One file per entity family, each row keyed by step and entity id:
//!
//! | File | Columns |
//! |------|---------|
//! | `dispatch.csv` | step, generator, kind, output_mw, spill_mw |
//! | `flows.csv` | step, branch, flow_mw, sensitivity |
//! | `prices.csv` | step, node, area, price, angle_rad |
//! | `consumers.csv` | step, consumer, demand_mw, curtailment_mw, flexible_mw, flexible_level_mwh |
//! | `storage.csv` | step, storage, charge_mw, discharge_mw, spill_mw, level_mwh, value |
//! | `summary.csv` | step, objective, backend, iterations, solve_time_ms, curtailment_mw |

use crate::results::ResultStore;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("creating output directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("writing {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

#[derive(Serialize)]
struct DispatchRecord<'a> {
    step: usize,
    generator: &'a str,
    kind: &'a str,
    output_mw: f64,
    spill_mw: f64,
}

#[derive(Serialize)]
struct FlowRecord<'a> {
    step: usize,
    branch: &'a str,
    flow_mw: f64,
    sensitivity: f64,
}

#[derive(Serialize)]
struct PriceRecord<'a> {
    step: usize,
    node: &'a str,
    area: &'a str,
    price: f64,
    angle_rad: f64,
}

#[derive(Serialize)]
struct ConsumerRecord<'a> {
    step: usize,
    consumer: &'a str,
    demand_mw: f64,
    curtailment_mw: f64,
    /// Empty for consumers without a flexible share
    flexible_mw: Option<f64>,
    flexible_level_mwh: Option<f64>,
}

#[derive(Serialize)]
struct StorageRecord<'a> {
    step: usize,
    storage: &'a str,
    charge_mw: f64,
    discharge_mw: f64,
    spill_mw: f64,
    level_mwh: f64,
    value: f64,
}

#[derive(Serialize)]
struct SummaryRecord<'a> {
    step: usize,
    objective: f64,
    backend: &'a str,
    iterations: u32,
    solve_time_ms: u64,
    curtailment_mw: f64,
}

/// Write every result table into `dir`, creating it if needed.
///
/// Returns the written paths in the order listed in the module docs.
pub fn write_csv(store: &ResultStore, dir: &Path) -> Result<Vec<PathBuf>, ExportError> {
    std::fs::create_dir_all(dir).map_err(|source| ExportError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let steps = store.steps();
    let dispatch = steps.iter().flat_map(|s| {
        store
            .generator_ids()
            .iter()
            .enumerate()
            .map(move |(g, id)| DispatchRecord {
                step: s.step,
                generator: id.as_str(),
                kind: store.generator_kind(g),
                output_mw: s.generator_output[g],
                spill_mw: s.generator_spill[g],
            })
    });
    let flows = steps.iter().flat_map(|s| {
        store
            .branch_ids()
            .iter()
            .enumerate()
            .map(move |(b, id)| FlowRecord {
                step: s.step,
                branch: id.as_str(),
                flow_mw: s.branch_flow[b],
                sensitivity: s.branch_sensitivity[b],
            })
    });
    let prices = steps.iter().flat_map(|s| {
        store
            .node_ids()
            .iter()
            .enumerate()
            .map(move |(n, id)| PriceRecord {
                step: s.step,
                node: id.as_str(),
                area: store.node_area(n),
                price: s.nodal_price[n],
                angle_rad: s.node_angle[n],
            })
    });
    let consumers = steps.iter().flat_map(|s| {
        store
            .consumer_ids()
            .iter()
            .enumerate()
            .map(move |(c, id)| {
                let flexible = store.flexible_ids().iter().position(|f| f == id);
                ConsumerRecord {
                    step: s.step,
                    consumer: id.as_str(),
                    demand_mw: s.consumer_demand[c],
                    curtailment_mw: s.consumer_curtailment[c],
                    flexible_mw: flexible.map(|k| s.flexible_consumption[k]),
                    flexible_level_mwh: flexible.map(|k| s.flexible_level[k]),
                }
            })
    });
    let storage = steps.iter().flat_map(|s| {
        store
            .storage_ids()
            .iter()
            .enumerate()
            .map(move |(i, id)| StorageRecord {
                step: s.step,
                storage: id.as_str(),
                charge_mw: s.storage_charge[i],
                discharge_mw: s.storage_discharge[i],
                spill_mw: s.storage_spill[i],
                level_mwh: s.storage_level[i],
                value: s.storage_value[i],
            })
    });
    let summary = steps.iter().map(|s| SummaryRecord {
        step: s.step,
        objective: s.objective,
        backend: &s.backend,
        iterations: s.iterations,
        solve_time_ms: u64::try_from(s.solve_time_ms).unwrap_or(u64::MAX),
        curtailment_mw: s.consumer_curtailment.iter().sum(),
    });

    let files = vec![
        write_table(dir, "dispatch.csv", dispatch)?,
        write_table(dir, "flows.csv", flows)?,
        write_table(dir, "prices.csv", prices)?,
        write_table(dir, "consumers.csv", consumers)?,
        write_table(dir, "storage.csv", storage)?,
        write_table(dir, "summary.csv", summary)?,
    ];

    info!(
        "Wrote {} result table(s) for {} step(s) to {}",
        files.len(),
        steps.len(),
        dir.display()
    );
    Ok(files)
}

fn write_table<R: Serialize>(
    dir: &Path,
    name: &str,
    records: impl IntoIterator<Item = R>,
) -> Result<PathBuf, ExportError> {
    let path = dir.join(name);
    let wrap = |source| ExportError::Csv {
        path: path.clone(),
        source,
    };
    let mut writer = csv::Writer::from_path(&path).map_err(wrap)?;
    for record in records {
        writer.serialize(record).map_err(wrap)?;
    }
    writer
        .flush()
        .map_err(|e| wrap(csv::Error::from(e)))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::tests::{step, two_node_grid};
    use tempfile::TempDir;

    fn store() -> ResultStore {
        let grid = two_node_grid();
        let mut store = ResultStore::new(&grid, 1.0);
        store.record(step(0, 30.0)).unwrap();
        store.record(step(1, 40.0)).unwrap();
        store
    }

    #[test]
    fn test_write_csv_creates_all_tables() {
        let temp_dir = TempDir::new().unwrap();
        let out = temp_dir.path().join("nested").join("run");

        let files = write_csv(&store(), &out).unwrap();

        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            [
                "dispatch.csv",
                "flows.csv",
                "prices.csv",
                "consumers.csv",
                "storage.csv",
                "summary.csv"
            ]
        );
        assert!(files.iter().all(|p| p.exists()), "every table should be written");
    }

    #[test]
    fn test_prices_csv_contents() {
        let temp_dir = TempDir::new().unwrap();
        write_csv(&store(), temp_dir.path()).unwrap();

        let mut reader = csv::Reader::from_path(temp_dir.path().join("prices.csv")).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(
            headers.iter().collect::<Vec<_>>(),
            ["step", "node", "area", "price", "angle_rad"]
        );

        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 4, "two nodes over two steps");
        assert_eq!(&rows[3][0], "1");
        assert_eq!(&rows[3][1], "B");
        assert_eq!(&rows[3][2], "south");
        assert_eq!(rows[3][3].parse::<f64>().unwrap(), 40.0);
    }

    #[test]
    fn test_summary_one_row_per_step() {
        let temp_dir = TempDir::new().unwrap();
        write_csv(&store(), temp_dir.path()).unwrap();

        let content = std::fs::read_to_string(temp_dir.path().join("summary.csv")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3, "header plus one row per step");
        assert!(lines[0].starts_with("step,objective,backend"));
        assert!(lines[1].contains("clarabel"));
    }

    #[test]
    fn test_empty_store_writes_nothing_but_files() {
        let temp_dir = TempDir::new().unwrap();
        let grid = two_node_grid();
        let files = write_csv(&ResultStore::new(&grid, 1.0), temp_dir.path()).unwrap();
        assert_eq!(files.len(), 6);
        let content = std::fs::read_to_string(&files[0]).unwrap();
        assert!(content.is_empty(), "no records means no header either");
    }

    #[test]
    fn test_consumers_csv_leaves_flexible_columns_empty_for_rigid_load() {
        let temp_dir = TempDir::new().unwrap();
        write_csv(&store(), temp_dir.path()).unwrap();

        let content = std::fs::read_to_string(temp_dir.path().join("consumers.csv")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(
            lines[0],
            "step,consumer,demand_mw,curtailment_mw,flexible_mw,flexible_level_mwh"
        );
        assert_eq!(lines[1], "0,load,80.0,30.0,,");
    }
}
