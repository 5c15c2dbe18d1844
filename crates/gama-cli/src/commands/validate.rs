use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};
use gama_cli::case::load_case;
use gama_core::graph_stats;
use gama_sim::{RunConfig, Simulation};
use gama_ts::{ensure_profiles, TimeSeriesProvider};
use tabwriter::TabWriter;
use tracing::{info, warn};

pub fn handle(case_path: &Path, config_path: Option<&Path>) -> Result<()> {
    info!("Validating case {}", case_path.display());
    let case = load_case(case_path)?;
    let grid = &case.grid;

    match config_path {
        Some(path) => {
            let config = RunConfig::load(path)
                .with_context(|| format!("loading run configuration {}", path.display()))?;
            let sim = Simulation::new(grid, &case.series, config)
                .context("case and configuration do not form a runnable simulation")?;
            println!("Run of {} step(s) is ready", sim.steps());
        }
        None => {
            ensure_profiles(&case.series, grid, case.series.len())
                .context("time series do not cover the grid's profiles")?;
        }
    }

    let stats = grid.stats();
    let graph = graph_stats(grid);
    let mut writer = TabWriter::new(io::stdout()).padding(2);
    writeln!(writer, "Nodes\t{}", stats.num_nodes)?;
    writeln!(writer, "Areas\t{}", stats.num_areas)?;
    writeln!(
        writer,
        "Branches\t{} ({} HVDC)",
        stats.num_branches, stats.num_dc_branches
    )?;
    writeln!(writer, "Components\t{}", graph.connected_components)?;
    writeln!(
        writer,
        "Degree\tmin {} / avg {:.2} / max {}",
        graph.min_degree, graph.avg_degree, graph.max_degree
    )?;
    writeln!(writer, "Density\t{:.3}", graph.density)?;
    writeln!(
        writer,
        "Generators\t{} ({:.1} MW)",
        stats.num_generators, stats.total_gen_capacity_mw
    )?;
    writeln!(
        writer,
        "Consumers\t{} ({:.1} MW, {} flexible)",
        stats.num_consumers, stats.total_demand_mw, stats.num_flexible_consumers
    )?;
    writeln!(
        writer,
        "Storage\t{} ({:.1} MWh)",
        stats.num_storage, stats.total_storage_mwh
    )?;
    writeln!(
        writer,
        "Profiles\t{} x {} steps",
        case.series.profiles().count(),
        case.series.len()
    )?;
    writer.flush()?;

    for issue in grid.warnings().warnings() {
        warn!("{}", issue);
    }
    println!("Case is valid ({})", grid.warnings().summary());
    Ok(())
}
