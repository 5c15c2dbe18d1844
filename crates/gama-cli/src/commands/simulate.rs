use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use gama_cli::case::load_case;
use gama_cli::manifest::RunManifest;
use gama_lp::SolverKind;
use gama_sim::{write_csv, CancellationToken, ResultStore, RunConfig, RunReport, Simulation};
use tracing::{info, warn};

/// Arguments of `gama simulate`.
#[derive(Debug)]
pub struct SimulateArgs<'a> {
    pub case: &'a Path,
    pub config: Option<&'a Path>,
    pub out: &'a Path,
    pub steps: Option<usize>,
    pub solver: Option<SolverKind>,
    pub contingencies: bool,
}

pub fn handle(args: SimulateArgs<'_>) -> Result<()> {
    let case = load_case(args.case)?;
    let mut config = match args.config {
        Some(path) => RunConfig::load(path)
            .with_context(|| format!("loading run configuration {}", path.display()))?,
        None => RunConfig::default(),
    };
    if let Some(steps) = args.steps {
        config.steps = Some(steps);
    }
    if let Some(solver) = args.solver {
        if !solver.backend().is_available() {
            warn!(
                "Solver {} is not available in this build; the fallback chain will be used",
                solver
            );
        }
        config.solver.backend = solver;
    }

    let sim = Simulation::new(&case.grid, &case.series, config)
        .with_context(|| format!("preparing simulation of {}", args.case.display()))?;
    let solvers: Vec<String> = sim
        .solver_chain()
        .backend_ids()
        .into_iter()
        .map(String::from)
        .collect();
    let cancel = CancellationToken::new();

    if !args.contingencies {
        let mut store = sim.new_store();
        let report = sim.run(&mut store, &cancel);
        write_outputs(&args, &sim, solvers, &report, &store, args.out)?;
        return finish(&report);
    }

    let outcomes = sim
        .run_contingencies(&cancel)
        .context("running contingency scenarios")?;
    let mut failures = Vec::new();
    for outcome in &outcomes {
        let dir = args.out.join(&outcome.id);
        write_outputs(
            &args,
            &sim,
            solvers.clone(),
            &outcome.report,
            &outcome.results,
            &dir,
        )?;
        if let Err(err) = finish(&outcome.report) {
            failures.push(format!("{}: {err:#}", outcome.id));
        }
    }
    if failures.is_empty() {
        Ok(())
    } else {
        Err(anyhow!(
            "{} of {} scenario(s) failed: {}",
            failures.len(),
            outcomes.len(),
            failures.join("; ")
        ))
    }
}

fn write_outputs(
    args: &SimulateArgs<'_>,
    sim: &Simulation<'_>,
    solvers: Vec<String>,
    report: &RunReport,
    store: &ResultStore,
    dir: &Path,
) -> Result<()> {
    let files: Vec<PathBuf> =
        write_csv(store, dir).with_context(|| format!("exporting results to {}", dir.display()))?;
    let manifest = RunManifest::new(args.case, sim.config(), solvers, report, store, &files);
    let path = manifest.write(dir)?;

    println!(
        "[{}] {}: {}/{} step(s), objective {:.2}, curtailed {:.2} MWh",
        report.scenario,
        report.status_label(),
        report.steps_completed,
        report.steps_requested,
        store.objective_total(),
        store.total_curtailment()
    );
    for (area, prices) in store.area_prices() {
        if prices.is_empty() {
            continue;
        }
        let mean = prices.iter().sum::<f64>() / prices.len() as f64;
        println!("  area {area}: mean price {mean:.2}");
    }
    info!("Recorded run manifest {}", path.display());
    Ok(())
}

fn finish(report: &RunReport) -> Result<()> {
    match report.error() {
        Some(err) => Err(anyhow!(err.clone())).with_context(|| {
            format!(
                "run stopped after {} of {} step(s)",
                report.steps_completed, report.steps_requested
            )
        }),
        None => Ok(()),
    }
}
