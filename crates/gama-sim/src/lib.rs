//! # gama-sim: multi-period dispatch simulation
//!
//! Runs a DC optimal dispatch over a grid, one time step after another,
//! carrying storage levels and flexible-load backlogs forward between steps.
//!
//! | Stage | Module |
//! |-------|--------|
//! | Run options (TOML) | [`config`] |
//! | Per-step linear program and result extraction | [`formulation`] |
//! | Storage levels between steps | [`storage`] |
//! | Step loop, outages, contingencies | [`simulation`] |
//! | Recorded results and analytics | [`results`] |
//! | CSV files | [`export`] |
//!
//! ```
//! use gama_core::{Consumer, Generator, GridModel, GridTables, Node};
//! use gama_sim::{CancellationToken, RunConfig, Simulation};
//! use gama_ts::TimeSeriesTable;
//!
//! let grid = GridModel::new(
//!     GridTables::default()
//!         .with_node(Node::new("N", "zone"))
//!         .with_generator(Generator::new("g", "N", 100.0, 10.0))
//!         .with_consumer(Consumer::new("load", "N", 60.0).with_demand_profile("flat")),
//! )
//! .unwrap();
//! let series = TimeSeriesTable::from_columns([("flat", vec![1.0, 1.0])]).unwrap();
//!
//! let sim = Simulation::new(&grid, &series, RunConfig::default()).unwrap();
//! let mut store = sim.new_store();
//! let report = sim.run(&mut store, &CancellationToken::new());
//!
//! assert!(report.is_completed());
//! assert!((store.generator_output("g").unwrap()[1] - 60.0).abs() < 1e-4);
//! ```

pub mod config;
pub mod error;
pub mod export;
pub mod formulation;
pub mod results;
pub mod simulation;
pub mod storage;

pub use config::{
    Contingency, CurtailmentConfig, CurtailmentPolicy, RunConfig, SolverConfig, StorageConfig,
};
pub use error::{ConfigError, ResultError, SimError, SimResult, StorageConsistencyError};
pub use export::{write_csv, ExportError};
pub use formulation::{DispatchFormulator, FormulationSettings, StepProblem, VariableMap};
pub use results::{EntityKind, ResultRow, ResultStore, StepResult};
pub use simulation::{
    CancellationToken, RunReport, RunStatus, ScenarioOutcome, Simulation, BASE_SCENARIO,
};
pub use storage::{
    transition, StepFlows, StorageFlows, StorageState, StorageTracker, TerminalPolicy,
};
