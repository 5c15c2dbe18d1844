use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};
use gama_cli::case::load_case;
use gama_core::BranchId;
use tabwriter::TabWriter;

pub fn handle(case_path: &Path, outages: &[String]) -> Result<()> {
    let case = load_case(case_path)?;
    let grid = &case.grid;
    let outages: Vec<BranchId> = outages.iter().map(|id| BranchId::from(id.as_str())).collect();
    let view = grid
        .with_outages(&outages)
        .context("building topology view")?;

    let out_of_service = view.out_of_service();
    if !out_of_service.is_empty() {
        let ids: Vec<&str> = out_of_service.iter().map(|b| b.as_str()).collect();
        println!("Out of service: {}", ids.join(", "));
    }
    println!(
        "{} island(s), {} balance region(s)",
        view.islands().len(),
        view.balance_regions().len()
    );

    let mut writer = TabWriter::new(io::stdout()).padding(2);
    writeln!(writer, "ISLAND\tREFERENCE\tNODES")?;
    for island in view.islands() {
        let nodes: Vec<&str> = island
            .nodes
            .iter()
            .map(|&n| grid.nodes()[n].id.as_str())
            .collect();
        writeln!(
            writer,
            "{}\t{}\t{}",
            island.id,
            grid.nodes()[island.reference].id,
            nodes.join(" ")
        )?;
    }
    writer.flush()?;
    Ok(())
}
