//! One-qubit schedule command implementation.

use std::path::Path;

use anyhow::Result;
use console::style;

use qcal_sched::{OneQubitScheduleResult, OneQubitScheduler};

use super::common::{check_format, load_topology, print_header, print_json};

/// Execute the one-qubit command.
pub fn execute(
    topology: &Path,
    qids: Option<&[String]>,
    muxes: Option<&[u32]>,
    exclude: &[String],
    format: &str,
) -> Result<()> {
    check_format(format)?;
    let scheduler = OneQubitScheduler::from_topology(load_topology(topology)?)?;

    let schedule = match (qids, muxes) {
        (_, Some(muxes)) => scheduler.generate_from_mux(muxes, exclude)?,
        (Some(qids), None) => scheduler.generate(qids)?,
        (None, None) => anyhow::bail!("Either --qids or --muxes is required"),
    };

    match format {
        "json" => print_json(&schedule)?,
        _ => print_schedule(&schedule),
    }
    Ok(())
}

fn print_schedule(schedule: &OneQubitScheduleResult) {
    for stage in &schedule.stages {
        print_header(&format!(
            "Box {} ({} qubits, {} lanes)",
            stage.box_type,
            stage.qids.len(),
            stage.parallel_groups.len()
        ));
        for (i, lane) in stage.parallel_groups.iter().enumerate() {
            println!("  {:>3} {}", style(i).dim(), lane.join(" → "));
        }
    }

    let meta = &schedule.metadata;
    println!(
        "\n{} {} qubits in {} stages (A: {}, B: {}, MIXED: {})",
        style("✓").green().bold(),
        meta.total_qubits,
        meta.num_stages,
        meta.box_a,
        meta.box_b,
        meta.mixed
    );
    if meta.unmapped > 0 {
        println!(
            "  {} {} qubits have no MUX and were placed in the MIXED stage",
            style("!").yellow().bold(),
            meta.unmapped
        );
    }
}
