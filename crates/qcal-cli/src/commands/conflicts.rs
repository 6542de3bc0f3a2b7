//! Conflicts command implementation.
//!
//! Shows how the topology's wiring turns into MUX box types and conflicts.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::Result;
use console::style;
use serde::Serialize;

use qcal_topo::{BoxType, TopologyContext};

use super::common::{check_format, load_topology, print_header, print_json};

#[derive(Serialize)]
struct MuxReport {
    mux: u32,
    box_type: BoxType,
    qids: Vec<String>,
    conflicts: BTreeSet<u32>,
}

#[derive(Serialize)]
struct ConflictReport {
    topology: String,
    num_qubits: u32,
    mux_size: u32,
    muxes: Vec<MuxReport>,
    box_counts: BTreeMap<String, usize>,
}

/// Execute the conflicts command.
pub fn execute(topology: &Path, format: &str) -> Result<()> {
    check_format(format)?;
    let context = TopologyContext::new(load_topology(topology)?)?;
    let report = build_report(&context);

    match format {
        "json" => print_json(&report)?,
        _ => print_report(&report),
    }
    Ok(())
}

fn build_report(context: &TopologyContext) -> ConflictReport {
    let model = context.conflict_model();
    let muxes: Vec<MuxReport> = model
        .muxes()
        .map(|mux| MuxReport {
            mux,
            box_type: model.box_type(mux),
            qids: model.members(mux).to_vec(),
            conflicts: model.conflicting_muxes(mux).collect(),
        })
        .collect();

    let mut box_counts = BTreeMap::new();
    for mux in &muxes {
        *box_counts.entry(mux.box_type.to_string()).or_insert(0) += 1;
    }

    ConflictReport {
        topology: context.topology().name.clone(),
        num_qubits: context.topology().num_qubits,
        mux_size: model.mux_size(),
        muxes,
        box_counts,
    }
}

fn print_report(report: &ConflictReport) {
    print_header(&format!(
        "{} ({} qubits, {} per MUX)",
        report.topology, report.num_qubits, report.mux_size
    ));
    println!("  {:>4}  {:<6} {:<20} conflicts", "MUX", "box", "qubits");
    for mux in &report.muxes {
        let conflicts = if mux.conflicts.is_empty() {
            style("-".to_string()).dim()
        } else {
            let list: Vec<String> = mux.conflicts.iter().map(ToString::to_string).collect();
            style(list.join(", ")).yellow()
        };
        println!(
            "  {:>4}  {:<6} {:<20} {}",
            mux.mux,
            mux.box_type.to_string(),
            mux.qids.join(","),
            conflicts
        );
    }

    let counts: Vec<String> = report
        .box_counts
        .iter()
        .map(|(box_type, n)| format!("{box_type}: {n}"))
        .collect();
    println!("\n{} {} MUXes ({})", style("✓").green().bold(), report.muxes.len(), counts.join(", "));
}

#[cfg(test)]
mod tests {
    use super::*;
    use qcal_topo::{MuxWiring, Topology};

    #[test]
    fn test_report_lists_shared_module_conflicts() {
        let topology = Topology::square_lattice("test", 4)
            .with_mux(MuxWiring::new(0).with_read_out(["R0A-READ0"]))
            .with_mux(MuxWiring::new(1).with_read_out(["R0A-READ1"]))
            .with_mux(MuxWiring::new(2).with_read_out(["R1B-READ0"]));
        let context = TopologyContext::new(topology).unwrap();
        let report = build_report(&context);

        let mux0 = report.muxes.iter().find(|m| m.mux == 0).unwrap();
        assert!(mux0.conflicts.contains(&1));
        assert!(!mux0.conflicts.contains(&2));
        assert_eq!(mux0.qids, ["0", "1", "2", "3"]);
    }
}
