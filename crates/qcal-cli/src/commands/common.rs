//! Shared helpers for CLI commands.

use std::path::Path;

use anyhow::{Context, Result};
use console::style;
use serde::Serialize;

use qcal_topo::Topology;

/// Load a topology from a YAML file.
pub fn load_topology(path: &Path) -> Result<Topology> {
    if !path.exists() {
        anyhow::bail!("File not found: {}", path.display());
    }
    let topology = Topology::from_file(path)
        .with_context(|| format!("Failed to load topology: {}", path.display()))?;
    tracing::debug!(
        topology = %topology.name,
        qubits = topology.num_qubits,
        muxes = topology.muxes.len(),
        "Loaded topology"
    );
    Ok(topology)
}

/// Parse a `METRIC=THRESHOLD` quality filter.
pub fn parse_quality(spec: &str) -> Result<(String, f64)> {
    let (metric, threshold) = spec
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("Expected METRIC=THRESHOLD, got '{spec}'"))?;
    let metric = metric.trim();
    if metric.is_empty() {
        anyhow::bail!("Quality metric name is empty in '{spec}'");
    }
    let threshold: f64 = threshold
        .trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid quality threshold '{threshold}': {e}"))?;
    Ok((metric.to_string(), threshold))
}

/// Check an output format name.
pub fn check_format(format: &str) -> Result<()> {
    match format {
        "table" | "json" => Ok(()),
        other => anyhow::bail!("Unknown format: '{other}'. Available: table, json"),
    }
}

/// Print a value as pretty JSON.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| anyhow::anyhow!("JSON serialization failed: {e}"))?;
    println!("{json}");
    Ok(())
}

/// Print a section header.
pub fn print_header(title: &str) {
    println!("\n{} {}", style("→").cyan().bold(), style(title).bold());
}
