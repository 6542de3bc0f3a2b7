//! CR schedule command implementation.
//!
//! Builds conflict-free parallel groups of two-qubit calibrations.

use std::path::Path;

use anyhow::Result;
use console::style;

use qcal_sched::{ColoringStrategy, CrScheduleOptions, CrScheduler, QubitMetrics, ScheduleResult};

use super::common::{check_format, load_topology, parse_quality, print_header, print_json};

/// Arguments of the cr-schedule command.
pub struct CrScheduleArgs<'a> {
    pub topology: &'a Path,
    pub metrics: Option<&'a Path>,
    pub candidates: Option<&'a [String]>,
    pub max_group_size: usize,
    pub coloring: &'a str,
    pub inverse: bool,
    pub quality: Option<&'a str>,
    pub format: &'a str,
}

/// Execute the cr-schedule command.
pub fn execute(args: CrScheduleArgs<'_>) -> Result<()> {
    check_format(args.format)?;
    let topology = load_topology(args.topology)?;
    let metrics = match args.metrics {
        Some(path) => QubitMetrics::from_file(path)
            .map_err(|e| anyhow::anyhow!("Failed to load metrics {}: {e}", path.display()))?,
        None => QubitMetrics::new(),
    };

    let coloring: ColoringStrategy = args.coloring.parse()?;
    let mut options = CrScheduleOptions::new()
        .with_max_group_size(args.max_group_size)
        .with_coloring(coloring)
        .with_inverse(args.inverse);
    if let Some(candidates) = args.candidates {
        options = options.with_candidates(candidates);
    }
    if let Some(spec) = args.quality {
        let (metric, threshold) = parse_quality(spec)?;
        options = options.with_quality_threshold(metric, threshold);
    }

    let scheduler = CrScheduler::from_topology(topology, metrics)?;
    let schedule = scheduler.generate(&options)?;

    match args.format {
        "json" => print_json(&schedule)?,
        _ => print_schedule(&schedule),
    }
    Ok(())
}

fn print_schedule(schedule: &ScheduleResult) {
    let meta = &schedule.metadata;

    print_header("Filtering");
    println!("  {:<20} {:>6}", "all pairs", schedule.filtering_stats.all_pairs);
    for stage in &schedule.filtering_stats.stages {
        println!("  {:<20} {:>6} -> {}", stage.filter, stage.input, stage.output);
    }
    println!("  {:<20} {:>6}", "mux mapped", schedule.filtering_stats.mux_mapped);

    print_header("Parallel groups");
    for (i, group) in schedule.group_strings().iter().enumerate() {
        let kind = if i < meta.fast_groups {
            style("fast").green()
        } else {
            style("slow").yellow()
        };
        println!(
            "  {:>3} [{}] {}",
            style(i).dim(),
            kind,
            group.join(", ")
        );
    }

    println!(
        "\n{} {} pairs in {} groups ({} fast, {} slow)",
        style("✓").green().bold(),
        meta.scheduled_pairs,
        meta.num_groups,
        meta.fast_groups,
        meta.slow_groups
    );
    println!(
        "  direction: {}, strategy: {}, coloring: {}, max group size: {}{}",
        meta.direction_method,
        meta.strategy,
        meta.coloring_strategy,
        meta.max_group_size,
        if meta.inverse { ", inverse" } else { "" }
    );
}
