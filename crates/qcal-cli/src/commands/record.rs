//! Record command implementation.
//!
//! Display execution records from the configured store.

use anyhow::Result;
use console::style;

use qcal_task::{CalibConfig, ExecutionRecord, ExecutionStatus, TaskStatus, open_store};

use super::common::{check_format, print_header, print_json};

/// Execute the record command.
pub async fn execute(config: &CalibConfig, execution_id: Option<&str>, format: &str) -> Result<()> {
    check_format(format)?;
    let store = open_store(config).await?;

    let Some(execution_id) = execution_id else {
        let ids = store.list_ids().await?;
        match format {
            "json" => print_json(&ids)?,
            _ => {
                print_header(&format!("Execution records ({} store)", config.store));
                if ids.is_empty() {
                    println!("  {}", style("no records").dim());
                }
                for id in ids {
                    println!("  {id}");
                }
            }
        }
        return Ok(());
    };

    let record = store
        .load(execution_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Execution not found: {execution_id}"))?;

    match format {
        "json" => print_json(&record)?,
        _ => print_record(&record),
    }
    Ok(())
}

fn status_style(status: ExecutionStatus) -> console::StyledObject<String> {
    let text = status.to_string();
    match status {
        ExecutionStatus::Completed => style(text).green(),
        ExecutionStatus::Failed => style(text).red(),
        ExecutionStatus::Running => style(text).yellow(),
    }
}

fn task_style(status: TaskStatus) -> console::StyledObject<String> {
    let text = status.to_string();
    match status {
        TaskStatus::Completed => style(text).green(),
        TaskStatus::Failed => style(text).red(),
        TaskStatus::Skipped => style(text).dim(),
        TaskStatus::Scheduled | TaskStatus::Running => style(text).yellow(),
    }
}

fn print_record(record: &ExecutionRecord) {
    print_header(&format!("Execution {}", record.execution_id));
    println!("  project:  {}", record.project);
    if !record.name.is_empty() {
        println!("  name:     {}", record.name);
    }
    println!("  status:   {}", status_style(record.status));
    println!("  version:  {}", record.version);
    println!("  started:  {}", record.start_at.to_rfc3339());
    if let Some(elapsed) = record.elapsed_time {
        println!("  elapsed:  {elapsed:.1}s");
    }
    if !record.tags.is_empty() {
        println!("  tags:     {}", record.tags.join(", "));
    }

    print_header("Tasks");
    for (key, status) in &record.task_results {
        println!("  {:<40} {}", key, task_style(*status));
    }
    let counts: Vec<String> = record
        .status_counts()
        .iter()
        .map(|(status, n)| format!("{status}: {n}"))
        .collect();
    println!("  {}", style(counts.join(", ")).dim());

    print_header("Calibration data");
    for (qid, params) in record.calib_data.qubit.iter().chain(&record.calib_data.coupling) {
        if params.is_empty() {
            continue;
        }
        println!("  {}", style(qid).cyan().bold());
        for (name, param) in params {
            let unit = if param.unit.is_empty() {
                String::new()
            } else {
                format!(" {}", param.unit)
            };
            println!("    {:<28} {}{}", name, param.value, unit);
        }
    }
}
