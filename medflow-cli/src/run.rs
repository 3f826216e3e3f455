use anyhow::Result;
use colored::*;
use medflow::handlers::{default_registry, EntityStore, UnavailableTranscriber};
use medflow::{
    ContextMap, MemoryStateStore, OrchestrationResult, Orchestrator, WorkflowData,
    WorkflowRecord, WorkflowStatus,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tabled::{settings::Style, Table, Tabled};

use crate::cli::OutputFormat;
use crate::error::{CliError, CliResult};
use crate::exit_codes::{EXIT_SUCCESS, EXIT_WARNING};

/// Arguments of `medflow run`
pub struct RunArgs {
    pub workflow_type: String,
    pub data: Vec<String>,
    pub data_json: Option<String>,
    pub context: Vec<String>,
    pub format: OutputFormat,
}

#[derive(Serialize)]
struct RunReport {
    #[serde(flatten)]
    outcome: OrchestrationResult,
    status: Option<WorkflowRecord>,
}

#[derive(Tabled)]
struct FieldRow {
    #[tabled(rename = "Field")]
    field: String,
    #[tabled(rename = "Value")]
    value: String,
}

pub async fn run_workflow_command(config_path: Option<&Path>, args: RunArgs) -> CliResult<i32> {
    let config = crate::load_config(config_path)?;
    let data = build_data(args.data_json.as_deref(), &args.data)?;
    let context: ContextMap = parse_assignments(&args.context, "context")?;

    let registry = default_registry(
        Arc::new(EntityStore::new()),
        Arc::new(UnavailableTranscriber),
        &config,
    );
    let orchestrator = Arc::new(Orchestrator::new(
        config,
        registry,
        Arc::new(MemoryStateStore::new()),
    ));

    let signal_orchestrator = Arc::clone(&orchestrator);
    let signal_task = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, cancelling active workflows");
            signal_orchestrator.cancel_all().await;
        }
    });

    let outcome = orchestrator
        .orchestrate(&args.workflow_type, data, context)
        .await;
    signal_task.abort();

    let status = match orchestrator.get_status(&outcome.workflow_id.to_string()) {
        Ok(status) => status,
        Err(e) => {
            tracing::warn!("Could not read status for {}: {}", outcome.workflow_id, e);
            None
        }
    };

    let exit_code = if outcome.success {
        EXIT_SUCCESS
    } else {
        EXIT_WARNING
    };
    print_report(&RunReport { outcome, status }, args.format)?;
    Ok(exit_code)
}

/// Merge `--data-json` and `--data` into one input map; `--data` wins
fn build_data(data_json: Option<&str>, assignments: &[String]) -> CliResult<WorkflowData> {
    let mut data = match data_json {
        Some(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => map.into_iter().collect(),
            Ok(other) => {
                return Err(CliError::usage(format!(
                    "--data-json must be a JSON object, got {}",
                    other
                )))
            }
            Err(e) => return Err(CliError::usage(format!("Invalid --data-json: {}", e))),
        },
        None => WorkflowData::new(),
    };

    data.extend(parse_assignments(assignments, "data")?);
    Ok(data)
}

fn parse_assignments(assignments: &[String], flag: &str) -> CliResult<HashMap<String, Value>> {
    let mut values = HashMap::new();
    for assignment in assignments {
        let (key, raw) = assignment
            .split_once('=')
            .filter(|(key, _)| !key.trim().is_empty())
            .ok_or_else(|| {
                CliError::usage(format!(
                    "Invalid --{} value: '{}'. Use key=value format.",
                    flag, assignment
                ))
            })?;
        values.insert(key.trim().to_string(), parse_value(raw));
    }
    Ok(values)
}

/// JSON literals keep their type, everything else is a string
fn parse_value(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::String(_)) | Err(_) => Value::String(raw.to_string()),
        Ok(value) => value,
    }
}

fn print_report(report: &RunReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(report)?);
        }
        OutputFormat::Yaml => {
            print!("{}", serde_yaml::to_string(report)?);
        }
        OutputFormat::Table => display_table(report)?,
    }
    Ok(())
}

fn display_table(report: &RunReport) -> Result<()> {
    let outcome = &report.outcome;
    let mut rows = vec![FieldRow {
        field: "Workflow".to_string(),
        value: outcome.workflow_id.to_string(),
    }];

    if let Some(record) = &report.status {
        rows.push(FieldRow {
            field: "Type".to_string(),
            value: record.workflow_type.clone(),
        });
        rows.push(FieldRow {
            field: "Status".to_string(),
            value: record.status.to_string(),
        });
        rows.push(FieldRow {
            field: "Attempts".to_string(),
            value: record.attempt_count.to_string(),
        });
        rows.push(FieldRow {
            field: "Message".to_string(),
            value: record.message.clone(),
        });
    }
    if let Some(error_type) = outcome.error_type {
        rows.push(FieldRow {
            field: "Error".to_string(),
            value: error_type.to_string(),
        });
    }

    let mut table = Table::new(rows);
    table.with(Style::modern());
    println!("{}", table);

    let status = report.status.as_ref().map(|record| record.status);
    let headline = match status {
        Some(WorkflowStatus::Completed) => "completed".green().bold(),
        Some(WorkflowStatus::Cancelled) => "cancelled".yellow().bold(),
        _ if outcome.success => "completed".green().bold(),
        _ => "failed".red().bold(),
    };
    println!("Workflow {}", headline);

    let payload = if outcome.success {
        outcome.result.as_ref()
    } else {
        outcome.error_data.as_ref()
    };
    if let Some(payload) = payload {
        println!("{}", serde_json::to_string_pretty(payload)?);
    }
    Ok(())
}
