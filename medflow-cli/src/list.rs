use anyhow::Result;
use medflow::handlers::{default_registry, EntityStore, UnavailableTranscriber};
use medflow::OrchestratorConfig;
use std::path::Path;
use std::sync::Arc;
use tabled::{
    settings::{object::Rows, Alignment, Color, Modify, Style},
    Table, Tabled,
};

use crate::cli::{Cli, OutputFormat};
use crate::error::CliResult;
use crate::exit_codes::EXIT_SUCCESS;

#[derive(Tabled)]
struct WorkflowRow {
    #[tabled(rename = "Workflow type")]
    workflow_type: String,
    #[tabled(rename = "Description")]
    description: String,
    #[tabled(rename = "Required fields")]
    required_fields: String,
}

#[derive(serde::Serialize)]
struct WorkflowInfo {
    workflow_type: String,
    description: String,
    required_fields: Vec<String>,
}

pub fn run_list_command(config_path: Option<&Path>, format: OutputFormat) -> CliResult<i32> {
    let config = crate::load_config(config_path)?;
    let infos = workflow_infos(&config);

    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&infos).map_err(anyhow::Error::from)?;
            println!("{}", json);
        }
        OutputFormat::Yaml => {
            let yaml = serde_yaml::to_string(&infos).map_err(anyhow::Error::from)?;
            print!("{}", yaml);
        }
        OutputFormat::Table => display_table(&infos)?,
    }

    Ok(EXIT_SUCCESS)
}

fn workflow_infos(config: &OrchestratorConfig) -> Vec<WorkflowInfo> {
    let registry = default_registry(
        Arc::new(EntityStore::new()),
        Arc::new(UnavailableTranscriber),
        config,
    );

    registry
        .handlers()
        .into_iter()
        .map(|handler| WorkflowInfo {
            workflow_type: handler.workflow_type().to_string(),
            description: handler.description().to_string(),
            required_fields: config.required_fields_for(handler.workflow_type()).to_vec(),
        })
        .collect()
}

fn display_table(infos: &[WorkflowInfo]) -> Result<()> {
    let rows: Vec<WorkflowRow> = infos
        .iter()
        .map(|info| WorkflowRow {
            workflow_type: info.workflow_type.clone(),
            description: info.description.clone(),
            required_fields: if info.required_fields.is_empty() {
                "-".to_string()
            } else {
                info.required_fields.join(", ")
            },
        })
        .collect();

    let mut table = Table::new(rows);
    table.with(Style::modern());
    if Cli::should_use_color() {
        table.with(Modify::new(Rows::one(0)).with(Color::FG_BRIGHT_CYAN));
    }
    table.with(Modify::new(Rows::new(1..)).with(Alignment::left()));

    println!("{}", table);
    Ok(())
}
