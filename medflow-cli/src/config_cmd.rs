use anyhow::Result;
use medflow::{OrchestratorConfig, YamlConfig};
use std::path::Path;
use tabled::{settings::Style, Table, Tabled};

use crate::cli::OutputFormat;
use crate::error::CliResult;
use crate::exit_codes::EXIT_SUCCESS;

#[derive(Tabled)]
struct SettingRow {
    #[tabled(rename = "Setting")]
    setting: String,
    #[tabled(rename = "Value")]
    value: String,
}

pub fn run_config_command(
    config_path: Option<&Path>,
    format: OutputFormat,
    example: bool,
) -> CliResult<i32> {
    if example {
        print!("{}", OrchestratorConfig::example_yaml_config());
        return Ok(EXIT_SUCCESS);
    }

    let config = crate::load_config(config_path)?;
    print_config(&config.to_yaml_config(), format)?;
    Ok(EXIT_SUCCESS)
}

fn print_config(config: &YamlConfig, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(config)?),
        OutputFormat::Table => {
            let mut table = Table::new(setting_rows(config));
            table.with(Style::modern());
            println!("{}", table);
        }
    }
    Ok(())
}

fn setting_rows(config: &YamlConfig) -> Vec<SettingRow> {
    let show = |value: Option<u64>| value.map(|v| v.to_string()).unwrap_or_default();

    let mut rows = vec![
        SettingRow {
            setting: "max_attempts".to_string(),
            value: show(config.max_attempts.map(u64::from)),
        },
        SettingRow {
            setting: "attempt_timeout_secs".to_string(),
            value: show(config.attempt_timeout_secs),
        },
        SettingRow {
            setting: "backoff_base_ms".to_string(),
            value: show(config.backoff_base_ms),
        },
        SettingRow {
            setting: "backoff_max_secs".to_string(),
            value: show(config.backoff_max_secs),
        },
        SettingRow {
            setting: "status_ttl_secs".to_string(),
            value: show(config.status_ttl_secs),
        },
    ];

    for (workflow_type, fields) in config.required_fields.iter().flatten() {
        rows.push(SettingRow {
            setting: format!("required_fields.{}", workflow_type),
            value: fields.join(", "),
        });
    }
    rows
}
