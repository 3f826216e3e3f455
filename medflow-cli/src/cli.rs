use clap::{Parser, Subcommand, ValueEnum};
use is_terminal::IsTerminal;
use std::io;
use std::path::PathBuf;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
pub enum OutputFormat {
    Table,
    Json,
    Yaml,
}

#[derive(Parser, Debug)]
#[command(name = "medflow")]
#[command(version)]
#[command(about = "Run and inspect medical platform workflows")]
#[command(long_about = "
medflow drives workflows through a single orchestrator: input is validated,
handlers run with a per-attempt timeout and exponential backoff between
attempts, and every state change is recorded in the status store.

Example usage:
  medflow list                                   # Show supported workflow types
  medflow run patient_registration --data first_name=Ada \\
      --data last_name=Lovelace --data date_of_birth=1815-12-10
  medflow config --format yaml                   # Show the effective configuration
")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to a medflow.yaml configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a single workflow to completion
    #[command(long_about = "
Runs one workflow through the orchestrator wired with the built-in handlers.
Field values that parse as JSON (numbers, booleans, arrays, objects) are used
as-is; anything else is taken as a string. Ctrl-C cancels the workflow.

Exit codes:
  0 - Workflow completed
  1 - Workflow failed or was cancelled
  2 - Invalid arguments or configuration

Examples:
  medflow run consent_handling --data patient_id=pat_01 --data consent_type=research
  medflow run batch_processing --data-json '{\"items\": []}' --format json
  medflow run record_creation --data patient_id=pat_01 --data record_type=visit \\
      --context user=dr_house
")]
    Run {
        /// Workflow type to run
        workflow_type: String,

        /// Input field as key=value (repeatable)
        #[arg(long = "data", value_name = "KEY=VALUE")]
        data: Vec<String>,

        /// Input fields as a JSON object, merged before --data
        #[arg(long, value_name = "JSON")]
        data_json: Option<String>,

        /// Caller context as key=value (repeatable)
        #[arg(long = "context", value_name = "KEY=VALUE")]
        context: Vec<String>,

        /// Output format
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
    /// List supported workflow types
    #[command(long_about = "
Lists every registered workflow type with its description and the input
fields it requires.

Output formats:
  table  - Formatted table (default)
  json   - JSON output for scripting
  yaml   - YAML output for scripting

Examples:
  medflow list
  medflow list --format json
")]
    List {
        /// Output format
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
    /// Show the effective configuration
    #[command(long_about = "
Prints the configuration after defaults, MEDFLOW_* environment variables and
medflow.yaml have been applied and validated.

Examples:
  medflow config
  medflow --config ./medflow.yaml config --format yaml
  medflow config --example > medflow.yaml   # Start a new configuration file
")]
    Config {
        /// Output format
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,

        /// Print an annotated example medflow.yaml instead
        #[arg(long)]
        example: bool,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn try_parse_from_args<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(args)
    }

    pub fn is_tty() -> bool {
        io::stdout().is_terminal()
    }

    pub fn should_use_color() -> bool {
        Self::is_tty() && std::env::var("NO_COLOR").is_err()
    }
}
