use clap::CommandFactory;
use medflow_cli::cli::{Cli, Commands};
use medflow_cli::config_cmd::run_config_command;
use medflow_cli::error::handle_cli_result;
use medflow_cli::exit_codes::{EXIT_ERROR, EXIT_SUCCESS};
use medflow_cli::list::run_list_command;
use medflow_cli::run::{run_workflow_command, RunArgs};
use std::process;
use tracing::Level;

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();

    let Some(command) = cli.command else {
        let code = match Cli::command().print_help() {
            Ok(()) => EXIT_SUCCESS,
            Err(_) => EXIT_ERROR,
        };
        process::exit(code);
    };

    let log_level = if cli.quiet {
        Level::ERROR
    } else if cli.debug {
        Level::DEBUG
    } else if cli.verbose {
        Level::TRACE
    } else {
        Level::INFO
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(log_level)
        .init();

    if !Cli::should_use_color() {
        colored::control::set_override(false);
    }

    let config_path = cli.config.as_deref();
    let result = match command {
        Commands::Run {
            workflow_type,
            data,
            data_json,
            context,
            format,
        } => {
            tracing::debug!("Running workflow {}", workflow_type);
            run_workflow_command(
                config_path,
                RunArgs {
                    workflow_type,
                    data,
                    data_json,
                    context,
                    format,
                },
            )
            .await
        }
        Commands::List { format } => run_list_command(config_path, format),
        Commands::Config { format, example } => run_config_command(config_path, format, example),
    };

    process::exit(handle_cli_result(result));
}
