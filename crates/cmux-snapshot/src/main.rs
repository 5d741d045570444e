use clap::Parser;
use cmux_cloud::MorphRestClient;
use cmux_snapshot::args::Cli;
use cmux_snapshot::orchestrator::{provision_and_snapshot, RunConfig};
use cmux_snapshot::{notify, tasks, telemetry};
use cmux_taskgraph::format_dependency_graph;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::Level;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    telemetry::init_tracing(cli.json, level);

    if cli.print_deps {
        return match tasks::build_registry() {
            Ok(registry) => {
                let graph = format_dependency_graph(&registry);
                if !graph.is_empty() {
                    println!("{graph}");
                }
                ExitCode::SUCCESS
            }
            Err(err) => {
                eprintln!("Error: {err}");
                ExitCode::FAILURE
            }
        };
    }

    let client = match MorphRestClient::from_env() {
        Ok(client) => Arc::new(client),
        Err(err) => {
            eprintln!("Error: {err}");
            return ExitCode::FAILURE;
        }
    };

    let config = RunConfig::from_cli(&cli);
    match provision_and_snapshot(config, client).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            notify::send_failure_notification(&format!("Snapshot run failed: {err}")).await;
            ExitCode::FAILURE
        }
    }
}
