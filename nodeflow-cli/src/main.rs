mod cli;
mod example;
mod logging;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use nodeflow::cancellation::CancellationToken;
use nodeflow::context::ProjectContext;
use nodeflow::events::LoggingEventSink;
use nodeflow::io::DataSetRegistry;
use tracing::info;

use crate::cli::{Cli, Command, RunArgs};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let outcome = match &cli.command {
        Command::Info => show_info(),
        Command::Run(args) => run(args).await,
    };
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if cli.verbose {
                eprintln!("Error: {err:?}");
            } else {
                eprintln!("Error: {err}");
            }
            ExitCode::FAILURE
        }
    }
}

fn show_info() -> anyhow::Result<()> {
    let context = example::register(ProjectContext::new(".", None))?;
    println!("nodeflow {}", env!("CARGO_PKG_VERSION"));
    println!("Pipelines: {}", context.pipeline_names().join(", "));
    println!("Data set types: {}", DataSetRegistry::with_defaults().types().join(", "));
    Ok(())
}

async fn run(args: &RunArgs) -> anyhow::Result<()> {
    let options = args.run_options()?;

    let token = Arc::new(CancellationToken::new());
    let on_interrupt = Arc::clone(&token);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel("interrupted by Ctrl-C");
        }
    });

    let context = ProjectContext::new(&args.project_path, Some(&args.env))
        .with_event_sink(Arc::new(LoggingEventSink::default()))
        .with_cancellation_token(token);
    let context = example::register(context).context("failed to register example pipelines")?;

    let result = context.run(&options).await?;
    for (name, value) in &result.outputs {
        info!("Output `{name}`: {value}");
    }
    println!(
        "Pipeline run {} finished: {} node(s) run, {} skipped in {:.1} ms",
        result.run_id, result.nodes_run, result.nodes_skipped, result.duration_ms
    );
    Ok(())
}
