use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::bail;
use clap::{Args, Parser, Subcommand};
use nodeflow::context::{RunOptions, DEFAULT_ENV};
use nodeflow::runner::ParallelRunner;

#[derive(Debug, Parser)]
#[command(name = "nodeflow", version)]
#[command(about = "Run data pipelines built with nodeflow")]
pub struct Cli {
    /// Log at debug level and print full error chains.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show the version, registered pipelines and data set types.
    Info,
    /// Run a pipeline of the project.
    Run(RunArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Project directory containing `conf/`.
    #[arg(long, default_value = ".")]
    pub project_path: PathBuf,

    /// Configuration environment overlaid on `conf/base`.
    #[arg(long, short, default_value = DEFAULT_ENV)]
    pub env: String,

    /// Run nodes in parallel, same as `--runner ParallelRunner`.
    #[arg(long)]
    pub parallel: bool,

    /// Runner name: SequentialRunner or ParallelRunner.
    #[arg(long)]
    pub runner: Option<String>,

    /// Worker limit for the parallel runner.
    #[arg(long)]
    pub max_workers: Option<usize>,

    /// Run only nodes with this tag. Repeatable.
    #[arg(long = "tag", short)]
    pub tags: Vec<String>,

    /// Run only this node. Repeatable.
    #[arg(long = "node", short)]
    pub nodes: Vec<String>,

    /// Start from these nodes and run everything downstream.
    #[arg(long, value_delimiter = ',')]
    pub from_nodes: Vec<String>,

    /// Run everything upstream of and including these nodes.
    #[arg(long, value_delimiter = ',')]
    pub to_nodes: Vec<String>,

    /// Skip nodes whose outputs already exist.
    #[arg(long)]
    pub only_missing: bool,

    /// Load a specific version of a data set, as `name:version`. Repeatable.
    #[arg(long = "load-version", value_parser = parse_load_version)]
    pub load_versions: Vec<(String, String)>,

    /// Registered pipeline to run.
    #[arg(long)]
    pub pipeline: Option<String>,
}

impl RunArgs {
    /// Validates option combinations and builds the run options.
    pub fn run_options(&self) -> anyhow::Result<RunOptions> {
        if self.parallel && self.runner.is_some() {
            bail!(
                "Both --parallel and --runner options cannot be used together. \
                 Please use either --parallel or --runner."
            );
        }
        let runner = if self.parallel {
            Some(ParallelRunner::NAME.to_string())
        } else {
            self.runner.clone()
        };

        Ok(RunOptions {
            pipeline_name: self.pipeline.clone(),
            tags: self.tags.clone(),
            node_names: self.nodes.clone(),
            from_nodes: self.from_nodes.clone(),
            to_nodes: self.to_nodes.clone(),
            runner,
            max_workers: self.max_workers,
            only_missing: self.only_missing,
            load_versions: self.load_versions.iter().cloned().collect::<BTreeMap<_, _>>(),
        })
    }
}

fn parse_load_version(raw: &str) -> Result<(String, String), String> {
    match raw.split_once(':') {
        Some((name, version)) if !name.is_empty() && !version.is_empty() => {
            Ok((name.to_string(), version.to_string()))
        }
        _ => Err(format!(
            "expected `data_set_name:version`, got '{raw}'"
        )),
    }
}
