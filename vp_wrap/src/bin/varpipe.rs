//! varpipe
#![deny(missing_docs)]

use anyhow::Result;
use chrono::Local;
use clap::builder::NonEmptyStringValueParser;
use clap::Parser;
use itertools::Itertools;
use std::path::PathBuf;
use std::process::ExitCode;
use vp_lib::jobs::ProcessLauncher;
use vp_lib::merge::MergeOutcome;
use vp_lib::{Pipeline, RunOptions};
use vp_types::PipelineConfig;
use vp_wrap::utils::{init_logging, print_error_chain, CliPath};

const CMD: &str = "varpipe";

/// Resumable alignment, variant calling and incremental merging over a sample manifest
#[derive(Parser, Debug)]
#[clap(name = CMD, version)]
struct Varpipe {
    #[clap(subcommand)]
    subcmd: SubCommand,
}

#[derive(Parser, Debug)]
enum SubCommand {
    /// Bring every stage up to date for the selected samples and merge new calls.
    #[clap(name = "run")]
    Run(Run),

    /// Report what a run would do without invoking or changing anything.
    #[clap(name = "check")]
    Check(Check),
}

#[derive(Parser, Debug, Clone)]
struct Inputs {
    /// Sample manifest with a sampleID column. Tab-separated, or comma-separated
    /// when the name ends in .csv.
    #[clap(long, value_name = "PATH")]
    manifest: CliPath,

    /// Pipeline configuration (TOML).
    #[clap(long, value_name = "PATH")]
    config: CliPath,

    /// Process only these samples, comma-separated, instead of the whole manifest.
    #[clap(
        long,
        value_name = "ID",
        value_delimiter = ',',
        value_parser = NonEmptyStringValueParser::new()
    )]
    samples: Option<Vec<String>>,
}

#[derive(Parser, Debug, Clone)]
struct Run {
    #[clap(flatten)]
    inputs: Inputs,

    /// Directory for this run's logs and summary. Must not already exist.
    #[clap(long, value_name = "PATH")]
    output_dir: PathBuf,

    /// Run the jobs without their commit flag, collecting no outputs and merging nothing.
    #[clap(long)]
    dry: bool,
}

#[derive(Parser, Debug, Clone)]
struct Check {
    #[clap(flatten)]
    inputs: Inputs,
}

fn run(args: Run) -> Result<ExitCode> {
    let config = PipelineConfig::load(&args.inputs.config)?;
    let launcher = ProcessLauncher;
    let opts = RunOptions {
        manifest: args.inputs.manifest.into(),
        samples: args.inputs.samples,
        output_dir: args.output_dir,
        commit: !args.dry,
    };
    let summary = Pipeline::new(&config, &launcher).run(&opts, Local::now().date_naive())?;

    for report in &summary.merges {
        match &report.outcome {
            MergeOutcome::UpToDate { current: Some(path) } => {
                println!("{}: up to date ({})", report.caller, path.display());
            }
            MergeOutcome::UpToDate { current: None } => {
                println!("{}: no filtered calls to merge", report.caller);
            }
            MergeOutcome::DryRun { output, added } => println!(
                "{}: would merge {} into {}",
                report.caller,
                added.iter().join(","),
                output.display()
            ),
            MergeOutcome::Merged { path, added } => println!(
                "{}: merged {} into {}",
                report.caller,
                added.iter().join(","),
                path.display()
            ),
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn check(args: Check) -> Result<ExitCode> {
    let config = PipelineConfig::load(&args.inputs.config)?;
    let launcher = ProcessLauncher;
    let report = Pipeline::new(&config, &launcher)
        .check(&args.inputs.manifest, args.inputs.samples.as_deref())?;

    println!("{} samples selected", report.working_set.len());
    for stage in &report.stages {
        println!(
            "{}\t{} pending\t{}",
            stage.stage,
            stage.pending.len(),
            stage.pending.iter().join(",")
        );
    }
    for merge in &report.merges {
        println!(
            "merge_calls.{}\t{} pending\t{}",
            merge.caller,
            merge.samples.len(),
            merge.samples.iter().join(",")
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn inner_main() -> Result<ExitCode> {
    let opts = Varpipe::parse();
    init_logging();
    match opts.subcmd {
        SubCommand::Run(args) => run(args),
        SubCommand::Check(args) => check(args),
    }
}

fn main() -> ExitCode {
    match inner_main() {
        Ok(exit_code) => exit_code,
        Err(err) => {
            print_error_chain(&err);
            ExitCode::FAILURE
        }
    }
}
