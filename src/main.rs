use std::env;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use log::info;

use multimatch::{
    build_sync_model, ModelParser, RunConfig, Runner, SolutionWriter,
};

fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .try_init();
}

struct CliArgs {
    model_path: PathBuf,
    output: PathBuf,
    config: RunConfig,
    /// `Some(feasible)` runs a synchronization round after the first solve.
    synchronize: Option<bool>,
}

const USAGE: &str = "Usage: multimatch <model-file> [output-path] \
[--mode fast|incremental|balanced|exhaustive] [--seed N] [--threads N] \
[--sync feasible|infeasible]";

fn parse_args() -> Result<CliArgs> {
    let mut args = env::args().skip(1);
    let mut positional: Vec<String> = Vec::new();
    let mut config = RunConfig::default();
    let mut synchronize = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--mode" => config.level = next_value(&mut args, "--mode")?.parse()?,
            "--seed" => {
                config.seed = Some(
                    next_value(&mut args, "--seed")?
                        .parse()
                        .context("parse --seed")?,
                );
            }
            "--threads" => {
                config.threads = next_value(&mut args, "--threads")?
                    .parse()
                    .context("parse --threads")?;
                if config.threads == 0 {
                    bail!("--threads must be at least 1");
                }
            }
            "--sync" => {
                synchronize = Some(match next_value(&mut args, "--sync")?.as_str() {
                    "feasible" => true,
                    "infeasible" => false,
                    other => bail!("unknown synchronization mode {other:?}"),
                });
            }
            "--help" | "-h" => {
                println!("{USAGE}");
                std::process::exit(0);
            }
            other if other.starts_with('-') => bail!("unknown option {other:?}\n{USAGE}"),
            _ => positional.push(arg),
        }
    }

    if positional.is_empty() || positional.len() > 2 {
        bail!("{USAGE}");
    }
    let model_path = PathBuf::from(positional.remove(0));
    let output = positional
        .pop()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("solution.json"));

    Ok(CliArgs {
        model_path,
        output,
        config,
        synchronize,
    })
}

fn next_value(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<String> {
    args.next()
        .ok_or_else(|| anyhow::anyhow!("missing value for {flag}"))
}

fn main() -> Result<()> {
    init_logging();
    let args = parse_args()?;

    let model = ModelParser::from_path(&args.model_path)?;
    info!(
        "Solving with level {:?}, {} thread(s)",
        args.config.level, args.config.threads
    );

    let mut solution = Runner::new(&model, args.config.clone()).run()?;

    if let Some(feasible) = args.synchronize {
        info!("Synchronizing solution (feasible: {feasible})");
        let sync_model = build_sync_model(&model, &solution, feasible)?;
        solution = Runner::new(&sync_model, args.config).run()?;
    }

    let written = SolutionWriter::save(&args.output, &model, &solution)?;
    info!("Finished. Solution written to {:?}", written);
    Ok(())
}
