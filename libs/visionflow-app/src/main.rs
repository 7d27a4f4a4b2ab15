// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! visionflow driver
//!
//! Builds one analytics graph per configuration file, runs them side by side
//! and exits once every instance has reached end of stream or been
//! interrupted. Exits non-zero when any instance hit an unrecoverable error.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;
use visionflow::core::{StageFactory, SyntheticStageFactory};

mod config;
mod instance;
mod perf;

use instance::Instance;
use perf::PerfTable;

/// Most configuration files (graph instances) one process runs.
const MAX_INSTANCES: usize = 128;

const QUIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "visionflow-app")]
#[command(author, version, about = "Run visionflow analytics graphs", long_about = None)]
struct Args {
    /// Graph configuration file (.json, .yaml, .yml, .toml); repeat for more instances
    #[arg(short = 'c', long = "cfg-file", value_name = "PATH", required = true)]
    cfg_files: Vec<PathBuf>,

    /// Replace the first source of the matching instance with this file
    #[arg(short = 'i', long = "input-file", value_name = "PATH")]
    input_files: Vec<PathBuf>,

    /// Show object text on tiled outputs too
    #[arg(short = 't', long = "tiledtext")]
    tiled_text: bool,

    /// Also write logs to DIR/visionflow.log
    #[arg(long = "log-dir", value_name = "DIR")]
    log_dir: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

fn setup_logging(log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::prelude::*;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let file_appender = tracing_appender::rolling::never(dir, "visionflow.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    Ok(guard)
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let args = Args::parse();

    let _guard = match setup_logging(args.log_dir.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(args) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<ExitCode> {
    if args.cfg_files.len() > MAX_INSTANCES {
        bail!(
            "{} config files given, at most {} instances are supported",
            args.cfg_files.len(),
            MAX_INSTANCES
        );
    }
    if args.input_files.len() > args.cfg_files.len() {
        tracing::warn!(
            "{} input files for {} instances; extra input files ignored",
            args.input_files.len(),
            args.cfg_files.len()
        );
    }

    let factory: Arc<dyn StageFactory> = Arc::new(SyntheticStageFactory::new());
    let perf = Arc::new(PerfTable::new());

    let mut instances = Vec::with_capacity(args.cfg_files.len());
    for (index, path) in args.cfg_files.iter().enumerate() {
        let mut cfg = config::load_config(path)?;
        if let Some(input) = args.input_files.get(index) {
            config::override_input(&mut cfg, input)
                .with_context(|| format!("Failed to apply --input-file to {}", path.display()))?;
        }
        if args.tiled_text {
            cfg.show_bbox_text = true;
        }
        instances.push(Instance::build(index, path.clone(), &cfg, factory.clone(), perf.clone())?);
    }

    let signals: Vec<_> = instances.iter().map(Instance::shutdown_signal).collect();
    ctrlc::set_handler(move || {
        tracing::info!("Interrupted, shutting down");
        for signal in &signals {
            signal.request_quit();
        }
    })
    .context("Failed to install Ctrl+C handler")?;

    let started = instances.iter_mut().try_for_each(Instance::start);
    if let Err(e) = started {
        tracing::error!("{:#}", e);
        for instance in &mut instances {
            instance.stop();
        }
        return Ok(ExitCode::FAILURE);
    }
    tracing::info!("{} instance(s) running", instances.len());

    while !instances.iter().all(Instance::is_stopped) {
        for instance in instances.iter_mut().filter(|i| !i.is_stopped()) {
            if instance.quit_requested() {
                tracing::info!("[instance-{}] quitting", instance.index());
                instance.stop();
                if let Some(stats) = perf.latest(instance.index()) {
                    tracing::info!("last sample: {}", perf::format_sample(&stats));
                }
            }
        }
        std::thread::sleep(QUIT_POLL_INTERVAL);
    }

    let failed: Vec<_> = instances
        .iter()
        .filter(|i| i.exit_status() != 0)
        .map(Instance::index)
        .collect();
    if failed.is_empty() {
        tracing::info!("All instances stopped cleanly");
        Ok(ExitCode::SUCCESS)
    } else {
        tracing::error!("Instances {:?} stopped after unrecoverable errors", failed);
        Ok(ExitCode::FAILURE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cfg_file_is_required_and_repeatable() {
        assert!(Args::try_parse_from(["visionflow-app"]).is_err());

        let args = Args::try_parse_from([
            "visionflow-app",
            "-c",
            "a.yaml",
            "--cfg-file",
            "b.toml",
            "-i",
            "clip.mp4",
            "-t",
        ])
        .unwrap();
        assert_eq!(args.cfg_files, vec![PathBuf::from("a.yaml"), PathBuf::from("b.toml")]);
        assert_eq!(args.input_files, vec![PathBuf::from("clip.mp4")]);
        assert!(args.tiled_text);
        assert!(args.log_dir.is_none());
    }

    #[test]
    fn test_too_many_instances_rejected() {
        let mut argv = vec!["visionflow-app".to_string()];
        for i in 0..=MAX_INSTANCES {
            argv.push("-c".into());
            argv.push(format!("{}.json", i));
        }
        let args = Args::try_parse_from(argv).unwrap();
        let err = run(args).unwrap_err();
        assert!(err.to_string().contains("at most 128"));
    }
}
