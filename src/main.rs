//! CLI entry point for bibresolve.

use std::io::{self, IsTerminal, Read, Write};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use bibresolve_core::Engine;
use bibresolve_core::parser::{scan_inputs, split_inputs};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

mod app_config;
mod cli;
mod progress;

use app_config::{LoadedConfig, load_default_file_config, load_file_config};
use cli::Args;

/// Exit status when at least one identifier failed.
const EXIT_PARTIAL_FAILURE: u8 = 2;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    let loaded = load_config(&args)?;

    // Priority: RUST_LOG env var > quiet flag > verbose flag > config file > info
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => loaded.config.verbosity.map_or("info", |v| v.log_level()),
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");
    if loaded.loaded_from_file
        && let Some(path) = &loaded.path
    {
        debug!(path = %path.display(), "loaded config file");
    }

    let input_text = if !args.inputs.is_empty() {
        args.inputs.join("\n")
    } else if !io::stdin().is_terminal() {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read identifiers from stdin")?;
        buffer
    } else {
        info!("No input provided. Pass DOIs as arguments or pipe them via stdin.");
        info!("Example: echo '10.1038/nature12373' | bibresolve");
        return Ok(ExitCode::SUCCESS);
    };

    let inputs = if args.scan {
        scan_inputs(&input_text)
    } else {
        split_inputs(&input_text)
    };
    if inputs.is_empty() {
        info!("No identifiers found in input");
        return Ok(ExitCode::SUCCESS);
    }

    let config = args.engine_config(&loaded.config)?;
    let mut engine = Engine::build(config)
        .await
        .context("Failed to initialize resolver")?;

    let show_progress = !args.quiet && io::stderr().is_terminal();
    let bar = match progress::progress_bar(show_progress, inputs.len()) {
        Some((bar, callback)) => {
            engine = engine.with_progress(callback);
            Some(bar)
        }
        None => None,
    };

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; finishing in-flight requests");
            interrupt.cancel();
        }
    });

    let result = engine.run(&inputs, &cancel).await;
    if let Some(bar) = bar {
        bar.finish_and_clear();
    }

    let report = if args.compact {
        serde_json::to_string(&result)
    } else {
        serde_json::to_string_pretty(&result)
    }
    .context("Failed to serialize batch report")?;
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{report}").context("Failed to write batch report")?;

    for entry in result.failed() {
        if let Some(error) = entry.error() {
            let descriptor = error.descriptor();
            warn!(
                position = entry.position,
                input = %entry.input,
                kind = error.kind.label(),
                fix = descriptor.fix,
                "{}",
                error.message
            );
        }
    }

    for entry in result.resolved() {
        if let Some(first) = entry.duplicate_of() {
            info!(position = entry.position, input = %entry.input, duplicate_of = first, "same work as an earlier entry");
        }
    }

    info!(
        attempted = result.stats.attempted,
        succeeded = result.stats.succeeded,
        failed = result.stats.failed,
        cache_hits = result.stats.cache_hits,
        duplicates = result.stats.duplicates,
        elapsed_ms = result.stats.elapsed_ms,
        "Resolution complete"
    );

    if result.all_succeeded() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(EXIT_PARTIAL_FAILURE))
    }
}

fn load_config(args: &Args) -> Result<LoadedConfig> {
    if args.no_config {
        return Ok(LoadedConfig {
            path: None,
            config: app_config::FileConfig::default(),
            loaded_from_file: false,
        });
    }
    match &args.config {
        Some(path) => Ok(LoadedConfig {
            path: Some(path.clone()),
            config: load_file_config(path)?,
            loaded_from_file: true,
        }),
        None => load_default_file_config(),
    }
}
