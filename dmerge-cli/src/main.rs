mod cli;
mod config;
mod error;
mod progress;

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;
use danmaku::{IdentityResolver, MergeEngine, SessionLog, render_merged};
use tracing::{Level, debug, error, info};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use crate::{
    cli::Args,
    config::AppConfig,
    error::{AppError, Result},
    progress::ProgressReporter,
};

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    if let Err(e) = run(args).await {
        error!("Application error: {}", e);
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let mut config = AppConfig::load(args.config.as_deref())?;
    config.apply_args(&args)?;
    debug!("Effective configuration: {:?}", config);

    let first_input = args
        .inputs
        .first()
        .cloned()
        .ok_or_else(|| AppError::InvalidInput("no input files".to_string()))?;
    let output_path = args
        .output
        .clone()
        .unwrap_or_else(|| config.output_path(&first_input));

    let table_path = config.identity_table_path();
    let resolver = if config.uses_identity_table() {
        IdentityResolver::load_or_default(&table_path)
    } else {
        IdentityResolver::default()
    };
    info!(
        "Identity table {} has {} entries",
        table_path.display(),
        resolver.len()
    );

    let sessions = parse_sessions(&args.inputs, &config, resolver.clone()).await?;

    let engine = MergeEngine::new(&config.merge);
    let reporter = ProgressReporter::new(!args.no_progress && !args.quiet);
    let output =
        tokio::task::spawn_blocking(move || engine.merge(sessions, resolver, &reporter)).await??;

    let bytes = render_merged(&output.log)?;
    tokio::fs::write(&output_path, bytes)
        .await
        .map_err(|source| AppError::Write {
            path: output_path.clone(),
            source,
        })?;
    info!(
        "Wrote {} records ({} duplicates removed) to {}",
        output.stats.retained_records,
        output.stats.duplicates,
        output_path.display()
    );

    if config.merge.identity_table.write {
        // The merged file is already on disk; a failed save does not undo it.
        match output.resolver.save(&table_path) {
            Ok(()) => info!(
                "Saved {} identities to {}",
                output.resolver.len(),
                table_path.display()
            ),
            Err(e) => error!(
                "Failed to save identity table {}: {}",
                table_path.display(),
                e
            ),
        }
    }

    Ok(())
}

/// Read and parse every input concurrently, keeping argument order.
async fn parse_sessions(
    inputs: &[PathBuf],
    config: &AppConfig,
    resolver: IdentityResolver,
) -> Result<Vec<SessionLog>> {
    let options = Arc::new(config.merge.session_options()?);
    let resolver = Arc::new(resolver);
    let read_identities = config.merge.identity_table.read;

    let tasks: Vec<_> = inputs
        .iter()
        .cloned()
        .map(|path| {
            let options = Arc::clone(&options);
            let resolver = Arc::clone(&resolver);
            tokio::spawn(async move {
                let bytes = tokio::fs::read(&path)
                    .await
                    .map_err(|source| AppError::Read {
                        path: path.clone(),
                        source,
                    })?;
                let session = tokio::task::spawn_blocking(move || {
                    SessionLog::from_bytes(
                        &path,
                        &bytes,
                        &options,
                        read_identities.then_some(resolver.as_ref()),
                    )
                })
                .await??;
                Ok::<_, AppError>(session)
            })
        })
        .collect();

    let mut sessions = Vec::with_capacity(tasks.len());
    for task in tasks {
        let session = task.await??;
        info!(
            "Loaded {} ({} records, starts {})",
            session.source().display(),
            session.len(),
            session.start_time
        );
        sessions.push(session);
    }
    Ok(sessions)
}

fn init_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_level(verbose)
                .with_writer(std::io::stderr),
        )
        .init();
}
