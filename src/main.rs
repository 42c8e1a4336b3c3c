//! Bottin - Iterative DNS Resolver
//!
//! Resolves a single name from the root down and prints the answers, one
//! tab-separated record per line.

use anyhow::{Context, Result};
use bottin::{
    cache::TtlCache,
    cli::Cli,
    config::Config,
    context::ResolveContext,
    core::{Record, Resolver},
    dns::{IterativeResolver, TraceSink, TracingSink},
    root::RootHints,
};
use clap::Parser;
use std::{path::Path, sync::Arc, time::Duration};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration by layering sources: defaults, file, environment, and CLI args.
    let config = match Config::load(&cli) {
        Ok(config) => config,
        Err(err) => {
            tracing_subscriber::fmt().with_writer(std::io::stderr).init();
            error!("Failed to load configuration: {:#}", err);
            std::process::exit(1);
        }
    };

    let log_level = if cli.trace { "debug" } else { config.log_level.as_str() };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)),
        )
        .init();

    info!(
        timeout_ms = config.resolver.timeout_ms,
        max_recursion = config.resolver.max_recursion,
        max_nameservers = config.resolver.max_nameservers,
        max_ips = config.resolver.max_ips,
        "Configuration loaded"
    );

    let hints = match &config.root_hints_path {
        Some(path) => RootHints::from_file(path)?,
        None => RootHints::embedded()?,
    };

    let cache = Arc::new(TtlCache::new());
    if let Some(path) = &config.cache.persist_path {
        restore_cache(&cache, path).await;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = cache.spawn_sweeper(
        Duration::from_secs(config.cache.sweep_interval_seconds.max(1)),
        shutdown_rx.clone(),
    );

    let mut builder = IterativeResolver::builder()
        .config(config.resolver.clone())
        .root_hints(hints)
        .cache(cache.clone());
    if cli.trace {
        let sink: Arc<dyn TraceSink> = Arc::new(TracingSink);
        builder = builder.trace_sink(sink);
    }
    let resolver = builder.build()?;

    let ctx = ResolveContext::background().with_cancellation(shutdown_rx);
    let resolution = {
        let resolve = resolver.resolve_ctx(&ctx, &cli.name, &cli.qtype);
        tokio::pin!(resolve);
        tokio::select! {
            result = &mut resolve => result,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, cancelling resolution.");
                let _ = shutdown_tx.send(true);
                resolve.await
            }
        }
    };

    let _ = shutdown_tx.send(true);
    if let Err(e) = sweeper.await {
        warn!("Cache sweeper task failed: {}", e);
    }
    if let Some(path) = &config.cache.persist_path {
        persist_cache(&cache, path).await?;
    }

    let resolution = resolution.with_context(|| format!("failed to resolve {} {}", cli.name, cli.qtype))?;
    if resolution.answers.is_empty() {
        warn!(name = %cli.name, qtype = %cli.qtype, "No records found");
    }
    for record in &resolution.answers {
        println!("{}", format_record(record));
    }
    Ok(())
}

fn format_record(record: &Record) -> String {
    format!(
        "{}\t{}\t{}\t{}",
        record.name,
        record.ttl.as_secs(),
        record.rtype,
        record.value
    )
}

async fn restore_cache(cache: &TtlCache, path: &Path) {
    match tokio::fs::read_to_string(path).await {
        Ok(data) => match cache.load_json(&data) {
            Ok(()) => info!(path = %path.display(), entries = cache.len(), "Restored record cache"),
            Err(e) => warn!(path = %path.display(), "Ignoring unreadable cache file: {}", e),
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), "Could not read cache file: {}", e),
    }
}

async fn persist_cache(cache: &TtlCache, path: &Path) -> Result<()> {
    cache.sweep();
    let data = cache.dump_json()?;
    tokio::fs::write(path, data)
        .await
        .with_context(|| format!("failed to write cache file {}", path.display()))?;
    info!(path = %path.display(), entries = cache.len(), "Saved record cache");
    Ok(())
}
