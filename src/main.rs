//! PerfCounter Watcher - Main entry point
//!
//! Polling agent: starts a background collector for every configured counter
//! and prints one JSON sample per counter on each report tick.

use anyhow::Context;
use perfcounter_watcher_lib::core::{Config, CounterConfig, Error, Sample};
use perfcounter_watcher_lib::query::resolve;
use perfcounter_watcher_lib::watcher::{CollectorHandle, ContinuousWatcher, Watcher};
use std::collections::HashMap;
use std::path::PathBuf;

/// Load the config named on the command line, or the default one
///
/// A broken default config falls back to defaults; the error is returned so
/// it can be logged once logging is up.
fn load_config() -> anyhow::Result<(Config, Option<Error>)> {
    match std::env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => {
            let config = Config::load_from(&path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?;
            Ok((config, None))
        }
        None => Ok(match Config::load() {
            Ok(config) => (config, None),
            Err(e) => (Config::default(), Some(e)),
        }),
    }
}

/// Start one collector per distinct counter path
fn start_collectors(
    watcher: &ContinuousWatcher,
    config: &Config,
) -> HashMap<String, CollectorHandle> {
    let mut collectors = HashMap::new();

    for counter in &config.counters {
        if collectors.contains_key(&counter.path) {
            continue;
        }
        match watcher.start_query(&counter.path, config.collect_interval(counter)) {
            Ok(handle) => {
                collectors.insert(counter.path.clone(), handle);
            }
            Err(e) => log::error!("Skipping counter '{}': {}", counter.name, e),
        }
    }

    collectors
}

fn report(watcher: &ContinuousWatcher, counters: &[CounterConfig]) {
    for counter in counters {
        let value = watcher
            .get_formatted_query_data(&counter.path)
            .and_then(|values| resolve(&values, &counter.path, &counter.instance));

        match value {
            Ok(value) => {
                let sample = Sample::new(&counter.name, &counter.path, &counter.instance, value);
                match serde_json::to_string(&sample) {
                    Ok(line) => println!("{}", line),
                    Err(e) => log::error!("Failed to serialize sample '{}': {}", counter.name, e),
                }
            }
            Err(Error::NotCollected { .. }) | Err(Error::UnregisteredPath(_)) => {
                log::debug!("No data yet for '{}'", counter.name);
            }
            Err(e) => log::warn!("Failed to read '{}': {}", counter.name, e),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let (config, load_error) = load_config()?;

    // Initialize logging
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.general.log_level.as_str()),
    )
    .init();

    if let Some(e) = load_error {
        log::warn!("Failed to load config, using defaults: {}", e);
    }

    log::info!("Starting PerfCounter Watcher v{}", env!("CARGO_PKG_VERSION"));

    let watcher = Watcher::detect(config.subsystem.backend)?.continuous();
    let collectors = start_collectors(&watcher, &config);
    if collectors.is_empty() {
        anyhow::bail!("No counters could be registered");
    }
    log::info!("Watching {} counter path(s)", collectors.len());

    let mut interval = tokio::time::interval(config.report_interval());
    // The first tick fires immediately, before any collection has finished
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => report(&watcher, &config.counters),
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    log::error!("Failed to listen for shutdown signal: {}", e);
                }
                break;
            }
        }
    }

    log::info!("Shutting down");
    for (_, handle) in collectors {
        handle.stop()?;
    }
    watcher.shutdown()?;
    Ok(())
}
