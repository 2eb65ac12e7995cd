use std::env;
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;

use authwatch::config::Config;
use authwatch::geolocation::resolver_from_config;
use authwatch::input::{load_file, AsyncFileTailer};
use authwatch::output::OutputHandler;
use authwatch::scheduler::Scheduler;

/// Main daemon entry point for the authentication log monitor
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    log::info!("Starting authwatch daemon...");

    let config_path = env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = if config_path.exists() {
        Config::from_file(&config_path)?
    } else {
        log::warn!("Config file {:?} not found, using defaults", config_path);
        Config::default()
    };

    // Ctrl+C arrives on a signal thread; forward it into the runtime
    let (stop_tx, mut stop_rx) = mpsc::unbounded_channel::<()>();
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal, gracefully stopping...");
        let _ = stop_tx.send(());
    })?;

    let mut output = OutputHandler::from_config(&config.output)?;

    let mut scheduler = Scheduler::new(config.detection.clone(), &config.scheduler);
    if let Some(resolver) = resolver_from_config(&config.geo) {
        scheduler = scheduler.with_resolver(resolver);
    }
    let running = scheduler.spawn();
    let handle = running.handle();
    let mut snapshots = handle.subscribe();

    let (entries_tx, mut entries_rx) = mpsc::channel(64);
    let mut tailer_task = None;

    if let Some(path) = &config.input.file_path {
        if config.input.import_existing {
            let imported = match load_file(path) {
                Ok(entries) => handle.import_entries(entries).await.map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            if let Err(e) = imported {
                log::error!("Bulk import failed: {}", e);
            }
        }

        let mut tailer = AsyncFileTailer::new(
            path.clone(),
            Duration::from_millis(config.input.poll_interval_ms),
        );
        tailer_task = Some(tokio::spawn(async move {
            if let Err(e) = tailer.run(entries_tx).await {
                log::error!("File tailer stopped: {}", e);
            }
        }));
        log::info!("Monitoring log file: {:?}", path);
    } else {
        log::warn!("No input file configured; only the existing entry set is evaluated");
        drop(entries_tx);
    }

    log::info!("Daemon running. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            _ = stop_rx.recv() => break,
            Some(batch) = entries_rx.recv() => handle.append_entries(batch),
            changed = snapshots.changed() => {
                if changed.is_err() {
                    log::error!("Scheduler exited unexpectedly");
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                for rule in &snapshot.failed_rules {
                    log::warn!("Rule {} was skipped in tick {}", rule, snapshot.generation);
                }
                // Snapshots can coalesce, so new alerts are found against the active set
                if let Err(e) = output.write_new_alerts(&snapshot.alerts) {
                    log::error!("Failed to write alerts, retrying on the next tick: {}", e);
                }
            }
        }
    }

    if let Some(task) = tailer_task {
        task.abort();
    }
    let state = running.stop().await?;
    output.flush()?;

    log::info!(
        "authwatch daemon stopped ({} ticks, {} active alerts)",
        state.ticks,
        state.alerts.len()
    );
    Ok(())
}
