// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for scanner operations
//!
//! This module provides command-line functionality for:
//! - Listing available cameras
//! - Headless scanning that prints each decoded payload

use futures::StreamExt;
use scanner::{Config, ScanSession, SessionStatus, StartOutcome};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// List all available cameras
pub fn list_cameras(json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config();
    let session = ScanSession::from_config(&config);

    let rt = tokio::runtime::Runtime::new()?;
    let devices = rt.block_on(session.list_devices())?;

    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }

    if devices.is_empty() {
        println!("No cameras found.");
        return Ok(());
    }

    println!("Available cameras:");
    println!();
    for (index, device) in devices.iter().enumerate() {
        let marker = if config.last_device_id.as_deref() == Some(device.id.as_str()) {
            " (last used)"
        } else {
            ""
        };
        println!("  [{}] {} ({}){}", index, device.display_name(), device.id, marker);
    }

    Ok(())
}

/// Scan until Ctrl+C or until `count` results have been printed
pub fn scan(
    device: Option<String>,
    count: Option<usize>,
    cooldown_ms: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config();
    if let Some(ms) = cooldown_ms {
        config.cooldown_ms = ms;
    }
    let device = device.or_else(|| config.last_device_id.clone());

    let rt = tokio::runtime::Runtime::new()?;
    let used = rt.block_on(run_scan(&config, device.as_deref(), count))?;

    if let Some(device_id) = used
        && config.last_device_id.as_deref() != Some(device_id.as_str())
    {
        config.last_device_id = Some(device_id);
        if let Err(e) = config.save() {
            warn!(error = %e, "Failed to remember camera");
        }
    }

    Ok(())
}

async fn run_scan(
    config: &Config,
    device: Option<&str>,
    count: Option<usize>,
) -> Result<Option<String>, Box<dyn std::error::Error>> {
    let session = ScanSession::from_config(config);
    let _errors = session.on_error(|e| eprintln!("Error: {}", e));
    let mut results = Box::pin(session.decode_stream());
    let mut status = session.watch_status();

    // Set up Ctrl+C handler
    let (stop_tx, mut stop_rx) = mpsc::unbounded_channel();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })?;

    let interrupt = async {
        let _ = stop_rx.recv().await;
    };
    let active = match session.start_until(device, interrupt).await? {
        StartOutcome::Active(active) => active,
        StartOutcome::Cancelled => return Ok(None),
    };
    println!(
        "Scanning with {} (press Ctrl+C to stop)",
        active.display_name()
    );
    info!(session = %session.id(), device = %active.id, "Headless scan started");

    let mut printed = 0usize;
    let outcome = loop {
        tokio::select! {
            _ = stop_rx.recv() => break Ok(()),
            event = results.next() => {
                let Some(event) = event else {
                    break Ok(());
                };
                println!(
                    "{} {}",
                    event.detected_at.format("%Y-%m-%d %H:%M:%S%.3f"),
                    event.payload
                );
                printed += 1;
                if count.is_some_and(|n| printed >= n) {
                    break Ok(());
                }
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                if *status.borrow_and_update() == SessionStatus::Errored {
                    let reason = session
                        .snapshot()
                        .last_error
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "session failed".to_string());
                    break Err(reason);
                }
            }
        }
    };

    // Releasing the camera joins its capture thread
    let stopping = session.clone();
    if let Err(e) = tokio::task::spawn_blocking(move || stopping.stop()).await {
        warn!(error = %e, "Stop task failed");
    }
    let stats = session.snapshot().stats;
    info!(
        forwarded = stats.forwarded,
        suppressed = stats.suppressed,
        "Headless scan finished"
    );

    outcome?;
    Ok(Some(active.id))
}

fn load_config() -> Config {
    Config::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load configuration, using defaults");
        Config::default()
    })
}
