//! Live monitoring: watch a frame directory until interrupted.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::{open_persister, vision_client};
use crate::config::AppConfig;
use crate::monitor::{Alert, DirectoryFrameSource, Monitor, MonitorStats};
use crate::storage::worker::PersistQueue;

/// Print alerts until every sender is dropped. Resolves to the number printed.
fn spawn_alert_printer(mut alerts: mpsc::UnboundedReceiver<Alert>) -> JoinHandle<usize> {
    tokio::spawn(async move {
        let mut printed = 0;
        while let Some(alert) = alerts.recv().await {
            println!("[ALERT] {}", alert.spoken_text());
            printed += 1;
        }
        printed
    })
}

/// Run the monitor loop over `frames_dir` until Ctrl-C.
///
/// Alerts are printed as they arrive. Queued captures are drained before
/// returning.
pub async fn run_monitor(config: &AppConfig, frames_dir: &Path) -> Result<MonitorStats, String> {
    let analyzer = Arc::new(vision_client(config)?);
    let persister = Arc::new(open_persister(config)?);
    let frames = Arc::new(DirectoryFrameSource::new(frames_dir)?);

    let (queue, worker) = PersistQueue::spawn(persister, None);
    let (alert_tx, alert_rx) = mpsc::unbounded_channel::<Alert>();
    let alert_printer = spawn_alert_printer(alert_rx);

    let monitor = Monitor::new(analyzer, config)
        .with_queue(queue)
        .with_alerts(alert_tx);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            return;
        }
        info!("Interrupt received, stopping monitor");
        let _ = shutdown_tx.send(true);
    });

    info!("Watching {:?} for frames", frames_dir);
    let stats = monitor.run(frames, shutdown_rx).await;

    // Dropping the last queue handle lets the worker finish outstanding captures
    drop(monitor);
    if let Err(e) = worker.await {
        warn!("Persistence worker ended abnormally: {}", e);
    }
    let _ = alert_printer.await;
    Ok(stats)
}
