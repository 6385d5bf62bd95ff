//! Background persistence so the capture loop never waits on storage.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::persist::Persister;
use super::types::PersistOutcome;
use crate::analyzer::types::AnalysisResult;

struct PersistJob {
    frame: Vec<u8>,
    result: AnalysisResult,
}

/// Handle for submitting captures to the persistence worker.
///
/// Cloning shares the same worker. The worker drains outstanding jobs and
/// exits once every handle is dropped.
///
/// The queue is unbounded: the monitor's single in-flight analysis already
/// limits how fast captures arrive, and an accepted capture is never dropped.
#[derive(Clone)]
pub struct PersistQueue {
    tx: mpsc::UnboundedSender<PersistJob>,
}

impl PersistQueue {
    /// Start the worker task. Outcomes are forwarded to `outcomes` when given.
    pub fn spawn(
        persister: Arc<Persister>,
        outcomes: Option<mpsc::UnboundedSender<PersistOutcome>>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<PersistJob>();

        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let outcome = persister.persist(&job.frame, &job.result).await;
                match &outcome {
                    PersistOutcome::Synced { id, .. } => info!("Capture {} saved and synced", id),
                    PersistOutcome::LocalOnly { id, reason } => {
                        warn!("Capture {} saved locally only: {}", id, reason)
                    }
                }
                if let Some(out) = &outcomes {
                    let _ = out.send(outcome);
                }
            }
            debug!("Persistence queue closed");
        });

        (Self { tx }, handle)
    }

    /// Enqueue a capture without waiting for it to be stored.
    ///
    /// Returns false only when the worker has stopped.
    pub fn submit(&self, frame: Vec<u8>, result: AnalysisResult) -> bool {
        match self.tx.send(PersistJob { frame, result }) {
            Ok(()) => true,
            Err(_) => {
                warn!("Persistence worker stopped, dropping capture");
                false
            }
        }
    }
}
