use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat};
use tempfile::TempDir;
use tokio::sync::{mpsc, watch, Semaphore};

use ppe_monitor::analyzer::catalog::{default_required, EquipmentId};
use ppe_monitor::analyzer::types::ResponseFormat;
use ppe_monitor::analyzer::VisionAnalyzer;
use ppe_monitor::config::AppConfig;
use ppe_monitor::monitor::{Alert, Frame, FrameSource, Monitor, TickOutcome};
use ppe_monitor::storage::{LocalStore, PersistQueue, Persister, SyncState};
use ppe_monitor::PpeError;

const GEARED: &str = r#"```json
{"persona_detectada": true, "epp_detectado": ["casco", "chaleco"], "confianza": 0.9}
```"#;

fn png_frame() -> Vec<u8> {
    let mut buffer = Cursor::new(Vec::new());
    DynamicImage::new_rgb8(160, 120)
        .write_to(&mut buffer, ImageFormat::Png)
        .unwrap();
    buffer.into_inner()
}

/// Always has a fresh frame, like a live camera.
struct LiveCamera;

impl FrameSource for LiveCamera {
    fn latest_frame(&self) -> Result<Option<Frame>, PpeError> {
        Ok(Some(Frame {
            bytes: png_frame(),
            label: "camera".to_string(),
        }))
    }
}

/// Blocks in `latest_frame` until the test releases it, like a stalled disk.
struct StalledCamera {
    release: Mutex<std::sync::mpsc::Receiver<()>>,
}

impl StalledCamera {
    fn new() -> (Self, std::sync::mpsc::Sender<()>) {
        let (tx, rx) = std::sync::mpsc::channel();
        (
            Self {
                release: Mutex::new(rx),
            },
            tx,
        )
    }
}

impl FrameSource for StalledCamera {
    fn latest_frame(&self) -> Result<Option<Frame>, PpeError> {
        let release = self.release.lock().unwrap();
        let _ = release.recv();
        Ok(None)
    }
}

/// Replies with a fixed text once a permit is available.
struct GatedAnalyzer {
    reply: Result<String, fn() -> PpeError>,
    gate: Arc<Semaphore>,
    calls: AtomicUsize,
}

impl GatedAnalyzer {
    fn open(reply: &str) -> Self {
        Self {
            reply: Ok(reply.to_string()),
            gate: Arc::new(Semaphore::new(Semaphore::MAX_PERMITS)),
            calls: AtomicUsize::new(0),
        }
    }

    fn closed(reply: &str) -> Self {
        Self {
            gate: Arc::new(Semaphore::new(0)),
            ..Self::open(reply)
        }
    }

    fn failing(err: fn() -> PpeError) -> Self {
        Self {
            reply: Err(err),
            ..Self::open("")
        }
    }
}

#[async_trait]
impl VisionAnalyzer for GatedAnalyzer {
    async fn analyze(&self, frame_jpeg: &[u8], _: ResponseFormat) -> Result<String, PpeError> {
        assert_eq!(&frame_jpeg[..2], &[0xFF, 0xD8], "frames are sent as JPEG");
        self.calls.fetch_add(1, Ordering::SeqCst);
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| PpeError::Transport("gate closed".to_string()))?;
        permit.forget();
        match &self.reply {
            Ok(text) => Ok(text.clone()),
            Err(make) => Err(make()),
        }
    }
}

fn local_queue(
    dir: &TempDir,
) -> (
    PersistQueue,
    tokio::task::JoinHandle<()>,
    mpsc::UnboundedReceiver<ppe_monitor::storage::PersistOutcome>,
) {
    let local = LocalStore::open(&dir.path().join("local.db")).unwrap();
    let persister = Arc::new(Persister::new(None, local, default_required()));
    let (tx, rx) = mpsc::unbounded_channel();
    let (queue, handle) = PersistQueue::spawn(persister, Some(tx));
    (queue, handle, rx)
}

async fn wait_until_idle(monitor: &Monitor) {
    for _ in 0..200 {
        if !monitor.is_busy() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("analysis never finished");
}

#[tokio::test]
async fn test_tick_is_dropped_while_analysis_in_flight() {
    let analyzer = Arc::new(GatedAnalyzer::closed(GEARED));
    let monitor = Monitor::new(analyzer.clone(), &AppConfig::default());
    let camera: Arc<dyn FrameSource> = Arc::new(LiveCamera);

    assert_eq!(monitor.tick(camera.clone()), TickOutcome::Started);
    assert!(monitor.is_busy());
    assert_eq!(monitor.tick(camera.clone()), TickOutcome::Skipped);
    assert_eq!(monitor.tick(camera.clone()), TickOutcome::Skipped);

    analyzer.gate.add_permits(1);
    wait_until_idle(&monitor).await;

    analyzer.gate.add_permits(1);
    assert_eq!(monitor.tick(camera), TickOutcome::Started);
    wait_until_idle(&monitor).await;
    assert_eq!(analyzer.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_confident_detection_alerts_and_auto_captures() {
    let dir = TempDir::new().unwrap();
    let (queue, worker, mut outcomes) = local_queue(&dir);
    let (alert_tx, mut alerts) = mpsc::unbounded_channel();
    let monitor = Monitor::new(Arc::new(GatedAnalyzer::open(GEARED)), &AppConfig::default())
        .with_queue(queue)
        .with_alerts(alert_tx);

    let result = monitor.process_frame(&png_frame()).await.unwrap();
    assert_eq!(
        result.detection_list(),
        vec![EquipmentId::Helmet, EquipmentId::Vest]
    );

    assert_eq!(
        alerts.recv().await.unwrap(),
        Alert::PersonWithEquipment(vec![EquipmentId::Helmet, EquipmentId::Vest])
    );
    let outcome = outcomes.recv().await.unwrap();
    assert_eq!(outcome.state(), SyncState::LocalOnly);

    drop(monitor);
    worker.await.unwrap();
}

#[tokio::test]
async fn test_low_confidence_is_not_captured() {
    let dir = TempDir::new().unwrap();
    let (queue, worker, mut outcomes) = local_queue(&dir);
    let (alert_tx, mut alerts) = mpsc::unbounded_channel();
    let reply = r#"{"persona_detectada": true, "epp_detectado": [], "confianza": 0.4}"#;
    let monitor = Monitor::new(Arc::new(GatedAnalyzer::open(reply)), &AppConfig::default())
        .with_queue(queue)
        .with_alerts(alert_tx);

    monitor.process_frame(&png_frame()).await.unwrap();
    assert_eq!(alerts.recv().await.unwrap(), Alert::PersonWithoutEquipment);

    drop(monitor);
    worker.await.unwrap();
    assert!(outcomes.recv().await.is_none());
}

#[tokio::test]
async fn test_alerts_can_be_disabled() {
    let mut config = AppConfig::default();
    config.monitor.alerts_enabled = false;
    let (alert_tx, mut alerts) = mpsc::unbounded_channel();
    let monitor =
        Monitor::new(Arc::new(GatedAnalyzer::open(GEARED)), &config).with_alerts(alert_tx);

    monitor.process_frame(&png_frame()).await.unwrap();
    drop(monitor);
    assert!(alerts.recv().await.is_none());
}

#[tokio::test]
async fn test_invalid_frame_rejected_before_analysis() {
    let analyzer = Arc::new(GatedAnalyzer::open(GEARED));
    let monitor = Monitor::new(analyzer.clone(), &AppConfig::default());

    let err = monitor.process_frame(b"not an image").await.unwrap_err();
    assert!(matches!(err, PpeError::Validation(_)));
    assert_eq!(analyzer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_run_skips_ticks_and_stops_on_shutdown() {
    let analyzer = Arc::new(GatedAnalyzer::closed(GEARED));
    let monitor = Monitor::new(analyzer.clone(), &AppConfig::default());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(9_500)).await;
        let _ = shutdown_tx.send(true);
    });

    let stats = monitor.run(Arc::new(LiveCamera), shutdown_rx).await;
    assert_eq!(stats.started, 1);
    assert!(stats.skipped >= 2, "expected skipped ticks, got {:?}", stats);
    assert_eq!(analyzer.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_run_survives_provider_errors() {
    let analyzer = Arc::new(GatedAnalyzer::failing(|| {
        PpeError::RateLimited("429".to_string())
    }));
    let monitor = Monitor::new(analyzer.clone(), &AppConfig::default());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(9_500)).await;
        let _ = shutdown_tx.send(true);
    });

    let stats = monitor.run(Arc::new(LiveCamera), shutdown_rx).await;
    assert!(stats.started >= 2, "loop stopped analyzing: {:?}", stats);
    assert_eq!(stats.skipped, 0);
}

#[tokio::test]
async fn test_tick_does_not_wait_for_a_slow_frame_source() {
    let analyzer = Arc::new(GatedAnalyzer::open(GEARED));
    let monitor = Monitor::new(analyzer.clone(), &AppConfig::default());
    let (camera, release) = StalledCamera::new();
    let camera: Arc<dyn FrameSource> = Arc::new(camera);

    assert_eq!(monitor.tick(camera.clone()), TickOutcome::Started);
    assert_eq!(monitor.tick(camera), TickOutcome::Skipped);
    assert!(monitor.is_busy());

    release.send(()).unwrap();
    wait_until_idle(&monitor).await;
    assert_eq!(analyzer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_shutdown_is_not_held_up_by_a_stalled_frame_source() {
    let monitor = Monitor::new(Arc::new(GatedAnalyzer::open(GEARED)), &AppConfig::default());
    let (camera, release) = StalledCamera::new();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = shutdown_tx.send(true);
    });

    let stats = tokio::time::timeout(
        Duration::from_secs(2),
        monitor.run(Arc::new(camera), shutdown_rx),
    )
    .await
    .expect("monitor did not stop while the frame read was stalled");
    assert_eq!(stats.started, 0);

    release.send(()).unwrap();
    wait_until_idle(&monitor).await;
}
