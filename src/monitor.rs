//! Timer-driven frame analysis with alerts and automatic capture.
//!
//! Each tick spawns a task that reads the newest frame from a [`FrameSource`]
//! and analyzes it. Only one such task runs at a time: a tick that arrives
//! while one is in flight is dropped, not queued.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::analyzer::catalog::EquipmentId;
use crate::analyzer::image_prep::{prepare_frame, validate_upload};
use crate::analyzer::types::{AnalysisResult, ResponseFormat};
use crate::analyzer::vision::{analyze_frame, VisionAnalyzer};
use crate::config::{AppConfig, MonitorConfig};
use crate::error::PpeError;
use crate::storage::worker::PersistQueue;

const FRAME_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "webp", "bmp"];

/// One frame pulled from a source.
#[derive(Debug, Clone)]
pub struct Frame {
    pub bytes: Vec<u8>,
    pub label: String,
}

/// Provides the most recent camera frame, if a new one is available.
pub trait FrameSource: Send + Sync {
    fn latest_frame(&self) -> Result<Option<Frame>, PpeError>;
}

/// Treats the newest image file in a directory as the current camera frame.
///
/// A file is returned once; until a newer file (or a newer write to the same
/// file) appears, ticks see no frame.
pub struct DirectoryFrameSource {
    dir: PathBuf,
    last_seen: Mutex<Option<(PathBuf, SystemTime)>>,
}

impl DirectoryFrameSource {
    pub fn new(dir: &Path) -> Result<Self, PpeError> {
        if !dir.is_dir() {
            return Err(PpeError::Config(format!(
                "frame directory {:?} does not exist",
                dir
            )));
        }
        Ok(Self {
            dir: dir.to_path_buf(),
            last_seen: Mutex::new(None),
        })
    }

    fn newest_image(&self) -> Option<(PathBuf, SystemTime)> {
        WalkDir::new(&self.dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| {
                e.path()
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| FRAME_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
            })
            .filter_map(|e| {
                let modified = e.metadata().ok()?.modified().ok()?;
                Some((e.into_path(), modified))
            })
            .max_by_key(|(_, modified)| *modified)
    }
}

impl FrameSource for DirectoryFrameSource {
    fn latest_frame(&self) -> Result<Option<Frame>, PpeError> {
        let Some((path, modified)) = self.newest_image() else {
            return Ok(None);
        };

        let mut last_seen = self
            .last_seen
            .lock()
            .map_err(|_| PpeError::LocalStore("frame source lock poisoned".to_string()))?;
        if last_seen.as_ref() == Some(&(path.clone(), modified)) {
            return Ok(None);
        }

        let bytes = std::fs::read(&path)?;
        *last_seen = Some((path.clone(), modified));
        Ok(Some(Frame {
            bytes,
            label: path.to_string_lossy().to_string(),
        }))
    }
}

/// Operator notification for an analyzed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Alert {
    PersonWithEquipment(Vec<EquipmentId>),
    PersonWithoutEquipment,
}

impl Alert {
    /// Alert for a result, or `None` when nobody is in frame.
    pub fn for_result(result: &AnalysisResult) -> Option<Self> {
        if !result.has_person() {
            return None;
        }
        let items = result.detection_list();
        if items.is_empty() {
            Some(Alert::PersonWithoutEquipment)
        } else {
            Some(Alert::PersonWithEquipment(items))
        }
    }

    pub fn spoken_text(&self) -> String {
        match self {
            Alert::PersonWithEquipment(items) => {
                let names: Vec<&str> = items.iter().map(|i| i.label()).collect();
                format!("Person detected wearing: {}", names.join(", "))
            }
            Alert::PersonWithoutEquipment => {
                "Person detected without protective equipment".to_string()
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Frame read and analysis handed to a background task
    Started,
    /// Previous analysis still running; tick dropped
    Skipped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorStats {
    /// Frames that reached analysis
    pub started: u64,
    pub skipped: u64,
    /// Ticks that found no new frame
    pub idle: u64,
}

#[derive(Default)]
struct FrameCounters {
    analyzed: AtomicU64,
    idle: AtomicU64,
}

/// Clears the in-flight flag when the analysis finishes, however it finishes.
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Clone)]
pub struct Monitor {
    analyzer: Arc<dyn VisionAnalyzer>,
    config: MonitorConfig,
    format: ResponseFormat,
    max_upload_bytes: u64,
    queue: Option<PersistQueue>,
    alerts: Option<mpsc::UnboundedSender<Alert>>,
    in_flight: Arc<AtomicBool>,
    counters: Arc<FrameCounters>,
}

impl Monitor {
    pub fn new(analyzer: Arc<dyn VisionAnalyzer>, config: &AppConfig) -> Self {
        Self {
            analyzer,
            config: config.monitor.clone(),
            format: config.vision.format,
            max_upload_bytes: config.upload.max_bytes,
            queue: None,
            alerts: None,
            in_flight: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(FrameCounters::default()),
        }
    }

    /// Auto-captures are submitted to `queue`.
    pub fn with_queue(mut self, queue: PersistQueue) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn with_alerts(mut self, alerts: mpsc::UnboundedSender<Alert>) -> Self {
        self.alerts = Some(alerts);
        self
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Whether a result qualifies for automatic capture.
    pub fn should_capture(&self, result: &AnalysisResult) -> bool {
        result.has_person()
            && !result.detected_equipment().is_empty()
            && result.overall_confidence >= self.config.min_confidence
    }

    /// Handle one timer tick. Must be called inside a tokio runtime.
    ///
    /// Returns immediately; the frame is read on the blocking pool from
    /// inside the spawned task.
    pub fn tick(&self, frames: Arc<dyn FrameSource>) -> TickOutcome {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            debug!("Analysis still in flight, dropping tick");
            return TickOutcome::Skipped;
        }
        let guard = InFlightGuard(self.in_flight.clone());

        let this = self.clone();
        tokio::spawn(async move {
            let _guard = guard;
            let Some(frame) = this.read_frame(frames).await else {
                this.counters.idle.fetch_add(1, Ordering::Relaxed);
                return;
            };

            this.counters.analyzed.fetch_add(1, Ordering::Relaxed);
            if let Err(e) = this.process_frame(&frame.bytes).await {
                warn!("Frame {} not analyzed: {}", frame.label, e);
                info!("{}", e.user_message());
            }
        });
        TickOutcome::Started
    }

    async fn read_frame(&self, frames: Arc<dyn FrameSource>) -> Option<Frame> {
        match tokio::task::spawn_blocking(move || frames.latest_frame()).await {
            Ok(Ok(frame)) => frame,
            Ok(Err(e)) => {
                warn!("Failed to read frame: {}", e);
                None
            }
            Err(e) => {
                warn!("Frame reader task failed: {}", e);
                None
            }
        }
    }

    /// Validate, analyze, alert, and auto-capture a single frame.
    pub async fn process_frame(&self, bytes: &[u8]) -> Result<AnalysisResult, PpeError> {
        validate_upload(bytes, self.max_upload_bytes)?;
        let prepared = prepare_frame(bytes)?;
        let result = analyze_frame(self.analyzer.as_ref(), &prepared, self.format).await?;

        if self.config.alerts_enabled {
            if let Some(alert) = Alert::for_result(&result) {
                info!("{}", alert.spoken_text());
                if let Some(alerts) = &self.alerts {
                    let _ = alerts.send(alert);
                }
            }
        }

        if self.should_capture(&result) {
            match &self.queue {
                Some(queue) => {
                    if queue.submit(prepared, result.clone()) {
                        info!(
                            "Auto-capture queued ({} items, confidence {:.2})",
                            result.detected_equipment().len(),
                            result.overall_confidence
                        );
                    }
                }
                None => debug!("Capture qualified but no persistence queue attached"),
            }
        }

        Ok(result)
    }

    /// Tick every `interval_secs` until `shutdown` flips to true or its sender
    /// is dropped. In-flight analyses are left to finish on their own.
    pub async fn run(
        &self,
        frames: Arc<dyn FrameSource>,
        mut shutdown: watch::Receiver<bool>,
    ) -> MonitorStats {
        let mut interval = tokio::time::interval(Duration::from_secs(self.config.interval_secs));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut skipped = 0;
        info!(
            "Monitoring every {}s (capture threshold {:.2})",
            self.config.interval_secs, self.config.min_confidence
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if self.tick(frames.clone()) == TickOutcome::Skipped {
                        skipped += 1;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        let stats = MonitorStats {
            started: self.counters.analyzed.load(Ordering::Relaxed),
            skipped,
            idle: self.counters.idle.load(Ordering::Relaxed),
        };
        info!(
            "Monitor stopped: {} analyzed, {} skipped, {} idle ticks",
            stats.started, stats.skipped, stats.idle
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::normalize;
    use image::{DynamicImage, ImageFormat};
    use std::io::Cursor;
    use tempfile::TempDir;

    fn png_bytes() -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        DynamicImage::new_rgb8(128, 96)
            .write_to(&mut buffer, ImageFormat::Png)
            .unwrap();
        buffer.into_inner()
    }

    #[test]
    fn test_alert_for_result() {
        let none = normalize(r#"{"persona_detectada": false, "epp_detectado": []}"#).unwrap();
        assert_eq!(Alert::for_result(&none), None);

        let bare = normalize(r#"{"persona_detectada": true, "epp_detectado": []}"#).unwrap();
        assert_eq!(
            Alert::for_result(&bare),
            Some(Alert::PersonWithoutEquipment)
        );

        let geared =
            normalize(r#"{"persona_detectada": true, "epp_detectado": ["chaleco", "casco"]}"#)
                .unwrap();
        let alert = Alert::for_result(&geared).unwrap();
        assert_eq!(
            alert,
            Alert::PersonWithEquipment(vec![EquipmentId::Helmet, EquipmentId::Vest])
        );
        assert_eq!(
            alert.spoken_text(),
            "Person detected wearing: Safety helmet, Reflective vest"
        );
    }

    #[test]
    fn test_directory_source_returns_each_frame_once() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignore me").unwrap();
        let source = DirectoryFrameSource::new(dir.path()).unwrap();
        assert!(source.latest_frame().unwrap().is_none());

        std::fs::write(dir.path().join("frame.png"), png_bytes()).unwrap();
        let frame = source.latest_frame().unwrap().unwrap();
        assert!(frame.label.ends_with("frame.png"));
        assert!(source.latest_frame().unwrap().is_none());
    }

    #[test]
    fn test_directory_source_requires_directory() {
        let dir = TempDir::new().unwrap();
        assert!(DirectoryFrameSource::new(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_should_capture_threshold() {
        struct Never;
        #[async_trait::async_trait]
        impl VisionAnalyzer for Never {
            async fn analyze(&self, _: &[u8], _: ResponseFormat) -> Result<String, PpeError> {
                Err(PpeError::Transport("unused".to_string()))
            }
        }

        let monitor = Monitor::new(Arc::new(Never), &AppConfig::default());
        let high = normalize(r#"{"persona_detectada": true, "epp_detectado": ["casco"], "confianza": 0.9}"#)
            .unwrap();
        let low = normalize(r#"{"persona_detectada": true, "epp_detectado": ["casco"], "confianza": 0.5}"#)
            .unwrap();
        let bare = normalize(r#"{"persona_detectada": true, "epp_detectado": [], "confianza": 0.9}"#)
            .unwrap();

        assert!(monitor.should_capture(&high));
        assert!(!monitor.should_capture(&low));
        assert!(!monitor.should_capture(&bare));
    }
}
