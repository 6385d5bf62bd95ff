use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{info, warn};

use super::types::{CapturedImage, SyncState};
use crate::error::PpeError;

/// Namespaced key holding the capture list.
pub const CAPTURES_KEY: &str = "ppe_monitor.captured_images";

/// Degraded-mode store for captures that could not be synced.
///
/// Holds a single JSON list under [`CAPTURES_KEY`]; every mutation reads the
/// whole list and writes it back. All operations are synchronous (rusqlite is
/// blocking); async callers should use `tokio::task::spawn_blocking`.
pub struct LocalStore {
    conn: Mutex<Connection>,
}

impl LocalStore {
    /// Create or open the store at `db_path`, creating parent directories.
    pub fn open(db_path: &Path) -> Result<Self, PpeError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                PpeError::LocalStore(format!("failed to create data dir {:?}: {}", parent, e))
            })?;
        }

        let conn = Connection::open(db_path)
            .map_err(|e| PpeError::LocalStore(format!("failed to open {:?}: {}", db_path, e)))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );",
        )?;

        info!("Opened local capture store at {:?}", db_path);
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, PpeError> {
        self.conn
            .lock()
            .map_err(|_| PpeError::LocalStore("local store lock poisoned".to_string()))
    }

    /// Read the full capture list. A missing key is an empty list.
    pub fn load(&self) -> Result<Vec<CapturedImage>, PpeError> {
        let conn = self.conn()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT value FROM kv_store WHERE key = ?1",
                params![CAPTURES_KEY],
                |row| row.get(0),
            )
            .optional()?;

        match json {
            Some(json) => serde_json::from_str(&json).map_err(|e| {
                warn!("Local capture list is not valid JSON: {}", e);
                PpeError::LocalStore(format!("corrupt capture list: {}", e))
            }),
            None => Ok(Vec::new()),
        }
    }

    fn save(&self, images: &[CapturedImage]) -> Result<(), PpeError> {
        let json = serde_json::to_string(images)
            .map_err(|e| PpeError::LocalStore(format!("failed to serialize captures: {}", e)))?;

        self.conn()?.execute(
            "INSERT OR REPLACE INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![CAPTURES_KEY, json, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Load, mutate, and rewrite the whole list.
    pub fn update<T>(
        &self,
        f: impl FnOnce(&mut Vec<CapturedImage>) -> T,
    ) -> Result<T, PpeError> {
        let mut images = self.load()?;
        let out = f(&mut images);
        self.save(&images)?;
        Ok(out)
    }

    pub fn append(&self, image: CapturedImage) -> Result<(), PpeError> {
        let id = image.id.clone();
        self.update(|images| images.push(image))?;
        info!("Saved capture {} to local store", id);
        Ok(())
    }

    /// Drop records with the given ids. Returns how many were removed.
    pub fn remove(&self, ids: &[String]) -> Result<usize, PpeError> {
        self.update(|images| {
            let before = images.len();
            images.retain(|img| !ids.contains(&img.id));
            before - images.len()
        })
    }

    /// Record that a LocalOnly capture now lives remotely at `url`.
    pub fn mark_synced(&self, id: &str, url: &str) -> Result<bool, PpeError> {
        self.update(|images| {
            match images
                .iter_mut()
                .find(|img| img.id == id && img.sync_state.can_transition_to(SyncState::Synced))
            {
                Some(img) => {
                    img.sync_state = SyncState::Synced;
                    img.url = url.to_string();
                    true
                }
                None => false,
            }
        })
    }

    pub fn unsynced(&self) -> Result<Vec<CapturedImage>, PpeError> {
        Ok(self
            .load()?
            .into_iter()
            .filter(|img| img.sync_state == SyncState::LocalOnly)
            .collect())
    }

    pub fn get(&self, id: &str) -> Result<Option<CapturedImage>, PpeError> {
        Ok(self.load()?.into_iter().find(|img| img.id == id))
    }
}
