//! Command handlers behind the CLI. Each returns `Result<_, String>` with a
//! message ready to show the operator.

pub mod analyze;
pub mod gallery;
pub mod keys;
pub mod migrate;
pub mod monitor;

use std::sync::Arc;

use tracing::{info, warn};

use crate::analyzer::vision::VisionClient;
use crate::config::AppConfig;
use crate::credentials::{get_api_key, require_api_key, KeyService};
use crate::storage::{LocalStore, Persister, RemoteStores, RestBackend};

/// Vision client using the keychain-stored API key.
pub fn vision_client(config: &AppConfig) -> Result<VisionClient, String> {
    let api_key = require_api_key(KeyService::Vision)?;
    Ok(VisionClient::new(&config.vision, api_key)?)
}

/// Open the local store and, when configured, the hosted backend.
///
/// A storage URL without a stored service key keeps every capture local.
pub fn open_persister(config: &AppConfig) -> Result<Persister, String> {
    let local = LocalStore::open(&config.local_store_path())
        .map_err(|e| format!("Failed to open local store: {}", e))?;
    let required = config.required_set()?;

    let remote = match config.storage.url.as_deref() {
        Some(url) => match get_api_key(KeyService::Storage)? {
            Some(key) => RestBackend::from_config(&config.storage, key)?.map(|backend| {
                info!("Using remote storage at {}", url);
                let backend = Arc::new(backend);
                RemoteStores {
                    objects: backend.clone(),
                    metadata: backend,
                }
            }),
            None => {
                warn!("Storage URL configured but no storage key stored; captures stay local");
                None
            }
        },
        None => None,
    };

    Ok(Persister::new(remote, local, required))
}
