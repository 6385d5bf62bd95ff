//! API keys stored in the OS keychain.

use keyring::Entry;
use tracing::{info, warn};

use crate::error::PpeError;

const KEYRING_USER: &str = "ppe-monitor";

/// Which secret a keychain entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum KeyService {
    /// Bearer token for the vision gateway
    Vision,
    /// Service key for the hosted storage/database project
    Storage,
}

impl KeyService {
    pub fn service_name(&self) -> &'static str {
        match self {
            KeyService::Vision => "ppe-monitor-vision-api",
            KeyService::Storage => "ppe-monitor-storage-key",
        }
    }
}

fn entry(service: KeyService) -> Result<Entry, PpeError> {
    Entry::new(service.service_name(), KEYRING_USER).map_err(|e| {
        warn!("Failed to create keyring entry for {}: {}", service.service_name(), e);
        PpeError::Credentials(e.to_string())
    })
}

pub fn set_api_key(service: KeyService, key: &str) -> Result<(), PpeError> {
    info!("Setting API key for service: {}", service.service_name());
    entry(service)?.set_password(key).map_err(|e| {
        warn!("Failed to set password for {}: {}", service.service_name(), e);
        PpeError::Credentials(e.to_string())
    })
}

pub fn get_api_key(service: KeyService) -> Result<Option<String>, PpeError> {
    match entry(service)?.get_password() {
        Ok(password) => Ok(Some(password)),
        Err(keyring::Error::NoEntry) => {
            info!("No API key found for service: {}", service.service_name());
            Ok(None)
        }
        Err(e) => {
            warn!("Failed to get password for {}: {}", service.service_name(), e);
            Err(PpeError::Credentials(e.to_string()))
        }
    }
}

/// Like [`get_api_key`] but a missing key is an error telling the user how to set it.
pub fn require_api_key(service: KeyService) -> Result<String, PpeError> {
    get_api_key(service)?.ok_or_else(|| {
        let name = match service {
            KeyService::Vision => "vision",
            KeyService::Storage => "storage",
        };
        PpeError::Credentials(format!(
            "No {} API key configured. Run `ppe-monitor key set {}`.",
            name, name
        ))
    })
}

pub fn delete_api_key(service: KeyService) -> Result<(), PpeError> {
    info!("Deleting API key for service: {}", service.service_name());
    entry(service)?.delete_credential().map_err(|e| {
        warn!("Failed to delete credential for {}: {}", service.service_name(), e);
        PpeError::Credentials(e.to_string())
    })
}
