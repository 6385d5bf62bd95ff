//! Keychain commands for the vision and storage API keys.

use crate::credentials::{self, KeyService};

pub fn set_key(service: KeyService, key: &str) -> Result<(), String> {
    let key = key.trim();
    if key.is_empty() {
        return Err("API key must not be empty".to_string());
    }
    credentials::set_api_key(service, key)?;
    Ok(())
}

/// Stored key with only its edges visible, or None when unset.
pub fn get_key_masked(service: KeyService) -> Result<Option<String>, String> {
    Ok(credentials::get_api_key(service)?.map(|key| mask_key(&key)))
}

pub fn delete_key(service: KeyService) -> Result<(), String> {
    credentials::delete_api_key(service)?;
    Ok(())
}

fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}
