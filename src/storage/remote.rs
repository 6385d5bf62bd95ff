//! Hosted object storage and metadata table.
//!
//! The orchestrator only sees the [`ObjectStore`] and [`MetadataStore`]
//! traits; [`RestBackend`] implements both against a Supabase-style REST API
//! (`/storage/v1` for objects, `/rest/v1` for rows).

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error};
use url::Url;

use super::types::ImageRow;
use crate::config::StorageConfig;
use crate::error::PpeError;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` under `name`, replacing any object with that name.
    async fn upload(&self, name: &str, bytes: Vec<u8>) -> Result<(), PpeError>;

    fn public_url(&self, name: &str) -> String;

    async fn download(&self, name: &str) -> Result<Vec<u8>, PpeError>;

    async fn remove(&self, names: &[String]) -> Result<(), PpeError>;

    /// Object name behind one of this store's public URLs.
    fn object_name(&self, url: &str) -> Option<String>;
}

#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn insert(&self, row: &ImageRow) -> Result<(), PpeError>;

    async fn exists(&self, id: &str) -> Result<bool, PpeError>;

    /// All rows, newest first.
    async fn list_recent(&self) -> Result<Vec<ImageRow>, PpeError>;

    async fn delete(&self, id: &str) -> Result<(), PpeError>;

    async fn delete_many(&self, ids: &[String]) -> Result<(), PpeError>;
}

/// REST client for the hosted storage project.
pub struct RestBackend {
    client: reqwest::Client,
    base: String,
    bucket: String,
    table: String,
    service_key: String,
}

impl RestBackend {
    pub fn new(
        base_url: &str,
        bucket: &str,
        table: &str,
        service_key: String,
    ) -> Result<Self, PpeError> {
        Url::parse(base_url).map_err(|e| {
            PpeError::Config(format!("invalid storage url '{}': {}", base_url, e))
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PpeError::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base: base_url.trim_end_matches('/').to_string(),
            bucket: bucket.to_string(),
            table: table.to_string(),
            service_key,
        })
    }

    /// Build a backend from config, or `None` when no remote store is configured.
    pub fn from_config(
        config: &StorageConfig,
        service_key: String,
    ) -> Result<Option<Self>, PpeError> {
        match config.url.as_deref().filter(|u| !u.trim().is_empty()) {
            Some(url) => Ok(Some(Self::new(
                url,
                &config.bucket,
                &config.table,
                service_key,
            )?)),
            None => Ok(None),
        }
    }

    fn object_url(&self, name: &str) -> String {
        format!(
            "{}/storage/v1/object/{}/{}",
            self.base,
            self.bucket,
            urlencoding::encode(name)
        )
    }

    fn public_prefix(&self) -> String {
        format!("{}/storage/v1/object/public/{}/", self.base, self.bucket)
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{}", self.base, self.table)
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
    }

    async fn send(
        &self,
        builder: reqwest::RequestBuilder,
        what: &str,
    ) -> Result<reqwest::Response, PpeError> {
        let response = self.authed(builder).send().await.map_err(|e| {
            let msg = format!("{} request failed: {}", what, e);
            error!("{}", msg);
            PpeError::Transport(msg)
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            let msg = format!("{} returned {}: {}", what, status, body);
            error!("{}", msg);
            return Err(PpeError::Transport(msg));
        }
        Ok(response)
    }
}

#[async_trait]
impl ObjectStore for RestBackend {
    async fn upload(&self, name: &str, bytes: Vec<u8>) -> Result<(), PpeError> {
        let builder = self
            .client
            .post(self.object_url(name))
            .header("content-type", "image/jpeg")
            .header("x-upsert", "true")
            .body(bytes);
        self.send(builder, "object upload").await?;
        debug!("Uploaded object {}", name);
        Ok(())
    }

    fn public_url(&self, name: &str) -> String {
        format!("{}{}", self.public_prefix(), urlencoding::encode(name))
    }

    async fn download(&self, name: &str) -> Result<Vec<u8>, PpeError> {
        let response = self
            .send(self.client.get(self.public_url(name)), "object download")
            .await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| PpeError::Transport(format!("failed to read object {}: {}", name, e)))?;
        Ok(bytes.to_vec())
    }

    async fn remove(&self, names: &[String]) -> Result<(), PpeError> {
        if names.is_empty() {
            return Ok(());
        }
        let builder = self
            .client
            .delete(format!("{}/storage/v1/object/{}", self.base, self.bucket))
            .json(&serde_json::json!({ "prefixes": names }));
        self.send(builder, "object remove").await?;
        Ok(())
    }

    fn object_name(&self, url: &str) -> Option<String> {
        let encoded = url.strip_prefix(&self.public_prefix())?;
        urlencoding::decode(encoded).ok().map(|s| s.into_owned())
    }
}

#[async_trait]
impl MetadataStore for RestBackend {
    async fn insert(&self, row: &ImageRow) -> Result<(), PpeError> {
        let builder = self
            .client
            .post(self.table_url())
            .header("Prefer", "return=minimal")
            .json(row);
        self.send(builder, "metadata insert").await?;
        Ok(())
    }

    async fn exists(&self, id: &str) -> Result<bool, PpeError> {
        let url = format!(
            "{}?id=eq.{}&select=id",
            self.table_url(),
            urlencoding::encode(id)
        );
        let response = self.send(self.client.get(url), "metadata lookup").await?;
        let rows: Vec<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| PpeError::Transport(format!("invalid lookup response: {}", e)))?;
        Ok(!rows.is_empty())
    }

    async fn list_recent(&self) -> Result<Vec<ImageRow>, PpeError> {
        let url = format!("{}?select=*&order=created_at.desc", self.table_url());
        let response = self.send(self.client.get(url), "metadata list").await?;
        response
            .json()
            .await
            .map_err(|e| PpeError::Transport(format!("invalid list response: {}", e)))
    }

    async fn delete(&self, id: &str) -> Result<(), PpeError> {
        let url = format!("{}?id=eq.{}", self.table_url(), urlencoding::encode(id));
        self.send(self.client.delete(url), "metadata delete").await?;
        Ok(())
    }

    async fn delete_many(&self, ids: &[String]) -> Result<(), PpeError> {
        if ids.is_empty() {
            return Ok(());
        }
        let url = format!("{}?id={}", self.table_url(), in_filter(ids));
        self.send(self.client.delete(url), "metadata bulk delete")
            .await?;
        Ok(())
    }
}

/// PostgREST `in.(...)` filter with each id percent-encoded.
fn in_filter(ids: &[String]) -> String {
    let list = ids
        .iter()
        .map(|id| urlencoding::encode(id).into_owned())
        .collect::<Vec<_>>()
        .join(",");
    format!("in.({})", list)
}
