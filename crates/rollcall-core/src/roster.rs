//! Roster backend: the authoritative list of people plus attendance and
//! diagnostic sinks.

use crate::types::{AttendanceEvent, DiagnosticEntry, RosterEntry};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RosterError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("backend returned HTTP {0}")]
    Status(u16),
    #[error("malformed roster: {0}")]
    Parse(String),
    #[error("roster file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Source of the roster and sink for attendance and diagnostic entries.
#[async_trait]
pub trait RosterSource: Send + Sync {
    async fn fetch_roster(&self) -> Result<Vec<RosterEntry>, RosterError>;
    async fn post_attendance(&self, event: &AttendanceEvent) -> Result<(), RosterError>;
    async fn post_diagnostic(&self, entry: &DiagnosticEntry) -> Result<(), RosterError>;
}

/// Post a diagnostic entry, logging and discarding any failure.
///
/// Diagnostics are best-effort telemetry and never interrupt the pipeline.
pub async fn report(source: &dyn RosterSource, entry: DiagnosticEntry) {
    if let Err(e) = source.post_diagnostic(&entry).await {
        tracing::warn!(error = %e, message = %entry.message, "diagnostic post failed");
    }
}

/// Roster backend reached over HTTP.
///
/// Endpoints under `base_url`: `GET personas/`, `POST attendance`, `POST log`.
pub struct HttpRosterSource {
    http: reqwest::Client,
    roster_url: String,
    attendance_url: String,
    log_url: String,
}

impl HttpRosterSource {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RosterError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RosterError::Request(e.to_string()))?;
        let base = base_url.trim_end_matches('/');

        Ok(Self {
            http,
            roster_url: format!("{base}/personas/"),
            attendance_url: format!("{base}/attendance"),
            log_url: format!("{base}/log"),
        })
    }

    async fn post_json(&self, url: &str, body: serde_json::Value) -> Result<(), RosterError> {
        let response = self
            .http
            .post(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| RosterError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(RosterError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

#[async_trait]
impl RosterSource for HttpRosterSource {
    async fn fetch_roster(&self) -> Result<Vec<RosterEntry>, RosterError> {
        let response = self
            .http
            .get(&self.roster_url)
            .send()
            .await
            .map_err(|e| RosterError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(RosterError::Status(response.status().as_u16()));
        }

        let entries: Vec<RosterEntry> = response
            .json()
            .await
            .map_err(|e| RosterError::Parse(e.to_string()))?;

        for entry in &entries {
            tracing::debug!(
                key = %entry.identity_key,
                name = %entry.display_name,
                photos = entry.photo_urls.len(),
                "roster entry"
            );
        }
        Ok(entries)
    }

    async fn post_attendance(&self, event: &AttendanceEvent) -> Result<(), RosterError> {
        let body = serde_json::to_value(event).map_err(|e| RosterError::Parse(e.to_string()))?;
        self.post_json(&self.attendance_url, body).await
    }

    async fn post_diagnostic(&self, entry: &DiagnosticEntry) -> Result<(), RosterError> {
        let image = entry
            .image
            .as_deref()
            .map(|bytes| BASE64.encode(bytes))
            .unwrap_or_default();
        self.post_json(&self.log_url, json!({ "message": entry.message, "image": image }))
            .await
    }
}

/// Roster read from a local JSON file in the backend's shape.
///
/// Attendance and diagnostics go to the log only. Used for offline runs.
pub struct FileRosterSource {
    path: PathBuf,
}

impl FileRosterSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl RosterSource for FileRosterSource {
    async fn fetch_roster(&self) -> Result<Vec<RosterEntry>, RosterError> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| RosterError::Io {
                path: self.path.clone(),
                source,
            })?;
        serde_json::from_str(&raw).map_err(|e| RosterError::Parse(e.to_string()))
    }

    async fn post_attendance(&self, event: &AttendanceEvent) -> Result<(), RosterError> {
        tracing::info!(
            key = %event.identity_key,
            entered = event.entered,
            location = %event.location,
            "attendance"
        );
        Ok(())
    }

    async fn post_diagnostic(&self, entry: &DiagnosticEntry) -> Result<(), RosterError> {
        tracing::info!(
            message = %entry.message,
            image_bytes = entry.image.as_ref().map_or(0, Vec::len),
            "diagnostic"
        );
        Ok(())
    }
}
