//! Dual-camera capture: one arrival photo and one departure photo per session.

use crate::camera::{Camera, CameraError};
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Frames discarded before the kept photo so exposure can settle.
const DEFAULT_WARMUP_FRAMES: usize = 4;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("need two cameras, found {found}")]
    NotEnoughCameras { found: usize },
    #[error("camera {device}: {source}")]
    Camera {
        device: String,
        #[source]
        source: CameraError,
    },
    #[error("photo I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("capture task failed: {0}")]
    Task(String),
}

/// Which doorway a camera faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraRole {
    Arrival,
    Departure,
}

impl CameraRole {
    pub fn as_str(self) -> &'static str {
        match self {
            CameraRole::Arrival => "arrival",
            CameraRole::Departure => "departure",
        }
    }
}

impl fmt::Display for CameraRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source of camera devices and single photos.
#[async_trait]
pub trait CameraBackend: Send + Sync {
    /// Capture-capable device ids in a stable order.
    async fn list_devices(&self) -> Result<Vec<String>, CaptureError>;

    /// Grab one frame from `device` and write it to `dest` as JPEG.
    async fn capture_photo(&self, device: &str, dest: &Path) -> Result<(), CaptureError>;
}

/// V4L2 backend. Device I/O is blocking, so each call runs on the blocking pool.
pub struct V4lBackend {
    warmup_frames: usize,
}

impl V4lBackend {
    pub fn new() -> Self {
        Self {
            warmup_frames: DEFAULT_WARMUP_FRAMES,
        }
    }

    pub fn with_warmup(warmup_frames: usize) -> Self {
        Self { warmup_frames }
    }
}

impl Default for V4lBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CameraBackend for V4lBackend {
    async fn list_devices(&self) -> Result<Vec<String>, CaptureError> {
        let devices = tokio::task::spawn_blocking(Camera::list_devices)
            .await
            .map_err(|e| CaptureError::Task(e.to_string()))?;
        Ok(devices.into_iter().map(|d| d.path).collect())
    }

    async fn capture_photo(&self, device: &str, dest: &Path) -> Result<(), CaptureError> {
        let device = device.to_string();
        let warmup = self.warmup_frames;
        let jpeg = tokio::task::spawn_blocking(move || {
            Camera::open(&device)
                .and_then(|cam| cam.capture_jpeg(warmup))
                .map_err(|source| CaptureError::Camera { device, source })
        })
        .await
        .map_err(|e| CaptureError::Task(e.to_string()))??;

        tokio::fs::write(dest, jpeg).await?;
        Ok(())
    }
}

/// Photos taken for one session. The files are deleted when this is dropped.
#[derive(Debug)]
pub struct CapturedPhotos {
    pub arrival: PathBuf,
    pub departure: PathBuf,
}

impl CapturedPhotos {
    pub fn path(&self, role: CameraRole) -> &Path {
        match role {
            CameraRole::Arrival => &self.arrival,
            CameraRole::Departure => &self.departure,
        }
    }
}

impl Drop for CapturedPhotos {
    fn drop(&mut self) {
        remove_quietly(&self.arrival);
        remove_quietly(&self.departure);
    }
}

fn remove_quietly(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove photo");
        }
    }
}

/// Captures the arrival and departure photos for a session.
pub struct CaptureOrchestrator {
    backend: Arc<dyn CameraBackend>,
    photo_dir: PathBuf,
    /// Pinned (arrival, departure) devices; enumeration is skipped when set.
    roles: Option<(String, String)>,
}

impl CaptureOrchestrator {
    pub fn new(backend: Arc<dyn CameraBackend>, photo_dir: impl Into<PathBuf>) -> Self {
        Self {
            backend,
            photo_dir: photo_dir.into(),
            roles: None,
        }
    }

    pub fn with_roles(mut self, arrival: &str, departure: &str) -> Self {
        self.roles = Some((arrival.to_string(), departure.to_string()));
        self
    }

    /// Resolve the (arrival, departure) device pair.
    async fn devices(&self) -> Result<(String, String), CaptureError> {
        if let Some((arrival, departure)) = &self.roles {
            return Ok((arrival.clone(), departure.clone()));
        }

        let mut devices = self.backend.list_devices().await?;
        if devices.len() < 2 {
            return Err(CaptureError::NotEnoughCameras {
                found: devices.len(),
            });
        }
        if devices.len() > 2 {
            tracing::warn!(
                found = devices.len(),
                "more than two cameras; using the first two"
            );
        }
        devices.truncate(2);
        let departure = devices.pop().unwrap_or_default();
        let arrival = devices.pop().unwrap_or_default();
        Ok((arrival, departure))
    }

    /// Capture one photo from each camera concurrently.
    ///
    /// Both captures must succeed; on any failure the photos already written
    /// are removed and the error is returned.
    pub async fn capture_entry_exit_photos(&self) -> Result<CapturedPhotos, CaptureError> {
        let (arrival_dev, departure_dev) = self.devices().await?;
        tokio::fs::create_dir_all(&self.photo_dir).await?;

        // Owning the paths from here on means every exit path cleans up.
        let photos = CapturedPhotos {
            arrival: unique_photo_path(&self.photo_dir, CameraRole::Arrival),
            departure: unique_photo_path(&self.photo_dir, CameraRole::Departure),
        };

        let (arrival, departure) = tokio::join!(
            self.backend.capture_photo(&arrival_dev, &photos.arrival),
            self.backend.capture_photo(&departure_dev, &photos.departure),
        );
        arrival?;
        departure?;

        tracing::debug!(
            arrival = %photos.arrival.display(),
            departure = %photos.departure.display(),
            "captured photo pair"
        );
        Ok(photos)
    }
}

/// `{HH-MM-SS}_{role}_{8 hex}.jpg` inside `dir`.
pub fn unique_photo_path(dir: &Path, role: CameraRole) -> PathBuf {
    let stamp = chrono::Local::now().format("%H-%M-%S");
    let id = uuid::Uuid::new_v4().simple().to_string();
    dir.join(format!("{stamp}_{role}_{}.jpg", &id[..8]))
}
