//! Single chokepoint for every call to the cloud recognition service.
//!
//! [`RemoteServiceGateway`] wraps a [`FaceService`] backend, spaces calls at
//! least `min_interval` apart regardless of operation, and counts them for
//! diagnostics. It never retries; callers decide what to do with a
//! [`GatewayError::ThrottledOrTransient`].

use crate::types::{DetectedFace, FaceId, IdentifyResult, ImageSource, PersonId, TrainingStatus};
use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Kind of remote resource a `NotFound` refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    PersonGroup,
    Person,
    Face,
    Other,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceKind::PersonGroup => "person group",
            ResourceKind::Person => "person",
            ResourceKind::Face => "face",
            ResourceKind::Other => "resource",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("{0} not found")]
    NotFound(ResourceKind),
    #[error("throttled or transient failure: {0}")]
    ThrottledOrTransient(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("face service error: {0}")]
    Unknown(String),
}

impl GatewayError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, GatewayError::NotFound(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::ThrottledOrTransient(_))
    }
}

/// Raw operations of the cloud face-recognition service.
///
/// Implementations perform exactly one remote request per method and do not
/// rate-limit; that is the gateway's job.
#[async_trait]
pub trait FaceService: Send + Sync {
    async fn get_group(&self, group_id: &str) -> Result<(), GatewayError>;
    async fn create_group(&self, group_id: &str, name: &str) -> Result<(), GatewayError>;
    async fn delete_group(&self, group_id: &str) -> Result<(), GatewayError>;
    async fn create_person(&self, group_id: &str, name: &str) -> Result<PersonId, GatewayError>;
    async fn delete_person(&self, group_id: &str, person_id: PersonId)
        -> Result<(), GatewayError>;
    async fn detect(&self, image: &ImageSource) -> Result<Vec<DetectedFace>, GatewayError>;
    async fn add_face(
        &self,
        group_id: &str,
        person_id: PersonId,
        image_url: &str,
    ) -> Result<FaceId, GatewayError>;
    async fn delete_face(
        &self,
        group_id: &str,
        person_id: PersonId,
        face_id: FaceId,
    ) -> Result<(), GatewayError>;
    async fn train(&self, group_id: &str) -> Result<(), GatewayError>;
    async fn training_status(&self, group_id: &str) -> Result<TrainingStatus, GatewayError>;
    async fn identify(
        &self,
        group_id: &str,
        face_ids: &[FaceId],
    ) -> Result<Vec<IdentifyResult>, GatewayError>;
}

/// Enforces a minimum spacing between successive calls.
struct RateLimiter {
    last_call: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl RateLimiter {
    fn new(min_interval: Duration) -> Self {
        Self {
            last_call: Mutex::new(None),
            min_interval,
        }
    }

    /// Wait if the previous call was less than `min_interval` ago.
    ///
    /// The lock is held across the sleep so concurrent callers queue up
    /// behind each other instead of all waking at once.
    async fn wait(&self) {
        let mut last = self.last_call.lock().await;

        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_interval {
                let wait_time = self.min_interval - elapsed;
                tracing::trace!(?wait_time, "rate limiting face service call");
                tokio::time::sleep(wait_time).await;
            }
        }

        *last = Some(Instant::now());
    }
}

/// Rate-limited, counted access to a [`FaceService`].
pub struct RemoteServiceGateway {
    service: Arc<dyn FaceService>,
    limiter: RateLimiter,
    calls: AtomicU64,
}

impl RemoteServiceGateway {
    pub fn new(service: Arc<dyn FaceService>, min_interval: Duration) -> Self {
        Self {
            service,
            limiter: RateLimiter::new(min_interval),
            calls: AtomicU64::new(0),
        }
    }

    /// Number of calls admitted since construction.
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn min_interval(&self) -> Duration {
        self.limiter.min_interval
    }

    async fn admit(&self, operation: &'static str) {
        self.limiter.wait().await;
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(operation, call = n, "face service call");
    }

    pub async fn get_group(&self, group_id: &str) -> Result<(), GatewayError> {
        self.admit("get_group").await;
        self.service.get_group(group_id).await
    }

    pub async fn create_group(&self, group_id: &str, name: &str) -> Result<(), GatewayError> {
        self.admit("create_group").await;
        self.service.create_group(group_id, name).await
    }

    pub async fn delete_group(&self, group_id: &str) -> Result<(), GatewayError> {
        self.admit("delete_group").await;
        self.service.delete_group(group_id).await
    }

    pub async fn create_person(&self, group_id: &str, name: &str) -> Result<PersonId, GatewayError> {
        self.admit("create_person").await;
        self.service.create_person(group_id, name).await
    }

    pub async fn delete_person(
        &self,
        group_id: &str,
        person_id: PersonId,
    ) -> Result<(), GatewayError> {
        self.admit("delete_person").await;
        self.service.delete_person(group_id, person_id).await
    }

    pub async fn detect(&self, image: &ImageSource) -> Result<Vec<DetectedFace>, GatewayError> {
        self.admit("detect").await;
        self.service.detect(image).await
    }

    pub async fn add_face(
        &self,
        group_id: &str,
        person_id: PersonId,
        image_url: &str,
    ) -> Result<FaceId, GatewayError> {
        self.admit("add_face").await;
        self.service.add_face(group_id, person_id, image_url).await
    }

    pub async fn delete_face(
        &self,
        group_id: &str,
        person_id: PersonId,
        face_id: FaceId,
    ) -> Result<(), GatewayError> {
        self.admit("delete_face").await;
        self.service.delete_face(group_id, person_id, face_id).await
    }

    pub async fn train(&self, group_id: &str) -> Result<(), GatewayError> {
        self.admit("train").await;
        self.service.train(group_id).await
    }

    pub async fn training_status(&self, group_id: &str) -> Result<TrainingStatus, GatewayError> {
        self.admit("training_status").await;
        self.service.training_status(group_id).await
    }

    pub async fn identify(
        &self,
        group_id: &str,
        face_ids: &[FaceId],
    ) -> Result<Vec<IdentifyResult>, GatewayError> {
        self.admit("identify").await;
        self.service.identify(group_id, face_ids).await
    }
}
