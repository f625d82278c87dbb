//! Whitelist synchronization: rebuild the remote person group from the roster
//! and train it.
//!
//! A rebuild is a full replace (delete group, recreate empty, repopulate); it
//! never diffs against the previous membership. Failures are asymmetric on
//! purpose: a bad reference photo is recorded and skipped, while a failure to
//! create a person aborts the rebuild.

use crate::cache::RosterCache;
use crate::gateway::{GatewayError, RemoteServiceGateway};
use crate::roster::{self, RosterError, RosterSource};
use crate::types::{DiagnosticEntry, FaceId, ImageSource, PersonId, TrainingStatus};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

/// Display name of the whitelist group on the remote side.
pub const WHITELIST_GROUP_NAME: &str = "White List";

/// Progress share reached once the fresh group exists.
const PROGRESS_GROUP_READY: f32 = 5.0;
/// Progress share reached once every roster entry has been processed.
const PROGRESS_PHOTOS_DONE: f32 = 90.0;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("whitelist group: {0}")]
    Group(GatewayError),
    #[error("roster fetch: {0}")]
    Roster(#[from] RosterError),
    #[error("creating person {key}: {source}")]
    Identity { key: String, source: GatewayError },
    #[error("previous training still running after {polls} polls")]
    TrainingInProgress { polls: u32 },
}

/// Terminal state of a training job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrainingOutcome {
    Succeeded,
    Failed,
    /// The poll bound was exhausted while the job was still running.
    Timeout,
}

impl TrainingOutcome {
    pub fn is_success(self) -> bool {
        self == TrainingOutcome::Succeeded
    }
}

/// Bounds the training status poll loop.
#[derive(Debug, Clone, Copy)]
pub struct TrainingPolicy {
    /// Status polls before giving up with [`TrainingOutcome::Timeout`].
    /// Polls are spaced by the gateway's minimum call interval.
    pub max_polls: u32,
}

impl Default for TrainingPolicy {
    fn default() -> Self {
        Self { max_polls: 600 }
    }
}

/// Why a single reference photo could not be registered.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PhotoFailureReason {
    InvalidImage(String),
    NoFaceDetected,
    MultipleFacesDetected(usize),
    Service(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhotoFailure {
    pub identity_key: String,
    pub photo_url: String,
    pub reason: PhotoFailureReason,
}

/// Aggregate result of one rebuild.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncResult {
    /// False only when a group-level, roster-level or person-level step failed.
    pub success: bool,
    /// Roster entries whose person was created.
    pub processed_count: usize,
    pub registered_faces: usize,
    pub failures: Vec<PhotoFailure>,
    /// `None` when the rebuild aborted before training.
    pub training: Option<TrainingOutcome>,
    /// Reason the rebuild aborted, if it did.
    pub error: Option<String>,
}

/// Observer of rebuild progress, 0–100.
pub trait SyncProgress: Send + Sync {
    fn report(&self, percent: u8);
}

impl SyncProgress for watch::Sender<u8> {
    fn report(&self, percent: u8) {
        self.send_replace(percent);
    }
}

struct ProgressTracker<'a> {
    observer: Option<&'a dyn SyncProgress>,
    current: f32,
}

impl<'a> ProgressTracker<'a> {
    fn new(observer: Option<&'a dyn SyncProgress>) -> Self {
        Self {
            observer,
            current: 0.0,
        }
    }

    fn set(&mut self, value: f32) {
        self.current = value.clamp(0.0, 100.0);
        if let Some(o) = self.observer {
            o.report(self.current.round() as u8);
        }
    }

    fn advance(&mut self, step: f32) {
        self.set(self.current + step);
    }
}

/// Rebuilds and maintains the remote whitelist group.
pub struct RosterSyncEngine {
    gateway: Arc<RemoteServiceGateway>,
    roster: Arc<dyn RosterSource>,
    cache: Arc<RosterCache>,
    group_id: String,
    training: TrainingPolicy,
}

impl RosterSyncEngine {
    pub fn new(
        gateway: Arc<RemoteServiceGateway>,
        roster: Arc<dyn RosterSource>,
        cache: Arc<RosterCache>,
        group_id: &str,
        training: TrainingPolicy,
    ) -> Self {
        Self {
            gateway,
            roster,
            cache,
            group_id: group_id.to_string(),
            training,
        }
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn cache(&self) -> &Arc<RosterCache> {
        &self.cache
    }

    /// Delete-and-recreate the whitelist group from a fresh roster snapshot,
    /// register every reference photo, then train.
    pub async fn rebuild_whitelist(&self, progress: Option<&dyn SyncProgress>) -> SyncResult {
        let mut tracker = ProgressTracker::new(progress);
        let mut result = SyncResult::default();
        tracker.set(0.0);

        match self.populate(&mut result, &mut tracker).await {
            Ok(()) => {
                let outcome = self.train().await;
                result.training = Some(outcome);
                result.success = true;
                tracing::info!(
                    group_id = %self.group_id,
                    people = result.processed_count,
                    faces = result.registered_faces,
                    failures = result.failures.len(),
                    training = ?outcome,
                    "whitelist rebuilt"
                );
                if !outcome.is_success() {
                    tracing::warn!(training = ?outcome, "whitelist training did not succeed");
                }
                self.diagnostic(format!(
                    "Whitelist created: {} people, {} faces, {} photo failures, training {:?}",
                    result.processed_count,
                    result.registered_faces,
                    result.failures.len(),
                    outcome
                ))
                .await;
            }
            Err(e) => {
                tracing::error!(group_id = %self.group_id, error = %e, "whitelist rebuild aborted");
                self.diagnostic(format!("Whitelist rebuild aborted: {e}")).await;
                result.success = false;
                result.error = Some(e.to_string());
            }
        }

        tracker.set(100.0);
        result
    }

    async fn populate(
        &self,
        result: &mut SyncResult,
        tracker: &mut ProgressTracker<'_>,
    ) -> Result<(), SyncError> {
        match self.gateway.get_group(&self.group_id).await {
            Ok(()) => {
                self.wait_for_training_idle().await?;
                self.gateway
                    .delete_group(&self.group_id)
                    .await
                    .map_err(SyncError::Group)?;
                tracing::info!(group_id = %self.group_id, "deleted old whitelist group");
                self.diagnostic("Deleted old group".to_string()).await;
            }
            Err(e) if e.is_not_found() => {
                tracing::info!(group_id = %self.group_id, "whitelist group does not exist yet");
                self.diagnostic("The group doesn't exist".to_string()).await;
            }
            Err(e) => return Err(SyncError::Group(e)),
        }
        // Ids from the deleted group are meaningless from here on.
        self.cache.clear();

        self.gateway
            .create_group(&self.group_id, WHITELIST_GROUP_NAME)
            .await
            .map_err(SyncError::Group)?;
        tracker.set(PROGRESS_GROUP_READY);

        let mut entries = self.roster.fetch_roster().await?;
        let total_photos: usize = entries.iter().map(|e| e.photo_urls.len()).sum();
        tracing::info!(
            people = entries.len(),
            photos = total_photos,
            "building whitelist from roster"
        );
        self.diagnostic(format!(
            "Start building whitelist: {} people, {} photos",
            entries.len(),
            total_photos
        ))
        .await;

        let step = if entries.is_empty() {
            0.0
        } else {
            (PROGRESS_PHOTOS_DONE - PROGRESS_GROUP_READY) / entries.len() as f32
        };

        for entry in entries.iter_mut() {
            let person_id = self
                .gateway
                .create_person(&self.group_id, &entry.display_name)
                .await
                .map_err(|source| SyncError::Identity {
                    key: entry.identity_key.clone(),
                    source,
                })?;
            entry.remote_id = Some(person_id);
            entry.face_ids.clear();
            result.processed_count += 1;

            for url in &entry.photo_urls {
                tracing::debug!(key = %entry.identity_key, url = %url, "processing reference photo");
                match self.register_photo(person_id, url).await {
                    Ok(face_id) => {
                        entry.face_ids.push(face_id);
                        result.registered_faces += 1;
                    }
                    Err(reason) => {
                        tracing::warn!(
                            key = %entry.identity_key,
                            url = %url,
                            reason = ?reason,
                            "reference photo skipped"
                        );
                        if reason == PhotoFailureReason::NoFaceDetected {
                            self.diagnostic(format!("WARNING: No face detected in this image: {url}"))
                                .await;
                        }
                        result.failures.push(PhotoFailure {
                            identity_key: entry.identity_key.clone(),
                            photo_url: url.clone(),
                            reason,
                        });
                    }
                }
            }
            tracker.advance(step);
        }

        tracker.set(PROGRESS_PHOTOS_DONE);
        self.cache.replace(entries);
        Ok(())
    }

    /// Detect exactly one face in the photo, then register it for the person.
    async fn register_photo(
        &self,
        person_id: PersonId,
        url: &str,
    ) -> Result<FaceId, PhotoFailureReason> {
        let faces = self
            .gateway
            .detect(&ImageSource::Url(url.to_string()))
            .await
            .map_err(photo_failure)?;

        match faces.len() {
            0 => return Err(PhotoFailureReason::NoFaceDetected),
            1 => {}
            n => return Err(PhotoFailureReason::MultipleFacesDetected(n)),
        }

        self.gateway
            .add_face(&self.group_id, person_id, url)
            .await
            .map_err(photo_failure)
    }

    /// Block until no training job is outstanding on the existing group.
    ///
    /// A group that was never trained reports an error status, which counts
    /// as idle.
    async fn wait_for_training_idle(&self) -> Result<(), SyncError> {
        for poll in 1..=self.training.max_polls {
            match self.gateway.training_status(&self.group_id).await {
                Ok(TrainingStatus::Running) | Ok(TrainingStatus::NotStarted) => {
                    if poll == 1 {
                        tracing::info!(
                            group_id = %self.group_id,
                            "waiting for previous training to finish"
                        );
                    }
                }
                Err(e) if e.is_transient() => {
                    tracing::debug!(error = %e, poll, "training status poll throttled");
                }
                Ok(_) | Err(_) => return Ok(()),
            }
        }
        Err(SyncError::TrainingInProgress {
            polls: self.training.max_polls,
        })
    }

    /// Start training and poll until it reaches a terminal state or the
    /// poll bound runs out.
    pub async fn train(&self) -> TrainingOutcome {
        tracing::info!(group_id = %self.group_id, "start training whitelist");
        self.diagnostic("Start training whitelist".to_string()).await;

        if let Err(e) = self.gateway.train(&self.group_id).await {
            tracing::warn!(error = %e, "training request rejected");
            return TrainingOutcome::Failed;
        }

        for poll in 1..=self.training.max_polls {
            match self.gateway.training_status(&self.group_id).await {
                Ok(TrainingStatus::Succeeded) => {
                    tracing::info!(polls = poll, "whitelist training succeeded");
                    return TrainingOutcome::Succeeded;
                }
                Ok(TrainingStatus::Running) | Ok(TrainingStatus::NotStarted) => continue,
                Ok(status) => {
                    tracing::warn!(?status, polls = poll, "whitelist training failed");
                    return TrainingOutcome::Failed;
                }
                Err(e) if e.is_transient() => {
                    tracing::debug!(error = %e, poll, "training status poll throttled");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "training status unavailable");
                    return TrainingOutcome::Failed;
                }
            }
        }

        tracing::warn!(max_polls = self.training.max_polls, "whitelist training timed out");
        TrainingOutcome::Timeout
    }

    /// Remove a person and all their faces from the whitelist, then retrain.
    ///
    /// Returns `Ok(false)` if the person is not in the current snapshot.
    pub async fn remove_person(&self, identity_key: &str) -> Result<bool, GatewayError> {
        let Some(entry) = self.cache.find_by_key(identity_key) else {
            return Ok(false);
        };
        let Some(person_id) = entry.remote_id else {
            return Ok(false);
        };

        for face_id in &entry.face_ids {
            self.delete_face_tolerant(person_id, *face_id).await?;
        }
        match self.gateway.delete_person(&self.group_id, person_id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        self.cache.remove(&person_id);
        tracing::info!(key = identity_key, "person removed from whitelist");

        Ok(self.train().await.is_success())
    }

    /// Remove one registered face of a person, then retrain.
    ///
    /// Returns `Ok(false)` if the person or face is unknown.
    pub async fn remove_photo(
        &self,
        identity_key: &str,
        face_id: FaceId,
    ) -> Result<bool, GatewayError> {
        let Some(mut entry) = self.cache.find_by_key(identity_key) else {
            return Ok(false);
        };
        let Some(person_id) = entry.remote_id else {
            return Ok(false);
        };
        if !entry.face_ids.contains(&face_id) {
            return Ok(false);
        }

        self.delete_face_tolerant(person_id, face_id).await?;
        entry.face_ids.retain(|f| *f != face_id);
        self.cache.upsert(entry);
        tracing::info!(key = identity_key, %face_id, "face removed from whitelist");

        Ok(self.train().await.is_success())
    }

    async fn delete_face_tolerant(
        &self,
        person_id: PersonId,
        face_id: FaceId,
    ) -> Result<(), GatewayError> {
        match self
            .gateway
            .delete_face(&self.group_id, person_id, face_id)
            .await
        {
            Err(e) if !e.is_not_found() => Err(e),
            _ => Ok(()),
        }
    }

    async fn diagnostic(&self, message: String) {
        roster::report(self.roster.as_ref(), DiagnosticEntry::message(message)).await;
    }
}

fn photo_failure(err: GatewayError) -> PhotoFailureReason {
    match err {
        GatewayError::InvalidInput(msg) => PhotoFailureReason::InvalidImage(msg),
        other => PhotoFailureReason::Service(other.to_string()),
    }
}
