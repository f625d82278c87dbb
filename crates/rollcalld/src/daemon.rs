//! Shared daemon handle used by the motion loop and the D-Bus service.

use crate::session::{PipelineLock, SessionController, SessionOutcome};
use rollcall_core::{GatewayError, RemoteServiceGateway, RosterSyncEngine, SyncResult};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

pub struct Daemon {
    sync: RosterSyncEngine,
    sessions: SessionController,
    gateway: Arc<RemoteServiceGateway>,
    pipeline: Arc<PipelineLock>,
    progress: watch::Sender<u8>,
    last_sync: Mutex<Option<SyncResult>>,
}

impl Daemon {
    pub fn new(
        sync: RosterSyncEngine,
        sessions: SessionController,
        gateway: Arc<RemoteServiceGateway>,
        pipeline: Arc<PipelineLock>,
    ) -> Self {
        Self {
            sync,
            sessions,
            gateway,
            pipeline,
            progress: watch::Sender::new(0),
            last_sync: Mutex::new(None),
        }
    }

    /// Run one capture session, unless one or a rebuild is already running.
    pub async fn trigger(&self) -> SessionOutcome {
        self.sessions.run_session().await
    }

    /// Rebuild the whitelist. Waits for an in-flight session to finish first.
    pub async fn resync(&self) -> SyncResult {
        let _pipeline = self.pipeline.lock().await;
        tracing::info!(group_id = %self.sync.group_id(), "whitelist rebuild started");
        let result = self.sync.rebuild_whitelist(Some(&self.progress)).await;
        *self.last_sync.lock().unwrap_or_else(|p| p.into_inner()) = Some(result.clone());
        result
    }

    pub async fn remove_person(&self, identity_key: &str) -> Result<bool, GatewayError> {
        let _pipeline = self.pipeline.lock().await;
        self.sync.remove_person(identity_key).await
    }

    pub async fn remove_photo(
        &self,
        identity_key: &str,
        face_id: uuid::Uuid,
    ) -> Result<bool, GatewayError> {
        let _pipeline = self.pipeline.lock().await;
        self.sync.remove_photo(identity_key, face_id).await
    }

    pub fn status(&self) -> serde_json::Value {
        let last_sync = self
            .last_sync
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .map(|r| {
                serde_json::json!({
                    "success": r.success,
                    "processed": r.processed_count,
                    "registered_faces": r.registered_faces,
                    "photo_failures": r.failures.len(),
                    "training": r.training,
                    "error": r.error,
                })
            });

        serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "group_id": self.sync.group_id(),
            "roster_cached": self.sync.cache().len(),
            "gateway_calls": self.gateway.call_count(),
            "session_in_progress": self.sessions.in_progress(),
            "sync_progress": *self.progress.borrow(),
            "last_sync": last_sync,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::LogNotifier;
    use crate::session::SkipReason;
    use async_trait::async_trait;
    use rollcall_core::testing::{FakeFaceService, FakeRosterSource};
    use rollcall_core::{IdentificationDispatcher, RosterCache, RosterEntry, TrainingPolicy};
    use rollcall_hw::{CameraBackend, CaptureError, CaptureOrchestrator};
    use std::path::Path;
    use std::time::Duration;

    const GROUP: &str = "front-door";

    struct NoCameras;

    #[async_trait]
    impl CameraBackend for NoCameras {
        async fn list_devices(&self) -> Result<Vec<String>, CaptureError> {
            Ok(Vec::new())
        }
        async fn capture_photo(&self, _: &str, _: &Path) -> Result<(), CaptureError> {
            Ok(())
        }
    }

    fn daemon(face: Arc<FakeFaceService>, roster: Arc<FakeRosterSource>) -> (Daemon, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(RemoteServiceGateway::new(face, Duration::ZERO));
        let cache = Arc::new(RosterCache::new());
        let pipeline = Arc::new(PipelineLock::new(()));
        let sync = RosterSyncEngine::new(
            gateway.clone(),
            roster.clone(),
            cache.clone(),
            GROUP,
            TrainingPolicy::default(),
        );
        let sessions = SessionController::new(
            CaptureOrchestrator::new(Arc::new(NoCameras), dir.path()),
            IdentificationDispatcher::new(gateway.clone(), GROUP, None),
            cache,
            roster,
            Arc::new(LogNotifier),
            pipeline.clone(),
            "MAIN BUILDING SECOND FLOOR",
        );
        (Daemon::new(sync, sessions, gateway, pipeline), dir)
    }

    #[tokio::test]
    async fn test_resync_updates_status() {
        let face = Arc::new(FakeFaceService::new());
        let roster = Arc::new(FakeRosterSource::new(vec![RosterEntry::new(
            "alice@example.com",
            "Alice",
            &["https://photos.example/alice.jpg"],
        )]));
        let (daemon, _dir) = daemon(face.clone(), roster);

        let progress = daemon.progress.subscribe();
        let result = daemon.resync().await;
        assert!(result.success);
        assert_eq!(*progress.borrow(), 100);

        let status = daemon.status();
        assert_eq!(status["group_id"], GROUP);
        assert_eq!(status["roster_cached"], 1);
        assert_eq!(status["sync_progress"], 100);
        assert_eq!(status["last_sync"]["registered_faces"], 1);
        assert_eq!(status["session_in_progress"], false);
        assert!(status["gateway_calls"].as_u64().unwrap() > 0);
        assert_eq!(face.group_people(GROUP), vec![("Alice".to_string(), 1)]);
    }

    #[tokio::test]
    async fn test_remove_person_through_daemon() {
        let face = Arc::new(FakeFaceService::new());
        let roster = Arc::new(FakeRosterSource::new(vec![RosterEntry::new(
            "bob@example.com",
            "Bob",
            &["https://photos.example/bob.jpg"],
        )]));
        let (daemon, _dir) = daemon(face.clone(), roster);
        daemon.resync().await;

        assert!(daemon.remove_person("bob@example.com").await.unwrap());
        assert!(!daemon.remove_person("bob@example.com").await.unwrap());
        assert!(face.group_people(GROUP).is_empty());
    }

    #[tokio::test]
    async fn test_trigger_while_resync_holds_lock() {
        let face = Arc::new(FakeFaceService::new());
        let roster = Arc::new(FakeRosterSource::new(Vec::new()));
        let (daemon, _dir) = daemon(face, roster);

        let held = daemon.pipeline.lock().await;
        assert_eq!(
            daemon.trigger().await,
            SessionOutcome::Skipped(SkipReason::RebuildInProgress)
        );
        drop(held);
        assert!(matches!(
            daemon.trigger().await,
            SessionOutcome::CaptureFailed(_)
        ));
    }
}
