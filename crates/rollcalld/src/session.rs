//! Motion-triggered capture sessions.
//!
//! A session captures the arrival/departure photo pair, identifies both
//! photos against the whitelist, and turns every match into an attendance
//! event plus a greeting or farewell. At most one session runs at a time;
//! triggers that arrive meanwhile are dropped, not queued.

use crate::notifier::{Notifier, CAMERA_ERROR};
use rollcall_core::roster::{self, RosterSource};
use rollcall_core::{
    AttendanceEvent, DiagnosticEntry, IdentificationDispatcher, IdentifyOutcome, RosterCache,
};
use rollcall_hw::{CameraRole, CaptureOrchestrator};
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Serializes whitelist rebuilds against capture sessions.
pub type PipelineLock = tokio::sync::Mutex<()>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    SessionInProgress,
    RebuildInProgress,
}

/// A whitelisted person recognized on one camera.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recognition {
    pub identity_key: String,
    pub display_name: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    Skipped(SkipReason),
    CaptureFailed(String),
    Completed {
        arrival: Option<Recognition>,
        departure: Option<Recognition>,
    },
}

/// Clears the in-progress flag on every exit path.
struct SessionGuard<'a>(&'a AtomicBool);

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SessionController {
    capture: CaptureOrchestrator,
    dispatcher: IdentificationDispatcher,
    cache: Arc<RosterCache>,
    roster: Arc<dyn RosterSource>,
    notifier: Arc<dyn Notifier>,
    pipeline: Arc<PipelineLock>,
    location: String,
    in_progress: AtomicBool,
}

impl SessionController {
    pub fn new(
        capture: CaptureOrchestrator,
        dispatcher: IdentificationDispatcher,
        cache: Arc<RosterCache>,
        roster: Arc<dyn RosterSource>,
        notifier: Arc<dyn Notifier>,
        pipeline: Arc<PipelineLock>,
        location: &str,
    ) -> Self {
        Self {
            capture,
            dispatcher,
            cache,
            roster,
            notifier,
            pipeline,
            location: location.to_string(),
            in_progress: AtomicBool::new(false),
        }
    }

    pub fn in_progress(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    fn try_begin(&self) -> Option<SessionGuard<'_>> {
        self.in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SessionGuard(&self.in_progress))
    }

    /// Handle one rising motion edge (or manual trigger).
    pub async fn run_session(&self) -> SessionOutcome {
        let Some(_guard) = self.try_begin() else {
            tracing::debug!("motion ignored: session already in progress");
            return SessionOutcome::Skipped(SkipReason::SessionInProgress);
        };
        // Sessions only take the lock while holding the flag, so contention here is a rebuild.
        let Ok(_pipeline) = self.pipeline.try_lock() else {
            tracing::info!("motion ignored: whitelist rebuild in progress");
            return SessionOutcome::Skipped(SkipReason::RebuildInProgress);
        };

        tracing::info!("session started");
        let photos = match self.capture.capture_entry_exit_photos().await {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "photo capture failed, session aborted");
                self.notifier.alert(CAMERA_ERROR).await;
                roster::report(
                    self.roster.as_ref(),
                    DiagnosticEntry::message(format!("{CAMERA_ERROR}: {e}")),
                )
                .await;
                return SessionOutcome::CaptureFailed(e.to_string());
            }
        };

        let (arrival, departure) = tokio::join!(
            self.recognize(photos.path(CameraRole::Arrival), CameraRole::Arrival),
            self.recognize(photos.path(CameraRole::Departure), CameraRole::Departure),
        );

        tracing::info!(
            arrival = arrival.as_ref().map(|r| r.identity_key.as_str()),
            departure = departure.as_ref().map(|r| r.identity_key.as_str()),
            "session finished"
        );
        SessionOutcome::Completed { arrival, departure }
    }

    /// Identify one photo and act on a whitelisted match.
    async fn recognize(&self, photo: &Path, role: CameraRole) -> Option<Recognition> {
        let bytes = match tokio::fs::read(photo).await {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(%role, path = %photo.display(), error = %e, "captured photo unreadable");
                return None;
            }
        };

        let candidate = match self.dispatcher.identify_bytes(bytes.clone()).await {
            IdentifyOutcome::Candidates(candidates) => candidates.first().copied()?,
            IdentifyOutcome::NoFace => {
                self.diagnostic("WARNING: No face detected in this image.", bytes)
                    .await;
                return None;
            }
            other => {
                tracing::warn!(%role, outcome = ?other, "identification failed");
                self.diagnostic(format!("WARNING: identification failed: {other:?}"), bytes)
                    .await;
                return None;
            }
        };

        let Some(entry) = self.cache.get(&candidate.person_id) else {
            tracing::warn!(%role, person_id = %candidate.person_id, "matched person is not in the roster cache");
            return None;
        };

        let event = AttendanceEvent {
            identity_key: entry.identity_key.clone(),
            entered: role == CameraRole::Arrival,
            location: self.location.clone(),
        };
        if let Err(e) = self.roster.post_attendance(&event).await {
            tracing::warn!(key = %event.identity_key, error = %e, "attendance post failed");
        }

        let camera = match role {
            CameraRole::Arrival => {
                self.notifier.greet(&entry.display_name).await;
                "front"
            }
            CameraRole::Departure => {
                self.notifier.farewell(&entry.display_name).await;
                "back"
            }
        };
        tracing::info!(
            %role,
            key = %entry.identity_key,
            confidence = candidate.confidence,
            "recognized"
        );
        self.diagnostic(
            format!("{} authorized on {camera} camera!", entry.display_name),
            bytes,
        )
        .await;

        Some(Recognition {
            identity_key: entry.identity_key,
            display_name: entry.display_name,
            confidence: candidate.confidence,
        })
    }

    async fn diagnostic(&self, message: impl Into<String>, image: Vec<u8>) {
        roster::report(
            self.roster.as_ref(),
            DiagnosticEntry::with_image(message, image),
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rollcall_core::testing::{png_fixture, FakeFaceService, FakeRosterSource};
    use rollcall_core::{RemoteServiceGateway, RosterEntry};
    use rollcall_hw::{CameraBackend, CameraError, CaptureError};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;
    use uuid::Uuid;

    const GROUP: &str = "whitelist";

    /// Two cameras that each "see" a fixed image.
    struct FakeCameras {
        devices: Vec<String>,
        images: HashMap<String, Vec<u8>>,
        broken: bool,
    }

    impl FakeCameras {
        fn pair(arrival: Vec<u8>, departure: Vec<u8>) -> Self {
            Self {
                devices: vec!["front".into(), "back".into()],
                images: HashMap::from([("front".into(), arrival), ("back".into(), departure)]),
                broken: false,
            }
        }
    }

    #[async_trait]
    impl CameraBackend for FakeCameras {
        async fn list_devices(&self) -> Result<Vec<String>, CaptureError> {
            Ok(self.devices.clone())
        }

        async fn capture_photo(&self, device: &str, dest: &Path) -> Result<(), CaptureError> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.broken {
                return Err(CaptureError::Camera {
                    device: device.to_string(),
                    source: CameraError::DeviceBusy(device.to_string()),
                });
            }
            let image = self.images.get(device).cloned().unwrap_or_default();
            tokio::fs::write(dest, image).await?;
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingNotifier(Mutex<Vec<String>>);

    impl RecordingNotifier {
        fn messages(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn greet(&self, name: &str) {
            self.0.lock().unwrap().push(crate::notifier::greeting(name));
        }
        async fn farewell(&self, name: &str) {
            self.0.lock().unwrap().push(crate::notifier::farewell(name));
        }
        async fn alert(&self, message: &str) {
            self.0.lock().unwrap().push(message.to_string());
        }
    }

    struct Harness {
        controller: SessionController,
        face: Arc<FakeFaceService>,
        roster: Arc<FakeRosterSource>,
        notifier: Arc<RecordingNotifier>,
        pipeline: Arc<PipelineLock>,
        photo_dir: tempfile::TempDir,
    }

    fn harness(cameras: FakeCameras, face: Arc<FakeFaceService>, roster: Vec<RosterEntry>) -> Harness {
        let photo_dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(RemoteServiceGateway::new(face.clone(), Duration::ZERO));
        let cache = Arc::new(RosterCache::new());
        cache.replace(roster);
        let roster_source = Arc::new(FakeRosterSource::new(Vec::new()));
        let notifier = Arc::new(RecordingNotifier::default());
        let pipeline = Arc::new(PipelineLock::new(()));

        let controller = SessionController::new(
            CaptureOrchestrator::new(Arc::new(cameras), photo_dir.path()),
            IdentificationDispatcher::new(gateway, GROUP, None),
            cache,
            roster_source.clone(),
            notifier.clone(),
            pipeline.clone(),
            "MAIN BUILDING SECOND FLOOR",
        );
        Harness {
            controller,
            face,
            roster: roster_source,
            notifier,
            pipeline,
            photo_dir,
        }
    }

    fn registered(key: &str, name: &str) -> (RosterEntry, Uuid) {
        let id = Uuid::new_v4();
        let mut entry = RosterEntry::new(key, name, &[]);
        entry.remote_id = Some(id);
        (entry, id)
    }

    #[tokio::test]
    async fn test_arrival_match_posts_single_event() {
        let (alice, alice_id) = registered("alice@example.com", "Alice");
        let face = Arc::new(FakeFaceService::new());
        let (front, back) = (png_fixture(1), png_fixture(2));
        face.set_photo_identity(&front, &[(alice_id, 0.92)]);
        face.set_photo_identity(&back, &[]);

        let h = harness(FakeCameras::pair(front, back), face, vec![alice]);
        let outcome = h.controller.run_session().await;

        match outcome {
            SessionOutcome::Completed { arrival, departure } => {
                let arrival = arrival.unwrap();
                assert_eq!(arrival.display_name, "Alice");
                assert!((arrival.confidence - 0.92).abs() < 1e-6);
                assert!(departure.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }

        assert_eq!(
            h.roster.attendance(),
            vec![AttendanceEvent {
                identity_key: "alice@example.com".into(),
                entered: true,
                location: "MAIN BUILDING SECOND FLOOR".into(),
            }]
        );
        assert_eq!(h.notifier.messages(), vec!["Hello Alice"]);
        let logged = h.roster.diagnostic_entries();
        let authorized = logged
            .iter()
            .find(|d| d.message == "Alice authorized on front camera!")
            .unwrap();
        assert!(authorized.image.is_some());
        assert!(!h.controller.in_progress());
    }

    #[tokio::test]
    async fn test_departure_match_is_exit_event() {
        let (bob, bob_id) = registered("bob@example.com", "Bob");
        let face = Arc::new(FakeFaceService::new());
        let (front, back) = (png_fixture(3), png_fixture(4));
        face.set_photo_faces(&front, 0);
        face.set_photo_identity(&back, &[(bob_id, 0.81)]);

        let h = harness(FakeCameras::pair(front, back), face, vec![bob]);
        h.controller.run_session().await;

        let events = h.roster.attendance();
        assert_eq!(events.len(), 1);
        assert!(!events[0].entered);
        assert_eq!(h.notifier.messages(), vec!["Goodbye Bob"]);
        assert!(h
            .roster
            .diagnostics()
            .contains(&"WARNING: No face detected in this image.".to_string()));
    }

    #[tokio::test]
    async fn test_overlapping_trigger_is_dropped() {
        let face = Arc::new(FakeFaceService::new());
        let h = harness(
            FakeCameras::pair(png_fixture(5), png_fixture(6)),
            face.clone(),
            Vec::new(),
        );

        let (first, second) =
            tokio::join!(h.controller.run_session(), h.controller.run_session());

        assert!(matches!(first, SessionOutcome::Completed { .. }));
        assert_eq!(second, SessionOutcome::Skipped(SkipReason::SessionInProgress));
        // One session means one detect per photo.
        assert_eq!(face.count_calls("detect"), 2);
        assert!(!h.controller.in_progress());
    }

    #[tokio::test]
    async fn test_flag_cleared_after_capture_failure() {
        let mut cameras = FakeCameras::pair(png_fixture(7), png_fixture(8));
        cameras.broken = true;
        let h = harness(cameras, Arc::new(FakeFaceService::new()), Vec::new());

        let outcome = h.controller.run_session().await;
        assert!(matches!(outcome, SessionOutcome::CaptureFailed(_)));
        assert!(!h.controller.in_progress());
        assert_eq!(h.notifier.messages(), vec![CAMERA_ERROR]);

        // The next trigger is accepted again.
        let again = h.controller.run_session().await;
        assert!(matches!(again, SessionOutcome::CaptureFailed(_)));
    }

    #[tokio::test]
    async fn test_flag_cleared_after_identification_error() {
        let (alice, alice_id) = registered("alice@example.com", "Alice");
        let face = Arc::new(FakeFaceService::new());
        let (front, back) = (png_fixture(11), png_fixture(12));
        face.set_photo_identity(&front, &[(alice_id, 0.9)]);
        face.set_photo_identity(&back, &[(alice_id, 0.9)]);
        // One photo fails at detect, the other at identify.
        face.fail_next("detect", rollcall_core::GatewayError::Unknown("quota".into()));
        face.fail_next(
            "identify",
            rollcall_core::GatewayError::ThrottledOrTransient("429".into()),
        );

        let h = harness(FakeCameras::pair(front, back), face, vec![alice]);
        let outcome = h.controller.run_session().await;

        assert!(matches!(
            outcome,
            SessionOutcome::Completed {
                arrival: None,
                departure: None
            }
        ));
        assert!(!h.controller.in_progress());
        assert!(h.roster.attendance().is_empty());
        assert!(h.notifier.messages().is_empty());
        let failed = h
            .roster
            .diagnostics()
            .iter()
            .filter(|m| m.contains("identification failed"))
            .count();
        assert_eq!(failed, 2);
    }

    #[tokio::test]
    async fn test_single_camera_produces_no_photos() {
        let mut cameras = FakeCameras::pair(png_fixture(9), png_fixture(10));
        cameras.devices.truncate(1);
        let face = Arc::new(FakeFaceService::new());
        let h = harness(cameras, face.clone(), Vec::new());

        let outcome = h.controller.run_session().await;
        assert!(matches!(outcome, SessionOutcome::CaptureFailed(_)));
        assert!(face.calls().is_empty());
        assert!(h.roster.attendance().is_empty());
        assert_eq!(std::fs::read_dir(h.photo_dir.path()).map(|d| d.count()).unwrap_or(0), 0);
    }

    #[tokio::test]
    async fn test_rebuild_in_progress_skips_session() {
        let face = Arc::new(FakeFaceService::new());
        let h = harness(
            FakeCameras::pair(png_fixture(11), png_fixture(12)),
            face.clone(),
            Vec::new(),
        );

        let rebuild = h.pipeline.lock().await;
        let outcome = h.controller.run_session().await;
        assert_eq!(outcome, SessionOutcome::Skipped(SkipReason::RebuildInProgress));
        assert!(!h.controller.in_progress());
        drop(rebuild);

        assert!(matches!(
            h.controller.run_session().await,
            SessionOutcome::Completed { .. }
        ));
    }

    #[tokio::test]
    async fn test_match_missing_from_cache_is_ignored() {
        let face = Arc::new(FakeFaceService::new());
        let (front, back) = (png_fixture(13), png_fixture(14));
        face.set_photo_identity(&front, &[(Uuid::new_v4(), 0.9)]);
        let h = harness(FakeCameras::pair(front, back), face, Vec::new());

        let outcome = h.controller.run_session().await;
        assert_eq!(
            outcome,
            SessionOutcome::Completed {
                arrival: None,
                departure: None
            }
        );
        assert!(h.roster.attendance().is_empty());
    }

    #[tokio::test]
    async fn test_photos_removed_after_session() {
        let h = harness(
            FakeCameras::pair(png_fixture(15), png_fixture(16)),
            Arc::new(FakeFaceService::new()),
            Vec::new(),
        );
        h.controller.run_session().await;
        assert_eq!(std::fs::read_dir(h.photo_dir.path()).unwrap().count(), 0);
    }
}
