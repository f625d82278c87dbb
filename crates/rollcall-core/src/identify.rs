//! Face identification of captured photos against the whitelist group.

use crate::gateway::{GatewayError, RemoteServiceGateway, ResourceKind};
use crate::types::{Candidate, ImageSource};
use image::ImageFormat;
use std::path::Path;
use std::sync::Arc;

/// Largest image the Face API accepts.
pub const MAX_IMAGE_BYTES: usize = 6 * 1024 * 1024;

/// Result of identifying one photo. Expected outcomes (no face, several
/// faces, no candidates) are values here, not errors.
#[derive(Debug, Clone, PartialEq)]
pub enum IdentifyOutcome {
    /// Candidates for the single detected face, highest confidence first.
    /// Empty when nobody on the whitelist cleared the service threshold.
    Candidates(Vec<Candidate>),
    InvalidImage(String),
    NoFace,
    MultipleFaces(usize),
    NotFound(ResourceKind),
    Transient(String),
    Failed(String),
}

impl IdentifyOutcome {
    /// Top candidate, if any.
    pub fn best_match(&self) -> Option<Candidate> {
        match self {
            IdentifyOutcome::Candidates(c) => c.first().copied(),
            _ => None,
        }
    }
}

impl From<GatewayError> for IdentifyOutcome {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::NotFound(kind) => IdentifyOutcome::NotFound(kind),
            GatewayError::ThrottledOrTransient(m) => IdentifyOutcome::Transient(m),
            GatewayError::InvalidInput(m) => IdentifyOutcome::InvalidImage(m),
            GatewayError::Unknown(m) => IdentifyOutcome::Failed(m),
        }
    }
}

/// Runs detect + identify for captured photos.
pub struct IdentificationDispatcher {
    gateway: Arc<RemoteServiceGateway>,
    group_id: String,
    /// Optional local minimum confidence on top of the service's own cutoff.
    confidence_floor: Option<f32>,
}

impl IdentificationDispatcher {
    pub fn new(
        gateway: Arc<RemoteServiceGateway>,
        group_id: &str,
        confidence_floor: Option<f32>,
    ) -> Self {
        Self {
            gateway,
            group_id: group_id.to_string(),
            confidence_floor,
        }
    }

    /// Identify the person in a photo file.
    pub async fn identify_photo(&self, path: &Path) -> IdentifyOutcome {
        match tokio::fs::read(path).await {
            Ok(bytes) => self.identify_bytes(bytes).await,
            Err(e) => IdentifyOutcome::InvalidImage(format!("{}: {e}", path.display())),
        }
    }

    /// Identify the person in an encoded image.
    pub async fn identify_bytes(&self, bytes: Vec<u8>) -> IdentifyOutcome {
        if let Err(reason) = validate_image(&bytes) {
            tracing::warn!(%reason, "photo rejected before detection");
            return IdentifyOutcome::InvalidImage(reason);
        }

        let faces = match self.gateway.detect(&ImageSource::Bytes(bytes)).await {
            Ok(f) => f,
            Err(e) => return e.into(),
        };

        let face = match faces.as_slice() {
            [] => {
                tracing::info!("no face detected in photo");
                return IdentifyOutcome::NoFace;
            }
            [face] => face,
            many => {
                tracing::info!(faces = many.len(), "multiple faces detected in photo");
                return IdentifyOutcome::MultipleFaces(many.len());
            }
        };

        let results = match self.gateway.identify(&self.group_id, &[face.face_id]).await {
            Ok(r) => r,
            Err(e) => return e.into(),
        };

        let mut candidates: Vec<Candidate> = results
            .into_iter()
            .filter(|r| r.face_id == face.face_id)
            .flat_map(|r| r.candidates)
            .collect();
        candidates.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        if let Some(top) = candidates.first() {
            tracing::info!(
                person_id = %top.person_id,
                confidence_pct = (top.confidence * 1000.0).round() / 10.0,
                "face identified"
            );
        }

        if let Some(floor) = self.confidence_floor {
            candidates.retain(|c| c.confidence >= floor);
        }

        IdentifyOutcome::Candidates(candidates)
    }
}

/// Accept only formats the Face API decodes, within its size limit.
fn validate_image(bytes: &[u8]) -> Result<(), String> {
    if bytes.is_empty() {
        return Err("empty image".to_string());
    }
    if bytes.len() > MAX_IMAGE_BYTES {
        return Err(format!(
            "image is {} bytes, limit is {MAX_IMAGE_BYTES}",
            bytes.len()
        ));
    }
    match image::guess_format(bytes) {
        Ok(ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::Gif | ImageFormat::Bmp) => Ok(()),
        Ok(other) => Err(format!("unsupported image format {other:?}")),
        Err(e) => Err(format!("unrecognised image: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{png_fixture, FakeFaceService};
    use std::time::Duration;
    use uuid::Uuid;

    const GROUP: &str = "whitelist";

    fn dispatcher(fake: &Arc<FakeFaceService>, floor: Option<f32>) -> IdentificationDispatcher {
        let gateway = Arc::new(RemoteServiceGateway::new(fake.clone(), Duration::ZERO));
        IdentificationDispatcher::new(gateway, GROUP, floor)
    }

    #[tokio::test]
    async fn test_single_face_with_candidates() {
        let fake = Arc::new(FakeFaceService::new());
        let photo = png_fixture(10);
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        fake.set_photo_identity(&photo, &[(bob, 0.55), (alice, 0.92)]);

        let outcome = dispatcher(&fake, None).identify_bytes(photo).await;

        let best = outcome.best_match().unwrap();
        assert_eq!(best.person_id, alice);
        assert!((best.confidence - 0.92).abs() < 1e-6);
        match outcome {
            IdentifyOutcome::Candidates(c) => assert_eq!(c.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_no_candidates_is_empty_list() {
        let fake = Arc::new(FakeFaceService::new());
        let photo = png_fixture(20);
        fake.set_photo_identity(&photo, &[]);

        let outcome = dispatcher(&fake, None).identify_bytes(photo).await;
        assert_eq!(outcome, IdentifyOutcome::Candidates(vec![]));
        assert!(outcome.best_match().is_none());
    }

    #[tokio::test]
    async fn test_zero_faces_never_reaches_identify() {
        let fake = Arc::new(FakeFaceService::new());
        let photo = png_fixture(30);
        fake.set_photo_faces(&photo, 0);

        let outcome = dispatcher(&fake, None).identify_bytes(photo).await;
        assert_eq!(outcome, IdentifyOutcome::NoFace);
        assert_eq!(fake.count_calls("detect"), 1);
        assert_eq!(fake.count_calls("identify"), 0);
    }

    #[tokio::test]
    async fn test_multiple_faces_short_circuit() {
        let fake = Arc::new(FakeFaceService::new());
        let photo = png_fixture(40);
        fake.set_photo_faces(&photo, 2);

        let outcome = dispatcher(&fake, None).identify_bytes(photo).await;
        assert_eq!(outcome, IdentifyOutcome::MultipleFaces(2));
        assert_eq!(fake.count_calls("identify"), 0);
    }

    #[tokio::test]
    async fn test_invalid_image_never_reaches_service() {
        let fake = Arc::new(FakeFaceService::new());
        let outcome = dispatcher(&fake, None)
            .identify_bytes(b"plain text, not an image".to_vec())
            .await;
        assert!(matches!(outcome, IdentifyOutcome::InvalidImage(_)));
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_is_invalid_image() {
        let fake = Arc::new(FakeFaceService::new());
        let outcome = dispatcher(&fake, None)
            .identify_photo(Path::new("/nonexistent/photo.jpg"))
            .await;
        assert!(matches!(outcome, IdentifyOutcome::InvalidImage(_)));
    }

    #[tokio::test]
    async fn test_confidence_floor_filters_candidates() {
        let fake = Arc::new(FakeFaceService::new());
        let photo = png_fixture(50);
        fake.set_photo_identity(&photo, &[(Uuid::new_v4(), 0.41)]);

        let outcome = dispatcher(&fake, Some(0.6)).identify_bytes(photo).await;
        assert_eq!(outcome, IdentifyOutcome::Candidates(vec![]));
    }

    #[tokio::test]
    async fn test_group_not_found_is_a_value() {
        let fake = Arc::new(FakeFaceService::new());
        let photo = png_fixture(60);
        fake.set_photo_faces(&photo, 1);
        fake.fail_next("identify", GatewayError::NotFound(ResourceKind::PersonGroup));

        let outcome = dispatcher(&fake, None).identify_bytes(photo).await;
        assert_eq!(outcome, IdentifyOutcome::NotFound(ResourceKind::PersonGroup));
    }

    #[tokio::test]
    async fn test_untrained_group_is_a_failure() {
        let fake = Arc::new(FakeFaceService::new());
        let photo = png_fixture(70);
        fake.set_photo_faces(&photo, 1);
        fake.fail_next(
            "identify",
            crate::face_api::classify_response(
                reqwest::StatusCode::BAD_REQUEST,
                r#"{"error":{"code":"PersonGroupNotTrained","message":"Person group not trained."}}"#,
                ResourceKind::PersonGroup,
            ),
        );

        let outcome = dispatcher(&fake, None).identify_bytes(photo).await;
        assert!(
            matches!(outcome, IdentifyOutcome::Failed(ref m) if m.starts_with("PersonGroupNotTrained")),
            "{outcome:?}"
        );
    }

    #[test]
    fn test_validate_image_rejects_oversized() {
        let mut bytes = png_fixture(1);
        bytes.resize(MAX_IMAGE_BYTES + 1, 0);
        assert!(validate_image(&bytes).unwrap_err().contains("limit"));
    }
}
