use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque id the Face API assigns to a registered person.
pub type PersonId = Uuid;

/// Opaque id of a detected (transient) or persisted face.
pub type FaceId = Uuid;

/// One person on the authoritative roster.
///
/// Field names on the wire follow the roster backend (`email`, `name`, `imageUrls`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterEntry {
    /// Identity key used for attendance events.
    #[serde(rename = "email")]
    pub identity_key: String,
    #[serde(rename = "name")]
    pub display_name: String,
    #[serde(rename = "imageUrls", default)]
    pub photo_urls: Vec<String>,
    /// Assigned once the person is registered in the whitelist group.
    #[serde(skip)]
    pub remote_id: Option<PersonId>,
    /// Persisted faces registered for this person during the last sync.
    #[serde(skip)]
    pub face_ids: Vec<FaceId>,
}

impl RosterEntry {
    pub fn new(identity_key: &str, display_name: &str, photo_urls: &[&str]) -> Self {
        Self {
            identity_key: identity_key.to_string(),
            display_name: display_name.to_string(),
            photo_urls: photo_urls.iter().map(|u| u.to_string()).collect(),
            remote_id: None,
            face_ids: Vec::new(),
        }
    }
}

/// Pixel rectangle of a detected face.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FaceRectangle {
    pub top: u32,
    pub left: u32,
    pub width: u32,
    pub height: u32,
}

/// A face found by the detect operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedFace {
    pub face_id: FaceId,
    #[serde(default)]
    pub face_rectangle: FaceRectangle,
}

/// A (person, confidence) pair returned by identification.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub person_id: PersonId,
    /// Confidence in [0, 1].
    pub confidence: f32,
}

/// Identification result for one detected face, candidates highest confidence first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyResult {
    pub face_id: FaceId,
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

/// Status reported by the training-status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrainingStatus {
    NotStarted,
    Running,
    Succeeded,
    Failed,
    /// Any status string this client does not recognise.
    #[serde(other)]
    Unknown,
}

/// Where the detect operation reads the image from.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageSource {
    Url(String),
    Bytes(Vec<u8>),
}

/// Entered/exited record posted to the roster backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceEvent {
    #[serde(rename = "email")]
    pub identity_key: String,
    pub entered: bool,
    pub location: String,
}

/// Free-form diagnostic log entry, optionally carrying the photo it concerns.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DiagnosticEntry {
    pub message: String,
    /// Encoded image bytes (JPEG/PNG as captured).
    pub image: Option<Vec<u8>>,
}

impl DiagnosticEntry {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            image: None,
        }
    }

    pub fn with_image(message: impl Into<String>, image: Vec<u8>) -> Self {
        Self {
            message: message.into(),
            image: Some(image),
        }
    }
}
