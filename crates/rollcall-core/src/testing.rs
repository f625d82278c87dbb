//! In-memory fakes of the Face API and roster backend.
//!
//! Available to this crate's tests and, with the `test-support` feature, to
//! downstream crates.

use crate::gateway::{FaceService, GatewayError, ResourceKind};
use crate::roster::{RosterError, RosterSource};
use crate::types::{
    AttendanceEvent, Candidate, DetectedFace, DiagnosticEntry, FaceId, FaceRectangle,
    IdentifyResult, ImageSource, PersonId, RosterEntry, TrainingStatus,
};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

/// Encode a tiny solid-colour PNG; distinct `shade`s give distinct bytes.
pub fn png_fixture(shade: u8) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(8, 8, image::Rgb([shade, 255 - shade, 128]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png)
        .expect("encoding an in-memory PNG cannot fail");
    out.into_inner()
}

#[derive(Debug, Clone)]
enum UrlBehavior {
    Faces(usize),
    Invalid,
}

#[derive(Debug, Clone, Default)]
struct FakePhoto {
    faces: usize,
    candidates: Vec<Candidate>,
}

#[derive(Debug, Clone)]
struct FakePerson {
    name: String,
    faces: Vec<FaceId>,
}

#[derive(Default)]
struct State {
    groups: HashMap<String, HashMap<PersonId, FakePerson>>,
    urls: HashMap<String, UrlBehavior>,
    photos: HashMap<Vec<u8>, FakePhoto>,
    face_candidates: HashMap<FaceId, Vec<Candidate>>,
    training: VecDeque<TrainingStatus>,
    failing_people: HashMap<String, GatewayError>,
    fail_next: HashMap<String, GatewayError>,
    calls: Vec<String>,
}

/// Stateful stand-in for the cloud face service.
///
/// Unknown URLs detect one face; unknown byte images detect none.
/// Training succeeds immediately unless scripted.
#[derive(Default)]
pub struct FakeFaceService {
    state: Mutex<State>,
}

impl FakeFaceService {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Record the call and return an injected failure, if any.
    fn enter(&self, op: &str) -> Result<std::sync::MutexGuard<'_, State>, GatewayError> {
        let mut state = self.state();
        state.calls.push(op.to_string());
        match state.fail_next.remove(op) {
            Some(err) => Err(err),
            None => Ok(state),
        }
    }

    pub fn set_url_faces(&self, url: &str, faces: usize) {
        self.state()
            .urls
            .insert(url.to_string(), UrlBehavior::Faces(faces));
    }

    pub fn set_url_invalid(&self, url: &str) {
        self.state().urls.insert(url.to_string(), UrlBehavior::Invalid);
    }

    pub fn set_photo_faces(&self, photo: &[u8], faces: usize) {
        self.state().photos.insert(
            photo.to_vec(),
            FakePhoto {
                faces,
                candidates: Vec::new(),
            },
        );
    }

    /// One face in `photo`, identified as the given candidates.
    pub fn set_photo_identity(&self, photo: &[u8], candidates: &[(PersonId, f32)]) {
        self.state().photos.insert(
            photo.to_vec(),
            FakePhoto {
                faces: 1,
                candidates: candidates
                    .iter()
                    .map(|&(person_id, confidence)| Candidate {
                        person_id,
                        confidence,
                    })
                    .collect(),
            },
        );
    }

    pub fn script_training(&self, statuses: &[TrainingStatus]) {
        self.state().training = statuses.iter().copied().collect();
    }

    pub fn fail_create_person(&self, name: &str, err: GatewayError) {
        self.state().failing_people.insert(name.to_string(), err);
    }

    /// Fail the next call of `op` with `err`.
    pub fn fail_next(&self, op: &str, err: GatewayError) {
        self.state().fail_next.insert(op.to_string(), err);
    }

    pub fn create_group_direct(&self, group_id: &str) {
        self.state()
            .groups
            .entry(group_id.to_string())
            .or_default();
    }

    pub fn group_exists(&self, group_id: &str) -> bool {
        self.state().groups.contains_key(group_id)
    }

    /// `(name, face count)` per person in the group, sorted.
    pub fn group_people(&self, group_id: &str) -> Vec<(String, usize)> {
        let state = self.state();
        let mut people: Vec<(String, usize)> = state
            .groups
            .get(group_id)
            .map(|g| {
                g.values()
                    .map(|p| (p.name.clone(), p.faces.len()))
                    .collect()
            })
            .unwrap_or_default();
        people.sort();
        people
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn count_calls(&self, op: &str) -> usize {
        self.state().calls.iter().filter(|c| *c == op).count()
    }
}

fn detected(n: usize) -> Vec<DetectedFace> {
    (0..n)
        .map(|_| DetectedFace {
            face_id: Uuid::new_v4(),
            face_rectangle: FaceRectangle::default(),
        })
        .collect()
}

#[async_trait]
impl FaceService for FakeFaceService {
    async fn get_group(&self, group_id: &str) -> Result<(), GatewayError> {
        let state = self.enter("get_group")?;
        if state.groups.contains_key(group_id) {
            Ok(())
        } else {
            Err(GatewayError::NotFound(ResourceKind::PersonGroup))
        }
    }

    async fn create_group(&self, group_id: &str, _name: &str) -> Result<(), GatewayError> {
        let mut state = self.enter("create_group")?;
        if state.groups.contains_key(group_id) {
            return Err(GatewayError::Unknown("PersonGroupExists".into()));
        }
        state.groups.insert(group_id.to_string(), HashMap::new());
        Ok(())
    }

    async fn delete_group(&self, group_id: &str) -> Result<(), GatewayError> {
        let mut state = self.enter("delete_group")?;
        state
            .groups
            .remove(group_id)
            .map(|_| ())
            .ok_or(GatewayError::NotFound(ResourceKind::PersonGroup))
    }

    async fn create_person(&self, group_id: &str, name: &str) -> Result<PersonId, GatewayError> {
        let mut state = self.enter("create_person")?;
        if let Some(err) = state.failing_people.get(name) {
            return Err(err.clone());
        }
        let group = state
            .groups
            .get_mut(group_id)
            .ok_or(GatewayError::NotFound(ResourceKind::PersonGroup))?;
        let id = Uuid::new_v4();
        group.insert(
            id,
            FakePerson {
                name: name.to_string(),
                faces: Vec::new(),
            },
        );
        Ok(id)
    }

    async fn delete_person(
        &self,
        group_id: &str,
        person_id: PersonId,
    ) -> Result<(), GatewayError> {
        let mut state = self.enter("delete_person")?;
        state
            .groups
            .get_mut(group_id)
            .ok_or(GatewayError::NotFound(ResourceKind::PersonGroup))?
            .remove(&person_id)
            .map(|_| ())
            .ok_or(GatewayError::NotFound(ResourceKind::Person))
    }

    async fn detect(&self, image: &ImageSource) -> Result<Vec<DetectedFace>, GatewayError> {
        let mut state = self.enter("detect")?;
        match image {
            ImageSource::Url(url) => match state.urls.get(url) {
                Some(UrlBehavior::Invalid) => {
                    Err(GatewayError::InvalidInput("InvalidImage: decoding error".into()))
                }
                Some(UrlBehavior::Faces(n)) => Ok(detected(*n)),
                None => Ok(detected(1)),
            },
            ImageSource::Bytes(bytes) => {
                let photo = state.photos.get(bytes).cloned().unwrap_or_default();
                let faces = detected(photo.faces);
                if let [face] = faces.as_slice() {
                    state
                        .face_candidates
                        .insert(face.face_id, photo.candidates.clone());
                }
                Ok(faces)
            }
        }
    }

    async fn add_face(
        &self,
        group_id: &str,
        person_id: PersonId,
        _image_url: &str,
    ) -> Result<FaceId, GatewayError> {
        let mut state = self.enter("add_face")?;
        let person = state
            .groups
            .get_mut(group_id)
            .ok_or(GatewayError::NotFound(ResourceKind::PersonGroup))?
            .get_mut(&person_id)
            .ok_or(GatewayError::NotFound(ResourceKind::Person))?;
        let face_id = Uuid::new_v4();
        person.faces.push(face_id);
        Ok(face_id)
    }

    async fn delete_face(
        &self,
        group_id: &str,
        person_id: PersonId,
        face_id: FaceId,
    ) -> Result<(), GatewayError> {
        let mut state = self.enter("delete_face")?;
        let person = state
            .groups
            .get_mut(group_id)
            .ok_or(GatewayError::NotFound(ResourceKind::PersonGroup))?
            .get_mut(&person_id)
            .ok_or(GatewayError::NotFound(ResourceKind::Person))?;
        let before = person.faces.len();
        person.faces.retain(|f| *f != face_id);
        if person.faces.len() == before {
            return Err(GatewayError::NotFound(ResourceKind::Face));
        }
        Ok(())
    }

    async fn train(&self, group_id: &str) -> Result<(), GatewayError> {
        let state = self.enter("train")?;
        if !state.groups.contains_key(group_id) {
            return Err(GatewayError::NotFound(ResourceKind::PersonGroup));
        }
        Ok(())
    }

    async fn training_status(&self, _group_id: &str) -> Result<TrainingStatus, GatewayError> {
        let mut state = self.enter("training_status")?;
        Ok(state
            .training
            .pop_front()
            .unwrap_or(TrainingStatus::Succeeded))
    }

    async fn identify(
        &self,
        _group_id: &str,
        face_ids: &[FaceId],
    ) -> Result<Vec<IdentifyResult>, GatewayError> {
        let state = self.enter("identify")?;
        Ok(face_ids
            .iter()
            .map(|id| IdentifyResult {
                face_id: *id,
                candidates: state.face_candidates.get(id).cloned().unwrap_or_default(),
            })
            .collect())
    }
}

/// Roster backend that serves a fixed roster and records what is posted.
pub struct FakeRosterSource {
    entries: Mutex<Vec<RosterEntry>>,
    fetch_fails: AtomicBool,
    attendance: Mutex<Vec<AttendanceEvent>>,
    diagnostics: Mutex<Vec<DiagnosticEntry>>,
}

impl FakeRosterSource {
    pub fn new(entries: Vec<RosterEntry>) -> Self {
        Self {
            entries: Mutex::new(entries),
            fetch_fails: AtomicBool::new(false),
            attendance: Mutex::new(Vec::new()),
            diagnostics: Mutex::new(Vec::new()),
        }
    }

    pub fn set_entries(&self, entries: Vec<RosterEntry>) {
        *self.entries.lock().unwrap_or_else(|p| p.into_inner()) = entries;
    }

    pub fn fail_fetch(&self) {
        self.fetch_fails.store(true, Ordering::SeqCst);
    }

    pub fn attendance(&self) -> Vec<AttendanceEvent> {
        self.attendance
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn diagnostic_entries(&self) -> Vec<DiagnosticEntry> {
        self.diagnostics
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn diagnostics(&self) -> Vec<String> {
        self.diagnostic_entries()
            .into_iter()
            .map(|d| d.message)
            .collect()
    }
}

#[async_trait]
impl RosterSource for FakeRosterSource {
    async fn fetch_roster(&self) -> Result<Vec<RosterEntry>, RosterError> {
        if self.fetch_fails.load(Ordering::SeqCst) {
            return Err(RosterError::Status(503));
        }
        Ok(self
            .entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone())
    }

    async fn post_attendance(&self, event: &AttendanceEvent) -> Result<(), RosterError> {
        self.attendance
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(event.clone());
        Ok(())
    }

    async fn post_diagnostic(&self, entry: &DiagnosticEntry) -> Result<(), RosterError> {
        self.diagnostics
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(entry.clone());
        Ok(())
    }
}
