//! rollcall-core — Whitelist synchronization and face identification.
//!
//! Keeps a cloud Face API person group in step with a remotely managed
//! roster and identifies captured photos against it. All service traffic
//! goes through one rate-limited [`RemoteServiceGateway`].

pub mod cache;
pub mod face_api;
pub mod gateway;
pub mod identify;
pub mod roster;
pub mod sync;
pub mod types;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use cache::RosterCache;
pub use face_api::FaceApiClient;
pub use gateway::{FaceService, GatewayError, RemoteServiceGateway, ResourceKind};
pub use identify::{IdentificationDispatcher, IdentifyOutcome};
pub use roster::{FileRosterSource, HttpRosterSource, RosterError, RosterSource};
pub use sync::{
    PhotoFailure, PhotoFailureReason, RosterSyncEngine, SyncProgress, SyncResult,
    TrainingOutcome, TrainingPolicy,
};
pub use types::{AttendanceEvent, Candidate, DiagnosticEntry, PersonId, RosterEntry};
