use crate::daemon::Daemon;
use std::sync::Arc;
use zbus::interface;

/// D-Bus interface for the rollcall attendance daemon.
///
/// Bus name: io.rollcall.Daemon1
/// Object path: /io/rollcall/Daemon1
pub struct RollcallService {
    pub daemon: Arc<Daemon>,
}

#[interface(name = "io.rollcall.Daemon1")]
impl RollcallService {
    /// Run a capture session as if the motion sensor fired.
    async fn trigger(&self) -> zbus::fdo::Result<String> {
        tracing::info!("manual trigger requested");
        let outcome = self.daemon.trigger().await;
        serde_json::to_string(&outcome).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Rebuild the whitelist from the roster. Returns the sync result as JSON.
    async fn resync(&self) -> zbus::fdo::Result<String> {
        tracing::info!("resync requested");
        let result = self.daemon.resync().await;
        serde_json::to_string(&result).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Remove a person from the whitelist by identity key.
    async fn remove_person(&self, identity_key: &str) -> zbus::fdo::Result<bool> {
        tracing::info!(identity_key, "remove_person requested");
        self.daemon
            .remove_person(identity_key)
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Remove one registered face of a person.
    async fn remove_photo(&self, identity_key: &str, face_id: &str) -> zbus::fdo::Result<bool> {
        tracing::info!(identity_key, face_id, "remove_photo requested");
        let face_id = uuid::Uuid::parse_str(face_id)
            .map_err(|e| zbus::fdo::Error::InvalidArgs(format!("face id: {e}")))?;
        self.daemon
            .remove_photo(identity_key, face_id)
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        Ok(self.daemon.status().to_string())
    }
}
