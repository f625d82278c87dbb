use async_trait::async_trait;

/// User-facing feedback at the door.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn greet(&self, name: &str);
    async fn farewell(&self, name: &str);
    async fn alert(&self, message: &str);
}

/// Message shown when the camera pair is unavailable.
pub const CAMERA_ERROR: &str = "Camera Error";

pub fn greeting(name: &str) -> String {
    format!("Hello {name}")
}

pub fn farewell(name: &str) -> String {
    format!("Goodbye {name}")
}

/// Emits notifications as log lines.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn greet(&self, name: &str) {
        tracing::info!(target: "rollcall::notify", "{}", greeting(name));
    }

    async fn farewell(&self, name: &str) {
        tracing::info!(target: "rollcall::notify", "{}", farewell(name));
    }

    async fn alert(&self, message: &str) {
        tracing::warn!(target: "rollcall::notify", "{message}");
    }
}
