//! PIR motion sensor input over the sysfs GPIO interface.
//!
//! The sensor line is sampled at a fixed interval and level changes are
//! forwarded as [`MotionEdge`]s on an mpsc channel.

use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const SYSFS_GPIO: &str = "/sys/class/gpio";

#[derive(Error, Debug)]
pub enum MotionError {
    #[error("gpio {pin} unavailable: {source}")]
    Export {
        pin: u32,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unexpected gpio value {0:?}")]
    InvalidValue(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionEdge {
    Rising,
    Falling,
}

/// Edge between two consecutive samples, if the level changed.
pub fn detect_edge(prev: bool, now: bool) -> Option<MotionEdge> {
    match (prev, now) {
        (false, true) => Some(MotionEdge::Rising),
        (true, false) => Some(MotionEdge::Falling),
        _ => None,
    }
}

pub struct GpioMotionSensor {
    value_path: PathBuf,
    poll: Duration,
}

impl GpioMotionSensor {
    /// Export `pin` through sysfs (if not already exported) as an input.
    pub fn open(pin: u32, poll: Duration) -> Result<Self, MotionError> {
        let base = Path::new(SYSFS_GPIO);
        let line = base.join(format!("gpio{pin}"));
        let export_err = |source| MotionError::Export { pin, source };

        if !line.exists() {
            std::fs::write(base.join("export"), pin.to_string()).map_err(export_err)?;
        }
        std::fs::write(line.join("direction"), "in").map_err(export_err)?;

        tracing::info!(pin, poll_ms = poll.as_millis() as u64, "motion sensor ready");
        Ok(Self::with_value_path(line.join("value"), poll))
    }

    /// Sample an arbitrary value file (`0`/`1`).
    pub fn with_value_path(value_path: impl Into<PathBuf>, poll: Duration) -> Self {
        Self {
            value_path: value_path.into(),
            poll,
        }
    }

    pub async fn read_level(&self) -> Result<bool, MotionError> {
        let raw = tokio::fs::read_to_string(&self.value_path)
            .await
            .map_err(|source| MotionError::Read {
                path: self.value_path.clone(),
                source,
            })?;
        match raw.trim() {
            "0" => Ok(false),
            "1" => Ok(true),
            other => Err(MotionError::InvalidValue(other.to_string())),
        }
    }

    /// Start the sampling loop. It ends when the receiver is dropped.
    pub fn spawn(self, tx: mpsc::Sender<MotionEdge>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut level = self.read_level().await.unwrap_or(false);
            let mut ticker = tokio::time::interval(self.poll);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let now = match self.read_level().await {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::debug!(error = %e, "motion sample skipped");
                        continue;
                    }
                };
                if let Some(edge) = detect_edge(level, now) {
                    tracing::debug!(?edge, "motion edge");
                    if tx.send(edge).await.is_err() {
                        break;
                    }
                }
                level = now;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_edge() {
        assert_eq!(detect_edge(false, true), Some(MotionEdge::Rising));
        assert_eq!(detect_edge(true, false), Some(MotionEdge::Falling));
        assert_eq!(detect_edge(true, true), None);
        assert_eq!(detect_edge(false, false), None);
    }

    #[tokio::test]
    async fn test_read_level() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("value");
        let sensor = GpioMotionSensor::with_value_path(&path, Duration::from_millis(5));

        assert!(matches!(sensor.read_level().await, Err(MotionError::Read { .. })));
        std::fs::write(&path, "1\n").unwrap();
        assert!(sensor.read_level().await.unwrap());
        std::fs::write(&path, "x").unwrap();
        assert!(matches!(
            sensor.read_level().await,
            Err(MotionError::InvalidValue(_))
        ));
    }

    #[tokio::test]
    async fn test_spawn_forwards_edges() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("value");
        std::fs::write(&path, "0").unwrap();

        let (tx, mut rx) = mpsc::channel(4);
        let handle =
            GpioMotionSensor::with_value_path(&path, Duration::from_millis(5)).spawn(tx);

        tokio::time::sleep(Duration::from_millis(20)).await;
        std::fs::write(&path, "1").unwrap();
        let edge = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap();
        assert_eq!(edge, Some(MotionEdge::Rising));

        std::fs::write(&path, "0").unwrap();
        let edge = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap();
        assert_eq!(edge, Some(MotionEdge::Falling));

        drop(rx);
        std::fs::write(&path, "1").unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
