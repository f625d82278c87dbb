use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("set ROLLCALL_BACKEND_URL or ROLLCALL_ROSTER_FILE")]
    NoRosterSource,
}

/// Where the roster comes from and where attendance goes.
#[derive(Debug, Clone, PartialEq)]
pub enum RosterConfig {
    Http(String),
    File(PathBuf),
}

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Face API subscription key.
    pub face_api_key: String,
    /// Face API base URL (up to and including `/face/v1.0`).
    pub face_api_root: String,
    /// Roster backend, or an offline roster file.
    pub roster: RosterConfig,
    /// Location tag attached to every attendance event.
    pub location: String,
    /// Minimum spacing between Face API calls, in milliseconds.
    pub rate_limit_ms: u64,
    /// Training status polls before a rebuild reports a timeout.
    pub training_max_polls: u32,
    /// Optional local confidence cutoff; unset leaves the service threshold alone.
    pub confidence_floor: Option<f32>,
    /// HTTP client timeout for both Face API and roster backend.
    pub http_timeout_secs: u64,
    /// TOML file holding the persisted whitelist group id.
    pub state_path: PathBuf,
    /// Directory for captured photos (removed after each session).
    pub photo_dir: PathBuf,
    /// Pinned arrival camera; both roles must be set to skip enumeration.
    pub arrival_device: Option<String>,
    pub departure_device: Option<String>,
    /// Frames discarded before each photo while the camera adjusts exposure.
    pub warmup_frames: usize,
    /// sysfs GPIO line of the PIR sensor.
    pub pir_pin: u32,
    pub motion_poll_ms: u64,
    /// Rebuild the whitelist before accepting sessions.
    pub sync_on_startup: bool,
    /// Serve on the session bus instead of the system bus.
    pub dbus_session: bool,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_empty = |key: &str| var(key).filter(|v| !v.trim().is_empty());

        let face_api_key =
            non_empty("ROLLCALL_FACE_API_KEY").ok_or(ConfigError::Missing("ROLLCALL_FACE_API_KEY"))?;

        let roster = match (
            non_empty("ROLLCALL_ROSTER_FILE"),
            non_empty("ROLLCALL_BACKEND_URL"),
        ) {
            (Some(path), _) => RosterConfig::File(PathBuf::from(path)),
            (None, Some(url)) => RosterConfig::Http(url),
            (None, None) => return Err(ConfigError::NoRosterSource),
        };

        let data_dir = var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        let tmp_dir = var("TMPDIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/tmp"));

        Ok(Self {
            face_api_key,
            face_api_root: non_empty("ROLLCALL_FACE_API_ROOT")
                .unwrap_or_else(|| rollcall_core::face_api::DEFAULT_API_ROOT.to_string()),
            roster,
            location: non_empty("ROLLCALL_LOCATION")
                .unwrap_or_else(|| "MAIN BUILDING SECOND FLOOR".to_string()),
            rate_limit_ms: parse_or(&var, "ROLLCALL_RATE_LIMIT_MS", 100),
            training_max_polls: parse_or(&var, "ROLLCALL_TRAINING_MAX_POLLS", 600),
            confidence_floor: var("ROLLCALL_CONFIDENCE_FLOOR").and_then(|v| v.parse().ok()),
            http_timeout_secs: parse_or(&var, "ROLLCALL_HTTP_TIMEOUT_SECS", 30),
            state_path: var("ROLLCALL_STATE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("state.toml")),
            photo_dir: var("ROLLCALL_PHOTO_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| tmp_dir.join("rollcall")),
            arrival_device: non_empty("ROLLCALL_ARRIVAL_DEVICE"),
            departure_device: non_empty("ROLLCALL_DEPARTURE_DEVICE"),
            warmup_frames: parse_or(&var, "ROLLCALL_WARMUP_FRAMES", 4),
            pir_pin: parse_or(&var, "ROLLCALL_PIR_PIN", 5),
            motion_poll_ms: parse_or(&var, "ROLLCALL_MOTION_POLL_MS", 50),
            sync_on_startup: var("ROLLCALL_SYNC_ON_STARTUP")
                .map(|v| v != "0")
                .unwrap_or(true),
            dbus_session: var("ROLLCALL_DBUS_SESSION")
                .map(|v| v != "0")
                .unwrap_or(false),
        })
    }

    /// Both camera roles, when pinned.
    pub fn pinned_cameras(&self) -> Option<(&str, &str)> {
        match (&self.arrival_device, &self.departure_device) {
            (Some(a), Some(d)) => Some((a.as_str(), d.as_str())),
            _ => None,
        }
    }
}

fn parse_or<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    var(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = load(&[
            ("ROLLCALL_FACE_API_KEY", "k"),
            ("ROLLCALL_BACKEND_URL", "https://guild.example"),
            ("HOME", "/home/door"),
        ])
        .unwrap();

        assert_eq!(cfg.roster, RosterConfig::Http("https://guild.example".into()));
        assert_eq!(cfg.location, "MAIN BUILDING SECOND FLOOR");
        assert_eq!(cfg.rate_limit_ms, 100);
        assert_eq!(cfg.training_max_polls, 600);
        assert_eq!(cfg.confidence_floor, None);
        assert_eq!(
            cfg.state_path,
            PathBuf::from("/home/door/.local/share/rollcall/state.toml")
        );
        assert_eq!(cfg.photo_dir, PathBuf::from("/tmp/rollcall"));
        assert_eq!(cfg.pir_pin, 5);
        assert_eq!(cfg.warmup_frames, 4);
        assert!(cfg.sync_on_startup);
        assert!(!cfg.dbus_session);
        assert!(cfg.pinned_cameras().is_none());
    }

    #[test]
    fn test_missing_key() {
        let err = load(&[("ROLLCALL_BACKEND_URL", "https://guild.example")]).unwrap_err();
        assert_eq!(err, ConfigError::Missing("ROLLCALL_FACE_API_KEY"));
    }

    #[test]
    fn test_roster_source_required() {
        let err = load(&[("ROLLCALL_FACE_API_KEY", "k")]).unwrap_err();
        assert_eq!(err, ConfigError::NoRosterSource);
    }

    #[test]
    fn test_overrides() {
        let cfg = load(&[
            ("ROLLCALL_FACE_API_KEY", "k"),
            ("ROLLCALL_ROSTER_FILE", "/etc/rollcall/roster.json"),
            ("ROLLCALL_BACKEND_URL", "https://ignored.example"),
            ("ROLLCALL_CONFIDENCE_FLOOR", "0.6"),
            ("ROLLCALL_RATE_LIMIT_MS", "not a number"),
            ("ROLLCALL_ARRIVAL_DEVICE", "/dev/video0"),
            ("ROLLCALL_DEPARTURE_DEVICE", "/dev/video2"),
            ("ROLLCALL_SYNC_ON_STARTUP", "0"),
            ("XDG_DATA_HOME", "/var/lib"),
        ])
        .unwrap();

        assert_eq!(
            cfg.roster,
            RosterConfig::File(PathBuf::from("/etc/rollcall/roster.json"))
        );
        assert_eq!(cfg.confidence_floor, Some(0.6));
        assert_eq!(cfg.rate_limit_ms, 100);
        assert_eq!(cfg.pinned_cameras(), Some(("/dev/video0", "/dev/video2")));
        assert!(!cfg.sync_on_startup);
        assert_eq!(cfg.state_path, PathBuf::from("/var/lib/rollcall/state.toml"));
    }
}
