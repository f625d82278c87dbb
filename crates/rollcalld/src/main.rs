use anyhow::{Context, Result};
use rollcall_core::{
    FaceApiClient, FileRosterSource, HttpRosterSource, IdentificationDispatcher,
    RemoteServiceGateway, RosterCache, RosterSource, RosterSyncEngine, TrainingPolicy,
};
use rollcall_hw::{CaptureOrchestrator, GpioMotionSensor, MotionEdge, V4lBackend};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

mod config;
mod daemon;
mod dbus_interface;
mod notifier;
mod session;
mod state;

use config::{Config, RosterConfig};
use daemon::Daemon;
use session::{PipelineLock, SessionController};

const BUS_NAME: &str = "io.rollcall.Daemon1";
const OBJECT_PATH: &str = "/io/rollcall/Daemon1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = Config::from_env()?;
    let state = state::DaemonState::load_or_create(&config.state_path)?;
    let group_id = state.whitelist_group_id;
    let timeout = Duration::from_secs(config.http_timeout_secs);

    let face = FaceApiClient::new(&config.face_api_root, &config.face_api_key, timeout)
        .context("failed to build Face API client")?;
    let gateway = Arc::new(RemoteServiceGateway::new(
        Arc::new(face),
        Duration::from_millis(config.rate_limit_ms),
    ));

    let roster: Arc<dyn RosterSource> = match &config.roster {
        RosterConfig::Http(url) => Arc::new(HttpRosterSource::new(url, timeout)?),
        RosterConfig::File(path) => {
            tracing::info!(path = %path.display(), "using offline roster file");
            Arc::new(FileRosterSource::new(path))
        }
    };

    let cache = Arc::new(RosterCache::new());
    let pipeline = Arc::new(PipelineLock::new(()));

    let sync = RosterSyncEngine::new(
        gateway.clone(),
        roster.clone(),
        cache.clone(),
        &group_id,
        TrainingPolicy {
            max_polls: config.training_max_polls,
        },
    );

    let mut capture = CaptureOrchestrator::new(
        Arc::new(V4lBackend::with_warmup(config.warmup_frames)),
        &config.photo_dir,
    );
    if let Some((arrival, departure)) = config.pinned_cameras() {
        tracing::info!(arrival, departure, "camera roles pinned");
        capture = capture.with_roles(arrival, departure);
    }

    let sessions = SessionController::new(
        capture,
        IdentificationDispatcher::new(gateway.clone(), &group_id, config.confidence_floor),
        cache,
        roster,
        Arc::new(notifier::LogNotifier),
        pipeline.clone(),
        &config.location,
    );

    let daemon = Arc::new(Daemon::new(sync, sessions, gateway, pipeline));

    let service = dbus_interface::RollcallService {
        daemon: daemon.clone(),
    };
    let builder = if config.dbus_session {
        zbus::connection::Builder::session()?
    } else {
        zbus::connection::Builder::system()?
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("failed to register on D-Bus")?;

    tracing::info!(bus = BUS_NAME, group_id = %group_id, "D-Bus interface registered");

    if config.sync_on_startup {
        let result = daemon.resync().await;
        if !result.success {
            tracing::warn!(
                error = result.error.as_deref().unwrap_or("unknown"),
                "startup sync failed; recognition will use an empty whitelist"
            );
        }
    }

    let (tx, mut edges) = mpsc::channel(8);
    let _motion = match GpioMotionSensor::open(
        config.pir_pin,
        Duration::from_millis(config.motion_poll_ms),
    ) {
        Ok(sensor) => Some(sensor.spawn(tx)),
        Err(e) => {
            tracing::warn!(error = %e, "motion sensor unavailable; manual triggers only");
            None
        }
    };

    tracing::info!("rollcalld ready");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            Some(edge) = edges.recv() => {
                if edge != MotionEdge::Rising {
                    continue;
                }
                let daemon = daemon.clone();
                tokio::spawn(async move {
                    let outcome = daemon.trigger().await;
                    tracing::debug!(?outcome, "motion session done");
                });
            }
            res = &mut shutdown => {
                res?;
                break;
            }
        }
    }

    tracing::info!("rollcalld shutting down");
    Ok(())
}
