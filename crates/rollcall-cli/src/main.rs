use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rollcall_hw::{Camera, CameraBackend, V4lBackend};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance daemon CLI")]
struct Cli {
    /// Talk to a daemon on the session bus instead of the system bus
    #[arg(long, global = true)]
    session: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a capture session now, as if motion was detected
    Trigger,
    /// Rebuild the whitelist from the roster
    Sync,
    /// Show daemon status
    Status,
    /// Remove a person from the whitelist
    RemovePerson {
        /// Identity key (email) of the person
        key: String,
    },
    /// Remove one registered face of a person
    RemovePhoto {
        /// Identity key (email) of the person
        key: String,
        /// Persisted face id
        face_id: String,
    },
    /// List capture devices (bypasses the daemon)
    Cameras,
    /// Capture one photo from a device (bypasses the daemon)
    Snap {
        /// V4L2 device path, e.g. /dev/video0
        device: String,
        /// Output file
        #[arg(short, long, default_value = "snap.jpg")]
        output: PathBuf,
    },
}

#[zbus::proxy(
    interface = "io.rollcall.Daemon1",
    default_service = "io.rollcall.Daemon1",
    default_path = "/io/rollcall/Daemon1"
)]
trait Rollcall {
    async fn trigger(&self) -> zbus::Result<String>;
    async fn resync(&self) -> zbus::Result<String>;
    async fn remove_person(&self, identity_key: &str) -> zbus::Result<bool>;
    async fn remove_photo(&self, identity_key: &str, face_id: &str) -> zbus::Result<bool>;
    async fn status(&self) -> zbus::Result<String>;
}

fn bus_label(session: bool) -> &'static str {
    if session {
        "session"
    } else {
        "system"
    }
}

async fn connect(session: bool) -> Result<RollcallProxy<'static>> {
    let bus = bus_label(session);
    tracing::debug!(bus, "connecting to rollcalld");
    let conn = if session {
        zbus::Connection::session().await
    } else {
        zbus::Connection::system().await
    }
    .with_context(|| format!("cannot connect to the D-Bus {bus} bus"))?;
    RollcallProxy::new(&conn)
        .await
        .context("rollcalld is not reachable")
}

/// Pretty-print a JSON reply, falling back to the raw text.
fn print_json(raw: &str) {
    match serde_json::from_str::<serde_json::Value>(raw)
        .and_then(|v| serde_json::to_string_pretty(&v))
    {
        Ok(pretty) => println!("{pretty}"),
        Err(_) => println!("{raw}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Trigger => {
            let proxy = connect(cli.session).await?;
            print_json(&proxy.trigger().await?);
        }
        Commands::Sync => {
            let proxy = connect(cli.session).await?;
            println!("Rebuilding whitelist...");
            print_json(&proxy.resync().await?);
        }
        Commands::Status => {
            let proxy = connect(cli.session).await?;
            print_json(&proxy.status().await?);
        }
        Commands::RemovePerson { key } => {
            let proxy = connect(cli.session).await?;
            if proxy.remove_person(&key).await? {
                println!("Removed {key}");
            } else {
                println!("{key} is not on the whitelist");
            }
        }
        Commands::RemovePhoto { key, face_id } => {
            let proxy = connect(cli.session).await?;
            if proxy.remove_photo(&key, &face_id).await? {
                println!("Removed face {face_id} of {key}");
            } else {
                println!("No face {face_id} registered for {key}");
            }
        }
        Commands::Cameras => {
            let devices = tokio::task::spawn_blocking(Camera::list_devices).await?;
            tracing::debug!(count = devices.len(), "enumerated capture devices");
            if devices.is_empty() {
                println!("No capture devices found");
            }
            for d in &devices {
                println!("{}\t{} ({}, {})", d.path, d.name, d.driver, d.bus);
            }
            if devices.len() < 2 {
                println!("rollcalld needs two cameras (arrival and departure)");
            }
        }
        Commands::Snap { device, output } => {
            println!("Capturing from {device}...");
            V4lBackend::new()
                .capture_photo(&device, &output)
                .await
                .with_context(|| format!("capture from {device} failed"))?;
            tracing::debug!(%device, path = %output.display(), "snapshot written");
            println!("Wrote {}", output.display());
        }
    }

    Ok(())
}
