mod capture;
mod config;
mod coordinator;
mod error;
mod host;
mod protocol;
mod settings;

use std::sync::Arc;

use tokio::io::AsyncBufReadExt;
use tokio::signal;
use tokio::sync::{mpsc, oneshot};
use tracing_subscriber::EnvFilter;

use capture::{TabEvent, ToneCaptureBackend};
use config::SettingsStore;
use coordinator::{CoordinatorConfig, SessionCoordinator};
use host::{NullSink, ProcessingHost};
use protocol::{ControlMessage, ControlRequest, HostEvent};

const SETTINGS_FILE: &str = "tabtone_settings.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let settings_path = std::env::var("TABTONE_SETTINGS")
        .unwrap_or_else(|_| SETTINGS_FILE.to_string());
    let store = SettingsStore::new(settings_path);

    // Channels between the control surface, coordinator, and host.
    let (control_tx, control_rx) = mpsc::channel::<ControlRequest>(32);
    let (tab_tx, tab_rx) = mpsc::channel::<TabEvent>(32);
    let (host_event_tx, host_event_rx) = mpsc::channel::<HostEvent>(32);

    // No playback device is wired here; processed audio is discarded.
    // The graph still runs in full so the analyser and status surfaces
    // reflect real processing.
    let host = ProcessingHost::spawn(host_event_tx, Box::new(NullSink));

    let backend = Arc::new(ToneCaptureBackend::default());
    let coordinator = SessionCoordinator::new(
        CoordinatorConfig::default(),
        backend,
        store,
        host,
    );
    tokio::spawn(coordinator.run(control_rx, tab_rx, host_event_rx));

    // Keep the tab-event channel open; a browser integration would feed
    // it. The synthetic backend never navigates, so it stays quiet here.
    let _tab_events = tab_tx;

    tracing::info!("tabtone started, reading control messages from stdin");

    // Control surface: one JSON control message per line on stdin, one
    // JSON response per line on stdout.
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                tracing::info!("received ctrl-c, shutting down");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                let message: ControlMessage = match serde_json::from_str(&line) {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::warn!("unparseable control message: {e}");
                        continue;
                    }
                };
                let (respond_to, response) = oneshot::channel();
                if control_tx
                    .send(ControlRequest {
                        message,
                        respond_to,
                    })
                    .await
                    .is_err()
                {
                    break;
                }
                match response.await {
                    Ok(response) => println!("{}", serde_json::to_string(&response)?),
                    Err(_) => break,
                }
            }
        }
    }
    Ok(())
}
