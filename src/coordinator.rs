//! The session coordinator: owns the capture lifecycle, the persisted
//! settings record, and the single command channel to the processing
//! host.
//!
//! All control requests, tab events, and host notifications are handled
//! on one task, so lifecycle transitions are serialized by construction.
//! A start that is being processed finishes before the next request is
//! even read, which is what keeps the one-stream-at-a-time invariant
//! cheap to uphold.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::capture::{CaptureBackend, TabEvent, TabId};
use crate::config::SettingsStore;
use crate::error::CaptureError;
use crate::protocol::{
    AnalyserResponse, ControlMessage, ControlRequest, ControlResponse, HostCommand, HostEvent,
    StatusResponse,
};
use crate::settings::{EffectsUpdate, SettingsUpdate};

/// Timing knobs for the capture lifecycle. Injectable so tests do not
/// wait out real-world debounce windows.
#[derive(Debug, Clone, Copy)]
pub struct CoordinatorConfig {
    /// Minimum spacing between accepted start attempts. Rapid repeat
    /// starts are rejected, not queued.
    pub throttle: Duration,
    /// Pause after releasing a previous stream, and again after graph
    /// construction, before pushing settings.
    pub settle: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            throttle: Duration::from_millis(500),
            settle: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    Active,
    Stopping,
    /// The host reported a failure; capture is gone but the state is
    /// shown until the next start or stop resets it.
    Error,
}

/// Book-keeping for the one live capture.
#[derive(Debug, Clone)]
pub struct CaptureSession {
    pub tab_id: TabId,
    pub stream_id: String,
    pub started_at: Instant,
}

pub struct SessionCoordinator {
    config: CoordinatorConfig,
    backend: Arc<dyn CaptureBackend>,
    store: SettingsStore,
    host: mpsc::Sender<HostCommand>,
    state: SessionState,
    session: Option<CaptureSession>,
    active_tab: Option<TabId>,
    last_start_attempt: Option<Instant>,
}

impl SessionCoordinator {
    pub fn new(
        config: CoordinatorConfig,
        backend: Arc<dyn CaptureBackend>,
        store: SettingsStore,
        host: mpsc::Sender<HostCommand>,
    ) -> Self {
        Self {
            config,
            backend,
            store,
            host,
            state: SessionState::Idle,
            session: None,
            active_tab: None,
            last_start_attempt: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session(&self) -> Option<&CaptureSession> {
        self.session.as_ref()
    }

    /// Event loop driving the coordinator until the control channel
    /// closes. Tab events and host notifications share the same task as
    /// control requests.
    pub async fn run(
        mut self,
        mut requests: mpsc::Receiver<ControlRequest>,
        mut tabs: mpsc::Receiver<TabEvent>,
        mut host_events: mpsc::Receiver<HostEvent>,
    ) {
        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(ControlRequest { message, respond_to }) => {
                        let response = self.handle_control(message).await;
                        let _ = respond_to.send(response);
                    }
                    None => {
                        let _ = self.stop_capture().await;
                        return;
                    }
                },
                Some(event) = tabs.recv() => self.handle_tab_event(event).await,
                Some(event) = host_events.recv() => self.handle_host_event(event).await,
            }
        }
    }

    pub async fn handle_control(&mut self, message: ControlMessage) -> ControlResponse {
        match message {
            ControlMessage::StartAudioCapture { tab_id } => {
                match self.start_capture(tab_id).await {
                    Ok(tab) => ControlResponse::started(tab),
                    Err(e) => ControlResponse::start_failed(&e),
                }
            }
            ControlMessage::StopAudioCapture => match self.stop_capture().await {
                Ok(()) => ControlResponse::ok(),
                Err(e) => ControlResponse::error(&e),
            },
            ControlMessage::UpdateSettings { settings } => {
                match self.update_settings(settings).await {
                    Ok(()) => ControlResponse::ok(),
                    Err(e) => ControlResponse::error(&e),
                }
            }
            ControlMessage::UpdateEffects { effects } => {
                match self.update_effects(effects).await {
                    Ok(()) => ControlResponse::ok(),
                    Err(e) => ControlResponse::error(&e),
                }
            }
            ControlMessage::GetStatus => ControlResponse::Status(self.status().await),
            ControlMessage::GetAnalyserData => match self.analyser_snapshot().await {
                Ok(data) => ControlResponse::Analyser(AnalyserResponse {
                    success: true,
                    data: Some(data),
                    error: None,
                }),
                Err(e) => ControlResponse::Analyser(AnalyserResponse {
                    success: false,
                    data: None,
                    error: Some(e.to_string()),
                }),
            },
        }
    }

    /// Start capturing `tab_id`, or the active tab when none is named.
    pub async fn start_capture(&mut self, tab_id: Option<TabId>) -> Result<TabId, CaptureError> {
        if let Some(last) = self.last_start_attempt {
            if last.elapsed() < self.config.throttle {
                return Err(CaptureError::Throttled);
            }
        }
        self.last_start_attempt = Some(Instant::now());
        self.begin_capture(tab_id).await
    }

    /// The start path proper, used both by user starts (behind the
    /// throttle) and by navigation restarts (which bypass it). Any
    /// failure lands the coordinator back in idle.
    async fn begin_capture(&mut self, tab_id: Option<TabId>) -> Result<TabId, CaptureError> {
        let tab_id = tab_id.or(self.active_tab).ok_or_else(|| {
            CaptureError::Acquisition("no tab named and no active tab known".into())
        })?;
        self.state = SessionState::Starting;
        match self.connect_stream(tab_id).await {
            Ok(stream_id) => {
                self.session = Some(CaptureSession {
                    tab_id,
                    stream_id,
                    started_at: Instant::now(),
                });
                self.state = SessionState::Active;
                tracing::info!(tab_id, "capture session active");
                Ok(tab_id)
            }
            Err(e) => {
                self.state = SessionState::Idle;
                Err(e)
            }
        }
    }

    async fn connect_stream(&mut self, tab_id: TabId) -> Result<String, CaptureError> {
        // Release whatever is running first. The platform refuses a new
        // stream while the previous one is open, and it needs a moment
        // after release before the tab is capturable again.
        self.release_current(false).await?;
        tokio::time::sleep(self.config.settle).await;

        let stream = self.backend.acquire(tab_id).await?;
        let stream_id = stream.stream_id.clone();

        let (tx, rx) = oneshot::channel();
        self.send_host(HostCommand::Initialize {
            stream,
            respond_to: tx,
        })
        .await?;
        match rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(CaptureError::HostGone("initialize reply dropped".into())),
        }

        // Let the graph settle, then push the persisted settings so the
        // new session starts from the user's preferences rather than
        // defaults.
        tokio::time::sleep(self.config.settle).await;
        let update = self.store.load().to_effect_settings().as_update();
        self.send_host(HostCommand::ApplySettings(update)).await?;
        Ok(stream_id)
    }

    /// Stop the current session. Stopping while idle is a no-op success,
    /// and teardown trouble (a dead host included) is logged, never
    /// surfaced: from the caller's view, stop always works.
    pub async fn stop_capture(&mut self) -> Result<(), CaptureError> {
        if self.session.is_some() || self.state == SessionState::Error {
            self.state = SessionState::Stopping;
            if let Err(e) = self.release_current(true).await {
                tracing::warn!("host teardown skipped: {e}");
            }
        }
        self.state = SessionState::Idle;
        Ok(())
    }

    /// Tear down the host graph, which releases the stream's tracks.
    async fn release_current(&mut self, notify: bool) -> Result<(), CaptureError> {
        self.session = None;
        let (tx, rx) = oneshot::channel();
        self.send_host(HostCommand::Teardown {
            notify,
            respond_to: tx,
        })
        .await?;
        rx.await
            .map_err(|_| CaptureError::HostGone("teardown reply dropped".into()))
    }

    /// Persist a settings change, then forward it to the host when a
    /// session is live. With no session the change still sticks and is
    /// pushed on the next start.
    pub async fn update_settings(&mut self, update: SettingsUpdate) -> Result<(), CaptureError> {
        let mut stored = self.store.load();
        if let Some(volume) = update.volume {
            stored.volume = crate::settings::clamp_volume(volume);
        }
        if let Some(bands) = &update.bands {
            for (key, gain) in bands {
                if stored.bands.contains_key(key) {
                    stored
                        .bands
                        .insert(key.clone(), crate::settings::clamp_band_gain(*gain));
                }
            }
        }
        if let Some(effects) = &update.effects {
            merge_stored_effects(&mut stored.effects, effects);
        }
        if let Err(e) = self.store.save(&stored) {
            tracing::warn!("failed to persist settings: {e}");
        }

        if self.session.is_some() {
            self.send_host(HostCommand::ApplySettings(update)).await?;
        }
        Ok(())
    }

    pub async fn update_effects(&mut self, update: EffectsUpdate) -> Result<(), CaptureError> {
        let mut stored = self.store.load();
        merge_stored_effects(&mut stored.effects, &update);
        if let Err(e) = self.store.save(&stored) {
            tracing::warn!("failed to persist settings: {e}");
        }

        if self.session.is_some() {
            self.send_host(HostCommand::ApplyEffects(update)).await?;
        }
        Ok(())
    }

    /// Current status, reconciled against the host: a vanished host task
    /// means the session is gone no matter what the book-keeping says.
    pub async fn status(&mut self) -> StatusResponse {
        if self.session.is_some() && self.host.is_closed() {
            tracing::warn!("processing host gone, clearing stale session");
            self.session = None;
            self.state = SessionState::Idle;
        }
        StatusResponse {
            is_active: self.state == SessionState::Active,
            tab_id: self.session.as_ref().map(|s| s.tab_id),
        }
    }

    pub async fn analyser_snapshot(&mut self) -> Result<Vec<u8>, CaptureError> {
        if self.session.is_none() {
            return Err(CaptureError::NoActiveSession);
        }
        let (tx, rx) = oneshot::channel();
        self.send_host(HostCommand::AnalyserSnapshot { respond_to: tx })
            .await?;
        rx.await
            .map_err(|_| CaptureError::HostGone("analyser reply dropped".into()))?
    }

    pub async fn handle_tab_event(&mut self, event: TabEvent) {
        match event {
            TabEvent::Closed(tab_id) => {
                if self.captured_tab() == Some(tab_id) {
                    tracing::info!(tab_id, "captured tab closed, stopping");
                    if let Err(e) = self.stop_capture().await {
                        tracing::warn!("cleanup after tab close failed: {e}");
                    }
                }
            }
            TabEvent::NavigationStarted(tab_id) => {
                if self.captured_tab() == Some(tab_id) {
                    // The stream is about to end; the host parks the
                    // graph and the LoadComplete handler restarts us.
                    tracing::debug!(tab_id, "captured tab navigating");
                }
            }
            TabEvent::LoadComplete(tab_id) => {
                let resume = self.captured_tab() == Some(tab_id) && self.store.load().enabled;
                if resume {
                    tracing::info!(tab_id, "captured tab reloaded, resuming capture");
                    // Deliberate restart, not a user click: skip the
                    // throttle.
                    if let Err(e) = self.begin_capture(Some(tab_id)).await {
                        tracing::warn!("resume after navigation failed: {e}");
                        self.session = None;
                        self.state = SessionState::Idle;
                    }
                }
            }
            TabEvent::Activated(tab_id) => {
                // Focus only retargets future starts, never a live
                // capture.
                self.active_tab = Some(tab_id);
            }
        }
    }

    pub async fn handle_host_event(&mut self, event: HostEvent) {
        match event {
            HostEvent::Started { tab_id } => {
                tracing::debug!(tab_id, "host confirmed start");
            }
            HostEvent::Stopped { tab_id } => {
                tracing::debug!(?tab_id, "host confirmed stop");
            }
            HostEvent::Error { message } => {
                tracing::warn!("host reported failure: {message}");
                self.session = None;
                self.state = SessionState::Error;
            }
        }
    }

    fn captured_tab(&self) -> Option<TabId> {
        self.session.as_ref().map(|s| s.tab_id)
    }

    async fn send_host(&mut self, command: HostCommand) -> Result<(), CaptureError> {
        self.host
            .send(command)
            .await
            .map_err(|e| CaptureError::HostGone(e.to_string()))
    }
}

/// Merge an effects update into the stored partials, clamping the same
/// way the live graph does so the record never holds out-of-range values.
fn merge_stored_effects(stored: &mut EffectsUpdate, update: &EffectsUpdate) {
    if let Some(limiter) = update.limiter {
        stored.limiter = Some(limiter.clamped());
    }
    if let Some(spatial) = update.spatial {
        stored.spatial = Some(spatial.clamped());
    }
    if let Some(auto_pan) = update.auto_pan {
        stored.auto_pan = Some(auto_pan);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::capture::testing::TestBackend;
    use crate::config::StoredSettings;
    use crate::host::{NullSink, ProcessingHost};
    use crate::settings::{SpatialMode, SpatialSettings};

    struct Fixture {
        coordinator: SessionCoordinator,
        backend: Arc<TestBackend>,
        store: SettingsStore,
        _dir: tempfile::TempDir,
    }

    fn fixture_with(config: CoordinatorConfig) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json"));
        let (event_tx, _event_rx) = mpsc::channel(16);
        let host = ProcessingHost::spawn(event_tx, Box::new(NullSink));
        let backend = TestBackend::new();
        let coordinator = SessionCoordinator::new(config, backend.clone(), store.clone(), host);
        Fixture {
            coordinator,
            backend,
            store,
            _dir: dir,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(CoordinatorConfig {
            throttle: Duration::ZERO,
            settle: Duration::from_millis(1),
        })
    }

    #[tokio::test]
    async fn start_status_update_stop_lifecycle() {
        let mut f = fixture();

        let response = f
            .coordinator
            .handle_control(ControlMessage::StartAudioCapture { tab_id: Some(7) })
            .await;
        assert_eq!(response, ControlResponse::started(7));
        assert_eq!(f.coordinator.state(), SessionState::Active);
        assert!(f.backend.stream_live());

        let status = f.coordinator.status().await;
        assert!(status.is_active);
        assert_eq!(status.tab_id, Some(7));

        let mut bands = BTreeMap::new();
        bands.insert("32".to_string(), 10.0);
        let response = f
            .coordinator
            .handle_control(ControlMessage::UpdateSettings {
                settings: SettingsUpdate {
                    volume: None,
                    bands: Some(bands),
                    effects: None,
                },
            })
            .await;
        assert_eq!(response, ControlResponse::ok());

        let response = f
            .coordinator
            .handle_control(ControlMessage::StopAudioCapture)
            .await;
        assert_eq!(response, ControlResponse::ok());
        assert_eq!(f.coordinator.state(), SessionState::Idle);
        assert!(!f.backend.stream_live());

        let status = f.coordinator.status().await;
        assert!(!status.is_active);
        assert_eq!(status.tab_id, None);
    }

    #[tokio::test]
    async fn stop_while_idle_is_a_noop_success() {
        let mut f = fixture();
        assert!(f.coordinator.stop_capture().await.is_ok());
        assert!(f.coordinator.stop_capture().await.is_ok());
        assert_eq!(f.coordinator.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn switching_tabs_releases_the_first_stream() {
        let mut f = fixture();
        f.coordinator.start_capture(Some(1)).await.unwrap();
        assert!(f.backend.stream_live());

        // The fake backend rejects overlap, so this passing proves the
        // first stream was released before the second acquisition.
        f.coordinator.start_capture(Some(2)).await.unwrap();
        assert_eq!(f.coordinator.session().unwrap().tab_id, 2);
        assert_eq!(f.backend.acquired.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_restart_is_throttled() {
        let mut f = fixture_with(CoordinatorConfig {
            throttle: Duration::from_millis(500),
            settle: Duration::from_millis(1),
        });
        f.coordinator.start_capture(Some(1)).await.unwrap();

        tokio::time::advance(Duration::from_millis(100)).await;
        let err = f.coordinator.start_capture(Some(2)).await.unwrap_err();
        assert!(matches!(err, CaptureError::Throttled));
        assert!(!err.is_fatal());

        // The first session is untouched by the rejected attempt.
        assert_eq!(f.coordinator.session().unwrap().tab_id, 1);
        assert!(f.backend.stream_live());

        tokio::time::advance(Duration::from_millis(500)).await;
        f.coordinator.start_capture(Some(2)).await.unwrap();
        assert_eq!(f.coordinator.session().unwrap().tab_id, 2);
    }

    #[tokio::test]
    async fn closing_the_captured_tab_cleans_up() {
        let mut f = fixture();
        f.coordinator.start_capture(Some(7)).await.unwrap();

        f.coordinator.handle_tab_event(TabEvent::Closed(7)).await;
        assert_eq!(f.coordinator.state(), SessionState::Idle);
        assert!(!f.backend.stream_live());

        let status = f.coordinator.status().await;
        assert!(!status.is_active);
        assert_eq!(status.tab_id, None);
    }

    #[tokio::test]
    async fn closing_an_unrelated_tab_changes_nothing() {
        let mut f = fixture();
        f.coordinator.start_capture(Some(7)).await.unwrap();
        f.coordinator.handle_tab_event(TabEvent::Closed(9)).await;
        assert_eq!(f.coordinator.state(), SessionState::Active);
        assert!(f.backend.stream_live());
    }

    #[tokio::test]
    async fn acquisition_failure_returns_to_idle_with_typed_error() {
        let mut f = fixture();
        f.backend.fail_next.store(true, Ordering::SeqCst);
        let err = f.coordinator.start_capture(Some(7)).await.unwrap_err();
        assert!(matches!(err, CaptureError::Acquisition(_)));
        assert_eq!(f.coordinator.state(), SessionState::Idle);
        assert!(f.coordinator.session().is_none());
    }

    #[tokio::test]
    async fn navigation_restart_bypasses_the_throttle() {
        let mut f = fixture_with(CoordinatorConfig {
            throttle: Duration::from_secs(600),
            settle: Duration::from_millis(1),
        });
        let mut stored = StoredSettings::default();
        stored.enabled = true;
        f.store.save(&stored).unwrap();

        f.coordinator.start_capture(Some(7)).await.unwrap();
        let first_stream = f.coordinator.session().unwrap().stream_id.clone();

        f.coordinator
            .handle_tab_event(TabEvent::NavigationStarted(7))
            .await;
        f.coordinator
            .handle_tab_event(TabEvent::LoadComplete(7))
            .await;

        assert_eq!(f.coordinator.state(), SessionState::Active);
        let session = f.coordinator.session().unwrap();
        assert_eq!(session.tab_id, 7);
        assert_ne!(session.stream_id, first_stream);
        assert_eq!(f.backend.acquired.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn reload_without_resume_enabled_stays_put() {
        let mut f = fixture();
        f.coordinator.start_capture(Some(7)).await.unwrap();
        f.coordinator
            .handle_tab_event(TabEvent::LoadComplete(7))
            .await;
        // enabled defaults to false, so no re-acquisition happens.
        assert_eq!(f.backend.acquired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn activation_retargets_starts_but_not_live_capture() {
        let mut f = fixture();
        f.coordinator.start_capture(Some(7)).await.unwrap();
        f.coordinator.handle_tab_event(TabEvent::Activated(9)).await;
        assert_eq!(f.coordinator.session().unwrap().tab_id, 7);

        // A start without an explicit tab goes to the active one.
        let tab = f.coordinator.start_capture(None).await.unwrap();
        assert_eq!(tab, 9);
    }

    #[tokio::test]
    async fn start_without_any_target_tab_fails() {
        let mut f = fixture();
        let err = f.coordinator.start_capture(None).await.unwrap_err();
        assert!(matches!(err, CaptureError::Acquisition(_)));
    }

    #[tokio::test]
    async fn settings_persist_while_idle() {
        let mut f = fixture();
        f.coordinator
            .update_settings(SettingsUpdate {
                volume: Some(300.0),
                bands: None,
                effects: None,
            })
            .await
            .unwrap();
        f.coordinator
            .update_effects(EffectsUpdate {
                spatial: Some(SpatialSettings {
                    enabled: true,
                    mode: SpatialMode::Surround,
                    width: 150.0,
                }),
                ..Default::default()
            })
            .await
            .unwrap();

        let stored = f.store.load();
        assert_eq!(stored.volume, 300.0);
        let spatial = stored.effects.spatial.unwrap();
        assert_eq!(spatial.mode, SpatialMode::Surround);
        assert_eq!(spatial.width, 100.0); // clamped on the way in
    }

    #[tokio::test]
    async fn analyser_without_session_reports_no_active_session() {
        let mut f = fixture();
        let err = f.coordinator.analyser_snapshot().await.unwrap_err();
        assert!(matches!(err, CaptureError::NoActiveSession));

        let response = f
            .coordinator
            .handle_control(ControlMessage::GetAnalyserData)
            .await;
        match response {
            ControlResponse::Analyser(r) => {
                assert!(!r.success);
                assert!(r.error.is_some());
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn analyser_with_session_returns_bins() {
        let mut f = fixture();
        f.coordinator.start_capture(Some(7)).await.unwrap();
        let data = f.coordinator.analyser_snapshot().await.unwrap();
        assert_eq!(data.len(), 32);
    }

    /// Sender whose host task is already gone.
    fn dead_host() -> mpsc::Sender<HostCommand> {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        tx
    }

    #[tokio::test]
    async fn stop_succeeds_after_the_host_task_dies() {
        let mut f = fixture();
        f.coordinator.start_capture(Some(7)).await.unwrap();
        f.coordinator.host = dead_host();

        assert!(f.coordinator.stop_capture().await.is_ok());
        assert_eq!(f.coordinator.state(), SessionState::Idle);
        assert!(f.coordinator.session().is_none());
    }

    #[tokio::test]
    async fn start_against_a_dead_host_fails_back_to_idle() {
        let mut f = fixture();
        f.coordinator.host = dead_host();

        let err = f.coordinator.start_capture(Some(7)).await.unwrap_err();
        assert!(matches!(err, CaptureError::HostGone(_)));
        assert_eq!(f.coordinator.state(), SessionState::Idle);
        assert!(f.coordinator.session().is_none());
    }

    #[tokio::test]
    async fn host_error_clears_the_session() {
        let mut f = fixture();
        f.coordinator.start_capture(Some(7)).await.unwrap();
        f.coordinator
            .handle_host_event(HostEvent::Error {
                message: "graph fault".into(),
            })
            .await;
        assert_eq!(f.coordinator.state(), SessionState::Error);
        assert!(!f.coordinator.status().await.is_active);

        // A fresh start recovers from the error state.
        f.coordinator.start_capture(Some(8)).await.unwrap();
        assert_eq!(f.coordinator.state(), SessionState::Active);
    }
}
