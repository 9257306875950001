//! Lifecycle supervisor for the SSH proxy session.
//!
//! The supervisor is an actor: a single task owns the session state and
//! consumes commands from the public handle plus signals from the session's
//! background tasks. Nothing else writes the phase.

use std::{net::SocketAddr, sync::Arc};

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use sshproxy_core::{
    CredentialStager, EngineError, EngineRequest, EventStore, KeepAlive, Phase, ProbeResult,
    ProxyEvent, SessionConfig, SettingsStore, StagingError, StorageError, TunnelEngine, WakeFlag,
    event::now_millis,
};
use tokio::{
    sync::{Mutex, mpsc, watch},
    task::JoinHandle,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use uuid::Uuid;

use crate::{
    config::SupervisorConfig, health::HealthMonitor, relay::LogRelay, storage::FileStager,
};

/// Supervisor error.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] sshproxy_core::ConfigError),
    #[error("Failed to stage credential: {0}")]
    CredentialStaging(#[from] StagingError),
    #[error("Failed to start engine: {0}")]
    EngineStart(EngineError),
    #[error("Failed to stop engine: {0}")]
    EngineStop(EngineError),
    #[error("Health probe failed: {0}")]
    HealthProbe(String),
    #[error("Log stream failed: {0}")]
    LogStream(String),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Supervisor is shut down")]
    Closed,
}

/// Point-in-time view of the session state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub phase: Phase,
    /// Identifier of the running session, if any.
    pub session_id: Option<Uuid>,
    /// When the session reached `Running` (Unix epoch milliseconds).
    pub started_at: Option<i64>,
    /// Most recent liveness probe of the running session.
    pub last_probe: Option<ProbeResult>,
}

enum Command {
    Start(Box<SessionConfig>),
    Stop,
    Shutdown,
}

/// Requests from session background tasks.
pub(crate) enum Signal {
    Probe { session: Uuid, result: ProbeResult },
}

/// Background work owned by one running session.
struct ActiveSession {
    id: Uuid,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

#[derive(Default)]
struct SessionState {
    phase: Phase,
    started_at: Option<i64>,
    last_probe: Option<ProbeResult>,
    session: Option<ActiveSession>,
}

impl SessionState {
    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase,
            session_id: self.session.as_ref().map(|s| s.id),
            started_at: self.started_at,
            last_probe: self.last_probe.clone(),
        }
    }
}

/// Builder for [`Supervisor`].
pub struct SupervisorBuilder {
    engine: Arc<dyn TunnelEngine>,
    stager: Option<Arc<dyn CredentialStager>>,
    keep_alive: Option<Arc<dyn KeepAlive>>,
    config: SupervisorConfig,
}

impl SupervisorBuilder {
    /// Credential stager; defaults to [`FileStager::default_location`].
    #[must_use]
    pub fn stager(mut self, stager: Arc<dyn CredentialStager>) -> Self {
        self.stager = Some(stager);
        self
    }

    /// Keep-alive resource held while a session is active; defaults to a [`WakeFlag`].
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: Arc<dyn KeepAlive>) -> Self {
        self.keep_alive = Some(keep_alive);
        self
    }

    #[must_use]
    pub fn config(mut self, config: SupervisorConfig) -> Self {
        self.config = config;
        self
    }

    /// Spawn the supervisor task. Must be called within a Tokio runtime.
    #[must_use]
    pub fn spawn(self) -> Supervisor {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::default());
        let events = Arc::new(EventStore::with_history_limit(self.config.history_bytes));

        let actor = Actor {
            engine: self.engine,
            stager: self
                .stager
                .unwrap_or_else(|| Arc::new(FileStager::default_location())),
            keep_alive: self.keep_alive.unwrap_or_else(|| Arc::new(WakeFlag::new())),
            config: self.config,
            events: Arc::clone(&events),
            snapshot: snapshot_tx,
            signals: signals_tx,
            state: SessionState::default(),
        };
        let task = tokio::spawn(actor.run(commands_rx, signals_rx));

        Supervisor {
            commands: commands_tx,
            events,
            snapshot: snapshot_rx,
            task: Mutex::new(Some(task)),
        }
    }
}

/// Handle to the lifecycle supervisor.
///
/// Commands are fire-and-forget. Progress is observed through
/// [`Supervisor::subscribe`] and [`Supervisor::watch`].
pub struct Supervisor {
    commands: mpsc::UnboundedSender<Command>,
    events: Arc<EventStore>,
    snapshot: watch::Receiver<SessionSnapshot>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Supervisor {
    #[must_use]
    pub fn builder(engine: Arc<dyn TunnelEngine>) -> SupervisorBuilder {
        SupervisorBuilder {
            engine,
            stager: None,
            keep_alive: None,
            config: SupervisorConfig::default(),
        }
    }

    /// Request a new session. Ignored while a session is active.
    ///
    /// # Errors
    /// Returns `Closed` if the supervisor has shut down.
    pub fn start(&self, config: SessionConfig) -> Result<(), SupervisorError> {
        self.send(Command::Start(Box::new(config)))
    }

    /// Request teardown of the active session. Ignored when stopped.
    ///
    /// # Errors
    /// Returns `Closed` if the supervisor has shut down.
    pub fn stop(&self) -> Result<(), SupervisorError> {
        self.send(Command::Stop)
    }

    /// Stop any active session and wait for the supervisor task to exit.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(task) = self.task.lock().await.take() {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Supervisor task failed");
            }
        }
    }

    /// Start the saved session if it was running when last recorded.
    ///
    /// Returns whether a start was issued.
    ///
    /// # Errors
    /// Returns error if the settings cannot be loaded or the supervisor has shut down.
    pub async fn resume(&self, store: &dyn SettingsStore) -> Result<bool, SupervisorError> {
        let settings = store.load().await?;
        match settings.config {
            Some(config) if settings.proxy_running => {
                tracing::info!(host = %config.host, "Resuming saved proxy session");
                self.start(config)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.snapshot.borrow().phase
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver that observes every published snapshot.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    #[must_use]
    pub fn events(&self) -> Arc<EventStore> {
        Arc::clone(&self.events)
    }

    /// Event history followed by live events.
    #[must_use]
    pub fn subscribe(&self) -> BoxStream<'static, ProxyEvent> {
        self.events.history_plus_stream()
    }

    fn send(&self, command: Command) -> Result<(), SupervisorError> {
        self.commands
            .send(command)
            .map_err(|_| SupervisorError::Closed)
    }
}

struct Actor {
    engine: Arc<dyn TunnelEngine>,
    stager: Arc<dyn CredentialStager>,
    keep_alive: Arc<dyn KeepAlive>,
    config: SupervisorConfig,
    events: Arc<EventStore>,
    snapshot: watch::Sender<SessionSnapshot>,
    signals: mpsc::UnboundedSender<Signal>,
    state: SessionState,
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut signals: mpsc::UnboundedReceiver<Signal>,
    ) {
        loop {
            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(Command::Start(config)) => self.handle_start(*config).await,
                    Some(Command::Stop) => self.handle_stop().await,
                    Some(Command::Shutdown) | None => {
                        self.handle_stop().await;
                        break;
                    }
                },
                Some(signal) = signals.recv() => self.handle_signal(signal).await,
            }
        }
        tracing::debug!("Supervisor exited");
    }

    async fn handle_start(&mut self, config: SessionConfig) {
        if !self.state.phase.accepts_start() {
            tracing::debug!(phase = %self.state.phase, "Ignoring start while a session is active");
            return;
        }

        self.keep_alive.acquire();
        self.events
            .push_system(format!("Starting {} proxy...", config.proxy_kind.label()));
        self.set_phase(Phase::Starting);

        match self.launch(&config).await {
            Ok(()) => {
                tracing::info!(
                    ssh = %config.ssh_address(),
                    local_port = config.local_port,
                    proxy_kind = %config.proxy_kind,
                    "Proxy started"
                );
                self.state.started_at = Some(now_millis());
                self.events.push_system(format!(
                    "{} proxy started on port {}",
                    config.proxy_kind.label(),
                    config.local_port
                ));
                self.state.session = Some(self.spawn_session(&config));
                self.set_phase(Phase::Running);
            }
            Err(err) => {
                tracing::error!(error = %err, "Proxy start failed");
                self.events.push_system(format!("Proxy error: {err}"));
                self.set_phase(Phase::Error);

                if matches!(err, SupervisorError::EngineStart(_)) {
                    if let Err(e) = self.engine.stop().await {
                        tracing::debug!(error = %e, "Cleanup stop after failed start");
                    }
                }
                self.release_resources().await;
                self.set_phase(Phase::Stopped);
            }
        }
    }

    async fn launch(&self, config: &SessionConfig) -> Result<(), SupervisorError> {
        config.validate()?;
        let key_path = self.stager.stage(config.credential.as_bytes()).await?;
        let request = EngineRequest::new(config, key_path);
        self.engine
            .start(&request)
            .await
            .map_err(SupervisorError::EngineStart)
    }

    fn spawn_session(&self, config: &SessionConfig) -> ActiveSession {
        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let tasks = TaskTracker::new();

        tasks.spawn(
            HealthMonitor {
                target: SocketAddr::new(self.config.probe_host, config.local_port),
                interval: self.config.health_interval(),
                timeout: self.config.probe_timeout(),
                session: id,
                signals: self.signals.clone(),
                cancel: cancel.clone(),
            }
            .run(),
        );

        if let Some(endpoint) = &self.config.log_endpoint {
            tasks.spawn(
                LogRelay {
                    endpoint: endpoint.clone(),
                    marker: self.config.log_marker.clone(),
                    events: Arc::clone(&self.events),
                    cancel: cancel.clone(),
                }
                .run(),
            );
        }

        ActiveSession { id, cancel, tasks }
    }

    async fn handle_stop(&mut self) {
        if self.state.phase == Phase::Stopped {
            return;
        }
        self.set_phase(Phase::Stopping);

        if let Some(session) = self.state.session.take() {
            session.cancel.cancel();
            session.tasks.close();
            session.tasks.wait().await;
            tracing::debug!(session = %session.id, "Session tasks finished");
        }

        match self.engine.stop().await {
            Ok(()) => {}
            Err(e) if e.is_not_running() => tracing::debug!("Engine was not running"),
            Err(e) => {
                let err = SupervisorError::EngineStop(e);
                tracing::warn!(error = %err, "Engine stop failed, continuing teardown");
                self.events.push_system(format!("Proxy error: {err}"));
            }
        }

        self.release_resources().await;
        self.state.started_at = None;
        self.state.last_probe = None;
        self.events.push_system("Proxy stopped");
        self.set_phase(Phase::Stopped);
    }

    async fn handle_signal(&mut self, signal: Signal) {
        match signal {
            Signal::Probe { session, result } => {
                let current = self.state.session.as_ref().map(|s| s.id);
                if current != Some(session) || self.state.phase != Phase::Running {
                    tracing::debug!(%session, "Dropping probe from inactive session");
                    return;
                }

                let changed = self.state.last_probe.as_ref() != Some(&result);
                self.state.last_probe = Some(result.clone());

                match result {
                    ProbeResult::Reachable => {
                        if changed {
                            self.events.push_health(ProbeResult::Reachable);
                            self.publish();
                        }
                    }
                    ProbeResult::Unreachable { reason } => {
                        let err = SupervisorError::HealthProbe(reason.clone());
                        tracing::warn!(error = %err, "Proxy listener unreachable");
                        self.events.push_health(ProbeResult::Unreachable { reason });
                        self.events
                            .push_system(format!("Reconnecting proxy... ({err})"));
                        self.handle_stop().await;
                    }
                }
            }
        }
    }

    async fn release_resources(&self) {
        if self.config.erase_credential_on_stop {
            if let Err(e) = self.stager.discard().await {
                tracing::warn!(error = %e, "Failed to remove staged credential");
                self.events
                    .push_system(format!("Failed to remove staged credential: {e}"));
            }
        }
        self.keep_alive.release();
    }

    fn set_phase(&mut self, phase: Phase) {
        tracing::debug!(from = %self.state.phase, to = %phase, "Phase transition");
        self.state.phase = phase;
        self.events.push_phase(phase);
        self.publish();
    }

    fn publish(&self) {
        self.snapshot.send_replace(self.state.snapshot());
    }
}
