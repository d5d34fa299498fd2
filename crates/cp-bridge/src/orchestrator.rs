use std::sync::{Arc, Mutex, MutexGuard};

use cp_client::error::Result as ClientResult;
use cp_client::service::{ChatReply, ConnectionStatus, ServiceClient};
use cp_core::config::Config;
use cp_core::identity::SessionIdentity;
use cp_core::storage::{FileStore, StorageError};
use cp_core::types::TaskContext;
use cp_session::{
    start_with_context, CommandComposer, ComposedCommand, EventBus, ProcessSession,
    SessionConfig, SessionError, SessionEvent, SessionStatus,
};
use cp_telemetry::metrics::{global_metrics, TERMINAL_RUNNING};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::context::{source_from_config, ContextSource, NoContext};
use crate::events::PanelEvent;

/// Wires UI-facing calls to the service client and the terminal session.
///
/// Built once at startup. At most one terminal session exists at a time; a
/// fresh one replaces it when none exists or the previous one has exited.
pub struct Orchestrator {
    client: Arc<ServiceClient>,
    session_config: SessionConfig,
    composer: CommandComposer,
    context: Arc<dyn ContextSource>,
    bus: EventBus<PanelEvent>,
    terminal: Mutex<Option<Arc<ProcessSession>>>,
}

impl Orchestrator {
    pub fn new(client: Arc<ServiceClient>, session_config: SessionConfig) -> Self {
        Self {
            client,
            session_config,
            composer: CommandComposer::default(),
            context: Arc::new(NoContext),
            bus: EventBus::new(),
            terminal: Mutex::new(None),
        }
    }

    pub fn with_composer(mut self, composer: CommandComposer) -> Self {
        self.composer = composer;
        self
    }

    pub fn with_context_source(mut self, context: Arc<dyn ContextSource>) -> Self {
        self.context = context;
        self
    }

    /// Everything from a loaded [`Config`]: file-backed identity, HTTP client,
    /// shell settings, assistant invocation and context helper.
    pub fn from_config(config: &Config) -> Self {
        let store = Arc::new(FileStore::new(config.storage.resolved_path()));
        let identity = Arc::new(SessionIdentity::new(store));
        let client = Arc::new(ServiceClient::from_config(&config.service, identity));
        Self::new(client, SessionConfig::from_terminal(&config.terminal))
            .with_composer(CommandComposer::from_config(&config.assistant))
            .with_context_source(source_from_config(&config.context))
    }

    pub fn client(&self) -> &ServiceClient {
        &self.client
    }

    /// Receive panel events published from now on.
    pub fn subscribe(&self) -> flume::Receiver<PanelEvent> {
        self.bus.subscribe()
    }

    // -- Remote service -----------------------------------------------------

    pub async fn health(&self) -> ClientResult<Value> {
        self.client.health().await
    }

    pub async fn edicts(&self) -> ClientResult<Value> {
        self.client.edicts().await
    }

    pub async fn execute_edict(&self, name: &str, context: Value) -> ClientResult<Value> {
        self.client.execute_edict(name, context).await
    }

    pub async fn schedules(&self) -> ClientResult<Value> {
        self.client.cron_jobs().await
    }

    pub async fn consciousness_status(&self) -> ClientResult<Value> {
        self.client.consciousness_status().await
    }

    pub async fn consciousness_query(&self, query: &str, context: Value) -> ClientResult<Value> {
        self.client.consciousness_query(query, context).await
    }

    pub async fn logs(&self, limit: u32) -> ClientResult<Value> {
        self.client.logs(limit).await
    }

    pub async fn stats(&self) -> ClientResult<Value> {
        self.client.stats().await
    }

    /// Wekan status plus the three foundry views, gathered concurrently.
    pub async fn integrations(&self) -> ClientResult<Value> {
        let (wekan, cards, stats, reports) = tokio::try_join!(
            self.client.wekan_status(),
            self.client.foundry_cards(),
            self.client.foundry_stats(),
            self.client.foundry_reports(),
        )?;
        Ok(serde_json::json!({
            "wekan": wekan,
            "foundry": { "cards": cards, "stats": stats, "reports": reports },
        }))
    }

    pub async fn send_chat(&self, message: &str) -> ChatReply {
        self.client.send_chat(message).await
    }

    pub async fn chat_history(&self) -> Vec<Value> {
        self.client.chat_history().await
    }

    pub async fn test_connection(&self) -> ConnectionStatus {
        self.client.test_connection().await
    }

    pub fn session_id(&self) -> ClientResult<String> {
        self.client.session_id()
    }

    /// Replace the session identifier; the new value is returned.
    pub fn reset_session_id(&self) -> Result<String, StorageError> {
        let id = self.client.identity().clear()?;
        info!(session_id = %id, "session identity reset");
        Ok(id)
    }

    // -- Terminal -----------------------------------------------------------

    /// Start the terminal, creating a session if needed. Returns its id.
    pub fn terminal_start(&self) -> Uuid {
        let session = self.ensure_session();
        session.start_session();
        session.id()
    }

    pub fn terminal_write(&self, data: &str) {
        if let Some(session) = self.current() {
            session.write(data);
        }
    }

    pub fn terminal_resize(&self, cols: u16, rows: u16) {
        if let Some(session) = self.current() {
            session.resize(cols, rows);
        }
    }

    /// Launch the assistant with the given task, starting the shell first
    /// when needed.
    pub fn terminal_start_claude(
        &self,
        task: Option<&TaskContext>,
        context: Option<&str>,
    ) -> Result<ComposedCommand, SessionError> {
        let session = self.ensure_session();
        start_with_context(&session, &self.composer, task, context)
    }

    /// Like [`Self::terminal_start_claude`], with the desktop's current UI
    /// context as the free-form context.
    pub async fn start_claude_with_ui_context(
        &self,
        task: Option<&TaskContext>,
    ) -> Result<ComposedCommand, SessionError> {
        let summary = self.context.capture().await.summary();
        self.terminal_start_claude(task, Some(summary.as_str()))
    }

    pub fn terminal_kill(&self) {
        if let Some(session) = self.current() {
            session.kill();
            global_metrics().set_gauge(TERMINAL_RUNNING, 0);
        }
    }

    pub fn terminal_status(&self) -> SessionStatus {
        self.current()
            .map(|s| s.status())
            .unwrap_or(SessionStatus::Idle)
    }

    pub fn terminal_id(&self) -> Option<Uuid> {
        self.current().map(|s| s.id())
    }

    fn current(&self) -> Option<Arc<ProcessSession>> {
        self.lock_terminal().clone()
    }

    fn ensure_session(&self) -> Arc<ProcessSession> {
        let mut slot = self.lock_terminal();
        if let Some(session) = slot.as_ref() {
            if session.status() != SessionStatus::Exited {
                return Arc::clone(session);
            }
        }
        let session = Arc::new(ProcessSession::new(self.session_config.clone()));
        self.spawn_relay(&session);
        debug!(session = %session.id(), "terminal session created");
        *slot = Some(Arc::clone(&session));
        session
    }

    /// One relay per session; it ends after that session's exit.
    fn spawn_relay(&self, session: &ProcessSession) {
        let events = session.subscribe();
        let bus = self.bus.clone();
        let id = session.id();
        let spawned = std::thread::Builder::new()
            .name(format!("panel-relay-{}", &id.to_string()[..8]))
            .spawn(move || {
                while let Ok(event) = events.recv() {
                    let exit = matches!(event, SessionEvent::Exit { .. });
                    match &event {
                        SessionEvent::Ready => global_metrics().set_gauge(TERMINAL_RUNNING, 1),
                        SessionEvent::Exit { .. } => global_metrics().set_gauge(TERMINAL_RUNNING, 0),
                        _ => {}
                    }
                    bus.publish(PanelEvent::from_session(id, event));
                    if exit {
                        break;
                    }
                }
                debug!(session = %id, "relay finished");
            });
        if let Err(e) = spawned {
            warn!(session = %id, error = %e, "could not start event relay");
        }
    }

    fn lock_terminal(&self) -> MutexGuard<'_, Option<Arc<ProcessSession>>> {
        self.terminal.lock().unwrap_or_else(|e| {
            warn!("terminal lock was poisoned, recovering");
            e.into_inner()
        })
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        if let Some(session) = self.lock_terminal().take() {
            if session.is_running() {
                info!(session = %session.id(), "orchestrator dropping, killing terminal");
                session.kill();
            }
        }
    }
}
