use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cp_core::config::ServiceConfig;
use cp_core::identity::SessionIdentity;
use cp_telemetry::metrics::{global_metrics, CHAT_REJECTED_TOTAL};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::{ClientError, Result};
use crate::executor::{RequestExecutor, RetryPolicy};
use crate::transport::{ApiRequest, HttpTransport, Transport};

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// Normalised outcome of a chat send. Failures are carried in `error`
/// instead of being raised so the conversation view can always render one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatReply {
    fn delivered(response: Value, session_id: String, timestamp: DateTime<Utc>) -> Self {
        Self {
            success: true,
            response: Some(response),
            error: None,
            session_id,
            timestamp,
        }
    }

    fn failed(error: String, session_id: String, timestamp: DateTime<Utc>) -> Self {
        Self {
            success: false,
            response: None,
            error: Some(error),
            session_id,
            timestamp,
        }
    }

    /// Text to show in the conversation, for either outcome.
    pub fn display_text(&self) -> String {
        match (&self.response, &self.error) {
            (Some(Value::String(s)), _) => s.clone(),
            (Some(other), _) => other.to_string(),
            (None, Some(err)) => format!("Error: {err}"),
            (None, None) => String::new(),
        }
    }
}

/// Result of the connectivity check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub connected: bool,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-attempt budgets for the two classes of call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceTimeouts {
    pub request: Duration,
    /// Calls that wait on the generative backend.
    pub generation: Duration,
}

impl Default for ServiceTimeouts {
    fn default() -> Self {
        Self {
            request: Duration::from_millis(30_000),
            generation: Duration::from_millis(90_000),
        }
    }
}

// ---------------------------------------------------------------------------
// Single-flight guard
// ---------------------------------------------------------------------------

/// Holds the chat flag while a send is outstanding. Dropping it clears the
/// flag on every exit path, including cancellation of the send future.
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// ServiceClient
// ---------------------------------------------------------------------------

/// Typed catalog of the remote service's operations.
///
/// Constructed once at startup and passed to every call site; the chat
/// in-flight flag and the session identity live here rather than in
/// process-wide statics.
pub struct ServiceClient {
    executor: RequestExecutor,
    identity: Arc<SessionIdentity>,
    timeouts: ServiceTimeouts,
    chat_in_flight: AtomicBool,
}

impl ServiceClient {
    pub fn new(
        executor: RequestExecutor,
        identity: Arc<SessionIdentity>,
        timeouts: ServiceTimeouts,
    ) -> Self {
        Self {
            executor,
            identity,
            timeouts,
            chat_in_flight: AtomicBool::new(false),
        }
    }

    /// Build an HTTP-backed client from the `[service]` config section.
    pub fn from_config(config: &ServiceConfig, identity: Arc<SessionIdentity>) -> Self {
        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(&config.base_url));
        let policy = RetryPolicy::new(
            config.max_attempts,
            Duration::from_millis(config.retry_delay_ms),
        );
        let timeouts = ServiceTimeouts {
            request: Duration::from_millis(config.request_timeout_ms),
            generation: Duration::from_millis(config.generation_timeout_ms),
        };
        info!(base_url = %config.base_url, ?policy, "service client configured");
        Self::new(RequestExecutor::new(transport, policy), identity, timeouts)
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    pub fn timeouts(&self) -> ServiceTimeouts {
        self.timeouts
    }

    /// Current session identifier, created on first use.
    pub fn session_id(&self) -> Result<String> {
        self.identity
            .get_or_create()
            .map_err(|e| ClientError::Identity(e.to_string()))
    }

    /// Whether a chat send is outstanding right now.
    pub fn is_chat_in_flight(&self) -> bool {
        self.chat_in_flight.load(Ordering::Acquire)
    }

    async fn get(&self, path: &str) -> Result<Value> {
        self.executor
            .execute(&ApiRequest::get(path), self.timeouts.request)
            .await
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value> {
        self.executor
            .execute(&ApiRequest::post(path, body), self.timeouts.request)
            .await
    }

    // -- Plain operations ---------------------------------------------------

    /// GET /health
    pub async fn health(&self) -> Result<Value> {
        self.get("/health").await
    }

    /// GET /edicts: the automations the service can run.
    pub async fn edicts(&self) -> Result<Value> {
        self.get("/edicts").await
    }

    /// GET /stats
    pub async fn stats(&self) -> Result<Value> {
        self.get("/stats").await
    }

    /// POST /webhook/{name} with an arbitrary context payload.
    pub async fn execute_edict(&self, name: &str, context: Value) -> Result<Value> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ClientError::InvalidRequest("edict name is empty".into()));
        }
        let path = format!("/webhook/{}", urlencoding::encode(name));
        info!(edict = name, "executing edict");
        self.post(&path, context).await
    }

    /// GET /cron/jobs
    pub async fn cron_jobs(&self) -> Result<Value> {
        self.get("/cron/jobs").await
    }

    /// GET /consciousness/status
    pub async fn consciousness_status(&self) -> Result<Value> {
        self.get("/consciousness/status").await
    }

    /// POST /consciousness/query
    pub async fn consciousness_query(&self, query: &str, context: Value) -> Result<Value> {
        self.post(
            "/consciousness/query",
            json!({ "query": query, "context": context }),
        )
        .await
    }

    /// GET /logs?limit=N
    pub async fn logs(&self, limit: u32) -> Result<Value> {
        let request = ApiRequest::get("/logs").with_query("limit", limit);
        self.executor.execute(&request, self.timeouts.request).await
    }

    /// GET /wekan/status
    pub async fn wekan_status(&self) -> Result<Value> {
        self.get("/wekan/status").await
    }

    /// GET /foundry/cards
    pub async fn foundry_cards(&self) -> Result<Value> {
        self.get("/foundry/cards").await
    }

    /// GET /foundry/stats
    pub async fn foundry_stats(&self) -> Result<Value> {
        self.get("/foundry/stats").await
    }

    /// GET /foundry/reports
    pub async fn foundry_reports(&self) -> Result<Value> {
        self.get("/foundry/reports").await
    }

    // -- Chat ---------------------------------------------------------------

    /// POST /api/chat, at most one at a time. Never fails: every outcome,
    /// including a rejected concurrent send, comes back as a [`ChatReply`].
    pub async fn send_chat(&self, message: &str) -> ChatReply {
        let timestamp = Utc::now();

        let Some(_guard) = InFlightGuard::acquire(&self.chat_in_flight) else {
            global_metrics().increment_counter(CHAT_REJECTED_TOTAL, &[]);
            warn!("chat send rejected: another message is in flight");
            let session_id = self.session_id().unwrap_or_default();
            return ChatReply::failed(ClientError::ChatInFlight.to_string(), session_id, timestamp);
        };

        let session_id = match self.session_id() {
            Ok(id) => id,
            Err(e) => return ChatReply::failed(e.to_string(), String::new(), timestamp),
        };

        let body = json!({
            "message": message,
            "session_id": session_id,
            "timestamp": timestamp,
        });
        let request = ApiRequest::post("/api/chat", body);

        match self.executor.execute(&request, self.timeouts.generation).await {
            Ok(reply) => {
                debug!(%session_id, "chat reply received");
                ChatReply::delivered(reply_text(reply), session_id, timestamp)
            }
            Err(e) => {
                warn!(%session_id, error = %e, "chat send failed");
                ChatReply::failed(e.to_string(), session_id, timestamp)
            }
        }
    }

    /// GET /api/chat/history/{session_id}, treating any failure as "no
    /// history". Use [`ServiceClient::try_chat_history`] to tell the two apart.
    pub async fn chat_history(&self) -> Vec<Value> {
        match self.try_chat_history().await {
            Ok(history) => history,
            Err(e) => {
                warn!(error = %e, "chat history unavailable, showing none");
                Vec::new()
            }
        }
    }

    /// Strict variant of [`ServiceClient::chat_history`].
    pub async fn try_chat_history(&self) -> Result<Vec<Value>> {
        let session_id = self.session_id()?;
        let path = format!("/api/chat/history/{}", urlencoding::encode(&session_id));
        let body = self.get(&path).await?;
        Ok(history_entries(body))
    }

    // -- Connectivity -------------------------------------------------------

    /// Probe `/health` and report a connected/disconnected verdict. The
    /// session identifier is included either way.
    pub async fn test_connection(&self) -> ConnectionStatus {
        let session_id = self.session_id().unwrap_or_default();
        match self.health().await {
            Ok(health) => ConnectionStatus {
                connected: true,
                session_id,
                health: Some(health),
                error: None,
            },
            Err(e) => ConnectionStatus {
                connected: false,
                session_id,
                health: None,
                error: Some(e.to_string()),
            },
        }
    }
}

impl std::fmt::Debug for ServiceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceClient")
            .field("executor", &self.executor)
            .field("timeouts", &self.timeouts)
            .field("chat_in_flight", &self.is_chat_in_flight())
            .finish()
    }
}

/// The reply's `response` field when present, otherwise the whole body.
fn reply_text(mut reply: Value) -> Value {
    match reply.get_mut("response").map(Value::take) {
        Some(response) if !response.is_null() => response,
        _ => reply,
    }
}

/// History arrives either as a bare array or wrapped under `history` or
/// `messages`.
fn history_entries(body: Value) -> Vec<Value> {
    match body {
        Value::Array(items) => items,
        Value::Object(mut map) => ["history", "messages"]
            .iter()
            .find_map(|key| match map.remove(*key) {
                Some(Value::Array(items)) => Some(items),
                _ => None,
            })
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}
