use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cp_client::error::{AttemptError, ClientError};
use cp_client::executor::{RequestExecutor, RetryPolicy};
use cp_client::service::{ServiceClient, ServiceTimeouts};
use cp_client::transport::{ApiRequest, Method, Transport};
use cp_core::identity::SessionIdentity;
use cp_core::storage::MemoryStore;
use serde_json::{json, Value};
use tokio::sync::Notify;

// ---------------------------------------------------------------------------
// Test transports
// ---------------------------------------------------------------------------

/// Records every request and answers with a fixed value (or a fixed failure).
struct RecordingTransport {
    requests: Mutex<Vec<ApiRequest>>,
    reply: Result<Value, AttemptError>,
    delay: Duration,
}

impl RecordingTransport {
    fn replying(reply: Value) -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            reply: Ok(reply),
            delay: Duration::ZERO,
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            reply: Err(AttemptError::Transport("connection refused".into())),
            delay: Duration::ZERO,
        })
    }

    fn slow(reply: Value, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            reply: Ok(reply),
            delay,
        })
    }

    fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, request: &ApiRequest) -> Result<Value, AttemptError> {
        self.requests.lock().unwrap().push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.reply.clone()
    }
}

/// Holds the first request until released, answers later ones immediately.
struct GatedTransport {
    calls: AtomicUsize,
    gate: Notify,
}

#[async_trait]
impl Transport for GatedTransport {
    async fn send(&self, _request: &ApiRequest) -> Result<Value, AttemptError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n == 0 {
            self.gate.notified().await;
        }
        Ok(json!({"response": format!("reply {n}")}))
    }
}

fn client_with(transport: Arc<dyn Transport>, policy: RetryPolicy) -> ServiceClient {
    let identity = Arc::new(SessionIdentity::new(Arc::new(MemoryStore::new())));
    ServiceClient::new(
        RequestExecutor::new(transport, policy),
        identity,
        ServiceTimeouts::default(),
    )
}

// ---------------------------------------------------------------------------
// Paths and payloads
// ---------------------------------------------------------------------------

#[tokio::test]
async fn operations_hit_their_paths() {
    let transport = RecordingTransport::replying(json!({}));
    let client = client_with(transport.clone(), RetryPolicy::no_retry());

    client.health().await.unwrap();
    client.edicts().await.unwrap();
    client.stats().await.unwrap();
    client.cron_jobs().await.unwrap();
    client.consciousness_status().await.unwrap();
    client.wekan_status().await.unwrap();
    client.foundry_cards().await.unwrap();
    client.foundry_stats().await.unwrap();
    client.foundry_reports().await.unwrap();

    let paths: Vec<String> = transport.requests().into_iter().map(|r| r.path).collect();
    assert_eq!(
        paths,
        vec![
            "/health",
            "/edicts",
            "/stats",
            "/cron/jobs",
            "/consciousness/status",
            "/wekan/status",
            "/foundry/cards",
            "/foundry/stats",
            "/foundry/reports",
        ]
    );
    assert!(transport.requests().iter().all(|r| r.method == Method::Get));
}

#[tokio::test]
async fn logs_pass_limit_as_query() {
    let transport = RecordingTransport::replying(json!([]));
    let client = client_with(transport.clone(), RetryPolicy::no_retry());

    client.logs(25).await.unwrap();
    let req = &transport.requests()[0];
    assert_eq!(req.path, "/logs");
    assert_eq!(req.query, vec![("limit".to_string(), "25".to_string())]);
}

#[tokio::test]
async fn execute_edict_posts_context_to_webhook() {
    let transport = RecordingTransport::replying(json!({"queued": true}));
    let client = client_with(transport.clone(), RetryPolicy::no_retry());

    let ctx = json!({"target": "prod", "dry_run": false});
    let reply = client.execute_edict("nightly build", ctx.clone()).await.unwrap();
    assert_eq!(reply, json!({"queued": true}));

    let req = &transport.requests()[0];
    assert_eq!(req.method, Method::Post);
    assert_eq!(req.path, "/webhook/nightly%20build");
    assert_eq!(req.body.as_ref(), Some(&ctx));
}

#[tokio::test]
async fn execute_edict_rejects_empty_name() {
    let transport = RecordingTransport::replying(json!({}));
    let client = client_with(transport.clone(), RetryPolicy::no_retry());

    let err = client.execute_edict("  ", json!({})).await.unwrap_err();
    assert!(matches!(err, ClientError::InvalidRequest(_)));
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn consciousness_query_body() {
    let transport = RecordingTransport::replying(json!({"answer": "42"}));
    let client = client_with(transport.clone(), RetryPolicy::no_retry());

    client
        .consciousness_query("what changed?", json!({"view": "dashboard"}))
        .await
        .unwrap();
    let req = &transport.requests()[0];
    assert_eq!(req.path, "/consciousness/query");
    assert_eq!(
        req.body.as_ref(),
        Some(&json!({"query": "what changed?", "context": {"view": "dashboard"}}))
    );
}

#[tokio::test]
async fn ordinary_errors_propagate() {
    let client = client_with(RecordingTransport::failing(), RetryPolicy::no_retry());
    let err = client.edicts().await.unwrap_err();
    assert!(matches!(err, ClientError::Connection { .. }));
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

#[tokio::test]
async fn chat_payload_carries_session_and_timestamp() {
    let transport = RecordingTransport::replying(json!({"response": "hello back"}));
    let client = client_with(transport.clone(), RetryPolicy::no_retry());
    let session_id = client.session_id().unwrap();

    let reply = client.send_chat("hello").await;
    assert!(reply.success);
    assert_eq!(reply.response, Some(json!("hello back")));
    assert_eq!(reply.session_id, session_id);
    assert!(reply.error.is_none());

    let req = &transport.requests()[0];
    assert_eq!(req.path, "/api/chat");
    let body = req.body.as_ref().unwrap();
    assert_eq!(body["message"], "hello");
    assert_eq!(body["session_id"], session_id.as_str());
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn chat_failure_is_a_structured_reply() {
    let transport = RecordingTransport::failing();
    let client = client_with(transport.clone(), RetryPolicy::no_retry());

    let reply = client.send_chat("hello").await;
    assert!(!reply.success);
    assert!(reply.response.is_none());
    assert!(reply.error.unwrap().starts_with("connection failed"));
    assert!(!reply.session_id.is_empty());
    assert!(!client.is_chat_in_flight());
}

#[tokio::test]
async fn second_chat_is_rejected_while_first_is_in_flight() {
    let transport = Arc::new(GatedTransport {
        calls: AtomicUsize::new(0),
        gate: Notify::new(),
    });
    let client = client_with(transport.clone(), RetryPolicy::no_retry());

    let (first, second) = tokio::join!(client.send_chat("first"), async {
        while !client.is_chat_in_flight() {
            tokio::task::yield_now().await;
        }
        let reply = client.send_chat("second").await;
        transport.gate.notify_one();
        reply
    });

    assert!(first.success);
    assert!(!second.success);
    assert_eq!(
        second.error.as_deref(),
        Some(ClientError::ChatInFlight.to_string().as_str())
    );
    // The rejected send never reached the transport.
    assert_eq!(transport.calls.load(Ordering::SeqCst), 1);

    // Once the first settled, a new send is accepted.
    let third = client.send_chat("third").await;
    assert!(third.success);
    assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn chat_is_accepted_again_after_a_failure() {
    let transport = RecordingTransport::failing();
    let client = client_with(transport.clone(), RetryPolicy::no_retry());

    assert!(!client.send_chat("one").await.success);
    assert!(!client.send_chat("two").await.success);
    assert_eq!(transport.requests().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn chat_uses_the_generation_budget() {
    // 40s is past the ordinary 30s budget but inside the 90s one.
    let transport = RecordingTransport::slow(json!({"response": "slow"}), Duration::from_secs(40));
    let client = client_with(transport.clone(), RetryPolicy::no_retry());

    let reply = client.send_chat("think hard").await;
    assert!(reply.success, "chat should outlast the ordinary budget: {reply:?}");

    let err = client.health().await.unwrap_err();
    assert!(err.is_timeout());
}

#[tokio::test]
async fn chat_history_reads_session_path() {
    let transport = RecordingTransport::replying(json!({"history": [{"role": "user"}]}));
    let client = client_with(transport.clone(), RetryPolicy::no_retry());
    let session_id = client.session_id().unwrap();

    let history = client.chat_history().await;
    assert_eq!(history, vec![json!({"role": "user"})]);
    assert_eq!(
        transport.requests()[0].path,
        format!("/api/chat/history/{session_id}")
    );
}

#[tokio::test]
async fn chat_history_soft_fails_to_empty() {
    let client = client_with(RecordingTransport::failing(), RetryPolicy::no_retry());
    assert!(client.chat_history().await.is_empty());
    assert!(client.try_chat_history().await.is_err());
}

// ---------------------------------------------------------------------------
// Connectivity
// ---------------------------------------------------------------------------

#[tokio::test]
async fn connection_check_reports_both_verdicts_with_session() {
    let up = client_with(
        RecordingTransport::replying(json!({"status": "ok"})),
        RetryPolicy::no_retry(),
    );
    let status = up.test_connection().await;
    assert!(status.connected);
    assert_eq!(status.health, Some(json!({"status": "ok"})));
    assert_eq!(status.session_id, up.session_id().unwrap());

    let down = client_with(RecordingTransport::failing(), RetryPolicy::no_retry());
    let status = down.test_connection().await;
    assert!(!status.connected);
    assert!(status.error.is_some());
    assert_eq!(status.session_id, down.session_id().unwrap());
}
