use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use cp_client::error::ClientError;
use cp_client::executor::{RequestExecutor, RetryPolicy};
use cp_client::service::{ServiceClient, ServiceTimeouts};
use cp_client::transport::{ApiRequest, HttpTransport};
use cp_core::identity::SessionIdentity;
use cp_core::storage::MemoryStore;
use serde_json::{json, Value};

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn fast_executor(base: &str, max_attempts: u32) -> RequestExecutor {
    RequestExecutor::new(
        Arc::new(HttpTransport::new(base)),
        RetryPolicy::new(max_attempts, Duration::from_millis(10)),
    )
}

#[tokio::test]
async fn recovers_from_server_errors() {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route(
            "/health",
            get(|State(hits): State<Arc<AtomicUsize>>| async move {
                if hits.fetch_add(1, Ordering::SeqCst) < 2 {
                    (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "warming up"})))
                } else {
                    (StatusCode::OK, Json(json!({"status": "ok"})))
                }
            }),
        )
        .with_state(hits.clone());
    let base = serve(app).await;

    let value = fast_executor(&base, 3)
        .execute(&ApiRequest::get("/health"), Duration::from_secs(5))
        .await
        .expect("third attempt succeeds");
    assert_eq!(value, json!({"status": "ok"}));
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn client_errors_are_retried_too() {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route(
            "/edicts",
            get(|State(hits): State<Arc<AtomicUsize>>| async move {
                hits.fetch_add(1, Ordering::SeqCst);
                (StatusCode::NOT_FOUND, "missing")
            }),
        )
        .with_state(hits.clone());
    let base = serve(app).await;

    let err = fast_executor(&base, 3)
        .execute(&ApiRequest::get("/edicts"), Duration::from_secs(5))
        .await
        .unwrap_err();
    assert_eq!(hits.load(Ordering::SeqCst), 3);
    assert_eq!(err.to_string(), "connection failed: HTTP 404: missing");
}

#[tokio::test]
async fn query_and_body_reach_the_server() {
    let app = Router::new()
        .route(
            "/logs",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                Json(json!({ "limit": params.get("limit") }))
            }),
        )
        .route(
            "/webhook/{name}",
            post(|Path(name): Path<String>, Json(body): Json<Value>| async move {
                Json(json!({ "edict": name, "received": body }))
            }),
        );
    let base = serve(app).await;

    let identity = Arc::new(SessionIdentity::new(Arc::new(MemoryStore::new())));
    let client = ServiceClient::new(
        fast_executor(&base, 1),
        identity,
        ServiceTimeouts::default(),
    );

    let logs = client.logs(7).await.unwrap();
    assert_eq!(logs, json!({"limit": "7"}));

    let run = client
        .execute_edict("deploy", json!({"env": "staging"}))
        .await
        .unwrap();
    assert_eq!(run, json!({"edict": "deploy", "received": {"env": "staging"}}));
}

#[tokio::test]
async fn slow_server_times_out() {
    let app = Router::new().route(
        "/foundry/reports",
        get(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Json(json!([]))
        }),
    );
    let base = serve(app).await;

    let err = fast_executor(&base, 1)
        .execute(
            &ApiRequest::get("/foundry/reports"),
            Duration::from_millis(100),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Timeout { attempts: 1, .. }));
}

#[tokio::test]
async fn non_json_body_is_a_failed_attempt() {
    let app = Router::new().route("/stats", get(|| async { "definitely not json" }));
    let base = serve(app).await;

    let err = fast_executor(&base, 2)
        .execute(&ApiRequest::get("/stats"), Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("invalid response body"), "{err}");
}

#[tokio::test]
async fn refused_connection_reports_connection_failure() {
    // Bind and drop to obtain a port with nothing listening.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = fast_executor(&format!("http://{addr}"), 2)
        .execute(&ApiRequest::get("/health"), Duration::from_secs(5))
        .await
        .unwrap_err();
    match err {
        ClientError::Connection { attempts, .. } => assert_eq!(attempts, 2),
        other => panic!("expected Connection, got: {other:?}"),
    }
}
