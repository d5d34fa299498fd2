use anyhow::Context;
use cp_bridge::Orchestrator;
use serde_json::Value;

use super::{friendly_error, print_json};

pub async fn edicts(orch: &Orchestrator) -> anyhow::Result<()> {
    print_json(&orch.edicts().await.map_err(friendly_error)?)
}

/// Run the `run` subcommand. `context` must be a JSON document.
pub async fn run_edict(orch: &Orchestrator, name: &str, context: &str) -> anyhow::Result<()> {
    let context = parse_context(context)?;
    let result = orch
        .execute_edict(name, context)
        .await
        .map_err(friendly_error)?;
    println!("edict {name:?} triggered");
    print_json(&result)
}

pub async fn schedules(orch: &Orchestrator) -> anyhow::Result<()> {
    print_json(&orch.schedules().await.map_err(friendly_error)?)
}

pub async fn consciousness(orch: &Orchestrator, query: Option<&str>) -> anyhow::Result<()> {
    let value = match query {
        Some(q) => orch.consciousness_query(q, Value::Null).await,
        None => orch.consciousness_status().await,
    };
    print_json(&value.map_err(friendly_error)?)
}

pub async fn logs(orch: &Orchestrator, limit: u32) -> anyhow::Result<()> {
    print_json(&orch.logs(limit).await.map_err(friendly_error)?)
}

pub async fn integrations(orch: &Orchestrator) -> anyhow::Result<()> {
    print_json(&orch.integrations().await.map_err(friendly_error)?)
}

pub async fn stats(orch: &Orchestrator) -> anyhow::Result<()> {
    print_json(&orch.stats().await.map_err(friendly_error)?)
}

fn parse_context(raw: &str) -> anyhow::Result<Value> {
    serde_json::from_str(raw).with_context(|| format!("--context is not valid JSON: {raw}"))
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::extract::{Path, State};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::json;

    use super::*;
    use crate::commands::testing::{dead_base, orchestrator, serve};

    #[test]
    fn context_must_be_json() {
        assert_eq!(parse_context(r#"{"a":1}"#).unwrap(), json!({"a": 1}));
        let err = parse_context("not json").unwrap_err();
        assert!(err.to_string().contains("--context is not valid JSON"));
    }

    #[tokio::test]
    async fn run_edict_posts_parsed_context() {
        let seen: Arc<Mutex<Vec<(String, Value)>>> = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route(
                "/webhook/{name}",
                post(
                    |State(seen): State<Arc<Mutex<Vec<(String, Value)>>>>,
                     Path(name): Path<String>,
                     Json(body): Json<Value>| async move {
                        seen.lock().unwrap().push((name, body));
                        Json(json!({"queued": true}))
                    },
                ),
            )
            .with_state(seen.clone());
        let orch = orchestrator(&serve(app).await);

        run_edict(&orch, "deploy", r#"{"env":"staging"}"#).await.unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(seen.as_slice(), &[("deploy".to_string(), json!({"env": "staging"}))]);
    }

    #[tokio::test]
    async fn read_only_views_succeed_against_service() {
        let app = Router::new()
            .route("/edicts", get(|| async { Json(json!([])) }))
            .route("/cron/jobs", get(|| async { Json(json!([])) }))
            .route("/consciousness/status", get(|| async { Json(json!({"awake": true})) }))
            .route("/logs", get(|| async { Json(json!([])) }))
            .route("/stats", get(|| async { Json(json!({})) }))
            .route("/wekan/status", get(|| async { Json(json!({})) }))
            .route("/foundry/cards", get(|| async { Json(json!([])) }))
            .route("/foundry/stats", get(|| async { Json(json!({})) }))
            .route("/foundry/reports", get(|| async { Json(json!([])) }));
        let orch = orchestrator(&serve(app).await);

        edicts(&orch).await.unwrap();
        schedules(&orch).await.unwrap();
        consciousness(&orch, None).await.unwrap();
        logs(&orch, 10).await.unwrap();
        stats(&orch).await.unwrap();
        integrations(&orch).await.unwrap();
    }

    #[tokio::test]
    async fn failures_propagate() {
        let orch = orchestrator(&dead_base().await);
        assert!(edicts(&orch).await.is_err());
        assert!(integrations(&orch).await.is_err());
    }
}
