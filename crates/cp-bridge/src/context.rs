use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cp_core::config::ContextConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("failed to run context helper: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("context helper timed out after {0:?}")]
    Timeout(Duration),

    #[error("context helper exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("context helper produced invalid JSON: {0}")]
    Decode(#[from] serde_json::Error),
}

/// What the desktop currently shows, as reported by the capture helper.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiContext {
    #[serde(default)]
    pub current_view: Option<String>,
    #[serde(default)]
    pub task_count: Option<u32>,
    #[serde(default)]
    pub elements: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UiContext {
    /// A context that carries only a fallback message.
    pub fn fallback(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.error.is_some()
    }

    /// One line suitable for a context flag. Empty when nothing is known.
    pub fn summary(&self) -> String {
        if let Some(error) = &self.error {
            return format!("UI context unavailable: {error}");
        }
        let mut parts = Vec::new();
        if let Some(view) = self.current_view.as_deref().filter(|v| !v.is_empty()) {
            parts.push(format!("View: {view}"));
        }
        if let Some(count) = self.task_count {
            parts.push(format!("Tasks: {count}"));
        }
        if !self.elements.is_empty() {
            parts.push(format!("Elements: {}", self.elements.join(", ")));
        }
        if !self.suggestions.is_empty() {
            parts.push(format!("Suggestions: {}", self.suggestions.join("; ")));
        }
        parts.join(" | ")
    }
}

/// Produces the current UI context. Never fails: problems become a
/// [`UiContext::fallback`].
#[async_trait]
pub trait ContextSource: Send + Sync {
    async fn capture(&self) -> UiContext;
}

/// Used when no helper is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoContext;

#[async_trait]
impl ContextSource for NoContext {
    async fn capture(&self) -> UiContext {
        UiContext::default()
    }
}

/// Runs an external command and reads a JSON [`UiContext`] from its stdout.
#[derive(Debug, Clone)]
pub struct HelperCommandSource {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl HelperCommandSource {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    /// The strict variant of [`ContextSource::capture`].
    pub async fn try_capture(&self) -> Result<UiContext, ContextError> {
        let mut command = tokio::process::Command::new(&self.program);
        command.args(&self.args).kill_on_drop(true);
        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| ContextError::Timeout(self.timeout))??;

        if !output.status.success() {
            return Err(ContextError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        let ctx = serde_json::from_slice(&output.stdout)?;
        debug!(helper = %self.program, "captured UI context");
        Ok(ctx)
    }
}

#[async_trait]
impl ContextSource for HelperCommandSource {
    async fn capture(&self) -> UiContext {
        match self.try_capture().await {
            Ok(ctx) => ctx,
            Err(e) => {
                warn!(helper = %self.program, error = %e, "UI context capture failed");
                UiContext::fallback(e.to_string())
            }
        }
    }
}

/// The helper from `[context]`, or [`NoContext`] when none is set.
pub fn source_from_config(config: &ContextConfig) -> Arc<dyn ContextSource> {
    match config.helper.as_deref().filter(|h| !h.trim().is_empty()) {
        Some(helper) => Arc::new(HelperCommandSource::new(
            helper,
            config.helper_args.clone(),
            Duration::from_millis(config.timeout_ms),
        )),
        None => Arc::new(NoContext),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_joins_known_fields() {
        let ctx = UiContext {
            current_view: Some("Kanban".into()),
            task_count: Some(4),
            elements: vec!["New Task".into(), "Filter".into()],
            suggestions: vec!["Review stale cards".into()],
            error: None,
        };
        assert_eq!(
            ctx.summary(),
            "View: Kanban | Tasks: 4 | Elements: New Task, Filter | Suggestions: Review stale cards"
        );
    }

    #[test]
    fn empty_context_has_empty_summary() {
        assert_eq!(UiContext::default().summary(), "");
    }

    #[test]
    fn fallback_summary_carries_message() {
        let ctx = UiContext::fallback("screen capture denied");
        assert!(ctx.is_fallback());
        assert_eq!(ctx.summary(), "UI context unavailable: screen capture denied");
    }

    #[test]
    fn decodes_camel_case_with_missing_fields() {
        let ctx: UiContext =
            serde_json::from_str(r#"{"currentView":"Chat","taskCount":2}"#).unwrap();
        assert_eq!(ctx.current_view.as_deref(), Some("Chat"));
        assert_eq!(ctx.task_count, Some(2));
        assert!(ctx.elements.is_empty());
    }

    #[tokio::test]
    async fn no_context_is_empty() {
        assert_eq!(NoContext.capture().await, UiContext::default());
    }

    #[tokio::test]
    async fn blank_helper_means_no_context() {
        let cfg = ContextConfig {
            helper: Some("  ".into()),
            ..ContextConfig::default()
        };
        let ctx = source_from_config(&cfg).capture().await;
        assert_eq!(ctx, UiContext::default());
    }

    #[cfg(unix)]
    fn script(body: &str, timeout: Duration) -> HelperCommandSource {
        HelperCommandSource::new("/bin/sh", vec!["-c".into(), body.into()], timeout)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn helper_output_is_decoded() {
        let helper = script(
            r#"printf '%s' '{"currentView":"Kanban","taskCount":3,"elements":["New Task"]}'"#,
            Duration::from_secs(5),
        );
        let ctx = helper.capture().await;
        assert!(!ctx.is_fallback());
        assert_eq!(ctx.current_view.as_deref(), Some("Kanban"));
        assert_eq!(ctx.task_count, Some(3));
        assert_eq!(ctx.elements, vec!["New Task"]);
        assert_eq!(ctx.summary(), "View: Kanban | Tasks: 3 | Elements: New Task");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn helper_exit_code_is_a_failure() {
        let helper = script("echo boom >&2; exit 3", Duration::from_secs(5));
        match helper.try_capture().await {
            Err(ContextError::Failed { status, stderr }) => {
                assert!(status.contains('3'), "{status}");
                assert_eq!(stderr, "boom");
            }
            other => panic!("expected Failed, got {other:?}"),
        }
        let ctx = helper.capture().await;
        assert!(ctx.is_fallback());
        assert!(ctx.summary().starts_with("UI context unavailable: context helper exited"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_helper_times_out() {
        let helper = script("sleep 5", Duration::from_millis(50));
        let started = std::time::Instant::now();
        assert!(matches!(
            helper.try_capture().await,
            Err(ContextError::Timeout(d)) if d == Duration::from_millis(50)
        ));
        assert!(started.elapsed() < Duration::from_secs(4));
        assert!(helper.capture().await.is_fallback());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_json_output_is_a_decode_failure() {
        let helper = script("echo nope", Duration::from_secs(5));
        assert!(matches!(helper.try_capture().await, Err(ContextError::Decode(_))));
        assert!(helper.capture().await.is_fallback());
    }

    #[tokio::test]
    async fn missing_helper_is_a_spawn_failure() {
        let helper = HelperCommandSource::new(
            "/definitely/not/a/context-helper",
            Vec::new(),
            Duration::from_secs(5),
        );
        assert!(matches!(helper.try_capture().await, Err(ContextError::Spawn(_))));
        let ctx = helper.capture().await;
        assert!(ctx.is_fallback());
        assert!(ctx.summary().contains("failed to run context helper"));
    }
}
