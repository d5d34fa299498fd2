use cp_bridge::Orchestrator;
use serde_json::Value;

/// Send one message. A failed send is printed, not raised: the reply is
/// always something to show.
pub async fn send(orch: &Orchestrator, message: &str) -> anyhow::Result<()> {
    let reply = orch.send_chat(message).await;
    println!("{}", reply.display_text());
    if !reply.success {
        tracing::debug!(session_id = %reply.session_id, "chat send did not succeed");
    }
    Ok(())
}

pub async fn history(orch: &Orchestrator) -> anyhow::Result<()> {
    let entries = orch.chat_history().await;
    if entries.is_empty() {
        println!("(no chat history)");
        return Ok(());
    }
    for entry in &entries {
        println!("{}", render_entry(entry));
    }
    Ok(())
}

fn render_entry(entry: &Value) -> String {
    let role = entry["role"]
        .as_str()
        .or_else(|| entry["sender"].as_str())
        .unwrap_or("?");
    let text = entry["content"]
        .as_str()
        .or_else(|| entry["message"].as_str())
        .map(str::to_string)
        .unwrap_or_else(|| entry.to_string());
    format!("{role}: {text}")
}
