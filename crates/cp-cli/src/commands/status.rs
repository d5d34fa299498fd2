use cp_bridge::Orchestrator;
use cp_client::ConnectionStatus;

use super::{friendly_error, print_json};

/// Run the `status` subcommand: check the service and print the verdict.
pub async fn run(orch: &Orchestrator) -> anyhow::Result<()> {
    let status = orch.test_connection().await;
    println!("{}", render(&status));
    Ok(())
}

/// Run the `health` subcommand: print the raw health report.
pub async fn health(orch: &Orchestrator) -> anyhow::Result<()> {
    let health = orch.health().await.map_err(friendly_error)?;
    print_json(&health)
}

fn render(status: &ConnectionStatus) -> String {
    let mut out = String::from("command-post status\n");
    out.push_str(&"-".repeat(40));
    out.push('\n');
    let verdict = if status.connected { "connected" } else { "disconnected" };
    out.push_str(&format!("Service:     {verdict}\n"));
    out.push_str(&format!("Session id:  {}\n", status.session_id));
    if let Some(health) = &status.health {
        let label = health["status"].as_str().unwrap_or("unknown");
        out.push_str(&format!("Health:      {label}\n"));
    }
    if let Some(error) = &status.error {
        out.push_str(&format!("Error:       {error}\n"));
    }
    out
}
