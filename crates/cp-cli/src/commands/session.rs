use cp_bridge::Orchestrator;

use super::friendly_error;

/// Print the session identifier, replacing it first when `reset` is set.
pub fn run(orch: &Orchestrator, reset: bool) -> anyhow::Result<()> {
    if reset {
        let id = orch.reset_session_id()?;
        println!("new session id: {id}");
    } else {
        println!("{}", orch.session_id().map_err(friendly_error)?);
    }
    Ok(())
}
