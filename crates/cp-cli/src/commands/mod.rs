pub mod chat;
pub mod remote;
pub mod session;
pub mod status;
pub mod terminal;

use cp_client::ClientError;
use serde_json::Value;

/// Map client errors to messages a person at a terminal can act on.
pub fn friendly_error(err: ClientError) -> anyhow::Error {
    match err {
        ClientError::Connection { attempts, cause, .. } => anyhow::anyhow!(
            "Could not reach the command-post service after {attempts} attempt(s): {cause}\n  \
             (hint: is it running? check --api-url or COMMAND_POST_URL)"
        ),
        ClientError::Timeout { endpoint, .. } => anyhow::anyhow!(
            "{endpoint} is taking too long. The service may be busy; try again shortly."
        ),
        other => anyhow::anyhow!("{other}"),
    }
}

/// Pretty-print a JSON value to stdout.
pub fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
