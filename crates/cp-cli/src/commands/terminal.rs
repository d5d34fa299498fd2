use cp_bridge::{Orchestrator, PanelEvent};
use cp_core::types::TaskContext;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

/// End-of-transmission: closes the shell's input the way Ctrl-D does.
const EOT: &str = "\u{4}";

/// Options of the `claude` subcommand.
#[derive(Debug, Clone, Default)]
pub struct ClaudeLaunch {
    pub task: Option<String>,
    pub priority: Option<String>,
    pub context: Option<String>,
    pub ui_context: bool,
}

impl ClaudeLaunch {
    fn task(&self) -> Option<TaskContext> {
        let title = self.task.as_deref()?;
        let task = TaskContext::new(title);
        Some(match &self.priority {
            Some(p) => task.with_priority(p),
            None => task,
        })
    }
}

/// Run the `shell` subcommand: attach this terminal to the session.
pub async fn shell(orch: &Orchestrator) -> anyhow::Result<()> {
    let events = orch.subscribe();
    let id = orch.terminal_start();
    debug!(session = %id, "attached to terminal");
    attach(orch, events, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Run the `claude` subcommand: launch the assistant, then attach.
pub async fn claude(orch: &Orchestrator, launch: ClaudeLaunch) -> anyhow::Result<()> {
    let events = orch.subscribe();
    let task = launch.task();
    let command = if launch.ui_context {
        orch.start_claude_with_ui_context(task.as_ref()).await?
    } else {
        orch.terminal_start_claude(task.as_ref(), launch.context.as_deref())?
    };
    info!(%command, "assistant launched");
    attach(orch, events, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Pump `input` into the terminal and terminal output into `output` until
/// the session exits.
async fn attach<R, W>(
    orch: &Orchestrator,
    events: flume::Receiver<PanelEvent>,
    mut input: R,
    mut output: W,
) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = [0u8; 1024];
    let mut input_open = true;
    loop {
        tokio::select! {
            event = events.recv_async() => match event {
                Ok(PanelEvent::TerminalOutput { data, .. }) => {
                    output.write_all(data.as_bytes()).await?;
                    output.flush().await?;
                }
                Ok(PanelEvent::TerminalReady { .. }) => {}
                Ok(PanelEvent::TerminalExit { code, .. }) => {
                    debug!(?code, "terminal exited");
                    return Ok(());
                }
                Ok(PanelEvent::TerminalError { message, .. }) => {
                    anyhow::bail!("terminal error: {message}");
                }
                Err(_) => return Ok(()),
            },
            read = input.read(&mut buf), if input_open => match read? {
                0 => {
                    input_open = false;
                    orch.terminal_write(EOT);
                }
                n => orch.terminal_write(&String::from_utf8_lossy(&buf[..n])),
            },
        }
    }
}
