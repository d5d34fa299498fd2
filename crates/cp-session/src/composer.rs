use std::fmt;

use cp_core::config::AssistantConfig;
use cp_core::types::TaskContext;
use tracing::{debug, info};

use crate::pty::{Result, SessionError};
use crate::session::{ProcessSession, SessionEvent};

/// Builds the assistant invocation for the selected task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandComposer {
    binary: String,
    context_flag: String,
    banner: String,
}

impl CommandComposer {
    pub fn new(
        binary: impl Into<String>,
        context_flag: impl Into<String>,
        banner: impl Into<String>,
    ) -> Self {
        Self {
            binary: binary.into(),
            context_flag: context_flag.into(),
            banner: banner.into(),
        }
    }

    pub fn from_config(config: &AssistantConfig) -> Self {
        Self::new(&config.binary, &config.context_flag, &config.banner)
    }

    /// Task title, then priority, then free-form context, each behind its own
    /// context flag. Blank context counts as absent.
    pub fn compose(&self, task: Option<&TaskContext>, context: Option<&str>) -> ComposedCommand {
        let mut args = Vec::new();
        if let Some(task) = task {
            args.push(self.context_flag.clone());
            args.push(format!("Current Task: {}", task.title));
            if let Some(priority) = &task.priority {
                args.push(self.context_flag.clone());
                args.push(format!("Priority: {priority}"));
            }
        }
        if let Some(context) = context.filter(|c| !c.trim().is_empty()) {
            args.push(self.context_flag.clone());
            args.push(context.to_string());
        }
        ComposedCommand {
            program: self.binary.clone(),
            args,
            quoting: ShellQuoting::default(),
        }
    }

    /// The line that announces the launch inside the terminal.
    pub fn banner_line(&self, quoting: ShellQuoting) -> String {
        format!("echo {}", quoting.quote(&self.banner))
    }
}

impl Default for CommandComposer {
    fn default() -> Self {
        Self::from_config(&AssistantConfig::default())
    }
}

/// How a shell expects a literal argument to be written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ShellQuoting {
    /// sh, bash, zsh: single quotes, with `'` written as `'\''`.
    #[default]
    Posix,
    /// Windows PowerShell and pwsh: single quotes, with quote characters doubled.
    PowerShell,
}

impl ShellQuoting {
    /// Pick the quoting for an interpreter path such as `/bin/zsh` or
    /// `C:\Windows\...\powershell.exe`.
    pub fn for_shell(shell: &str) -> Self {
        let name = shell
            .rsplit(|c: char| c == '/' || c == '\\')
            .next()
            .unwrap_or(shell)
            .to_ascii_lowercase();
        match name.strip_suffix(".exe").unwrap_or(name.as_str()) {
            "powershell" | "pwsh" => Self::PowerShell,
            _ => Self::Posix,
        }
    }

    /// Wrap `arg` so the shell passes it through as one word with no
    /// expansion of any kind, history expansion included.
    pub fn quote(self, arg: &str) -> String {
        let mut out = String::with_capacity(arg.len() + 2);
        out.push('\'');
        for c in arg.chars() {
            match self {
                Self::Posix if c == '\'' => out.push_str(r"'\''"),
                // PowerShell also closes single-quoted strings on the
                // typographic single quotes.
                Self::PowerShell if is_powershell_quote(c) => {
                    out.push(c);
                    out.push(c);
                }
                _ => out.push(c),
            }
        }
        out.push('\'');
        out
    }
}

/// A program plus its arguments, rendered as one shell line on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedCommand {
    pub program: String,
    pub args: Vec<String>,
    pub quoting: ShellQuoting,
}

impl ComposedCommand {
    pub fn with_quoting(mut self, quoting: ShellQuoting) -> Self {
        self.quoting = quoting;
        self
    }

    /// Option names are written bare; every other argument is quoted.
    pub fn to_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            if is_option_name(arg) {
                line.push_str(arg);
            } else {
                line.push_str(&self.quoting.quote(arg));
            }
        }
        line
    }
}

impl fmt::Display for ComposedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_line())
    }
}

fn is_powershell_quote(c: char) -> bool {
    matches!(c, '\'' | '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}')
}

fn is_option_name(arg: &str) -> bool {
    arg.starts_with('-')
        && arg.len() > 1
        && arg.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// Launch the assistant in `session` with the given task context.
///
/// An idle session is started first and the command is injected only after
/// its `Ready` event; a running session gets the command straight away. The
/// banner line and the command are each written followed by a newline, quoted
/// for the session's interpreter.
pub fn start_with_context(
    session: &ProcessSession,
    composer: &CommandComposer,
    task: Option<&TaskContext>,
    context: Option<&str>,
) -> Result<ComposedCommand> {
    if !session.is_running() {
        // Subscribed before starting, so Ready cannot slip past. Dropped on
        // return: a one-shot wait, not a standing listener.
        let events = session.subscribe();
        session.start_session();
        wait_for_ready(session, &events)?;
    }

    let quoting = ShellQuoting::for_shell(&session.config().resolved_shell());
    let command = composer.compose(task, context).with_quoting(quoting);
    let line = command.to_line();
    session.write(&format!("{}\n", composer.banner_line(quoting)));
    session.write(&format!("{line}\n"));
    info!(session = %session.id(), command = %line, "assistant launched");
    Ok(command)
}

/// `start_session` publishes `Ready` or `Error` before it returns, so the
/// outcome is already queued by the time this runs.
fn wait_for_ready(session: &ProcessSession, events: &flume::Receiver<SessionEvent>) -> Result<()> {
    loop {
        match events.try_recv() {
            Ok(SessionEvent::Ready) => return Ok(()),
            Ok(SessionEvent::Output(_)) => continue,
            Ok(SessionEvent::Error(msg)) => return Err(SessionError::SpawnFailed(msg)),
            Ok(SessionEvent::Exit { .. }) => return Err(SessionError::NotRunning),
            // Another caller started it between our check and our start.
            Err(_) if session.is_running() => {
                debug!(session = %session.id(), "session already running, injecting directly");
                return Ok(());
            }
            Err(_) => return Err(SessionError::NotRunning),
        }
    }
}
