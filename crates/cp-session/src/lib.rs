//! The interactive shell behind the panel's terminal view.
//!
//! A [`session::ProcessSession`] exclusively owns one shell running inside a
//! pseudo-terminal. Callers interact with it only through fire-and-forget
//! operations (`write`, `resize`, `kill`) and an ordered stream of
//! [`session::SessionEvent`]s. On top of that, [`composer`] builds the
//! assistant invocation from the selected task and injects it into the shell.
//!
//! Key components:
//! - PTY spawning with reader/writer threads bridged onto `flume` channels
//! - A broadcast event bus so several consumers can watch one session
//! - Command composition with shell-safe quoting

pub mod composer;
pub mod events;
pub mod pty;
pub mod session;

pub use composer::{start_with_context, CommandComposer, ComposedCommand, ShellQuoting};
pub use events::EventBus;
pub use pty::SessionError;
pub use session::{ProcessSession, SessionConfig, SessionEvent, SessionStatus};
