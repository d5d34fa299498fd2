use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use cp_core::config::TerminalConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::events::EventBus;
use crate::pty::{lock_child, spawn_pty, PtyHandle, PtySpec, SharedChild};

/// How long the pump waits for an exit status once output has ended.
const EXIT_POLL_ATTEMPTS: u32 = 100;
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Running,
    /// Terminal for this instance; a new session is needed to run again.
    Exited,
}

/// Everything a session reports, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum SessionEvent {
    Ready,
    Output(String),
    Exit { code: Option<u32> },
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Interpreter override; `None` picks one for the host OS.
    pub shell: Option<String>,
    pub working_dir: PathBuf,
    pub cols: u16,
    pub rows: u16,
    pub term: String,
}

impl SessionConfig {
    pub fn from_terminal(config: &TerminalConfig) -> Self {
        Self {
            shell: config.shell.clone(),
            working_dir: config.resolved_working_dir(),
            cols: config.cols,
            rows: config.rows,
            term: config.term.clone(),
        }
    }

    /// The interpreter that will actually be spawned.
    pub fn resolved_shell(&self) -> String {
        self.shell.clone().unwrap_or_else(default_shell)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_terminal(&TerminalConfig::default())
    }
}

/// Pick the interactive interpreter for the host OS.
pub fn default_shell() -> String {
    if cfg!(windows) {
        return "powershell.exe".into();
    }
    if let Ok(shell) = std::env::var("SHELL") {
        if !shell.trim().is_empty() {
            return shell;
        }
    }
    if cfg!(target_os = "macos") {
        "/bin/zsh".into()
    } else {
        "/bin/bash".into()
    }
}

// ---------------------------------------------------------------------------
// ProcessSession
// ---------------------------------------------------------------------------

/// State shared with the output pump thread.
struct Shared {
    status: Mutex<SessionStatus>,
    bus: EventBus<SessionEvent>,
    exit_emitted: AtomicBool,
}

impl Shared {
    fn status(&self) -> MutexGuard<'_, SessionStatus> {
        self.status.lock().unwrap_or_else(|e| {
            warn!("session status lock was poisoned, recovering");
            e.into_inner()
        })
    }

    fn mark_exited(&self, code: Option<u32>) {
        *self.status() = SessionStatus::Exited;
        if !self.exit_emitted.swap(true, Ordering::AcqRel) {
            info!(?code, "shell exited");
            self.bus.publish(SessionEvent::Exit { code });
        }
    }
}

/// Owns one interactive shell inside a PTY.
///
/// `Idle -> Running -> Exited`. All operations return immediately; results
/// arrive on the event stream from [`ProcessSession::subscribe`].
pub struct ProcessSession {
    id: Uuid,
    config: SessionConfig,
    shared: Arc<Shared>,
    handle: Mutex<Option<PtyHandle>>,
}

impl ProcessSession {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            config,
            shared: Arc::new(Shared {
                status: Mutex::new(SessionStatus::Idle),
                bus: EventBus::new(),
                exit_emitted: AtomicBool::new(false),
            }),
            handle: Mutex::new(None),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> flume::Receiver<SessionEvent> {
        self.shared.bus.subscribe()
    }

    pub fn status(&self) -> SessionStatus {
        *self.shared.status()
    }

    pub fn is_running(&self) -> bool {
        self.status() == SessionStatus::Running
    }

    /// Spawn the shell. A no-op while running; on an exited instance, or if
    /// the spawn fails, an `Error` event is published instead.
    pub fn start_session(&self) {
        let mut status = self.shared.status();
        let current = *status;
        match current {
            SessionStatus::Running => {
                debug!(session = %self.id, "start ignored: already running");
                return;
            }
            SessionStatus::Exited => {
                drop(status);
                warn!(session = %self.id, "start refused: session has exited");
                self.shared.bus.publish(SessionEvent::Error(
                    "session has exited; create a new session to run again".into(),
                ));
                return;
            }
            SessionStatus::Idle => {}
        }

        let spec = PtySpec {
            program: self.config.resolved_shell(),
            args: Vec::new(),
            cwd: self.config.working_dir.clone(),
            env: vec![("TERM".into(), self.config.term.clone())],
            cols: self.config.cols,
            rows: self.config.rows,
        };

        let handle = match spawn_pty(&spec) {
            Ok(handle) => handle,
            Err(e) => {
                drop(status);
                error!(session = %self.id, shell = %spec.program, error = %e, "failed to start shell");
                self.shared.bus.publish(SessionEvent::Error(e.to_string()));
                return;
            }
        };

        let output = handle.output();
        let child = handle.child();
        info!(session = %self.id, shell = %spec.program, pid = ?handle.pid(), "shell started");
        *self.lock_handle() = Some(handle);
        *status = SessionStatus::Running;
        drop(status);

        // Ready goes out before the pump can publish any output.
        self.shared.bus.publish(SessionEvent::Ready);

        let shared = Arc::clone(&self.shared);
        let spawned = std::thread::Builder::new()
            .name(format!("session-pump-{}", &self.id.to_string()[..8]))
            .spawn(move || pump(shared, output, child));
        if let Err(e) = spawned {
            error!(session = %self.id, error = %e, "could not start output pump");
            self.shared.bus.publish(SessionEvent::Error(e.to_string()));
            self.kill();
        }
    }

    /// Forward text to the shell's input. Dropped silently unless running.
    pub fn write(&self, data: &str) {
        if !self.is_running() {
            debug!(session = %self.id, "write dropped: session not running");
            return;
        }
        if let Some(handle) = self.lock_handle().as_ref() {
            if let Err(e) = handle.send(data.as_bytes()) {
                warn!(session = %self.id, error = %e, "write failed");
            }
        }
    }

    /// Change the terminal geometry. Ignored unless running.
    pub fn resize(&self, cols: u16, rows: u16) {
        if !self.is_running() {
            return;
        }
        if let Some(handle) = self.lock_handle().as_ref() {
            if let Err(e) = handle.resize(cols, rows) {
                warn!(session = %self.id, error = %e, "resize failed");
            }
        }
    }

    /// Forcibly end the shell. Authoritative immediately: the session is
    /// `Exited` on return, whether or not an `Exit` event follows.
    pub fn kill(&self) {
        let handle = self.lock_handle().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.kill() {
                debug!(session = %self.id, error = %e, "kill reported an error");
            }
            info!(session = %self.id, "shell killed");
        }
        let mut status = self.shared.status();
        if *status == SessionStatus::Running {
            *status = SessionStatus::Exited;
        }
    }

    fn lock_handle(&self) -> MutexGuard<'_, Option<PtyHandle>> {
        self.handle.lock().unwrap_or_else(|e| {
            warn!("session handle lock was poisoned, recovering");
            e.into_inner()
        })
    }
}

impl Drop for ProcessSession {
    fn drop(&mut self) {
        if self.is_running() {
            self.kill();
        }
    }
}

impl std::fmt::Debug for ProcessSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSession")
            .field("id", &self.id)
            .field("status", &self.status())
            .field("working_dir", &self.config.working_dir)
            .finish()
    }
}

/// Forward output chunks in order, then report the exit once.
fn pump(shared: Arc<Shared>, output: flume::Receiver<Vec<u8>>, child: SharedChild) {
    let mut decoder = Utf8Carry::default();
    while let Ok(chunk) = output.recv() {
        let text = decoder.push(&chunk);
        if !text.is_empty() {
            shared.bus.publish(SessionEvent::Output(text));
        }
    }
    let rest = decoder.finish();
    if !rest.is_empty() {
        shared.bus.publish(SessionEvent::Output(rest));
    }
    shared.mark_exited(wait_for_exit(&child));
}

fn wait_for_exit(child: &SharedChild) -> Option<u32> {
    for _ in 0..EXIT_POLL_ATTEMPTS {
        match lock_child(child).try_wait() {
            Ok(Some(status)) => return Some(status.exit_code()),
            Ok(None) => {}
            Err(e) => {
                debug!("could not read exit status: {e}");
                return None;
            }
        }
        std::thread::sleep(EXIT_POLL_INTERVAL);
    }
    None
}

// ---------------------------------------------------------------------------
// Utf8Carry
// ---------------------------------------------------------------------------

/// Decodes a byte stream chunk by chunk without splitting multi-byte
/// characters: an incomplete trailing sequence is held for the next chunk.
#[derive(Debug, Default)]
pub struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    pub fn push(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let split = self.pending.len() - incomplete_tail_len(&self.pending);
        let text = String::from_utf8_lossy(&self.pending[..split]).into_owned();
        self.pending.drain(..split);
        text
    }

    /// Flush whatever is left, replacing an unfinished sequence.
    pub fn finish(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        text
    }
}

/// Length of a trailing UTF-8 sequence whose lead byte promises more bytes
/// than are present.
fn incomplete_tail_len(bytes: &[u8]) -> usize {
    for back in 1..=bytes.len().min(3) {
        let b = bytes[bytes.len() - back];
        if b & 0b1100_0000 == 0b1000_0000 {
            continue;
        }
        let needed = if b & 0b1110_0000 == 0b1100_0000 {
            2
        } else if b & 0b1111_0000 == 0b1110_0000 {
            3
        } else if b & 0b1111_1000 == 0b1111_0000 {
            4
        } else {
            1
        };
        return if needed > back { back } else { 0 };
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_passes_straight_through() {
        let mut d = Utf8Carry::default();
        assert_eq!(d.push(b"hello"), "hello");
        assert_eq!(d.finish(), "");
    }

    #[test]
    fn split_two_byte_char_is_reassembled() {
        let bytes = "café".as_bytes();
        let (a, b) = bytes.split_at(bytes.len() - 1);
        let mut d = Utf8Carry::default();
        assert_eq!(d.push(a), "caf");
        assert_eq!(d.push(b), "é");
    }

    #[test]
    fn four_byte_char_across_four_chunks() {
        let bytes = "🦀".as_bytes();
        let mut d = Utf8Carry::default();
        let mut out = String::new();
        for b in bytes {
            out.push_str(&d.push(std::slice::from_ref(b)));
        }
        assert_eq!(out, "🦀");
    }

    #[test]
    fn unfinished_sequence_is_replaced_on_finish() {
        let mut d = Utf8Carry::default();
        assert_eq!(d.push(&[b'a', 0xE2, 0x82]), "a");
        assert_eq!(d.finish(), "\u{FFFD}");
    }

    #[test]
    fn invalid_bytes_do_not_stall_the_stream() {
        let mut d = Utf8Carry::default();
        assert_eq!(d.push(&[0xFF, b'x']), "\u{FFFD}x");
    }

    #[test]
    fn new_session_is_idle() {
        let session = ProcessSession::new(SessionConfig::default());
        assert_eq!(session.status(), SessionStatus::Idle);
        assert!(!session.is_running());
    }

    #[test]
    fn events_serialise_with_type_tag() {
        let json = serde_json::to_value(SessionEvent::Output("hi".into())).unwrap();
        assert_eq!(json, serde_json::json!({"type": "output", "data": "hi"}));
    }
}
