use std::io::{Read as IoRead, Write as IoWrite};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use thiserror::Error;
use tracing::{debug, warn};

/// Depth of the byte channels between the PTY threads and the session.
const CHANNEL_DEPTH: usize = 256;
const READ_CHUNK_SIZE: usize = 4096;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("pty spawn failed: {0}")]
    SpawnFailed(String),

    #[error("session is not running")]
    NotRunning,

    #[error("pty I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pty internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, SessionError>;

pub(crate) type SharedChild = Arc<Mutex<Box<dyn Child + Send + Sync>>>;

pub(crate) fn lock_child(child: &SharedChild) -> MutexGuard<'_, Box<dyn Child + Send + Sync>> {
    child.lock().unwrap_or_else(|e| {
        warn!("child lock was poisoned, recovering");
        e.into_inner()
    })
}

// ---------------------------------------------------------------------------
// PtySpec
// ---------------------------------------------------------------------------

/// Everything needed to launch one process inside a PTY.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtySpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
    pub cols: u16,
    pub rows: u16,
}

// ---------------------------------------------------------------------------
// PtyHandle
// ---------------------------------------------------------------------------

/// A running PTY process: output and input are bridged onto channels by two
/// background threads.
pub struct PtyHandle {
    output: flume::Receiver<Vec<u8>>,
    input: flume::Sender<Vec<u8>>,
    child: SharedChild,
    master: Mutex<Box<dyn MasterPty + Send>>,
    pid: Option<u32>,
}

impl PtyHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Receiving end of the raw output stream. The channel disconnects once
    /// the process has closed its side of the terminal.
    pub(crate) fn output(&self) -> flume::Receiver<Vec<u8>> {
        self.output.clone()
    }

    pub(crate) fn child(&self) -> SharedChild {
        Arc::clone(&self.child)
    }

    /// Check whether the underlying child process is still running.
    pub fn is_alive(&self) -> bool {
        matches!(lock_child(&self.child).try_wait(), Ok(None))
    }

    /// Kill the child process.
    pub fn kill(&self) -> Result<()> {
        lock_child(&self.child)
            .kill()
            .map_err(|e| SessionError::Internal(e.to_string()))
    }

    /// Queue bytes for the PTY's stdin.
    pub fn send(&self, data: &[u8]) -> Result<()> {
        self.input
            .send(data.to_vec())
            .map_err(|e| SessionError::Internal(format!("writer channel closed: {e}")))
    }

    pub fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        let master = self.master.lock().unwrap_or_else(|e| {
            warn!("master lock was poisoned, recovering");
            e.into_inner()
        });
        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::Internal(format!("resize failed: {e}")))?;
        debug!(cols, rows, "PTY resized");
        Ok(())
    }
}

impl std::fmt::Debug for PtyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyHandle")
            .field("pid", &self.pid)
            .field("alive", &self.is_alive())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// spawn
// ---------------------------------------------------------------------------

/// Open a PTY with the requested geometry and start `spec.program` in it.
pub fn spawn_pty(spec: &PtySpec) -> Result<PtyHandle> {
    let pair = native_pty_system()
        .openpty(PtySize {
            rows: spec.rows,
            cols: spec.cols,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

    let mut command = CommandBuilder::new(&spec.program);
    command.args(&spec.args);
    command.cwd(&spec.cwd);
    for (k, v) in &spec.env {
        command.env(k, v);
    }

    let child = pair
        .slave
        .spawn_command(command)
        .map_err(|e| SessionError::SpawnFailed(format!("{}: {e}", spec.program)))?;
    // Our copy of the slave must go, or the reader never sees EOF on exit.
    drop(pair.slave);

    let pid = child.process_id();
    debug!(program = %spec.program, ?pid, cwd = %spec.cwd.display(), "spawned PTY process");

    // -- stdout reader thread --
    let (read_tx, read_rx) = flume::bounded::<Vec<u8>>(CHANNEL_DEPTH);
    let mut reader = pair
        .master
        .try_clone_reader()
        .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;
    std::thread::Builder::new()
        .name("pty-reader".into())
        .spawn(move || {
            let mut buf = [0u8; READ_CHUNK_SIZE];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if read_tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        // Linux reports EIO once the child side is gone.
                        debug!("pty reader stopped: {e}");
                        break;
                    }
                }
            }
        })?;

    // -- stdin writer thread --
    let (write_tx, write_rx) = flume::bounded::<Vec<u8>>(CHANNEL_DEPTH);
    let mut writer = pair
        .master
        .take_writer()
        .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;
    std::thread::Builder::new()
        .name("pty-writer".into())
        .spawn(move || {
            while let Ok(data) = write_rx.recv() {
                if writer.write_all(&data).is_err() {
                    break;
                }
                let _ = writer.flush();
            }
        })?;

    Ok(PtyHandle {
        output: read_rx,
        input: write_tx,
        child: Arc::new(Mutex::new(child)),
        master: Mutex::new(pair.master),
        pid,
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sh(script: &str) -> PtySpec {
        PtySpec {
            program: "/bin/sh".into(),
            args: vec!["-c".into(), script.into()],
            cwd: std::env::temp_dir(),
            env: vec![],
            cols: 80,
            rows: 24,
        }
    }

    #[test]
    fn output_channel_disconnects_after_exit() {
        let handle = spawn_pty(&sh("echo done")).expect("spawn sh");
        let rx = handle.output();
        let mut text = Vec::new();
        while let Ok(chunk) = rx.recv_timeout(Duration::from_secs(5)) {
            text.extend_from_slice(&chunk);
        }
        assert!(String::from_utf8_lossy(&text).contains("done"));
        assert!(rx.is_disconnected());
    }

    #[test]
    fn missing_program_fails_to_spawn() {
        let mut spec = sh("true");
        spec.program = "/definitely/not/a/shell".into();
        assert!(matches!(spawn_pty(&spec), Err(SessionError::SpawnFailed(_))));
    }
}
