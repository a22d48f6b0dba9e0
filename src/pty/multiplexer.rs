//! One interactive shell per connected client.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use portable_pty::{Child, ChildKiller, MasterPty};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{spawn_input_pump, spawn_output_pump, NativePty, PtySize};
use crate::error::RelayError;
use crate::execution::EXIT_SPAWN_FAILED;
use crate::protocol::{ClientId, HostEvent, HostEventSender};
use crate::shell::ShellCandidate;
use crate::Result;

/// Byte sent for `cancel` in interactive mode (Ctrl-C).
const INTERRUPT: u8 = 0x03;

/// How long to wait for trailing output after the shell exits.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

struct PtySession {
    input: mpsc::UnboundedSender<Vec<u8>>,
    master: Box<dyn MasterPty + Send>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    generation: u64,
    shell_name: String,
    size: PtySize,
}

struct Inner {
    cwd: PathBuf,
    shells: Vec<ShellCandidate>,
    events: HostEventSender,
    sessions: Mutex<HashMap<ClientId, PtySession>>,
    /// Last size each client reported; outlives the shell so a respawn
    /// keeps the client's dimensions.
    sizes: Mutex<HashMap<ClientId, PtySize>>,
    generation: AtomicU64,
}

impl Inner {
    fn sessions(&self) -> Result<MutexGuard<'_, HashMap<ClientId, PtySession>>> {
        self.sessions.lock().map_err(|_| RelayError::LockPoisoned)
    }

    fn sizes(&self) -> Result<MutexGuard<'_, HashMap<ClientId, PtySize>>> {
        self.sizes.lock().map_err(|_| RelayError::LockPoisoned)
    }

    fn emit(&self, event: HostEvent) {
        let _ = self.events.send(event);
    }

    /// Drop the session if it is still the one that exited and report the exit.
    fn finish(&self, client_id: ClientId, generation: u64, code: i32) {
        let removed = match self.sessions() {
            Ok(mut sessions) => match sessions.get(&client_id) {
                Some(session) if session.generation == generation => sessions.remove(&client_id),
                _ => None,
            },
            Err(_) => None,
        };

        if let Some(session) = removed {
            info!(client = %client_id, shell = %session.shell_name, code, "interactive shell exited");
            self.emit(HostEvent::Exit {
                client_id: Some(client_id),
                request_id: None,
                code,
            });
        }
    }
}

/// Per-client interactive shells in pseudo-terminals.
#[derive(Clone)]
pub struct PtyMultiplexer {
    inner: Arc<Inner>,
}

impl PtyMultiplexer {
    pub fn new(cwd: impl Into<PathBuf>, shells: Vec<ShellCandidate>, events: HostEventSender) -> Self {
        Self {
            inner: Arc::new(Inner {
                cwd: cwd.into(),
                shells,
                events,
                sessions: Mutex::new(HashMap::new()),
                sizes: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(1),
            }),
        }
    }

    /// Make sure `client_id` has a shell, spawning one at the client's
    /// last-known size (or the default) if not.
    ///
    /// Returns `false` if no shell could be started; the client has then
    /// been told through an `output` diagnostic and `exit` 1.
    pub fn ensure_session(&self, client_id: ClientId) -> Result<bool> {
        let mut sessions = self.inner.sessions()?;
        if sessions.contains_key(&client_id) {
            return Ok(true);
        }
        let size = self.last_size(client_id)?;
        match self.spawn(client_id, size) {
            Some(session) => {
                sessions.insert(client_id, session);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Forward keystrokes, creating the session on first use.
    pub fn write(&self, client_id: ClientId, data: &[u8]) -> Result<()> {
        if !self.ensure_session(client_id)? {
            return Ok(());
        }
        let sessions = self.inner.sessions()?;
        if let Some(session) = sessions.get(&client_id) {
            if session.input.send(data.to_vec()).is_err() {
                debug!(client = %client_id, "PTY writer gone, input dropped");
            }
        }
        Ok(())
    }

    /// Apply a terminal size, clamped to the minimum.
    ///
    /// A client without a session gets one spawned at this size.
    pub fn resize(&self, client_id: ClientId, cols: u16, rows: u16) -> Result<()> {
        let size = PtySize::from_frame(cols, rows);
        let mut sessions = self.inner.sessions()?;
        self.inner.sizes()?.insert(client_id, size);

        if let Some(session) = sessions.get_mut(&client_id) {
            session
                .master
                .resize(size.to_native())
                .map_err(|e| RelayError::Pty(e.to_string()))?;
            session.size = size;
            debug!(client = %client_id, cols = size.cols, rows = size.rows, "PTY resized");
            return Ok(());
        }

        if let Some(session) = self.spawn(client_id, size) {
            sessions.insert(client_id, session);
        }
        Ok(())
    }

    /// Send Ctrl-C to an existing session. Returns `false` if there is none.
    pub fn interrupt(&self, client_id: ClientId) -> Result<bool> {
        let sessions = self.inner.sessions()?;
        match sessions.get(&client_id) {
            Some(session) => Ok(session.input.send(vec![INTERRUPT]).is_ok()),
            None => Ok(false),
        }
    }

    /// Tear down a client's shell without reporting an exit and forget its
    /// terminal size.
    pub fn kill(&self, client_id: ClientId) -> Result<bool> {
        let removed = self.inner.sessions()?.remove(&client_id);
        self.inner.sizes()?.remove(&client_id);
        match removed {
            Some(session) => {
                info!(client = %client_id, shell = %session.shell_name, "killing interactive shell");
                kill_session(session);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Tear down every shell.
    pub fn kill_all(&self) -> Result<usize> {
        let drained: Vec<_> = self.inner.sessions()?.drain().collect();
        self.inner.sizes()?.clear();
        let count = drained.len();
        for (_, session) in drained {
            kill_session(session);
        }
        if count > 0 {
            info!(count, "killed all interactive shells");
        }
        Ok(count)
    }

    pub fn has_session(&self, client_id: ClientId) -> Result<bool> {
        Ok(self.inner.sessions()?.contains_key(&client_id))
    }

    /// Size the next shell for `client_id` would be spawned with.
    pub fn last_size(&self, client_id: ClientId) -> Result<PtySize> {
        Ok(self
            .inner
            .sizes()?
            .get(&client_id)
            .copied()
            .unwrap_or_default())
    }

    /// Current size of a client's PTY.
    pub fn size(&self, client_id: ClientId) -> Result<Option<PtySize>> {
        Ok(self.inner.sessions()?.get(&client_id).map(|s| s.size))
    }

    pub fn session_count(&self) -> Result<usize> {
        Ok(self.inner.sessions()?.len())
    }

    /// Spawn the first viable shell and wire up its I/O tasks.
    fn spawn(&self, client_id: ClientId, size: PtySize) -> Option<PtySession> {
        let pty = NativePty::new();
        let mut last_error = String::from("no shell candidates");

        for shell in &self.inner.shells {
            let spawned = match pty.spawn(
                &shell.program,
                &shell.interactive_args(),
                Some(&self.inner.cwd),
                size,
            ) {
                Ok(spawned) => spawned,
                Err(e) => {
                    debug!(shell = %shell.program, error = %e, "shell candidate failed to spawn");
                    last_error = e.to_string();
                    continue;
                }
            };

            let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
            info!(
                client = %client_id,
                shell = shell.name(),
                pid = ?spawned.pid,
                cols = size.cols,
                rows = size.rows,
                "interactive shell started"
            );

            let forward =
                spawn_output_pump(spawned.reader, client_id, self.inner.events.clone());
            let (input_tx, _) = spawn_input_pump(spawned.writer);

            let killer = spawned.child.clone_killer();
            tokio::spawn(watch_exit(
                Arc::clone(&self.inner),
                client_id,
                generation,
                spawned.child,
                forward,
            ));

            return Some(PtySession {
                input: input_tx,
                master: spawned.master,
                killer,
                generation,
                shell_name: shell.name().to_string(),
                size,
            });
        }

        warn!(client = %client_id, error = %last_error, "no interactive shell could be started");
        self.inner.emit(HostEvent::Output {
            client_id: Some(client_id),
            data: format!("failed to start shell: {}\r\n", last_error),
        });
        self.inner.emit(HostEvent::Exit {
            client_id: Some(client_id),
            request_id: None,
            code: EXIT_SPAWN_FAILED,
        });
        None
    }
}

fn kill_session(mut session: PtySession) {
    if let Err(e) = session.killer.kill() {
        debug!(error = %e, "kill failed, shell probably exited already");
    }
}

async fn watch_exit(
    inner: Arc<Inner>,
    client_id: ClientId,
    generation: u64,
    mut child: Box<dyn Child + Send + Sync>,
    forward: JoinHandle<()>,
) {
    let status = tokio::task::spawn_blocking(move || child.wait()).await;
    let code = match status {
        Ok(Ok(status)) => i32::try_from(status.exit_code()).unwrap_or(EXIT_SPAWN_FAILED),
        Ok(Err(e)) => {
            warn!(client = %client_id, error = %e, "failed to wait for shell");
            EXIT_SPAWN_FAILED
        }
        Err(e) => {
            warn!(client = %client_id, error = %e, "shell wait task failed");
            EXIT_SPAWN_FAILED
        }
    };

    // Output must be on the wire before the exit.
    if tokio::time::timeout(DRAIN_TIMEOUT, forward).await.is_err() {
        debug!(client = %client_id, "PTY output still open after exit, not waiting");
    }

    inner.finish(client_id, generation, code);
}
