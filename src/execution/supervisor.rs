//! One-shot command supervision.
//!
//! Every accepted `command` becomes one child process. Its stdout and stderr
//! are pumped on their own tasks and the child is owned by a supervising
//! task that also handles cancellation, so the forced-kill timer dies with
//! the process. Cancellation targets the whole process group and stays
//! armed until both pipes close, so a background job that outlives the
//! shell is still reachable.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Notify};
use tokio::time::Instant as Deadline;
use tracing::{debug, info, trace, warn};

use super::result::{exit_code_from_status, OutputStream, EXIT_SPAWN_FAILED};
use crate::error::RelayError;
use crate::output::Utf8ChunkDecoder;
use crate::protocol::{ClientId, HostEvent, HostEventSender};
use crate::security::sanitize_for_display;
use crate::shell::ShellCandidate;
use crate::Result;

/// Time a process gets to exit after the graceful signal.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(3);

const READ_BUFFER_SIZE: usize = 4096;

/// Identifies one one-shot command on the host.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    pub client_id: Option<ClientId>,
    pub request_id: String,
}

impl RequestKey {
    pub fn new(client_id: Option<ClientId>, request_id: impl Into<String>) -> Self {
        Self {
            client_id,
            request_id: request_id.into(),
        }
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.client_id {
            Some(client_id) => write!(f, "{}/{}", client_id, self.request_id),
            None => write!(f, "-/{}", self.request_id),
        }
    }
}

struct RunningCommand {
    cancel: Option<oneshot::Sender<()>>,
    started_at: Instant,
    pid: Option<u32>,
}

#[derive(Default)]
struct Registry {
    running: HashMap<RequestKey, RunningCommand>,
    /// Keys that reached a terminal state. Never spawned again.
    retired: HashSet<RequestKey>,
}

struct Inner {
    cwd: PathBuf,
    shells: Vec<ShellCandidate>,
    grace: Duration,
    events: HostEventSender,
    registry: Mutex<Registry>,
    /// Woken whenever the last running command is retired.
    idle: Notify,
}

impl Inner {
    fn registry(&self) -> Result<MutexGuard<'_, Registry>> {
        self.registry.lock().map_err(|_| RelayError::LockPoisoned)
    }

    fn emit(&self, event: HostEvent) {
        if self.events.send(event).is_err() {
            trace!("event receiver dropped");
        }
    }

    fn fail(&self, key: &RequestKey, message: String, code: i32) {
        self.emit(OutputStream::Stderr.frame(key.client_id, &key.request_id, message));
        self.emit(HostEvent::Exit {
            client_id: key.client_id,
            request_id: Some(key.request_id.clone()),
            code,
        });
    }

    /// Move a key from running to retired. Returns when it was started.
    fn retire(&self, key: &RequestKey) -> Option<Instant> {
        let mut registry = self.registry().ok()?;
        registry.retired.insert(key.clone());
        let started_at = registry.running.remove(key).map(|c| c.started_at);
        if registry.running.is_empty() {
            self.idle.notify_waiters();
        }
        started_at
    }
}

/// Runs and tracks one-shot commands.
#[derive(Clone)]
pub struct ProcessSupervisor {
    inner: Arc<Inner>,
}

impl ProcessSupervisor {
    /// Create a supervisor that runs commands in `cwd` using the first
    /// spawnable shell of `shells`.
    pub fn new(cwd: impl Into<PathBuf>, shells: Vec<ShellCandidate>, events: HostEventSender) -> Self {
        Self::with_grace(cwd, shells, events, DEFAULT_GRACE)
    }

    /// Same as [`ProcessSupervisor::new`] with a custom grace window.
    pub fn with_grace(
        cwd: impl Into<PathBuf>,
        shells: Vec<ShellCandidate>,
        events: HostEventSender,
        grace: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                cwd: cwd.into(),
                shells,
                grace,
                events,
                registry: Mutex::new(Registry::default()),
                idle: Notify::new(),
            }),
        }
    }

    /// Start `command` under `key`.
    ///
    /// Failures are reported as events (`stderr` then `exit`); the returned
    /// error only covers internal state corruption.
    pub fn execute(&self, key: RequestKey, command: &str) -> Result<()> {
        {
            let registry = self.inner.registry()?;
            if registry.running.contains_key(&key) || registry.retired.contains(&key) {
                drop(registry);
                warn!(request = %key, "duplicate request id");
                self.inner.fail(
                    &key,
                    format!("duplicate requestId: {}\n", key.request_id),
                    EXIT_SPAWN_FAILED,
                );
                return Ok(());
            }
        }

        let (mut child, shell) = match spawn_first(&self.inner.shells, &self.inner.cwd, command) {
            Ok(spawned) => spawned,
            Err(message) => {
                warn!(request = %key, error = %message, "no shell could be started");
                self.inner.registry()?.retired.insert(key.clone());
                self.inner.fail(
                    &key,
                    format!("failed to start shell: {}\n", message),
                    EXIT_SPAWN_FAILED,
                );
                return Ok(());
            }
        };

        let pid = child.id();
        info!(
            request = %key,
            shell = shell.name(),
            pid = ?pid,
            command = %sanitize_for_display(command),
            "command started"
        );

        let (cancel_tx, cancel_rx) = oneshot::channel();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        self.inner.registry()?.running.insert(
            key.clone(),
            RunningCommand {
                cancel: Some(cancel_tx),
                started_at: Instant::now(),
                pid,
            },
        );

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            supervise(inner, key, child, stdout, stderr, cancel_rx).await;
        });

        Ok(())
    }

    /// Mark `key` as finished without running anything, e.g. after a policy
    /// rejection. Later commands with the same key are refused.
    pub fn retire(&self, key: RequestKey) -> Result<()> {
        self.inner.registry()?.retired.insert(key);
        Ok(())
    }

    /// Request termination of a running command.
    ///
    /// Returns `false` if nothing runs under `key`.
    pub fn cancel(&self, key: &RequestKey) -> Result<bool> {
        let mut registry = self.inner.registry()?;
        let Some(command) = registry.running.get_mut(key) else {
            debug!(request = %key, "cancel for unknown request ignored");
            return Ok(false);
        };
        if let Some(cancel) = command.cancel.take() {
            info!(request = %key, pid = ?command.pid, "cancelling command");
            let _ = cancel.send(());
        }
        Ok(true)
    }

    /// Cancel every command of one client and forget its finished ids.
    pub fn cancel_client(&self, client_id: ClientId) -> Result<usize> {
        let mut registry = self.inner.registry()?;
        registry.retired.retain(|k| k.client_id != Some(client_id));

        let mut cancelled = 0;
        for (key, command) in registry.running.iter_mut() {
            if key.client_id != Some(client_id) {
                continue;
            }
            if let Some(cancel) = command.cancel.take() {
                let _ = cancel.send(());
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            info!(client = %client_id, count = cancelled, "cancelled client commands");
        }
        Ok(cancelled)
    }

    /// Cancel everything, e.g. when the relay connection goes away.
    pub fn terminate_all(&self, reason: &str) -> Result<usize> {
        let mut registry = self.inner.registry()?;
        let mut cancelled = 0;
        for command in registry.running.values_mut() {
            if let Some(cancel) = command.cancel.take() {
                let _ = cancel.send(());
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            info!(reason, count = cancelled, "terminating all commands");
        }
        Ok(cancelled)
    }

    /// Wait until no command is running.
    ///
    /// Pair with [`ProcessSupervisor::terminate_all`] and a timeout; a
    /// command is only retired once its whole process group is gone.
    pub async fn wait_idle(&self) -> Result<()> {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let idle = self.inner.registry()?.running.is_empty();
            if idle {
                return Ok(());
            }
            notified.await;
        }
    }

    /// Grace window between the graceful signal and the forced kill.
    pub fn grace(&self) -> Duration {
        self.inner.grace
    }

    /// Whether a command is currently running under `key`.
    pub fn is_running(&self, key: &RequestKey) -> Result<bool> {
        Ok(self.inner.registry()?.running.contains_key(key))
    }

    /// Number of running commands.
    pub fn running_count(&self) -> Result<usize> {
        Ok(self.inner.registry()?.running.len())
    }
}

fn spawn_first<'a>(
    shells: &'a [ShellCandidate],
    cwd: &Path,
    command: &str,
) -> std::result::Result<(Child, &'a ShellCandidate), String> {
    let mut last_error = String::from("no shell candidates");

    for shell in shells {
        let mut cmd = Command::new(&shell.program);
        cmd.args(shell.one_shot_args(command))
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group so cancellation reaches grandchildren too.
        #[cfg(unix)]
        cmd.process_group(0);

        match cmd.spawn() {
            Ok(child) => return Ok((child, shell)),
            Err(e) => {
                debug!(shell = %shell.program, error = %e, "shell candidate failed to spawn");
                last_error = format!("{}: {}", shell.program, e);
            }
        }
    }

    Err(last_error)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Running,
    Graceful,
    Forced,
    Abandoned,
}

async fn supervise(
    inner: Arc<Inner>,
    key: RequestKey,
    mut child: Child,
    stdout: Option<tokio::process::ChildStdout>,
    stderr: Option<tokio::process::ChildStderr>,
    mut cancel_rx: oneshot::Receiver<()>,
) {
    // The group id stays valid after the leader is reaped while any member
    // is still alive.
    let pgid = child.id();

    let stdout_pump = tokio::spawn(pump(
        stdout,
        OutputStream::Stdout,
        key.clone(),
        inner.events.clone(),
    ));
    let stderr_pump = tokio::spawn(pump(
        stderr,
        OutputStream::Stderr,
        key.clone(),
        inner.events.clone(),
    ));
    let pumps = [stdout_pump.abort_handle(), stderr_pump.abort_handle()];
    let drained = async move {
        let _ = tokio::join!(stdout_pump, stderr_pump);
    };
    tokio::pin!(drained);

    let mut status = None;
    let mut pipes_open = true;
    let mut listening = true;
    let mut stage = Stage::Running;
    let mut deadline = Deadline::now();

    while status.is_none() || pipes_open {
        tokio::select! {
            result = child.wait(), if status.is_none() => status = Some(result),
            _ = &mut drained, if pipes_open => pipes_open = false,
            received = &mut cancel_rx, if listening => {
                listening = false;
                if received.is_ok() {
                    debug!(request = %key, pid = ?pgid, leader_exited = status.is_some(), "terminating process group");
                    signal_graceful(&mut child, pgid);
                    stage = Stage::Graceful;
                    deadline = Deadline::now() + inner.grace;
                }
            }
            _ = tokio::time::sleep_until(deadline), if matches!(stage, Stage::Graceful | Stage::Forced) => {
                if stage == Stage::Graceful {
                    warn!(request = %key, pid = ?pgid, "process ignored graceful signal, killing");
                    force_kill(&mut child, pgid);
                    stage = Stage::Forced;
                    deadline = Deadline::now() + inner.grace;
                } else {
                    warn!(request = %key, "output still open after kill, abandoning pipes");
                    for pump in &pumps {
                        pump.abort();
                    }
                    pipes_open = false;
                    stage = Stage::Abandoned;
                }
            }
        }
    }

    let code = match status {
        Some(Ok(status)) => exit_code_from_status(&status),
        Some(Err(e)) => {
            warn!(request = %key, error = %e, "failed to reap command");
            EXIT_SPAWN_FAILED
        }
        None => EXIT_SPAWN_FAILED,
    };

    let elapsed = inner.retire(&key).map(|t| t.elapsed());
    info!(request = %key, code, elapsed = ?elapsed, "command finished");

    inner.emit(HostEvent::Exit {
        client_id: key.client_id,
        request_id: Some(key.request_id),
        code,
    });
}

async fn pump<R>(reader: Option<R>, stream: OutputStream, key: RequestKey, events: HostEventSender)
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return;
    };
    let mut decoder = Utf8ChunkDecoder::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                trace!(request = %key, stream = stream.as_str(), "read {} bytes", n);
                let text = decoder.push(&buf[..n]);
                if !text.is_empty() {
                    let _ = events.send(stream.frame(key.client_id, &key.request_id, text));
                }
            }
            Err(e) => {
                debug!(request = %key, stream = stream.as_str(), error = %e, "pipe read failed");
                break;
            }
        }
    }

    let rest = decoder.finish();
    if !rest.is_empty() {
        let _ = events.send(stream.frame(key.client_id, &key.request_id, rest));
    }
}

#[cfg(unix)]
fn signal_graceful(child: &mut Child, pgid: Option<u32>) {
    if let Some(pgid) = pgid {
        if signal_group(pgid, libc::SIGTERM) {
            return;
        }
    }
    let _ = child.start_kill();
}

#[cfg(not(unix))]
fn signal_graceful(child: &mut Child, _pgid: Option<u32>) {
    let _ = child.start_kill();
}

fn force_kill(child: &mut Child, pgid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pgid) = pgid {
        signal_group(pgid, libc::SIGKILL);
    }
    #[cfg(not(unix))]
    let _ = pgid;
    // Fails harmlessly once the leader has been reaped.
    let _ = child.start_kill();
}

/// Signal the whole process group led by `pid`.
#[cfg(unix)]
fn signal_group(pid: u32, signal: libc::c_int) -> bool {
    let Ok(pgid) = i32::try_from(pid) else {
        return false;
    };
    // SAFETY: kill(2) with a negative pid targets the group; no memory is touched.
    let rc = unsafe { libc::kill(-pgid, signal) };
    if rc == -1 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            warn!(pgid, signal, error = %err, "failed to signal process group");
        }
        return false;
    }
    true
}
