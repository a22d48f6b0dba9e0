//! Host-side dispatch of relay frames.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::execution::{ProcessSupervisor, RequestKey, EXIT_POLICY_REJECTED};
use crate::protocol::{notice, ClientId, HostCommand, HostEvent, HostEventSender, ProtocolFamily};
use crate::pty::PtyMultiplexer;
use crate::security::{sanitize_for_display, CommandPolicy, Verdict};
use crate::shell::ShellCandidate;
use crate::Result;

/// Extra time on top of two grace windows for the last reap.
const REAP_MARGIN: Duration = Duration::from_secs(1);

/// Composes policy, process supervision and PTY multiplexing behind one
/// frame handler.
///
/// Every outcome is reported through the event channel given at
/// construction; [`HostSessionManager::handle`] itself only fails on
/// internal state corruption.
pub struct HostSessionManager {
    mode: ProtocolFamily,
    policy: CommandPolicy,
    supervisor: ProcessSupervisor,
    pty: PtyMultiplexer,
    events: HostEventSender,
}

impl HostSessionManager {
    pub fn new(
        mode: ProtocolFamily,
        policy: CommandPolicy,
        shells: Vec<ShellCandidate>,
        events: HostEventSender,
    ) -> Self {
        let cwd = policy.config().cwd.clone();
        Self {
            mode,
            supervisor: ProcessSupervisor::new(cwd.clone(), shells.clone(), events.clone()),
            pty: PtyMultiplexer::new(cwd, shells, events.clone()),
            policy,
            events,
        }
    }

    pub fn mode(&self) -> ProtocolFamily {
        self.mode
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    pub fn pty(&self) -> &PtyMultiplexer {
        &self.pty
    }

    /// Handle one frame from the relay.
    pub fn handle(&self, frame: HostCommand) -> Result<()> {
        match frame {
            HostCommand::Command {
                client_id,
                command,
                request_id,
            } => self.run_command(RequestKey::new(Some(client_id), request_id), &command),
            HostCommand::Cancel {
                client_id,
                request_id,
            } => {
                let key = RequestKey::new(Some(client_id), request_id);
                if !self.supervisor.cancel(&key)? && self.pty.interrupt(client_id)? {
                    debug!(client = %client_id, "cancel forwarded to interactive shell");
                }
                Ok(())
            }
            HostCommand::Input { client_id, data } => self.pty.write(client_id, data.as_bytes()),
            HostCommand::Resize {
                client_id,
                cols,
                rows,
            } => self.pty.resize(client_id, cols, rows),
            HostCommand::System { client_id, message } => self.on_notice(client_id, &message),
            HostCommand::Error { message } => {
                warn!(error = %message, "relay rejected a frame");
                Ok(())
            }
        }
    }

    /// Stop every process and shell, e.g. when the relay connection is gone.
    pub fn shutdown(&self, reason: &str) -> Result<()> {
        self.supervisor.terminate_all(reason)?;
        self.pty.kill_all()?;
        Ok(())
    }

    /// [`HostSessionManager::shutdown`], then wait for every command's
    /// process group to be reaped. Bounded by the supervisor's graceful and
    /// forced windows plus a margin.
    pub async fn shutdown_and_wait(&self, reason: &str) -> Result<()> {
        self.shutdown(reason)?;
        let limit = self.supervisor.grace() * 2 + REAP_MARGIN;
        if tokio::time::timeout(limit, self.supervisor.wait_idle())
            .await
            .is_err()
        {
            warn!(
                running = self.supervisor.running_count()?,
                "commands still running after shutdown"
            );
        }
        Ok(())
    }

    fn run_command(&self, key: RequestKey, command: &str) -> Result<()> {
        match self.policy.evaluate(command) {
            Verdict::Accept => self.supervisor.execute(key, command),
            Verdict::Warn(reason) => {
                info!(request = %key, reason = %reason, "running command with warning");
                self.emit(HostEvent::system(key.client_id, format!("warning: {}", reason)));
                self.supervisor.execute(key, command)
            }
            Verdict::Reject(violation) => {
                warn!(
                    request = %key,
                    command = %sanitize_for_display(command),
                    reason = %violation,
                    "command rejected"
                );
                self.emit(HostEvent::Stderr {
                    client_id: key.client_id,
                    request_id: key.request_id.clone(),
                    data: format!("command rejected: {}\n", violation),
                });
                self.emit(HostEvent::Exit {
                    client_id: key.client_id,
                    request_id: Some(key.request_id.clone()),
                    code: EXIT_POLICY_REJECTED,
                });
                self.supervisor.retire(key)
            }
        }
    }

    fn on_notice(&self, client_id: Option<ClientId>, message: &str) -> Result<()> {
        match (message, client_id) {
            (notice::CLIENT_CONNECTED, Some(client_id)) => {
                info!(client = %client_id, "client connected");
                if self.mode == ProtocolFamily::Interactive {
                    self.pty.ensure_session(client_id)?;
                }
            }
            (notice::CLIENT_DISCONNECTED, Some(client_id)) => {
                info!(client = %client_id, "client disconnected");
                self.pty.kill(client_id)?;
                self.supervisor.cancel_client(client_id)?;
            }
            (notice::SUPERSEDED, _) => {
                warn!("another host connection took over this host id");
            }
            _ => {
                debug!(client = ?client_id, message, "relay notice");
            }
        }
        Ok(())
    }

    fn emit(&self, event: HostEvent) {
        let _ = self.events.send(event);
    }
}

impl Drop for HostSessionManager {
    fn drop(&mut self) {
        let _ = self.shutdown("host session manager dropped");
    }
}
