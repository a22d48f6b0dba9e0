//! Execution result types.

use std::process::ExitStatus;

use crate::protocol::{ClientId, HostEvent};

/// Exit code reported when the policy rejects a command.
pub const EXIT_POLICY_REJECTED: i32 = 126;

/// Exit code reported when no shell could be started.
pub const EXIT_SPAWN_FAILED: i32 = 1;

/// Which pipe a chunk of output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

impl OutputStream {
    /// Build the host event carrying `data` for this stream.
    pub fn frame(self, client_id: Option<ClientId>, request_id: &str, data: String) -> HostEvent {
        let request_id = request_id.to_string();
        match self {
            Self::Stdout => HostEvent::Stdout {
                client_id,
                request_id,
                data,
            },
            Self::Stderr => HostEvent::Stderr {
                client_id,
                request_id,
                data,
            },
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// Exit code of a finished process.
///
/// A process killed by a signal reports `128 + signal`, the shell
/// convention.
pub fn exit_code_from_status(status: &ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    1
}
