//! Native PTY implementation using portable-pty.

use std::io::{Read, Write};
use std::path::Path;

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty};

use super::PtySize;
use crate::error::RelayError;
use crate::Result;

/// Wrapper around the native PTY system.
pub struct NativePty {
    pty_system: Box<dyn portable_pty::PtySystem + Send>,
}

impl NativePty {
    /// Create a new NativePty instance.
    pub fn new() -> Self {
        Self {
            pty_system: native_pty_system(),
        }
    }

    /// Spawn a program in a new PTY.
    ///
    /// # Arguments
    ///
    /// * `program` - The shell to execute (e.g., "bash", "powershell.exe").
    /// * `args` - Arguments for the shell.
    /// * `cwd` - Working directory, inherited when `None`.
    /// * `size` - The initial size of the PTY.
    pub fn spawn(
        &self,
        program: &str,
        args: &[String],
        cwd: Option<&Path>,
        size: PtySize,
    ) -> Result<SpawnedPty> {
        let pair = self
            .pty_system
            .openpty(size.to_native())
            .map_err(|e| RelayError::Pty(e.to_string()))?;

        let mut cmd = CommandBuilder::new(program);
        cmd.args(args);
        if let Some(dir) = cwd {
            cmd.cwd(dir);
        }
        if std::env::var_os("TERM").is_none() {
            cmd.env("TERM", "xterm-256color");
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| RelayError::SpawnFailed(format!("{}: {}", program, e)))?;

        // Only the child may hold the slave side, otherwise reads never see EOF.
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| RelayError::Pty(e.to_string()))?;

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| RelayError::Pty(e.to_string()))?;

        let pid = child.process_id();

        Ok(SpawnedPty {
            master: pair.master,
            child,
            reader,
            writer,
            pid,
        })
    }
}

impl Default for NativePty {
    fn default() -> Self {
        Self::new()
    }
}

/// A process running in a PTY, split into its parts.
pub struct SpawnedPty {
    /// Master side, used for resizing.
    pub master: Box<dyn MasterPty + Send>,
    /// The spawned process.
    pub child: Box<dyn Child + Send + Sync>,
    /// Output of the process.
    pub reader: Box<dyn Read + Send>,
    /// Input of the process.
    pub writer: Box<dyn Write + Send>,
    /// Process ID, if the platform reports one.
    pub pid: Option<u32>,
}
