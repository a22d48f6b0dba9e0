//! Blocking PTY handles bridged onto the runtime.
//!
//! portable-pty only hands out `std::io` readers and writers, so each
//! direction gets its own blocking thread.

use std::io::{ErrorKind, Read, Write};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::output::Utf8ChunkDecoder;
use crate::protocol::{ClientId, HostEvent, HostEventSender};

const READ_CHUNK: usize = 4096;

/// Whether a read error means the terminal is gone rather than a fault.
fn is_hangup(e: &std::io::Error) -> bool {
    // Linux reports EIO once every slave handle is closed.
    #[cfg(unix)]
    if e.raw_os_error() == Some(libc::EIO) {
        return true;
    }
    matches!(e.kind(), ErrorKind::BrokenPipe | ErrorKind::UnexpectedEof)
}

/// Stream a shell's terminal output to its client as `output` events.
///
/// The task ends at EOF or hangup, after flushing any partial UTF-8
/// sequence. Joining it is how callers know every byte has been emitted.
pub fn spawn_output_pump<R>(mut reader: R, client_id: ClientId, events: HostEventSender) -> JoinHandle<()>
where
    R: Read + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut decoder = Utf8ChunkDecoder::new();
        let mut buf = vec![0u8; READ_CHUNK];
        let emit = |data: String| {
            if data.is_empty() {
                return true;
            }
            events
                .send(HostEvent::Output {
                    client_id: Some(client_id),
                    data,
                })
                .is_ok()
        };

        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    trace!(client = %client_id, bytes = n, "pty output");
                    if !emit(decoder.push(&buf[..n])) {
                        debug!(client = %client_id, "event channel closed, output dropped");
                        return;
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if is_hangup(&e) => break,
                Err(e) => {
                    warn!(client = %client_id, error = %e, "pty read failed");
                    break;
                }
            }
        }
        emit(decoder.finish());
        debug!(client = %client_id, "pty output closed");
    })
}

/// Start feeding keystrokes into a shell's terminal.
///
/// Dropping every sender ends the pump; a failed write ends it early and
/// later input is discarded.
pub fn spawn_input_pump<W>(mut writer: W) -> (mpsc::UnboundedSender<Vec<u8>>, JoinHandle<()>)
where
    W: Write + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let handle = tokio::task::spawn_blocking(move || {
        while let Some(data) = rx.blocking_recv() {
            if let Err(e) = writer.write_all(&data).and_then(|_| writer.flush()) {
                if e.kind() != ErrorKind::BrokenPipe {
                    warn!(error = %e, "pty write failed");
                }
                return;
            }
        }
    });
    (tx, handle)
}
