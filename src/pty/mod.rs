//! PTY (Pseudo-Terminal) abstraction layer.
//!
//! This module provides a platform-independent interface for working with
//! pseudo-terminals (Unix PTY and Windows ConPTY) and the per-client
//! interactive shell multiplexer built on it.

mod multiplexer;
mod native;
mod pump;

pub use multiplexer::PtyMultiplexer;
pub use native::{NativePty, SpawnedPty};
pub use pump::{spawn_input_pump, spawn_output_pump};

/// Smallest accepted width in columns.
pub const MIN_COLS: u16 = 20;
/// Smallest accepted height in rows.
pub const MIN_ROWS: u16 = 5;

/// Size of a PTY in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtySize {
    /// Number of rows (height).
    pub rows: u16,
    /// Number of columns (width).
    pub cols: u16,
}

impl PtySize {
    /// Create a new PtySize with the given dimensions.
    pub fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }

    /// Size from a `resize` frame, clamped to the minimum.
    pub fn from_frame(cols: u16, rows: u16) -> Self {
        Self::new(rows, cols).clamped()
    }

    /// Raise both dimensions to at least [`MIN_COLS`] x [`MIN_ROWS`].
    pub fn clamped(self) -> Self {
        Self {
            rows: self.rows.max(MIN_ROWS),
            cols: self.cols.max(MIN_COLS),
        }
    }

    pub(crate) fn to_native(self) -> portable_pty::PtySize {
        portable_pty::PtySize {
            rows: self.rows,
            cols: self.cols,
            pixel_width: 0,
            pixel_height: 0,
        }
    }
}

impl Default for PtySize {
    fn default() -> Self {
        Self { rows: 30, cols: 120 }
    }
}
