//! Output processing.
//!
//! Process pipes and PTYs deliver arbitrary byte chunks; frames carry text.
//!
//! # Example
//!
//! ```
//! use shell_relay::output::Utf8ChunkDecoder;
//!
//! let mut decoder = Utf8ChunkDecoder::new();
//! assert_eq!(decoder.push(b"caf\xC3"), "caf");
//! assert_eq!(decoder.push(b"\xA9"), "é");
//! ```

mod decoder;

pub use decoder::Utf8ChunkDecoder;
