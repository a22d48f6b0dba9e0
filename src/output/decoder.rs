//! Incremental UTF-8 decoding for process and PTY output.

/// Decodes a byte stream into text chunk by chunk.
///
/// A multi-byte character split across two reads is held back until the
/// rest arrives. Invalid sequences become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8ChunkDecoder {
    pending: Vec<u8>,
}

impl Utf8ChunkDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes, returning all text that is complete so far.
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::with_capacity(self.pending.len());

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        // Truncated sequence at the end: wait for more input.
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                    }
                }
            }
        }

        out
    }

    /// Flush whatever is left at end of stream.
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }

    /// Number of bytes held back waiting for completion.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_ascii() {
        let mut decoder = Utf8ChunkDecoder::new();
        assert_eq!(decoder.push(b"hello\n"), "hello\n");
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn test_split_multibyte() {
        // "é" is 0xC3 0xA9
        let mut decoder = Utf8ChunkDecoder::new();
        assert_eq!(decoder.push(b"caf\xC3"), "caf");
        assert_eq!(decoder.pending_len(), 1);
        assert_eq!(decoder.push(b"\xA9!"), "é!");
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn test_split_four_byte() {
        let bytes = "🦀".as_bytes();
        let mut decoder = Utf8ChunkDecoder::new();
        assert_eq!(decoder.push(&bytes[..1]), "");
        assert_eq!(decoder.push(&bytes[1..3]), "");
        assert_eq!(decoder.push(&bytes[3..]), "🦀");
    }

    #[test]
    fn test_invalid_bytes_replaced() {
        let mut decoder = Utf8ChunkDecoder::new();
        assert_eq!(decoder.push(b"a\xFFb"), "a\u{FFFD}b");
    }

    #[test]
    fn test_finish_flushes_truncated() {
        let mut decoder = Utf8ChunkDecoder::new();
        assert_eq!(decoder.push(b"x\xE2\x82"), "x");
        assert_eq!(decoder.finish(), "\u{FFFD}");
        assert_eq!(decoder.finish(), "");
    }
}
