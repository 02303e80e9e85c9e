//! Byte-to-line framing for the device stream.
//!
//! Serial reads return arbitrary slices of the byte stream: a multi-byte UTF-8
//! character or a line terminator can straddle two reads. `LineFramer` keeps the
//! undecoded tail and the unterminated text between calls so that the sequence
//! of yielded lines does not depend on how the stream was chunked.

use bytes::{Buf, BytesMut};

const REPLACEMENT: char = char::REPLACEMENT_CHARACTER;

/// Default longest line, in bytes, before the terminator.
pub const DEFAULT_MAX_LINE_BYTES: usize = 8192;

/// Streaming framer that turns raw chunks into complete text lines.
///
/// Lines are split on `\n`; a `\r` immediately before the `\n` is removed. The
/// trailing fragment without a terminator is retained and never yielded.
/// Lines longer than the limit are dropped whether they arrive whole or in
/// pieces.
#[derive(Debug)]
pub struct LineFramer {
    /// Bytes of a UTF-8 sequence that is not complete yet
    pending: BytesMut,
    /// Decoded text of the current unterminated line
    buffer: String,
    /// Longest line (including a trailing `\r`) that is yielded
    max_line_bytes: usize,
    /// Set while discarding an oversized fragment until the next terminator
    discarding: bool,
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl LineFramer {
    /// Framer with the default 8 KiB line limit.
    pub fn new() -> Self {
        Self::with_max_line_bytes(DEFAULT_MAX_LINE_BYTES)
    }

    /// Framer dropping lines longer than `max_line_bytes`.
    pub fn with_max_line_bytes(max_line_bytes: usize) -> Self {
        Self {
            pending: BytesMut::with_capacity(4),
            buffer: String::with_capacity(256),
            max_line_bytes: max_line_bytes.max(1),
            discarding: false,
        }
    }

    /// Feed one chunk and collect the lines it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.decode_into_buffer(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let mut line: String = self.buffer.drain(..=pos).collect();
            line.pop();
            let oversized = self.discarding || line.len() > self.max_line_bytes;
            self.discarding = false;
            if oversized {
                tracing::debug!(limit = self.max_line_bytes, "Dropped oversized line");
                continue;
            }
            if line.ends_with('\r') {
                line.pop();
            }
            lines.push(line);
        }

        if self.buffer.len() > self.max_line_bytes {
            tracing::warn!(
                bytes = self.buffer.len(),
                limit = self.max_line_bytes,
                "Unterminated line exceeds limit, discarding until next terminator"
            );
            self.buffer.clear();
            self.discarding = true;
        }

        lines
    }

    /// The unterminated text currently held.
    pub fn remainder(&self) -> &str {
        &self.buffer
    }

    /// Drop all buffered state, e.g. after reconnecting.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.buffer.clear();
        self.discarding = false;
    }

    fn decode_into_buffer(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    self.pending.clear();
                    return;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    if let Ok(text) = std::str::from_utf8(&self.pending[..valid]) {
                        self.buffer.push_str(text);
                    }
                    match err.error_len() {
                        Some(bad) => {
                            self.buffer.push(REPLACEMENT);
                            self.pending.advance(valid + bad);
                        }
                        None => {
                            // Incomplete sequence at the end; wait for more bytes.
                            self.pending.advance(valid);
                            return;
                        }
                    }
                }
            }
        }
    }
}
