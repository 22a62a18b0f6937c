//! Chunked line splitting for process output

use crate::engine::environment::ExecutionEnvironment;

/// Longest line kept in memory before it is flushed in pieces
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Accumulates raw output chunks and yields complete, scrubbed lines.
///
/// Lines are decoded lossily, scrubbed of secrets, right-trimmed, and dropped
/// when empty. An overlong line is flushed at a character boundary; enough
/// of its tail stays buffered that a secret straddling the cut is still
/// masked once the rest arrives.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns the lines it completed
    pub fn push(&mut self, chunk: &[u8], environment: &ExecutionEnvironment) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.pending[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            let text = String::from_utf8_lossy(&self.pending[start..end]);
            if let Some(line) = clean(&environment.scrub(&text)) {
                lines.push(line);
            }
            start = end + 1;
        }
        self.pending.drain(..start);

        if self.pending.len() >= MAX_LINE_BYTES {
            if let Some(line) = self.flush_overlong(environment) {
                lines.push(line);
            }
        }
        lines
    }

    /// Flush a trailing partial line at end of stream
    pub fn finish(&mut self, environment: &ExecutionEnvironment) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        clean(&environment.scrub(&String::from_utf8_lossy(&rest)))
    }

    fn flush_overlong(&mut self, environment: &ExecutionEnvironment) -> Option<String> {
        let complete = complete_prefix(&self.pending);
        let scrubbed = environment.scrub(&String::from_utf8_lossy(&self.pending[..complete]));

        // A secret may start in the last `longest - 1` bytes and end in the next read
        let hold_back = environment
            .longest_secret()
            .saturating_sub(1)
            .min(MAX_LINE_BYTES / 2);
        let mut cut = scrubbed.len().saturating_sub(hold_back);
        while !scrubbed.is_char_boundary(cut) {
            cut -= 1;
        }

        let mut rest = scrubbed.as_bytes()[cut..].to_vec();
        rest.extend_from_slice(&self.pending[complete..]);
        self.pending = rest;
        clean(&scrubbed[..cut])
    }
}

/// Length of the prefix that does not end inside a UTF-8 sequence
fn complete_prefix(bytes: &[u8]) -> usize {
    let len = bytes.len();
    for back in 1..=len.min(4) {
        let byte = bytes[len - back];
        if byte & 0b1100_0000 == 0b1000_0000 {
            continue;
        }
        let width = match byte {
            b if b >> 5 == 0b110 => 2,
            b if b >> 4 == 0b1110 => 3,
            b if b >> 3 == 0b1_1110 => 4,
            _ => 1,
        };
        return if width > back { len - back } else { len };
    }
    len
}

fn clean(text: &str) -> Option<String> {
    let text = text.trim_end();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}
