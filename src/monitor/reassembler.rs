//! Line reassembly for non-line-aligned byte chunks.
//!
//! Tail sources hand over whatever bytes were available, split at arbitrary
//! points. The reassembler keeps the bytes after the last newline and
//! prepends them to the next chunk, so every line is emitted exactly once and
//! no byte is dropped.

/// Split `remainder + chunk` into complete lines and a new remainder.
///
/// Lines are returned without their `\n`. The last split element always
/// becomes the remainder, even when empty.
pub fn reassemble(remainder: &[u8], chunk: &[u8]) -> (Vec<Vec<u8>>, Vec<u8>) {
    let mut buf = Vec::with_capacity(remainder.len() + chunk.len());
    buf.extend_from_slice(remainder);
    buf.extend_from_slice(chunk);

    let mut lines = Vec::new();
    let mut start = 0;
    for (i, b) in buf.iter().enumerate() {
        if *b == b'\n' {
            lines.push(buf[start..i].to_vec());
            start = i + 1;
        }
    }
    let rest = buf.split_off(start);
    (lines, rest)
}

/// Stateful reassembler owned by one tail session.
#[derive(Debug, Default, Clone)]
pub struct LineReassembler {
    remainder: Vec<u8>,
}

impl LineReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return the raw bytes of each completed line.
    pub fn feed_raw(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        let (lines, rest) = reassemble(&self.remainder, chunk);
        self.remainder = rest;
        lines
    }

    /// Feed a chunk and return completed lines as text.
    ///
    /// A trailing `\r` is stripped and invalid UTF-8 is replaced rather than
    /// rejected. Empty lines are kept; the segmenter uses them as separators.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.feed_raw(chunk)
            .into_iter()
            .map(|raw| {
                let bytes = raw.strip_suffix(b"\r").unwrap_or(&raw);
                String::from_utf8_lossy(bytes).into_owned()
            })
            .collect()
    }

    /// Bytes received after the last newline
    pub fn remainder(&self) -> &[u8] {
        &self.remainder
    }

    pub fn reset(&mut self) {
        self.remainder.clear();
    }
}
