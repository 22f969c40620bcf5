//! Console line reassembly

/// A partial line is flushed as a line of its own once it reaches this size
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Splits a byte stream into lines, holding back a trailing partial line
/// until its newline arrives.
///
/// Lines are decoded as lossy UTF-8 after splitting, so a multi-byte
/// character cut across two reads is still decoded intact. A trailing `\r`
/// is stripped and empty lines are dropped. Output that never ends a line is
/// cut into [`MAX_LINE_LEN`] pieces.
#[derive(Debug, Default)]
pub struct LineSplitter {
    partial: Vec<u8>,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and collect every line it completes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            self.partial.extend_from_slice(&rest[..pos]);
            if let Some(line) = take_line(&mut self.partial) {
                lines.push(line);
            }
            rest = &rest[pos + 1..];
        }
        self.partial.extend_from_slice(rest);

        while self.partial.len() >= MAX_LINE_LEN {
            let tail = self.partial.split_off(MAX_LINE_LEN);
            if let Some(line) = take_line(&mut self.partial) {
                lines.push(line);
            }
            self.partial = tail;
        }

        lines
    }

    /// Flush whatever is buffered; used at end of stream
    pub fn finish(&mut self) -> Option<String> {
        take_line(&mut self.partial)
    }

    /// True while a partial line is buffered
    pub fn has_partial(&self) -> bool {
        !self.partial.is_empty()
    }
}

fn take_line(buffer: &mut Vec<u8>) -> Option<String> {
    if buffer.last() == Some(&b'\r') {
        buffer.pop();
    }
    if buffer.is_empty() {
        return None;
    }
    let line = String::from_utf8_lossy(buffer).into_owned();
    buffer.clear();
    Some(line)
}
