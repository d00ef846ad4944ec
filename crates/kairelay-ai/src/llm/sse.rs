//! Incremental decoder for upstream `text/event-stream` bodies.

use crate::error::{AiError, Result};

/// Longest line held while waiting for its terminator.
pub const MAX_LINE_BYTES: usize = 8 * 1024 * 1024;

/// One decoded upstream SSE frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// Value of the `event:` field, if the frame carried one.
    pub event: Option<String>,
    /// All `data:` lines of the frame joined with `\n`.
    pub data: String,
}

/// Splits a byte stream into SSE frames as chunks arrive.
///
/// Lines end with `\r\n`, `\n` or `\r`, in any mix; a blank line completes
/// the frame. Chunks may split lines or multi-byte characters anywhere.
/// Each byte is scanned once.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    /// Bytes of `buffer` already known to hold no line terminator.
    scanned: usize,
    /// The last line ended in a chunk-final CR; drop a leading LF next.
    skip_lf: bool,
    event: Option<String>,
    data: Option<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every frame it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<SseFrame>> {
        if chunk.is_empty() {
            return Ok(Vec::new());
        }
        self.buffer.extend_from_slice(chunk);

        let mut start = 0;
        if std::mem::take(&mut self.skip_lf) && self.buffer.first() == Some(&b'\n') {
            start = 1;
        }
        let mut cursor = self.scanned.max(start);
        let mut frames = Vec::new();

        while let Some(offset) = self.buffer[cursor..]
            .iter()
            .position(|b| *b == b'\n' || *b == b'\r')
        {
            let end = cursor + offset;
            let terminator_len = match (self.buffer[end], self.buffer.get(end + 1)) {
                (b'\r', Some(b'\n')) => 2,
                (b'\r', None) => {
                    self.skip_lf = true;
                    1
                }
                _ => 1,
            };

            let line = String::from_utf8_lossy(&self.buffer[start..end]).into_owned();
            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
            start = end + terminator_len;
            cursor = start;
        }

        self.buffer.drain(..start);
        self.scanned = self.buffer.len();

        if self.buffer.len() > MAX_LINE_BYTES {
            return Err(AiError::InvalidFormat(format!(
                "Upstream event line exceeds {MAX_LINE_BYTES} bytes"
            )));
        }
        Ok(frames)
    }

    /// Flush a trailing frame that was not terminated by a blank line.
    pub fn finish(&mut self) -> Option<SseFrame> {
        let raw = std::mem::take(&mut self.buffer);
        self.scanned = 0;
        self.skip_lf = false;

        if !raw.is_empty() {
            let line = String::from_utf8_lossy(&raw).into_owned();
            self.process_line(&line);
        }
        self.dispatch()
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => match self.data.as_mut() {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(value);
                }
                None => self.data = Some(value.to_string()),
            },
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        self.data.take().map(|data| SseFrame { event, data })
    }
}
