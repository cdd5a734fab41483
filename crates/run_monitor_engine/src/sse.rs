use crate::types::StreamError;

/// Incremental decoder for `text/event-stream` bodies.
///
/// Only `data` fields matter here; `event`, `id`, `retry` and comment lines
/// (keepalives) are skipped. Multi-line data is joined with `\n`.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk and returns the data of every message it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<String>, StreamError> {
        self.buffer.extend_from_slice(chunk);
        let mut messages = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = std::str::from_utf8(&line[..line.len() - 1])
                .map_err(|err| StreamError::Malformed(format!("invalid UTF-8: {err}")))?;
            if let Some(message) = self.process_line(line.strip_suffix('\r').unwrap_or(line)) {
                messages.push(message);
            }
        }
        Ok(messages)
    }

    /// Dispatches a message left open when the body ended without the
    /// closing blank line.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        if let Ok(line) = std::str::from_utf8(&rest) {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if !line.is_empty() {
                self.process_line(line);
            }
        }
        self.dispatch()
    }

    fn process_line(&mut self, line: &str) -> Option<String> {
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
        if field == "data" {
            self.data.push(value.to_string());
        }
        None
    }

    fn dispatch(&mut self) -> Option<String> {
        if self.data.is_empty() {
            return None;
        }
        let message = self.data.join("\n");
        self.data.clear();
        Some(message)
    }
}
