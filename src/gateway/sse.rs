//! Server-sent-event framing for the streaming endpoint.
//!
//! The backend streams events of the form
//!
//! ```text
//! data: {"candidates": [...]}
//!
//! data: {"candidates": [...]}
//! ```
//!
//! and terminates by closing the connection. Network reads split these at
//! arbitrary byte offsets, including inside multi-byte UTF-8 sequences, so
//! [`SseFramer`] buffers raw bytes and only decodes complete lines.
//!
//! # Examples
//!
//! ```
//! use concierge::gateway::sse::SseFramer;
//!
//! let mut framer = SseFramer::new();
//! assert!(framer.push(b"data: {\"a\"").is_empty());
//! let payloads = framer.push(b":1}\n\n");
//! assert_eq!(payloads, vec!["{\"a\":1}".to_string()]);
//! ```

/// Incremental SSE decoder yielding complete `data` payloads.
#[derive(Debug, Default)]
pub struct SseFramer {
    pending: Vec<u8>,
    data_lines: Vec<String>,
}

impl SseFramer {
    /// Create an empty framer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes from the network. Returns payloads completed by this read.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut payloads = Vec::new();

        while let Some(newline) = self.pending.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=newline).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(payload) = self.process_line(&line) {
                payloads.push(payload);
            }
        }

        payloads
    }

    /// Flush a trailing event left without its blank-line terminator.
    ///
    /// Call once the connection closes.
    pub fn finish(&mut self) -> Option<String> {
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            let line = String::from_utf8_lossy(&rest);
            let line = line.trim_end_matches('\r').to_owned();
            self.process_line(&line);
        }
        self.take_event()
    }

    fn process_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            return self.take_event();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        // `event`, `id` and `retry` carry nothing this backend uses.
        if field == "data" {
            self.data_lines.push(value.to_owned());
        }
        None
    }

    fn take_event(&mut self) -> Option<String> {
        if self.data_lines.is_empty() {
            return None;
        }
        let payload = self.data_lines.join("\n");
        self.data_lines.clear();
        if payload.trim() == "[DONE]" {
            return None;
        }
        Some(payload)
    }
}
