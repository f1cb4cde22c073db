//! Line framing for server-sent event bodies.

/// Collects raw body bytes and hands back complete lines.
///
/// Network chunks can end in the middle of a multi-byte UTF-8 character, so bytes are kept
/// undecoded until a full line (terminated by `\n`) has arrived.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and drain every complete line, trimmed of surrounding whitespace.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line).trim().to_string());
        }
        lines
    }

    /// The `data:` payload of a line, if it carries one.
    pub fn data(line: &str) -> Option<&str> {
        line.strip_prefix("data:").map(str::trim)
    }
}
