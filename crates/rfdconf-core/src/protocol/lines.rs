//! Line assembly for CRLF-terminated modem output

/// Accumulates raw bytes and yields complete text lines.
///
/// Lines end at `\n`; surrounding whitespace (including the `\r` of CRLF)
/// is trimmed. Bytes after the last newline stay buffered until more data
/// arrives or [`LineBuffer::take_partial`] is called.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(decode_line(&raw[..raw.len() - 1]));
        }
        lines
    }

    /// Take whatever trailing fragment is buffered, if it is not blank
    pub fn take_partial(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.pending);
        let line = decode_line(&raw);
        if line.is_empty() {
            None
        } else {
            Some(line)
        }
    }
}

fn decode_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).trim().to_string()
}

/// Escape control characters so wire traffic logs on one line
pub fn escape_for_log(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len());
    for &b in data {
        match b {
            b'\r' => out.push_str("\\r"),
            b'\n' => out.push_str("\\n"),
            b'\\' => out.push_str("\\\\"),
            0x20..=0x7e => out.push(b as char),
            other => out.push_str(&format!("\\x{:02x}", other)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_split_across_chunks() {
        let mut buf = LineBuffer::new();
        assert!(buf.push(b"ATS3").is_empty());
        assert_eq!(buf.push(b"?\r\n25\r"), vec!["ATS3?"]);
        assert_eq!(buf.push(b"\nOK\r\n"), vec!["25", "OK"]);
        assert_eq!(buf.take_partial(), None);
    }

    #[test]
    fn test_blank_lines_are_kept() {
        let mut buf = LineBuffer::new();
        assert_eq!(buf.push(b"\r\nRFD SiK 2.0\r\n\r\n"), vec!["", "RFD SiK 2.0", ""]);
    }

    #[test]
    fn test_partial_fragment() {
        let mut buf = LineBuffer::new();
        buf.push(b"S3:NETID=2");
        assert_eq!(buf.take_partial().as_deref(), Some("S3:NETID=2"));
        assert_eq!(buf.take_partial(), None);

        buf.push(b"\r");
        assert_eq!(buf.take_partial(), None);
    }

    #[test]
    fn test_escape_for_log() {
        assert_eq!(escape_for_log(b"ATS3?\r\n"), "ATS3?\\r\\n");
        assert_eq!(escape_for_log(&[0x00, b'+']), "\\x00+");
    }
}
