use std::string::FromUtf8Error;

use logtap_types::{FINAL_MARKER, PARTIAL_MARKER};

/// Unterminated bytes allowed to accumulate before a forced split (16 KiB)
pub const DEFAULT_MAX_PENDING_BYTES: usize = 16 * 1024;

/// How a line left the reassembler
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineKind {
    /// Terminated by a line feed
    Complete,
    /// Force-split because no terminator arrived in time
    Partial,
    /// Leftover bytes flushed when the session ended
    Final,
}

impl LineKind {
    /// Suffix appended to the message when the line is ingested
    pub fn marker(&self) -> &'static str {
        match self {
            Self::Complete => "",
            Self::Partial => PARTIAL_MARKER,
            Self::Final => FINAL_MARKER,
        }
    }
}

/// A line extracted from the captured byte stream
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReassembledLine {
    /// Raw line bytes, without terminator or marker
    pub bytes: Vec<u8>,
    pub kind: LineKind,
}

impl ReassembledLine {
    fn new(bytes: Vec<u8>, kind: LineKind) -> Self {
        Self { bytes, kind }
    }

    /// Decode the line and append the partial/final marker if it has one
    pub fn into_message(self) -> Result<String, FromUtf8Error> {
        let mut text = String::from_utf8(self.bytes)?;
        text.push_str(self.kind.marker());
        Ok(text)
    }
}

/// Splits an arbitrary chunked byte stream into lines
///
/// Holds the unterminated tail between chunks. The tail never grows past
/// `max_pending` bytes: anything longer is cut at its midpoint and the front
/// half emitted as a [`LineKind::Partial`] line.
#[derive(Debug)]
pub struct LineReassembler {
    buffer: Vec<u8>,
    max_pending: usize,
}

impl LineReassembler {
    /// Create a reassembler with the default 16 KiB split threshold
    pub fn new() -> Self {
        Self::with_max_pending(DEFAULT_MAX_PENDING_BYTES)
    }

    /// Create a reassembler with a custom split threshold
    pub fn with_max_pending(max_pending: usize) -> Self {
        Self {
            buffer: Vec::new(),
            // A threshold below 2 could never make progress when splitting
            max_pending: max_pending.max(2),
        }
    }

    /// Append a chunk and return every line it completed, in stream order
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<ReassembledLine> {
        let mut lines = Vec::new();
        if chunk.is_empty() {
            return lines;
        }

        // The retained tail holds no terminator, so only the new bytes need scanning
        let mut cursor = self.buffer.len();
        self.buffer.extend_from_slice(chunk);

        let mut start = 0;
        while let Some(offset) = self.buffer[cursor..].iter().position(|&b| b == b'\n') {
            let end = cursor + offset;
            let mut line = &self.buffer[start..end];
            if let [rest @ .., b'\r'] = line {
                line = rest;
            }
            lines.push(ReassembledLine::new(line.to_vec(), LineKind::Complete));
            start = end + 1;
            cursor = start;
        }
        if start > 0 {
            self.buffer.drain(..start);
        }

        while self.buffer.len() > self.max_pending {
            let mid = split_point(&self.buffer);
            let tail = self.buffer.split_off(mid);
            let head = std::mem::replace(&mut self.buffer, tail);
            tracing::trace!(bytes = head.len(), "force-split oversized line");
            lines.push(ReassembledLine::new(head, LineKind::Partial));
        }

        lines
    }

    /// Emit whatever is still buffered as a final line and reset
    pub fn flush(&mut self) -> Option<ReassembledLine> {
        if self.buffer.is_empty() {
            return None;
        }
        let bytes = std::mem::take(&mut self.buffer);
        Some(ReassembledLine::new(bytes, LineKind::Final))
    }

    /// Number of buffered bytes waiting for a terminator
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for LineReassembler {
    fn default() -> Self {
        Self::new()
    }
}

/// Midpoint of the buffer, moved back so a UTF-8 sequence is not cut in two
fn split_point(buf: &[u8]) -> usize {
    let half = buf.len() / 2;
    let mut mid = half;
    while mid > 0 && is_continuation(buf[mid]) {
        mid -= 1;
    }
    if mid == 0 { half } else { mid }
}

fn is_continuation(byte: u8) -> bool {
    byte & 0xC0 == 0x80
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Rebuild the byte stream from emitted lines
    fn rejoin(lines: &[ReassembledLine]) -> Vec<u8> {
        let mut out = Vec::new();
        for line in lines {
            out.extend_from_slice(&line.bytes);
            if line.kind == LineKind::Complete {
                out.push(b'\n');
            }
        }
        out
    }

    #[test]
    fn test_lines_across_chunks() {
        let mut r = LineReassembler::new();
        assert!(r.feed(b"hel").is_empty());
        let lines = r.feed(b"lo\nwor");
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].bytes, b"hello");
        assert_eq!(r.pending_len(), 3);

        let lines = r.feed(b"ld\n\nnext\n");
        let texts: Vec<_> = lines.iter().map(|l| l.bytes.as_slice()).collect();
        assert_eq!(texts, vec![&b"world"[..], b"", b"next"]);
        assert_eq!(r.pending_len(), 0);
    }

    #[test]
    fn test_any_chunking_reproduces_stream() {
        let input = b"first line\nsecond\n\nthird with \xc3\xa9 accent\ntrailing";
        for size in 1..=input.len() {
            let mut r = LineReassembler::new();
            let mut lines = Vec::new();
            for chunk in input.chunks(size) {
                lines.extend(r.feed(chunk));
            }
            lines.extend(r.flush());
            assert_eq!(rejoin(&lines), input.to_vec(), "chunk size {size}");
            assert_eq!(lines.last().unwrap().kind, LineKind::Final);
        }
    }

    #[test]
    fn test_crlf_is_stripped() {
        let mut r = LineReassembler::new();
        let lines = r.feed(b"windows\r\nunix\n");
        assert_eq!(lines[0].bytes, b"windows");
        assert_eq!(lines[1].bytes, b"unix");
    }

    #[test]
    fn test_oversized_buffer_is_force_split() {
        let mut r = LineReassembler::new();
        let input = vec![b'a'; 40 * 1024];
        let lines = r.feed(&input);

        assert!(!lines.is_empty());
        assert!(lines.iter().all(|l| l.kind == LineKind::Partial));
        assert!(r.pending_len() <= DEFAULT_MAX_PENDING_BYTES);

        let mut all = lines;
        all.extend(r.flush());
        assert_eq!(rejoin(&all), input);
    }

    #[test]
    fn test_complete_lines_precede_partial_split() {
        let mut r = LineReassembler::with_max_pending(8);
        let lines = r.feed(b"one\ntwo\nabcdefghijkl");
        let kinds: Vec<_> = lines.iter().map(|l| l.kind).collect();
        assert_eq!(
            kinds,
            vec![LineKind::Complete, LineKind::Complete, LineKind::Partial]
        );
        assert_eq!(lines[2].bytes, b"abcdef");
        assert_eq!(r.pending_len(), 6);
    }

    #[test]
    fn test_split_keeps_utf8_sequences_whole() {
        let mut r = LineReassembler::with_max_pending(5);
        let input = "ééééééééé".as_bytes();
        let mut lines = r.feed(input);
        lines.extend(r.flush());
        for line in &lines {
            assert!(std::str::from_utf8(&line.bytes).is_ok());
        }
        assert_eq!(rejoin(&lines), input.to_vec());
    }

    #[test]
    fn test_flush_emits_once() {
        let mut r = LineReassembler::new();
        r.feed(b"no newline");
        let line = r.flush().unwrap();
        assert_eq!(line.kind, LineKind::Final);
        assert_eq!(line.into_message().unwrap(), "no newline [final]");
        assert!(r.flush().is_none());
    }

    #[test]
    fn test_partial_marker_in_message() {
        let line = ReassembledLine::new(b"half".to_vec(), LineKind::Partial);
        assert_eq!(line.into_message().unwrap(), "half [partial]");
    }

    #[test]
    fn test_invalid_utf8_fails_decoding() {
        let line = ReassembledLine::new(vec![0xff, 0xfe, b'a'], LineKind::Complete);
        assert!(line.into_message().is_err());
    }
}
