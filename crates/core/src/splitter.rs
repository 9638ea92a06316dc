// crates/core/src/splitter.rs
//! Incremental byte-chunk to line splitting.
//!
//! A subprocess pipe delivers arbitrary chunks: a line may span several
//! reads, and one read may contain several lines. `LineSplitter` carries the
//! partial line across chunk boundaries and emits complete lines in arrival
//! order. One splitter per stream: stdout and stderr each get their own.

use memchr::memchr;

/// Splits a stream of byte chunks into complete text lines.
///
/// `\n` terminates a line; a preceding `\r` is stripped so CRLF streams
/// produce clean lines. Invalid UTF-8 is replaced lossily, never an error;
/// the producer is an untrusted external tool.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk, returning every line completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = chunk;
        while let Some(pos) = memchr(b'\n', rest) {
            self.pending.extend_from_slice(&rest[..pos]);
            rest = &rest[pos + 1..];
            if self.pending.last() == Some(&b'\r') {
                self.pending.pop();
            }
            lines.push(String::from_utf8_lossy(&self.pending).into_owned());
            self.pending.clear();
        }
        self.pending.extend_from_slice(rest);
        lines
    }

    /// Consume the splitter, returning the trailing non-terminated fragment
    /// if there is one.
    ///
    /// The call site decides what to do with it: the streaming login-check
    /// path flushes it as a final line (imapsync often ends its last
    /// diagnostic without a newline), the buffered sync path drops it.
    pub fn finish(mut self) -> Option<String> {
        if self.pending.last() == Some(&b'\r') {
            self.pending.pop();
        }
        if self.pending.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&self.pending).into_owned())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn single_chunk_multiple_lines() {
        let mut s = LineSplitter::new();
        let lines = s.push(b"one\ntwo\nthree\n");
        assert_eq!(lines, vec!["one", "two", "three"]);
        assert_eq!(s.finish(), None);
    }

    #[test]
    fn line_spanning_chunks() {
        let mut s = LineSplitter::new();
        assert!(s.push(b"hel").is_empty());
        assert!(s.push(b"lo wor").is_empty());
        assert_eq!(s.push(b"ld\nnext"), vec!["hello world"]);
        assert_eq!(s.finish(), Some("next".to_string()));
    }

    #[test]
    fn crlf_stripped() {
        let mut s = LineSplitter::new();
        assert_eq!(s.push(b"a\r\nb\r\n"), vec!["a", "b"]);
    }

    #[test]
    fn crlf_split_across_chunks() {
        let mut s = LineSplitter::new();
        assert!(s.push(b"line\r").is_empty());
        assert_eq!(s.push(b"\n"), vec!["line"]);
    }

    #[test]
    fn empty_lines_preserved() {
        let mut s = LineSplitter::new();
        assert_eq!(s.push(b"\n\nx\n"), vec!["", "", "x"]);
    }

    #[test]
    fn invalid_utf8_is_lossy_not_fatal() {
        let mut s = LineSplitter::new();
        let lines = s.push(b"ok \xff\xfe bytes\n");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("ok "));
        assert!(lines[0].ends_with(" bytes"));
    }

    #[test]
    fn finish_drops_lone_carriage_return() {
        let mut s = LineSplitter::new();
        assert!(s.push(b"tail\r").is_empty());
        assert_eq!(s.finish(), Some("tail".to_string()));
    }

    #[test]
    fn finish_on_clean_stream_is_none() {
        let mut s = LineSplitter::new();
        s.push(b"done\n");
        assert_eq!(s.finish(), None);
    }
}
