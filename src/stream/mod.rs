/// SSE line handling for the upstream `data:`-line dialect.
///
/// The upstream speaks newline-framed `data: {json}` events terminated
/// by `data: [DONE]`. Chunks arrive at arbitrary byte boundaries, so
/// lines (and even UTF-8 sequences) can be split across reads.
pub mod fsm;

use futures_util::Stream;
use memchr::memchr_iter;
use smallvec::SmallVec;

/// The terminator payload of the upstream stream.
pub const DONE_PAYLOAD: &str = "[DONE]";

/// Extract the payload of a `data:` line, after stripping surrounding
/// whitespace. Returns `None` for comments, `event:` lines, and blanks.
#[must_use]
pub fn data_line_payload(line: &str) -> Option<&str> {
    line.trim().strip_prefix("data: ")
}

/// Whether a `data:` payload is the stream terminator.
#[must_use]
pub fn is_done_payload(payload: &str) -> bool {
    payload == DONE_PAYLOAD
}

// ---------------------------------------------------------------------------
// LineAssembler: incremental byte-to-line decoding
// ---------------------------------------------------------------------------

/// Incremental line assembler.
///
/// Feed it raw byte chunks and it yields complete lines with the
/// trailing `\n` (and any `\r`) removed. Partial UTF-8 sequences at
/// chunk boundaries are carried over to the next feed.
pub struct LineAssembler {
    buffer: String,
    read_offset: usize,
    utf8_remainder: Vec<u8>,
}

impl LineAssembler {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            read_offset: 0,
            utf8_remainder: Vec::new(),
        }
    }

    /// Feed a byte chunk, appending any completed lines to `out`.
    pub fn feed(&mut self, chunk: &[u8], out: &mut Vec<String>) {
        if self.utf8_remainder.is_empty() {
            match std::str::from_utf8(chunk) {
                Ok(text) => self.feed_str(text, out),
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    // Safety: valid_up_to is a valid UTF-8 boundary.
                    let text = unsafe { std::str::from_utf8_unchecked(&chunk[..valid_up_to]) };
                    self.feed_str(text, out);
                    self.utf8_remainder.extend_from_slice(&chunk[valid_up_to..]);
                }
            }
            return;
        }

        self.utf8_remainder.extend_from_slice(chunk);
        let pending = std::mem::take(&mut self.utf8_remainder);
        match std::str::from_utf8(&pending) {
            Ok(text) => self.feed_str(text, out),
            Err(e) => {
                let valid_up_to = e.valid_up_to();
                // Safety: valid_up_to is a valid UTF-8 boundary.
                let text = unsafe { std::str::from_utf8_unchecked(&pending[..valid_up_to]) };
                self.feed_str(text, out);
                self.utf8_remainder = pending[valid_up_to..].to_vec();
            }
        }
    }

    fn feed_str(&mut self, chunk: &str, out: &mut Vec<String>) {
        self.buffer.push_str(chunk);

        let mut processed_up_to = self.read_offset;
        let scan_start = processed_up_to;
        let bytes = self.buffer.as_bytes();
        for rel_pos in memchr_iter(b'\n', &bytes[scan_start..]) {
            let line_end = scan_start + rel_pos;
            let mut line = &self.buffer[processed_up_to..line_end];
            if let Some(stripped) = line.strip_suffix('\r') {
                line = stripped;
            }
            out.push(line.to_string());
            processed_up_to = line_end + 1;
        }

        self.read_offset = processed_up_to;
        if self.read_offset == self.buffer.len() {
            self.buffer.clear();
            self.read_offset = 0;
            return;
        }
        let should_compact = self.read_offset > 0
            && (self.read_offset >= self.buffer.len() / 2 || self.read_offset >= 8 * 1024);
        if should_compact {
            self.buffer.drain(..self.read_offset);
            self.read_offset = 0;
        }
    }

    /// Drain any trailing line that was never newline-terminated.
    pub fn finish(&mut self) -> Option<String> {
        if self.read_offset >= self.buffer.len() {
            self.buffer.clear();
            self.read_offset = 0;
            return None;
        }
        let mut line = self.buffer[self.read_offset..].to_string();
        if line.ends_with('\r') {
            line.pop();
        }
        self.buffer.clear();
        self.read_offset = 0;
        Some(line)
    }
}

impl Default for LineAssembler {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Stream utility
// ---------------------------------------------------------------------------

struct PendingLines {
    lines: SmallVec<[String; 8]>,
    head: usize,
}

impl PendingLines {
    #[inline]
    fn new() -> Self {
        Self {
            lines: SmallVec::new(),
            head: 0,
        }
    }

    #[inline]
    fn pop_front(&mut self) -> Option<String> {
        if self.head >= self.lines.len() {
            return None;
        }
        let line = std::mem::take(&mut self.lines[self.head]);
        self.head += 1;
        if self.head == self.lines.len() {
            self.lines.clear();
            self.head = 0;
        }
        Some(line)
    }

    #[inline]
    fn extend_from_vec(&mut self, parsed: &mut Vec<String>) {
        if parsed.is_empty() {
            return;
        }
        self.lines.reserve(parsed.len());
        self.lines.extend(parsed.drain(..));
    }
}

/// Split a fallible byte stream into lines using [`LineAssembler`].
///
/// Transport errors end the stream: remaining buffered bytes are
/// flushed as a final line and no error is surfaced (the consumer
/// observes truncation instead).
pub fn sse_line_stream<S, E>(byte_stream: S) -> impl Stream<Item = String> + Send
where
    S: Stream<Item = Result<bytes::Bytes, E>> + Send + 'static,
    E: std::fmt::Debug + Send + 'static,
{
    use futures_util::StreamExt;

    futures_util::stream::unfold(
        (
            Box::pin(byte_stream),
            LineAssembler::new(),
            Vec::<String>::with_capacity(8),
            PendingLines::new(),
            false,
        ),
        |(mut stream, mut assembler, mut parsed, mut pending, mut ended)| async move {
            loop {
                if let Some(line) = pending.pop_front() {
                    return Some((line, (stream, assembler, parsed, pending, ended)));
                }
                if ended {
                    return None;
                }

                match stream.as_mut().next().await {
                    Some(Ok(bytes)) => {
                        assembler.feed(bytes.as_ref(), &mut parsed);
                        pending.extend_from_vec(&mut parsed);
                    }
                    Some(Err(err)) => {
                        tracing::debug!(error = ?err, "upstream stream read error");
                        ended = true;
                        if let Some(tail) = assembler.finish() {
                            pending.lines.push(tail);
                        }
                    }
                    None => {
                        ended = true;
                        if let Some(tail) = assembler.finish() {
                            pending.lines.push(tail);
                        }
                    }
                }
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures_util::StreamExt;

    fn feed_all(chunks: &[&[u8]]) -> Vec<String> {
        let mut assembler = LineAssembler::new();
        let mut out = Vec::new();
        for chunk in chunks {
            assembler.feed(chunk, &mut out);
        }
        if let Some(tail) = assembler.finish() {
            out.push(tail);
        }
        out
    }

    #[test]
    fn test_data_line_payload() {
        assert_eq!(data_line_payload("data: {\"x\":1}"), Some("{\"x\":1}"));
        assert_eq!(data_line_payload("  data: [DONE]  "), Some("[DONE]"));
        assert_eq!(data_line_payload("event: ping"), None);
        assert_eq!(data_line_payload(": comment"), None);
        assert_eq!(data_line_payload(""), None);
    }

    #[test]
    fn test_is_done_payload() {
        assert!(is_done_payload("[DONE]"));
        assert!(!is_done_payload("{\"choices\":[]}"));
    }

    #[test]
    fn test_single_chunk_lines() {
        let lines = feed_all(&[b"a\nb\n"]);
        assert_eq!(lines, vec!["a", "b"]);
    }

    #[test]
    fn test_line_split_across_chunks() {
        let lines = feed_all(&[b"data: hel", b"lo\n"]);
        assert_eq!(lines, vec!["data: hello"]);
    }

    #[test]
    fn test_crlf_stripped() {
        let lines = feed_all(&[b"a\r\nb\r\n"]);
        assert_eq!(lines, vec!["a", "b"]);
    }

    #[test]
    fn test_trailing_line_flushed_on_finish() {
        let lines = feed_all(&[b"complete\npartial"]);
        assert_eq!(lines, vec!["complete", "partial"]);
    }

    #[test]
    fn test_utf8_split_across_chunks() {
        let text = "data: caf\u{e9}\n".as_bytes();
        // Split inside the two-byte é sequence.
        let split = text.len() - 3;
        let lines = feed_all(&[&text[..split], &text[split..]]);
        assert_eq!(lines, vec!["data: caf\u{e9}"]);
    }

    #[test]
    fn test_empty_lines_preserved() {
        let lines = feed_all(&[b"a\n\nb\n"]);
        assert_eq!(lines, vec!["a", "", "b"]);
    }

    #[tokio::test]
    async fn test_sse_line_stream_yields_lines() {
        let source = futures_util::stream::iter(vec![
            Ok::<Bytes, std::convert::Infallible>(Bytes::from_static(b"data: a\n\nda")),
            Ok(Bytes::from_static(b"ta: b\n")),
        ]);
        let lines: Vec<String> = sse_line_stream(source).collect().await;
        assert_eq!(lines, vec!["data: a", "", "data: b"]);
    }

    #[tokio::test]
    async fn test_sse_line_stream_flushes_tail_on_error() {
        let source = futures_util::stream::iter(vec![
            Ok(Bytes::from_static(b"data: a\ndata: tail")),
            Err(std::io::Error::other("reset")),
        ]);
        let lines: Vec<String> = sse_line_stream(source).collect().await;
        assert_eq!(lines, vec!["data: a", "data: tail"]);
    }
}
