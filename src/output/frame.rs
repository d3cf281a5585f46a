//! Output line frames and line framing.

use std::sync::Arc;

/// Line terminator written after every frame.
#[cfg(windows)]
pub const LINE_ENDING: &str = "\r\n";
#[cfg(not(windows))]
pub const LINE_ENDING: &str = "\n";

/// Which of the two shared sinks a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// One prefixed line of process output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFrame {
    pub source: Arc<str>,
    pub stream: StreamKind,
    pub text: String,
}

impl OutputFrame {
    pub fn new(source: impl Into<Arc<str>>, stream: StreamKind, text: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            stream,
            text: text.into(),
        }
    }

    /// `name: text` followed by the line terminator, ready for a single write.
    pub fn render(&self) -> String {
        let mut line =
            String::with_capacity(self.source.len() + self.text.len() + 2 + LINE_ENDING.len());
        line.push_str(&self.source);
        line.push_str(": ");
        line.push_str(&self.text);
        line.push_str(LINE_ENDING);
        line
    }
}

/// Splits one source's byte stream into frames.
///
/// Both `\n` and `\r` end a line. Bytes after the last terminator stay
/// buffered until more input arrives or the stream finishes. Lines that are
/// empty or whitespace only produce no frame.
#[derive(Debug)]
pub struct LineFramer {
    source: Arc<str>,
    stream: StreamKind,
    pending: Vec<u8>,
}

impl LineFramer {
    pub fn new(source: impl Into<Arc<str>>, stream: StreamKind) -> Self {
        Self {
            source: source.into(),
            stream,
            pending: Vec::new(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Bytes received but not yet terminated.
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    /// Feed a chunk, returning the frames for every line it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<OutputFrame> {
        // Buffered bytes never hold a terminator, so only the new chunk is scanned.
        let scan_from = self.pending.len();
        self.pending.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut start = 0;
        for (i, byte) in self.pending.iter().enumerate().skip(scan_from) {
            if *byte == b'\n' || *byte == b'\r' {
                if let Some(frame) = make_frame(&self.source, self.stream, &self.pending[start..i]) {
                    frames.push(frame);
                }
                start = i + 1;
            }
        }
        self.pending.drain(..start);
        frames
    }

    /// Flush the unterminated tail at end of stream.
    pub fn finish(&mut self) -> Option<OutputFrame> {
        let rest = std::mem::take(&mut self.pending);
        make_frame(&self.source, self.stream, &rest)
    }
}

fn make_frame(source: &Arc<str>, stream: StreamKind, line: &[u8]) -> Option<OutputFrame> {
    let text = String::from_utf8_lossy(line);
    if text.trim().is_empty() {
        return None;
    }
    Some(OutputFrame {
        source: Arc::clone(source),
        stream,
        text: text.into_owned(),
    })
}
