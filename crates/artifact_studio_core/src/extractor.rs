//! crates/artifact_studio_core/src/extractor.rs
//!
//! Incremental extraction of the code artifact from a growing model response.
//!
//! The extractor is a two-state machine (outside a fenced block / inside an
//! open block) that is advanced after every delta. Closed blocks are
//! accumulated once and never rescanned; a trailing block that has not been
//! closed yet is appended to the candidate so the preview updates while the
//! model is still writing it.

const FENCE: &[u8] = b"```";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    OutsideBlock,
    InsideOpenBlock { content_start: usize },
}

enum Opener {
    /// A full opening fence; content begins at this byte offset.
    Complete(usize),
    /// The text ends before we can tell (e.g. "```htm").
    Incomplete,
    NotAFence,
}

/// Consumes ordered text deltas and derives the latest artifact candidate.
#[derive(Debug, Clone)]
pub struct ArtifactExtractor {
    text: String,
    state: ScanState,
    /// Next byte offset that may still start a fence.
    scan_pos: usize,
    /// Concatenated content of every closed block seen so far.
    closed: String,
}

impl Default for ArtifactExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl ArtifactExtractor {
    pub fn new() -> Self {
        Self {
            text: String::new(),
            state: ScanState::OutsideBlock,
            scan_pos: 0,
            closed: String::new(),
        }
    }

    /// Appends a delta and returns the new artifact candidate, or `None` when the
    /// response so far contains no code (the current artifact should be kept).
    pub fn push_delta(&mut self, delta: &str) -> Option<String> {
        self.text.push_str(delta);
        self.advance();
        self.candidate()
    }

    /// The cumulative response text.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_inside_block(&self) -> bool {
        matches!(self.state, ScanState::InsideOpenBlock { .. })
    }

    pub fn candidate(&self) -> Option<String> {
        let mut candidate = self.closed.clone();
        if let ScanState::InsideOpenBlock { content_start } = self.state {
            candidate.push_str(&self.text[content_start..]);
        }
        if candidate.trim().is_empty() {
            None
        } else {
            Some(candidate)
        }
    }

    fn advance(&mut self) {
        let bytes = self.text.as_bytes();
        loop {
            match self.state {
                ScanState::OutsideBlock => {
                    let Some(at) = find_fence(bytes, self.scan_pos) else {
                        self.scan_pos = self.scan_pos.max(bytes.len().saturating_sub(FENCE.len() - 1));
                        return;
                    };
                    match opener_at(bytes, at) {
                        Opener::Complete(content_start) => {
                            self.state = ScanState::InsideOpenBlock { content_start };
                            self.scan_pos = content_start;
                        }
                        Opener::Incomplete => {
                            self.scan_pos = at;
                            return;
                        }
                        Opener::NotAFence => self.scan_pos = at + 1,
                    }
                }
                ScanState::InsideOpenBlock { content_start } => {
                    let Some(at) = find_fence(bytes, self.scan_pos) else {
                        self.scan_pos = self.scan_pos.max(bytes.len().saturating_sub(FENCE.len() - 1));
                        return;
                    };
                    let content = &self.text[content_start..at];
                    let content = content.strip_suffix('\n').unwrap_or(content);
                    self.closed.push_str(content);
                    self.closed.push_str("\n\n");
                    self.state = ScanState::OutsideBlock;
                    self.scan_pos = at + FENCE.len();
                }
            }
        }
    }
}

/// Extracts the artifact from a complete response in one go.
pub fn extract_artifact(text: &str) -> Option<String> {
    ArtifactExtractor::new().push_delta(text)
}

/// Removes fenced regions (including an unterminated trailing one) so the chat
/// shows only the prose part of a creator-mode answer.
pub fn strip_code_regions(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    loop {
        let Some(open) = rest.find("```") else {
            out.push_str(rest);
            break;
        };
        out.push_str(&rest[..open]);
        let after = &rest[open + FENCE.len()..];
        match after.find("```") {
            Some(close) => rest = &after[close + FENCE.len()..],
            None => break,
        }
    }
    out.trim().to_string()
}

// Backticks are ASCII, so every match is on a char boundary.
fn find_fence(bytes: &[u8], from: usize) -> Option<usize> {
    if from >= bytes.len() {
        return None;
    }
    bytes[from..]
        .windows(FENCE.len())
        .position(|w| w == FENCE)
        .map(|p| p + from)
}

fn opener_at(bytes: &[u8], at: usize) -> Opener {
    let mut i = at + FENCE.len();
    while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
        i += 1;
    }
    match bytes.get(i) {
        None => Opener::Incomplete,
        Some(b'\n') => Opener::Complete(i + 1),
        Some(_) => Opener::NotAFence,
    }
}
