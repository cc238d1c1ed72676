//! Locating placeholders in run text.
//!
//! Word processors split text into runs at arbitrary points, so a token such
//! as `{{.name}}` may start in one run and end in another. Consecutive text
//! runs with the same parent element are read as one logical stream. A run
//! without text ends the stream, and so does a change of parent: a paragraph
//! boundary, or a `<w:hyperlink>`, `<w:ins>`, `<w:sdtContent>` or similar
//! wrapper opening or closing. Each match is mapped back to one [`Fragment`]
//! per run it touches.

use serde::Serialize;

use crate::entities::DecodedText;
use crate::run::{Run, Runs};
use crate::span::Span;

const EXPRESSION_OPEN: [&str; 2] = ["{{", "\u{201C}\u{201C}"];
const EXPRESSION_CLOSE: [&str; 2] = ["}}", "\u{201D}\u{201D}"];

/// Placeholder syntaxes understood by the locator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Syntax {
    /// `{{expr}}`, handed verbatim to an [`Evaluator`](crate::Evaluator).
    /// Doubled typographic quotes (`““expr””`) are accepted as delimiters.
    Expression,
    /// `{key}`, looked up in a [`PlaceholderMap`](crate::PlaceholderMap).
    Simple,
}

/// The part of a placeholder that lies inside one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Fragment {
    /// Index of the owning run in the part's [`Runs`].
    pub run: usize,
    /// Raw byte span relative to the start of the run's text.
    pub position: Span,
}

impl Fragment {
    /// Absolute span of this fragment in the part.
    pub fn absolute(&self, runs: &Runs) -> Option<Span> {
        let text = runs.get(self.run)?.text_span()?;
        Some(self.position.offset(text.start))
    }
}

/// A located placeholder token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Placeholder {
    pub syntax: Syntax,
    /// Ordered by position; never empty.
    pub fragments: Vec<Fragment>,
    /// Decoded token text including delimiters.
    pub token: String,
    /// Decoded text between the delimiters.
    pub key: String,
    span: Span,
}

impl Placeholder {
    /// Absolute raw offset of the first byte of the token.
    pub fn start_pos(&self) -> usize {
        self.span.start
    }

    /// Absolute raw offset one past the last byte of the token.
    pub fn end_pos(&self) -> usize {
        self.span.end
    }

    /// `[start_pos, end_pos)`, including any run boundaries in between.
    pub fn span(&self) -> Span {
        self.span
    }

    pub fn is_fragmented(&self) -> bool {
        self.fragments.len() > 1
    }
}

/// Find all placeholders of `syntax` in one part.
pub fn locate_placeholders(runs: &Runs, bytes: &[u8], syntax: Syntax) -> Vec<Placeholder> {
    PlaceholderLocator::new(runs, bytes).locate(syntax)
}

#[derive(Debug)]
struct Segment {
    run: usize,
    /// Absolute raw offset where the run text starts.
    text_start: usize,
    /// Offset of this segment in the stream text.
    stream_start: usize,
    decoded: DecodedText,
}

impl Segment {
    fn stream_end(&self) -> usize {
        self.stream_start + self.decoded.len()
    }
}

/// Decoded text of consecutive runs read as one string.
#[derive(Debug, Default)]
struct TextStream {
    text: String,
    segments: Vec<Segment>,
}

impl TextStream {
    fn push(&mut self, run: &Run, text_start: usize, decoded: DecodedText) {
        self.text.push_str(decoded.as_str());
        self.segments.push(Segment {
            run: run.id,
            text_start,
            stream_start: self.text.len() - decoded.len(),
            decoded,
        });
    }

    fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Whether `run` may continue this stream. Only siblings qualify, so a
    /// splice never removes the open or close tag of an enclosing element.
    fn accepts(&self, run: &Run, runs: &Runs, text_start: usize) -> bool {
        let Some(last) = self.segments.last() else {
            return true;
        };
        let Some(previous) = runs.get(last.run) else {
            return false;
        };
        previous.parent == run.parent
            && last.text_start + last.decoded.raw_offset(last.decoded.len()) <= text_start
    }

    /// Build a placeholder from the stream range `[start, end)`.
    fn placeholder(&self, syntax: Syntax, start: usize, end: usize, key: &str) -> Placeholder {
        let mut fragments = Vec::new();
        let mut span: Option<Span> = None;

        for segment in &self.segments {
            let from = start.max(segment.stream_start);
            let to = end.min(segment.stream_end());
            if from >= to {
                continue;
            }

            let position = segment
                .decoded
                .raw_span(from - segment.stream_start..to - segment.stream_start);
            let absolute = position.offset(segment.text_start);
            span = Some(match span {
                Some(span) => Span::new(span.start, absolute.end),
                None => absolute,
            });
            fragments.push(Fragment {
                run: segment.run,
                position,
            });
        }

        Placeholder {
            syntax,
            fragments,
            token: self.text[start..end].to_string(),
            key: key.to_string(),
            span: span.unwrap_or_default(),
        }
    }
}

/// Scans the runs of one part for placeholders.
#[derive(Debug)]
pub struct PlaceholderLocator<'a> {
    runs: &'a Runs,
    bytes: &'a [u8],
}

impl<'a> PlaceholderLocator<'a> {
    pub fn new(runs: &'a Runs, bytes: &'a [u8]) -> Self {
        Self { runs, bytes }
    }

    pub fn locate(&self, syntax: Syntax) -> Vec<Placeholder> {
        let mut placeholders = Vec::new();
        for stream in self.streams() {
            match syntax {
                Syntax::Expression => scan_expressions(&stream, &mut placeholders),
                Syntax::Simple => scan_simple(&stream, &mut placeholders),
            }
        }
        placeholders
    }

    fn streams(&self) -> Vec<TextStream> {
        let mut streams = Vec::new();
        let mut current = TextStream::default();

        for run in self.runs {
            let (Some(span), Some(decoded)) = (run.text_span(), run.decoded_text(self.bytes)) else {
                if !current.is_empty() {
                    streams.push(std::mem::take(&mut current));
                }
                continue;
            };

            if !current.accepts(run, self.runs, span.start) {
                streams.push(std::mem::take(&mut current));
            }
            current.push(run, span.start, decoded);
        }

        if !current.is_empty() {
            streams.push(current);
        }
        streams
    }
}

/// Earliest occurrence of any of `markers` at or after `from`.
fn find_marker(text: &str, from: usize, markers: &[&str]) -> Option<(usize, usize)> {
    text[from..].char_indices().find_map(|(i, _)| {
        markers
            .iter()
            .find(|marker| text[from + i..].starts_with(*marker))
            .map(|marker| (from + i, marker.len()))
    })
}

/// Each open marker pairs with the nearest following close marker. An open
/// marker without a close marker ends the scan of this stream.
fn scan_expressions(stream: &TextStream, out: &mut Vec<Placeholder>) {
    let text = stream.text.as_str();
    let mut pos = 0;

    while let Some((open, open_len)) = find_marker(text, pos, &EXPRESSION_OPEN) {
        let body = open + open_len;
        let Some((close, close_len)) = find_marker(text, body, &EXPRESSION_CLOSE) else {
            break;
        };

        let expression = &text[body..close];
        if !expression.trim().is_empty() {
            out.push(stream.placeholder(Syntax::Expression, open, close + close_len, expression));
        }
        pos = close + close_len;
    }
}

/// `{key}` with a non-empty key free of braces; a second `{` restarts the key.
fn scan_simple(stream: &TextStream, out: &mut Vec<Placeholder>) {
    let text = stream.text.as_str();
    let mut open = None;

    for (i, b) in text.bytes().enumerate() {
        match b {
            b'{' => open = Some(i),
            b'}' => {
                if let Some(start) = open.take() {
                    if i > start + 1 {
                        out.push(stream.placeholder(Syntax::Simple, start, i + 1, &text[start + 1..i]));
                    }
                }
            }
            _ => {}
        }
    }
}
