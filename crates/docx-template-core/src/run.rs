//! Run scanner for WordprocessingML parts.
//!
//! The part is parsed with `roxmltree`, then every `<w:r>` element is
//! recorded with the raw byte spans of its open and close tags and of its
//! first `<w:t>` child. Nothing is decoded here: all spans point into the
//! undecoded part, so splicing preserves every byte outside the text nodes.

use memchr::memrchr;
use roxmltree::{Document, Node};
use tracing::warn;

use crate::entities::DecodedText;
use crate::error::ParseError;
use crate::span::{Span, TagPair};

const WORDML_NAMESPACES: [&str; 2] = [
    "http://schemas.openxmlformats.org/wordprocessingml/2006/main",
    "http://purl.oclc.org/ooxml/wordprocessingml/main",
];
const RUN_TAG: &str = "r";
const TEXT_TAG: &str = "t";

/// One `<w:r>` element of a part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Run {
    /// Position of the run in document order, also its index in [`Runs`].
    pub id: usize,
    /// `<w:r ...>` and `</w:r>`; the close span is empty for `<w:r/>`.
    pub tag: TagPair,
    /// The first `<w:t>` child, if the run has one.
    pub text: Option<TagPair>,
    /// Start offset of the enclosing element (`<w:p>`, `<w:hyperlink>`,
    /// `<w:ins>`, ...). Runs with the same parent are siblings.
    pub parent: Option<usize>,
}

impl Run {
    pub fn has_text(&self) -> bool {
        self.text.is_some()
    }

    /// Span of the raw character data inside the text node.
    pub fn text_span(&self) -> Option<Span> {
        self.text.map(|text| text.inner())
    }

    /// Raw, still-escaped text bytes of this run.
    pub fn raw_text<'a>(&self, bytes: &'a [u8]) -> Option<&'a [u8]> {
        self.text_span().and_then(|span| span.slice(bytes))
    }

    pub fn decoded_text(&self, bytes: &[u8]) -> Option<DecodedText> {
        self.raw_text(bytes).map(DecodedText::decode)
    }
}

/// All runs of one part, in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Runs {
    runs: Vec<Run>,
}

impl Runs {
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn get(&self, id: usize) -> Option<&Run> {
        self.runs.get(id)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Run> {
        self.runs.iter()
    }

    pub fn with_text(&self) -> impl Iterator<Item = &Run> {
        self.runs.iter().filter(|run| run.has_text())
    }

    pub fn as_slice(&self) -> &[Run] {
        &self.runs
    }
}

impl<'a> IntoIterator for &'a Runs {
    type Item = &'a Run;
    type IntoIter = std::slice::Iter<'a, Run>;

    fn into_iter(self) -> Self::IntoIter {
        self.runs.iter()
    }
}

/// Parse the runs of one XML part.
pub fn parse_runs(bytes: &[u8]) -> Result<Runs, ParseError> {
    RunParser::new(bytes).parse()
}

/// Collects runs from a parsed part.
#[derive(Debug, Clone, Copy)]
pub struct RunParser<'a> {
    bytes: &'a [u8],
}

impl<'a> RunParser<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    pub fn parse(self) -> Result<Runs, ParseError> {
        let xml = std::str::from_utf8(self.bytes)?;
        let doc = Document::parse(xml)?;

        let mut runs = Vec::new();
        for node in doc.descendants() {
            if !is_wordml(node, RUN_TAG) {
                continue;
            }

            let mut texts = node.children().filter(|child| is_wordml(*child, TEXT_TAG));
            let text = texts.next().map(|t| self.tag_pair(t));
            if let Some(extra) = texts.next() {
                warn!(
                    "Run at byte {} has more than one <w:t>, ignoring the one at byte {}",
                    node.range().start,
                    extra.range().start
                );
            }

            runs.push(Run {
                id: runs.len(),
                tag: self.tag_pair(node),
                text,
                parent: node.parent_element().map(|parent| parent.range().start),
            });
        }

        Ok(Runs { runs })
    }

    /// Open and close tag spans of an element, from its node range.
    fn tag_pair(&self, node: Node) -> TagPair {
        let range = node.range();
        let outer = &self.bytes[range.clone()];
        if outer.ends_with(b"/>") {
            return TagPair::self_closing(Span::from(range));
        }

        let close_start = memrchr(b'<', outer).map_or(range.start, |at| range.start + at);
        let open_end = node
            .first_child()
            .map_or(close_start, |child| child.range().start);
        TagPair::new(
            Span::new(range.start, open_end),
            Span::new(close_start, range.end),
        )
    }
}

fn is_wordml(node: Node, name: &str) -> bool {
    node.is_element()
        && node.tag_name().name() == name
        && node
            .tag_name()
            .namespace()
            .is_some_and(|ns| WORDML_NAMESPACES.contains(&ns))
}
