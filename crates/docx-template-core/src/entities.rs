//! XML character data helpers.
//!
//! Placeholder markers are searched for in decoded text, but every position
//! handed back to the splice step must point into the raw bytes. Decoding
//! therefore keeps a map from each decoded byte to the raw byte it came from.

use std::borrow::Cow;
use std::ops::Range;

use memchr::memchr;

use crate::span::Span;

/// Longest entity we try to decode, `&#x10FFFF;` included.
const MAX_ENTITY_LEN: usize = 12;

/// Decoded character data plus the raw offset of every decoded byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedText {
    text: String,
    /// `offsets[k]` is the raw offset of the unit that produced decoded byte
    /// `k`; `offsets[text.len()]` is the raw length.
    offsets: Vec<usize>,
}

impl DecodedText {
    pub fn decode(raw: &[u8]) -> Self {
        let mut text = String::with_capacity(raw.len());
        let mut offsets = Vec::with_capacity(raw.len() + 1);
        let mut i = 0;

        while i < raw.len() {
            if raw[i] == b'&' {
                if let Some((ch, consumed)) = decode_entity(&raw[i..]) {
                    push_char(&mut text, &mut offsets, ch, i);
                    i += consumed;
                    continue;
                }
            }

            let width = utf8_width(raw[i]);
            match raw
                .get(i..i + width)
                .and_then(|unit| std::str::from_utf8(unit).ok())
            {
                Some(unit) => {
                    text.push_str(unit);
                    offsets.extend(i..i + width);
                    i += width;
                }
                None => {
                    push_char(&mut text, &mut offsets, char::REPLACEMENT_CHARACTER, i);
                    i += 1;
                }
            }
        }

        offsets.push(raw.len());
        Self { text, offsets }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Raw offset of decoded byte `decoded`, which must be a char boundary.
    pub fn raw_offset(&self, decoded: usize) -> usize {
        self.offsets[decoded]
    }

    /// Raw span covering the decoded range.
    pub fn raw_span(&self, decoded: Range<usize>) -> Span {
        Span::new(self.raw_offset(decoded.start), self.raw_offset(decoded.end))
    }
}

fn push_char(text: &mut String, offsets: &mut Vec<usize>, ch: char, raw_at: usize) {
    text.push(ch);
    offsets.extend(std::iter::repeat(raw_at).take(ch.len_utf8()));
}

fn utf8_width(lead: u8) -> usize {
    match lead {
        0xC0..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF7 => 4,
        _ => 1,
    }
}

/// Decode one entity at the start of `bytes` (which begins with `&`).
/// Returns the character and the number of raw bytes consumed.
fn decode_entity(bytes: &[u8]) -> Option<(char, usize)> {
    let window = &bytes[1..bytes.len().min(MAX_ENTITY_LEN)];
    let semi = memchr(b';', window)?;
    let name = &window[..semi];

    let ch = match name {
        b"amp" => '&',
        b"lt" => '<',
        b"gt" => '>',
        b"quot" => '"',
        b"apos" => '\'',
        [b'#', b'x' | b'X', hex @ ..] => {
            char::from_u32(u32::from_str_radix(std::str::from_utf8(hex).ok()?, 16).ok()?)?
        }
        [b'#', dec @ ..] => char::from_u32(std::str::from_utf8(dec).ok()?.parse().ok()?)?,
        _ => return None,
    };

    Some((ch, semi + 2))
}

/// Escape text so it can be written into a text node.
pub fn escape_text(text: &str) -> Cow<'_, str> {
    if !text.contains(['&', '<', '>']) {
        return Cow::Borrowed(text);
    }

    let mut escaped = String::with_capacity(text.len() + 8);
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(ch),
        }
    }
    Cow::Owned(escaped)
}
