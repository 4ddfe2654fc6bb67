//! Named entity recognition
//!
//! The pipeline talks to recognisers through [`EntityRecognizer`]. The BERT
//! backend lives in `ner_bert`; [`DisabledRecognizer`] stands in when the
//! model is switched off.

use anyhow::Result;

/// Entity labels reported by default
pub const DEFAULT_ENTITY_LABELS: &[&str] = &["LOC", "GPE", "ORG"];

/// An entity found in a text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySpan {
    pub text: String,
    /// Entity type without BIO prefix (`LOC`, `ORG`, ...)
    pub label: String,
    /// Character offset of the first character
    pub start: usize,
    /// Character offset one past the last character
    pub end: usize,
}

/// Backend that finds named entities in plain text
pub trait EntityRecognizer: Send + Sync {
    /// Entities in text order, with character offsets into `text`
    fn recognize(&self, text: &str) -> Result<Vec<EntitySpan>>;

    /// Short backend name for logs
    fn name(&self) -> &str;
}

/// Recogniser used when NER is disabled
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledRecognizer;

impl EntityRecognizer for DisabledRecognizer {
    fn recognize(&self, _text: &str) -> Result<Vec<EntitySpan>> {
        Ok(Vec::new())
    }

    fn name(&self) -> &str {
        "disabled"
    }
}

/// A word-piece with its predicted tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedPiece {
    /// Predicted tag, e.g. `B-LOC`, `I-ORG` or `O`
    pub tag: String,
    /// Character offset of the first character
    pub start: usize,
    /// Character offset one past the last character
    pub end: usize,
    /// Index of the word this piece belongs to
    pub word: usize,
}

enum Tag<'a> {
    Outside,
    Begin(&'a str),
    Inside(&'a str),
}

fn parse_tag(tag: &str) -> Tag<'_> {
    if tag == "O" || tag.is_empty() {
        return Tag::Outside;
    }
    match tag.split_once('-') {
        Some(("B" | "S", label)) => Tag::Begin(label),
        Some(("I" | "E", label)) => Tag::Inside(label),
        // Models without BIO prefixes emit the bare label
        _ => Tag::Inside(tag),
    }
}

/// Merge per-piece BIO tags into entity spans
///
/// The first piece of a word decides the word's tag; continuation pieces only
/// extend whatever span the word opened or continued. An `I-` tag that does
/// not continue a span of the same label opens a new one.
pub fn decode_bio(text: &str, pieces: &[TaggedPiece]) -> Vec<EntitySpan> {
    let mut spans: Vec<(String, usize, usize)> = Vec::new();
    let mut open = false;
    let mut last_word: Option<usize> = None;

    for piece in pieces {
        if last_word == Some(piece.word) {
            if open {
                if let Some(span) = spans.last_mut() {
                    span.2 = span.2.max(piece.end);
                }
            }
            continue;
        }
        last_word = Some(piece.word);

        match parse_tag(&piece.tag) {
            Tag::Outside => open = false,
            Tag::Inside(label) if open => match spans.last_mut() {
                Some(span) if span.0 == label => span.2 = span.2.max(piece.end),
                _ => spans.push((label.to_string(), piece.start, piece.end)),
            },
            Tag::Begin(label) | Tag::Inside(label) => {
                spans.push((label.to_string(), piece.start, piece.end));
                open = true;
            }
        }
    }

    spans
        .into_iter()
        .map(|(label, start, end)| EntitySpan {
            text: char_slice(text, start, end).to_string(),
            label,
            start,
            end,
        })
        .collect()
}

/// Keep only entities whose label is listed
pub fn filter_labels<S: AsRef<str>>(spans: Vec<EntitySpan>, labels: &[S]) -> Vec<EntitySpan> {
    spans
        .into_iter()
        .filter(|s| labels.iter().any(|l| l.as_ref() == s.label))
        .collect()
}

/// Slice `text` by character offsets, clamped to the text
pub fn char_slice(text: &str, start: usize, end: usize) -> &str {
    let byte_at = |idx: usize| {
        text.char_indices()
            .nth(idx)
            .map(|(b, _)| b)
            .unwrap_or(text.len())
    };
    let start_byte = byte_at(start);
    let end_byte = byte_at(end.max(start));
    &text[start_byte..end_byte]
}
