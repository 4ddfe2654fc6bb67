//! Rule-based word tokenizer for Italian text
//!
//! Produces the token stream the pattern matcher runs over. The rules follow
//! the usual prefix/suffix/infix scheme: split on whitespace, peel punctuation
//! off both ends, then split elided articles (`dell'impatto`) and numbers
//! glued to a unit (`3MW`).

use once_cell::sync::Lazy;
use regex::Regex;

/// Characters split off the start of a word
const PREFIX_CHARS: &[char] = &[
    '(', '[', '{', '«', '“', '‘', '"', '\'', '¿', '¡', '*', '<',
];

/// Characters split off the end of a word
const SUFFIX_CHARS: &[char] = &[
    ',', ';', ':', '.', '!', '?', ')', ']', '}', '»', '”', '’', '"', '\'', '…', '>', '*',
];

/// Elided article or preposition followed by the word it attaches to
static ELISION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\p{L}{1,6}['’])(\p{L}.*)$").expect("elision pattern is valid")
});

/// Number glued to a power, energy or length unit
static NUMBER_UNIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(\d+(?:[.,]\d+)?)(mwh|kwh|gwh|mw|kw|gw|kv|km|ha|m)$")
        .expect("number-unit pattern is valid")
});

/// Coordinates end in `"N`/`"E`; the quote belongs to the seconds, not the sentence
static COORDINATE_TAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\d['’]\d{1,2}["”]$"#).expect("coordinate pattern is valid"));

/// A token with its position in the source text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Token text as it appears in the source
    pub text: String,
    /// Lowercased text
    pub lower: String,
    /// Character offset of the first character
    pub start_char: usize,
    /// Character offset one past the last character
    pub end_char: usize,
    /// Byte offset of the first character
    pub start_byte: usize,
    /// Byte offset one past the last character
    pub end_byte: usize,
}

impl Token {
    fn new(source: &str, start_byte: usize, end_byte: usize, start_char: usize) -> Self {
        let text = source[start_byte..end_byte].to_string();
        let end_char = start_char + text.chars().count();
        Self {
            lower: text.to_lowercase(),
            text,
            start_char,
            end_char,
            start_byte,
            end_byte,
        }
    }
}

/// Split text into tokens
pub fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut char_pos = 0;
    let mut word_start: Option<(usize, usize)> = None;

    for (byte_idx, ch) in text.char_indices() {
        if ch.is_whitespace() {
            if let Some((start_byte, start_char)) = word_start.take() {
                split_word(text, start_byte, byte_idx, start_char, &mut tokens);
            }
        } else if word_start.is_none() {
            word_start = Some((byte_idx, char_pos));
        }
        char_pos += 1;
    }

    if let Some((start_byte, start_char)) = word_start {
        split_word(text, start_byte, text.len(), start_char, &mut tokens);
    }

    tokens
}

/// Split one whitespace-delimited chunk into tokens
fn split_word(
    source: &str,
    start_byte: usize,
    end_byte: usize,
    start_char: usize,
    out: &mut Vec<Token>,
) {
    let mut lo = start_byte;
    let mut lo_char = start_char;
    let mut hi = end_byte;
    let mut suffixes: Vec<(usize, usize)> = Vec::new();

    // Prefixes
    while lo < hi {
        let Some(ch) = source[lo..hi].chars().next() else {
            break;
        };
        if !PREFIX_CHARS.contains(&ch) || lo + ch.len_utf8() >= hi {
            break;
        }
        out.push(Token::new(source, lo, lo + ch.len_utf8(), lo_char));
        lo += ch.len_utf8();
        lo_char += 1;
    }

    // Suffixes, collected right to left
    while lo < hi {
        let Some(ch) = source[lo..hi].chars().next_back() else {
            break;
        };
        if !SUFFIX_CHARS.contains(&ch) || hi - ch.len_utf8() <= lo {
            break;
        }
        if matches!(ch, '"' | '”' | '\'' | '’') && COORDINATE_TAIL.is_match(&source[lo..hi]) {
            break;
        }
        // Keep decimal points and abbreviations like "S.p.A." intact
        if ch == '.' && is_abbreviation(&source[lo..hi]) {
            break;
        }
        suffixes.push((hi - ch.len_utf8(), hi));
        hi -= ch.len_utf8();
    }

    split_infixes(source, lo, hi, lo_char, out);

    let mut suffix_char = lo_char + source[lo..hi].chars().count();
    for (s, e) in suffixes.into_iter().rev() {
        out.push(Token::new(source, s, e, suffix_char));
        suffix_char += 1;
    }
}

fn split_infixes(source: &str, lo: usize, hi: usize, lo_char: usize, out: &mut Vec<Token>) {
    if lo >= hi {
        return;
    }
    let core = &source[lo..hi];

    if let Some(caps) = ELISION.captures(core) {
        if let (Some(article), Some(rest)) = (caps.get(1), caps.get(2)) {
            out.push(Token::new(source, lo + article.start(), lo + article.end(), lo_char));
            let rest_char = lo_char + article.as_str().chars().count();
            out.push(Token::new(source, lo + rest.start(), lo + rest.end(), rest_char));
            return;
        }
    }

    if let Some(caps) = NUMBER_UNIT.captures(core) {
        if let (Some(number), Some(unit)) = (caps.get(1), caps.get(2)) {
            out.push(Token::new(source, lo + number.start(), lo + number.end(), lo_char));
            let unit_char = lo_char + number.as_str().chars().count();
            out.push(Token::new(source, lo + unit.start(), lo + unit.end(), unit_char));
            return;
        }
    }

    out.push(Token::new(source, lo, hi, lo_char));
}

/// Dotted abbreviations ("S.p.A.", "n.") keep their final period
fn is_abbreviation(word: &str) -> bool {
    let body = word.trim_end_matches('.');
    if body.is_empty() {
        return false;
    }
    body.contains('.') && body.chars().all(|c| c.is_alphabetic() || c == '.')
}
