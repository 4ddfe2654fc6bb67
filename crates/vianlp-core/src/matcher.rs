//! Token pattern matcher
//!
//! Patterns are sequences of token specs. Each spec constrains one token's
//! `TEXT` or `LOWER` attribute (exact value, set membership or regex search)
//! and carries a quantifier. The matcher reports every span that satisfies a
//! pattern, so an optional trailing token yields both the short and the long
//! match.

use crate::tokenizer::Token;
use anyhow::{Context, Result};
use regex::Regex;
use std::collections::HashSet;

/// Token attribute a constraint reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attr {
    /// Verbatim token text
    Text,
    /// Lowercased token text
    Lower,
}

/// Predicate over an attribute value
#[derive(Debug, Clone)]
pub enum Predicate {
    Equals(String),
    In(Vec<String>),
    /// Regex search: matches anywhere in the value
    Regex(Regex),
}

impl Predicate {
    fn test(&self, value: &str) -> bool {
        match self {
            Self::Equals(expected) => value == expected,
            Self::In(options) => options.iter().any(|o| o == value),
            Self::Regex(re) => re.is_match(value),
        }
    }
}

/// How many tokens a spec consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Quantifier {
    /// Exactly one token
    #[default]
    One,
    /// Zero or one token (`?`)
    Optional,
    /// One or more tokens (`+`)
    OneOrMore,
    /// Zero or more tokens (`*`)
    ZeroOrMore,
    /// Exactly one token that does not satisfy the constraints (`!`)
    Not,
}

/// Constraints on a single token position
#[derive(Debug, Clone, Default)]
pub struct TokenSpec {
    constraints: Vec<(Attr, Predicate)>,
    quantifier: Quantifier,
}

impl TokenSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text_eq(value: &str) -> Self {
        Self::new().with(Attr::Text, Predicate::Equals(value.to_string()))
    }

    pub fn lower_eq(value: &str) -> Self {
        Self::new().with(Attr::Lower, Predicate::Equals(value.to_lowercase()))
    }

    pub fn lower_in(values: &[&str]) -> Self {
        let values = values.iter().map(|v| v.to_lowercase()).collect();
        Self::new().with(Attr::Lower, Predicate::In(values))
    }

    pub fn text_regex(pattern: &str) -> Result<Self> {
        let re = Regex::new(pattern).with_context(|| format!("Invalid token regex: {pattern}"))?;
        Ok(Self::new().with(Attr::Text, Predicate::Regex(re)))
    }

    /// Add a constraint; all constraints must hold
    pub fn with(mut self, attr: Attr, predicate: Predicate) -> Self {
        self.constraints.push((attr, predicate));
        self
    }

    pub fn quantifier(mut self, quantifier: Quantifier) -> Self {
        self.quantifier = quantifier;
        self
    }

    pub fn optional(self) -> Self {
        self.quantifier(Quantifier::Optional)
    }

    fn accepts(&self, token: &Token) -> bool {
        self.constraints.iter().all(|(attr, predicate)| {
            let value = match attr {
                Attr::Text => token.text.as_str(),
                Attr::Lower => token.lower.as_str(),
            };
            predicate.test(value)
        })
    }
}

/// A sequence of token specs
pub type TokenPattern = Vec<TokenSpec>;

/// A span of tokens matched by a named pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternMatch {
    /// Name the pattern was registered under
    pub pattern: String,
    /// Index of the first matched token
    pub start: usize,
    /// Index one past the last matched token
    pub end: usize,
}

struct Rule {
    name: String,
    patterns: Vec<TokenPattern>,
}

/// Named collection of token patterns
#[derive(Default)]
pub struct Matcher {
    rules: Vec<Rule>,
}

impl Matcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register patterns under `name`; adding to an existing name extends it
    pub fn add(&mut self, name: &str, patterns: Vec<TokenPattern>) {
        match self.rules.iter_mut().find(|r| r.name == name) {
            Some(rule) => rule.patterns.extend(patterns),
            None => self.rules.push(Rule {
                name: name.to_string(),
                patterns,
            }),
        }
    }

    /// Registered pattern names in registration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|r| r.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Find all matches in a token sequence
    ///
    /// Results are sorted by start, then end, then registration order, with
    /// duplicate spans under the same name reported once.
    pub fn find(&self, tokens: &[Token]) -> Vec<PatternMatch> {
        let mut found: Vec<(usize, usize, usize)> = Vec::new();

        for (rule_idx, rule) in self.rules.iter().enumerate() {
            let mut seen: HashSet<(usize, usize)> = HashSet::new();
            for pattern in &rule.patterns {
                for start in 0..tokens.len() {
                    let mut ends = Vec::new();
                    match_from(pattern, 0, start, tokens, &mut ends);
                    for end in ends {
                        if end > start && seen.insert((start, end)) {
                            found.push((start, end, rule_idx));
                        }
                    }
                }
            }
        }

        found.sort_unstable();
        found
            .into_iter()
            .map(|(start, end, rule_idx)| PatternMatch {
                pattern: self.rules[rule_idx].name.clone(),
                start,
                end,
            })
            .collect()
    }
}

/// Collect every end position where `pattern[spec_idx..]` matches from `pos`
fn match_from(
    pattern: &[TokenSpec],
    spec_idx: usize,
    pos: usize,
    tokens: &[Token],
    ends: &mut Vec<usize>,
) {
    let Some(spec) = pattern.get(spec_idx) else {
        ends.push(pos);
        return;
    };
    let next = spec_idx + 1;
    let accepts_at = |p: usize| tokens.get(p).is_some_and(|t| spec.accepts(t));

    match spec.quantifier {
        Quantifier::One => {
            if accepts_at(pos) {
                match_from(pattern, next, pos + 1, tokens, ends);
            }
        }
        Quantifier::Not => {
            if pos < tokens.len() && !accepts_at(pos) {
                match_from(pattern, next, pos + 1, tokens, ends);
            }
        }
        Quantifier::Optional => {
            match_from(pattern, next, pos, tokens, ends);
            if accepts_at(pos) {
                match_from(pattern, next, pos + 1, tokens, ends);
            }
        }
        Quantifier::ZeroOrMore | Quantifier::OneOrMore => {
            if spec.quantifier == Quantifier::ZeroOrMore {
                match_from(pattern, next, pos, tokens, ends);
            }
            let mut p = pos;
            while accepts_at(p) {
                p += 1;
                match_from(pattern, next, p, tokens, ends);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::tokenize;

    fn spans(matcher: &Matcher, text: &str) -> Vec<(String, usize, usize)> {
        matcher
            .find(&tokenize(text))
            .into_iter()
            .map(|m| (m.pattern, m.start, m.end))
            .collect()
    }

    #[test]
    fn test_single_token() {
        let mut matcher = Matcher::new();
        matcher.add("FLORA", vec![vec![TokenSpec::lower_eq("flora")]]);
        assert_eq!(
            spans(&matcher, "Flora e fauna, flora"),
            vec![("FLORA".to_string(), 0, 1), ("FLORA".to_string(), 4, 5)]
        );
    }

    #[test]
    fn test_optional_reports_both_lengths() {
        let mut matcher = Matcher::new();
        matcher.add(
            "IMPACT",
            vec![vec![
                TokenSpec::lower_eq("impatto"),
                TokenSpec::lower_eq("acustico").optional(),
            ]],
        );
        assert_eq!(
            spans(&matcher, "impatto acustico"),
            vec![("IMPACT".to_string(), 0, 1), ("IMPACT".to_string(), 0, 2)]
        );
    }

    #[test]
    fn test_optional_in_the_middle() {
        let mut matcher = Matcher::new();
        matcher.add(
            "PAIR",
            vec![vec![
                TokenSpec::lower_eq("a"),
                TokenSpec::lower_eq("b").optional(),
                TokenSpec::lower_eq("c"),
            ]],
        );
        assert_eq!(spans(&matcher, "a c"), vec![("PAIR".to_string(), 0, 2)]);
        assert_eq!(spans(&matcher, "a b c"), vec![("PAIR".to_string(), 0, 3)]);
        assert!(spans(&matcher, "a b b c").is_empty());
    }

    #[test]
    fn test_one_or_more_and_zero_or_more() {
        let mut matcher = Matcher::new();
        matcher.add(
            "DIGITS",
            vec![vec![
                TokenSpec::text_regex(r"^\d+$")
                    .unwrap()
                    .quantifier(Quantifier::OneOrMore),
                TokenSpec::lower_eq("m"),
            ]],
        );
        assert_eq!(
            spans(&matcher, "1 2 m"),
            vec![("DIGITS".to_string(), 0, 3), ("DIGITS".to_string(), 1, 3)]
        );

        let mut star = Matcher::new();
        star.add(
            "STAR",
            vec![vec![
                TokenSpec::lower_eq("x"),
                TokenSpec::lower_eq("y").quantifier(Quantifier::ZeroOrMore),
            ]],
        );
        assert_eq!(
            spans(&star, "x y y"),
            vec![
                ("STAR".to_string(), 0, 1),
                ("STAR".to_string(), 0, 2),
                ("STAR".to_string(), 0, 3)
            ]
        );
    }

    #[test]
    fn test_negation() {
        let mut matcher = Matcher::new();
        matcher.add(
            "NOT_FAUNA",
            vec![vec![
                TokenSpec::lower_eq("la"),
                TokenSpec::lower_eq("fauna").quantifier(Quantifier::Not),
            ]],
        );
        assert_eq!(
            spans(&matcher, "la flora la fauna la"),
            vec![("NOT_FAUNA".to_string(), 0, 2)]
        );
    }

    #[test]
    fn test_regex_is_search_not_fullmatch() {
        let mut matcher = Matcher::new();
        matcher.add("MODEL", vec![vec![TokenSpec::text_regex(r"[A-Z]\d+").unwrap()]]);
        assert_eq!(spans(&matcher, "xV90x"), vec![("MODEL".to_string(), 0, 1)]);
    }

    #[test]
    fn test_duplicate_spans_reported_once() {
        let mut matcher = Matcher::new();
        matcher.add(
            "DUP",
            vec![
                vec![TokenSpec::lower_eq("mw")],
                vec![TokenSpec::lower_in(&["mw", "kw"])],
            ],
        );
        assert_eq!(spans(&matcher, "MW"), vec![("DUP".to_string(), 0, 1)]);
    }

    #[test]
    fn test_sorted_across_names() {
        let mut matcher = Matcher::new();
        matcher.add("B", vec![vec![TokenSpec::lower_eq("uno")]]);
        matcher.add("A", vec![vec![TokenSpec::lower_eq("uno"), TokenSpec::lower_eq("due")]]);
        matcher.add("B", vec![vec![TokenSpec::lower_eq("due")]]);
        assert_eq!(matcher.len(), 2);
        assert_eq!(
            spans(&matcher, "uno due"),
            vec![
                ("B".to_string(), 0, 1),
                ("A".to_string(), 0, 2),
                ("B".to_string(), 1, 2)
            ]
        );
    }

    #[test]
    fn test_invalid_regex() {
        assert!(TokenSpec::text_regex("(unclosed").is_err());
    }

    #[test]
    fn test_all_optional_never_matches_empty() {
        let mut matcher = Matcher::new();
        matcher.add("OPT", vec![vec![TokenSpec::lower_eq("z").optional()]]);
        assert!(spans(&matcher, "a b").is_empty());
        assert_eq!(spans(&matcher, "z"), vec![("OPT".to_string(), 0, 1)]);
    }
}
