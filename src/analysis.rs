// src/analysis.rs
// TEXT ANALYSIS STRATEGY: topic detection, sentiment counting, reference extraction
// Everything here is keyword/pattern heuristics behind the `TextAnalyzer` trait,
// so a stronger NLP backend can be swapped in without touching orchestration.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::catalog::{self, TopicCategory};
use crate::persona::Turn;

// --- Token helpers ---

/// Lowercased word tokens. Apostrophes inside words are kept ("don't").
pub fn tokenize(text: &str) -> Vec<String> {
    text.replace('\u{2019}', "'")
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .map(|w| w.trim_matches('\'').to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}

/// Whole-word phrase match, so "agree" never fires inside "disagree".
pub fn contains_phrase(tokens: &[String], phrase: &str) -> bool {
    let needle = tokenize(phrase);
    if needle.is_empty() || needle.len() > tokens.len() {
        return false;
    }
    tokens.windows(needle.len()).any(|w| w == needle.as_slice())
}

/// How many phrases of the list occur at least once.
pub fn count_phrases(tokens: &[String], phrases: &[&str]) -> usize {
    phrases.iter().filter(|p| contains_phrase(tokens, p)).count()
}

/// Jaccard overlap between the word sets of `a` and `b`, ignoring words of
/// `min_len` characters or fewer.
pub fn word_overlap(a: &str, b: &str, min_len: usize) -> f64 {
    let set = |s: &str| -> HashSet<String> {
        tokenize(s).into_iter().filter(|w| w.chars().count() > min_len).collect()
    };
    let (left, right) = (set(a), set(b));
    if left.is_empty() || right.is_empty() {
        return 0.0;
    }
    let shared = left.intersection(&right).count() as f64;
    let union = left.union(&right).count() as f64;
    shared / union
}

/// Sentences split on terminal punctuation, trimmed, empties dropped.
pub fn split_sentences(text: &str) -> Vec<String> {
    text.split(|c| matches!(c, '.' | '!' | '?'))
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

/// Byte span of the sentence containing `idx`, including its terminator and
/// any whitespace that follows.
pub fn sentence_span(text: &str, idx: usize) -> (usize, usize) {
    let is_term = |c: char| matches!(c, '.' | '!' | '?');
    let start = text[..idx]
        .char_indices()
        .rev()
        .find(|(_, c)| is_term(*c))
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(0);

    let mut end = text.len();
    let mut seen_term = false;
    for (i, c) in text[idx..].char_indices() {
        if is_term(c) {
            seen_term = true;
        } else if seen_term {
            if c.is_whitespace() {
                continue;
            }
            end = idx + i;
            break;
        }
    }
    (start, end)
}

// --- Sentiment ---

#[derive(Debug, Clone, Copy)]
pub struct Lexicon {
    pub agreement: &'static [&'static str],
    pub disagreement: &'static [&'static str],
}

/// Keyword set shared by the stance manager and the flow controller.
pub const CONSENSUS_LEXICON: Lexicon = Lexicon {
    agreement: &["agree", "exactly", "absolutely", "yes", "right", "correct", "true"],
    disagreement: &["disagree", "no", "wrong", "but", "however", "actually", "different"],
};

/// Phrase set used by the disagreement enforcer.
pub const ENFORCER_LEXICON: Lexicon = Lexicon {
    agreement: &[
        "i agree",
        "that's right",
        "exactly",
        "absolutely",
        "same here",
        "i think so too",
        "good point",
        "you're right",
        "totally agree",
        "couldn't agree more",
        "spot on",
        "definitely",
    ],
    disagreement: &[
        "i disagree",
        "but",
        "however",
        "actually",
        "on the contrary",
        "i don't think",
        "not really",
        "that's not",
        "different view",
        "i see it differently",
        "wrong",
        "no way",
    ],
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentimentScore {
    pub agreement: usize,
    pub disagreement: usize,
}

impl SentimentScore {
    pub fn merge(self, other: SentimentScore) -> SentimentScore {
        SentimentScore {
            agreement: self.agreement + other.agreement,
            disagreement: self.disagreement + other.disagreement,
        }
    }

    /// agreement / (agreement + disagreement); 0.5 when nothing was found.
    pub fn consensus(&self) -> f64 {
        let total = self.agreement + self.disagreement;
        if total == 0 {
            0.5
        } else {
            self.agreement as f64 / total as f64
        }
    }
}

// --- References ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    Direct,
    Vague,
    Temporal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedReference {
    pub kind: ReferenceKind,
    /// Named speaker, when the reference attributes one.
    pub speaker: Option<String>,
    pub phrase: String,
    /// Byte span of the attribution phrase.
    pub start: usize,
    pub end: usize,
    /// What the speaker supposedly said, quotes and "that" stripped.
    pub claim: String,
    /// Byte offset where the claim ends (before the sentence terminator).
    pub claim_end: usize,
}

const ATTRIBUTION_VERBS: &str =
    r"(?:said|mentioned|talked about|argued|stated|claimed|suggested|pointed out|brought up)";

/// One or two capitalized words: "Bob", "DeShawn", "Mary-Kate O'Neil".
const NAME: &str = r"\p{Lu}[\p{L}'\-]+(?:[ \t]+\p{Lu}[\p{L}'\-]+)?";

static DIRECT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"\b({})\s+{}\b", NAME, ATTRIBUTION_VERBS)).expect("direct reference pattern")
});

static TEMPORAL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"\b(?:[Ee]arlier|[Bb]efore|[Pp]reviously|[Aa] while ago),?\s+({})\s+{}\b",
        NAME, ATTRIBUTION_VERBS
    ))
    .expect("temporal reference pattern")
});

static UNATTRIBUTED_TEMPORAL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bI\s+think\s+(?:earlier|before)\b|\b(?:someone|somebody)\s+(?:said|mentioned)\s+(?:earlier|before)\b")
        .expect("unattributed temporal pattern")
});

static VAGUE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\b(?:someone|somebody)\s+(?:mentioned|said|brought up|pointed out)\b",
        r"(?i)\bas\s+(?:was\s+)?mentioned\s+(?:earlier|before|previously)\b",
        r"(?i)\blike\s+(?:they|someone|somebody)\s+said\b",
        r"(?i)\bbuilding\s+on\s+what\s+(?:was|we)\s+(?:discussed|said)\b",
        r"(?i)\bearlier\s+in\s+(?:the|this|our)\s+(?:discussion|conversation)\b",
        r"(?i)\bas\s+(?:others|people)\s+(?:have\s+)?(?:said|mentioned)\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("vague reference pattern"))
    .collect()
});

/// Capitalized words that look like names to the pattern but never are.
const NON_NAMES: &[&str] = &[
    "He", "She", "They", "We", "You", "It", "Everyone", "Everybody", "Someone", "Somebody",
    "Nobody", "People", "Others", "This", "That", "Who", "Research", "Studies", "Science",
    "Data", "Experts", "The", "My", "Our", "Your", "Mom", "Dad", "Mother", "Father", "Grandma",
    "Grandpa", "Earlier", "Before", "Previously", "I'd", "I've", "We'd", "We've", "You'd", "You've",
    "He'd", "She'd", "They'd", "They've",
];

/// Sentence openers the name pattern can swallow ahead of a real name ("As Bob said").
const LEADING_WORDS: &[&str] = &[
    "As", "And", "But", "So", "When", "Since", "Like", "Then", "Well", "Yes", "No", "Also", "Because",
    "If", "Plus", "Even", "Actually", "Honestly", "Sure", "Okay", "Now", "Or", "Again",
];

/// Drop a leading opener from a captured name. Returns the byte offset of the
/// name inside the capture and the name itself, or `None` when what is left
/// is not a name.
fn trim_name(capture: &str) -> Option<(usize, &str)> {
    let mut offset = 0;
    let mut name = capture;
    if let Some((first, tail)) = capture.split_once(|c: char| c.is_whitespace()) {
        if LEADING_WORDS.contains(&first) || NON_NAMES.contains(&first) {
            name = tail.trim_start();
            offset = capture.len() - name.len();
        }
    }
    let last = name.split_whitespace().last()?;
    if NON_NAMES.contains(&last) || LEADING_WORDS.contains(&name) {
        return None;
    }
    Some((offset, name))
}

fn claim_after(text: &str, from: usize) -> (String, usize) {
    let rest = &text[from..];
    let skip = rest
        .char_indices()
        .find(|(_, c)| !(c.is_whitespace() || matches!(c, ',' | ':')))
        .map(|(i, _)| i)
        .unwrap_or(rest.len());
    let body_start = from + skip;
    let body = &text[body_start..];

    let claim_end = if body.starts_with('"') || body.starts_with('\u{201C}') {
        let open_len = body.chars().next().map(char::len_utf8).unwrap_or(1);
        body[open_len..]
            .char_indices()
            .find(|(_, c)| matches!(c, '"' | '\u{201D}'))
            .map(|(i, c)| body_start + open_len + i + c.len_utf8())
            .unwrap_or(text.len())
    } else {
        body.char_indices()
            .find(|(_, c)| matches!(c, '.' | '!' | '?'))
            .map(|(i, _)| body_start + i)
            .unwrap_or(text.len())
    };

    let mut claim = text[body_start..claim_end].trim();
    if let Some(stripped) = claim.strip_prefix("that ") {
        claim = stripped;
    }
    let claim = claim.trim_matches(|c| matches!(c, '"' | '\u{201C}' | '\u{201D}')).trim();
    (claim.to_string(), claim_end)
}

fn overlaps(a: &ExtractedReference, start: usize, end: usize) -> bool {
    a.start < end && start < a.end
}

/// Tags every reference match into one list, first shape wins on overlap.
fn collect_references(text: &str) -> Vec<ExtractedReference> {
    fn push(found: &mut Vec<ExtractedReference>, r: ExtractedReference) {
        if !found.iter().any(|f| overlaps(f, r.start, r.end)) {
            found.push(r);
        }
    }

    let mut found: Vec<ExtractedReference> = Vec::new();

    for (pattern, kind) in [(&*TEMPORAL_PATTERN, ReferenceKind::Temporal), (&*DIRECT_PATTERN, ReferenceKind::Direct)] {
        for caps in pattern.captures_iter(text) {
            let (Some(whole), Some(capture)) = (caps.get(0), caps.get(1)) else { continue };
            let Some((offset, name)) = trim_name(capture.as_str()) else { continue };
            let start = match kind {
                ReferenceKind::Direct => capture.start() + offset,
                _ => whole.start(),
            };
            let (claim, claim_end) = claim_after(text, whole.end());
            push(
                &mut found,
                ExtractedReference {
                    kind,
                    speaker: Some(name.to_string()),
                    phrase: text[start..whole.end()].to_string(),
                    start,
                    end: whole.end(),
                    claim,
                    claim_end,
                },
            );
        }
    }

    let unattributed = std::iter::once((&*UNATTRIBUTED_TEMPORAL_PATTERN, ReferenceKind::Temporal))
        .chain(VAGUE_PATTERNS.iter().map(|p| (p, ReferenceKind::Vague)));
    for (pattern, kind) in unattributed {
        for m in pattern.find_iter(text) {
            push(
                &mut found,
                ExtractedReference {
                    kind,
                    speaker: None,
                    phrase: m.as_str().to_string(),
                    start: m.start(),
                    end: m.end(),
                    claim: String::new(),
                    claim_end: m.end(),
                },
            );
        }
    }

    found.sort_by_key(|r| r.start);
    found
}

// --- Strategy ---

pub trait TextAnalyzer: Send + Sync {
    /// Map free-form topic text to a controversial category, if any.
    fn detect_topic(&self, topic: &str) -> Option<&'static TopicCategory>;

    fn score_sentiment(&self, text: &str, lexicon: &Lexicon) -> SentimentScore;

    fn extract_references(&self, text: &str) -> Vec<ExtractedReference>;

    /// Sentiment summed over a window of turns.
    fn score_turns(&self, turns: &[Turn], lexicon: &Lexicon) -> SentimentScore {
        turns
            .iter()
            .fold(SentimentScore::default(), |acc, t| acc.merge(self.score_sentiment(&t.text, lexicon)))
    }
}

/// Default keyword/regex analyzer.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordAnalyzer;

impl TextAnalyzer for KeywordAnalyzer {
    fn detect_topic(&self, topic: &str) -> Option<&'static TopicCategory> {
        catalog::detect_category(topic)
    }

    fn score_sentiment(&self, text: &str, lexicon: &Lexicon) -> SentimentScore {
        let tokens = tokenize(text);
        SentimentScore {
            agreement: count_phrases(&tokens, lexicon.agreement),
            disagreement: count_phrases(&tokens, lexicon.disagreement),
        }
    }

    fn extract_references(&self, text: &str) -> Vec<ExtractedReference> {
        collect_references(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phrase_match_is_whole_word() {
        let tokens = tokenize("I strongly disagree with that.");
        assert!(!contains_phrase(&tokens, "agree"));
        assert!(contains_phrase(&tokens, "disagree"));
        assert!(contains_phrase(&tokens, "with that"));
    }

    #[test]
    fn test_consensus_defaults_to_half() {
        let score = KeywordAnalyzer.score_sentiment("The weather is mild today", &CONSENSUS_LEXICON);
        assert_eq!(score, SentimentScore::default());
        assert_eq!(score.consensus(), 0.5);
    }

    #[test]
    fn test_agreement_counted_once_per_keyword() {
        let score = KeywordAnalyzer.score_sentiment("Yes yes, exactly, I agree", &CONSENSUS_LEXICON);
        assert_eq!(score.agreement, 3);
        assert_eq!(score.disagreement, 0);
        assert_eq!(score.consensus(), 1.0);
    }

    #[test]
    fn test_enforcer_lexicon_phrases() {
        let score = KeywordAnalyzer.score_sentiment("That's right, couldn't agree more.", &ENFORCER_LEXICON);
        assert_eq!(score.agreement, 2);
    }

    #[test]
    fn test_word_overlap() {
        assert_eq!(word_overlap("prices are rising fast", "prices are rising fast", 2), 1.0);
        assert_eq!(word_overlap("", "anything", 2), 0.0);
        let partial = word_overlap("taxes hurt small business", "small business owners pay taxes", 2);
        assert!(partial > 0.4 && partial < 1.0);
    }

    #[test]
    fn test_sentence_span_covers_terminator() {
        let text = "First one. Second one! Third";
        let (s, e) = sentence_span(text, 12);
        assert_eq!(&text[s..e], " Second one! ");
        let (s, e) = sentence_span(text, text.len() - 1);
        assert_eq!(&text[s..e], " Third");
    }

    #[test]
    fn test_extracts_direct_reference_with_claim() {
        let refs = KeywordAnalyzer.extract_references("Well, Bob said that taxes are too high. I agree.");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].kind, ReferenceKind::Direct);
        assert_eq!(refs[0].speaker.as_deref(), Some("Bob"));
        assert_eq!(refs[0].claim, "taxes are too high");
    }

    #[test]
    fn test_extracts_quoted_claim() {
        let text = "Maria said \"rent keeps going up\". Fair.";
        let refs = KeywordAnalyzer.extract_references(text);
        assert_eq!(refs[0].claim, "rent keeps going up");
        assert_eq!(&text[refs[0].claim_end..refs[0].claim_end + 1], ".");
    }

    #[test]
    fn test_extracts_full_and_camel_case_names() {
        let refs = KeywordAnalyzer.extract_references("Bob Jones said rifles matter. DeShawn mentioned hunting.");
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].speaker.as_deref(), Some("Bob Jones"));
        assert_eq!(refs[0].claim, "rifles matter");
        assert_eq!(refs[1].speaker.as_deref(), Some("DeShawn"));
    }

    #[test]
    fn test_leading_opener_is_not_part_of_the_name() {
        let text = "As Bob said, taxes hurt.";
        let refs = KeywordAnalyzer.extract_references(text);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].speaker.as_deref(), Some("Bob"));
        assert_eq!(refs[0].phrase, "Bob said");
        assert_eq!(&text[refs[0].start..], "Bob said, taxes hurt.");

        assert!(KeywordAnalyzer.extract_references("I'd mentioned it before. My Dad said so.").is_empty());
    }

    #[test]
    fn test_temporal_beats_direct_on_overlap() {
        let refs = KeywordAnalyzer.extract_references("Earlier, Dana mentioned her commute.");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].kind, ReferenceKind::Temporal);
        assert_eq!(refs[0].speaker.as_deref(), Some("Dana"));
    }

    #[test]
    fn test_vague_and_pronoun_references() {
        let refs = KeywordAnalyzer.extract_references("Someone mentioned cost. They said it twice.");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].kind, ReferenceKind::Vague);
        assert!(refs[0].speaker.is_none());
    }

    #[test]
    fn test_detect_topic_uses_catalog() {
        assert_eq!(KeywordAnalyzer.detect_topic("gun_laws").map(|c| c.key), Some("gun_laws"));
        assert_eq!(KeywordAnalyzer.detect_topic("Firearm ownership").map(|c| c.key), Some("gun_laws"));
        assert!(KeywordAnalyzer.detect_topic("snack packaging").is_none());
    }
}
