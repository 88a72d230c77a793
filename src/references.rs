// src/references.rs
// REFERENCE VALIDATOR: no persona gets to misquote the room
// Runs on generated text before commit. Direct attributions are checked
// against the tracker and kept, rewritten to an exact quote, or replaced with
// an honest "I don't recall". Vague references and template filler go.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analysis::{sentence_span, ReferenceKind, TextAnalyzer};
use crate::persona::Roster;
use crate::tracker::ConversationTracker;

pub const FORBIDDEN_PHRASES: &[&str] = &[
    "When I was living in",
    "which reminds me of",
    "In my experience as a",
    "My family went through something similar",
    "I think earlier",
    "Um, I totally agree",
    "You know what, that's interesting because",
];

const LEAD_INS: &[&str] = &["as", "when", "like", "since"];

static FORBIDDEN_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    FORBIDDEN_PHRASES
        .iter()
        .map(|p| (*p, Regex::new(&format!("(?i){}", regex::escape(p))).expect("forbidden phrase pattern")))
        .collect()
});

static MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]{2,}").expect("space pattern"));
static SPACE_BEFORE_PUNCT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+([,.!?;:])").expect("punct pattern"));
static STACKED_PUNCT: Lazy<Regex> = Lazy::new(|| Regex::new(r"([.!?])[,;:]+").expect("stacked pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    HallucinatedAttribution,
    UnknownParticipant,
    SpeakerHasNotSpoken,
    SelfReference,
    VagueReference,
    TemplatePhrase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceAction {
    Kept,
    Rewritten,
    Replaced,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub kind: IssueKind,
    pub phrase: String,
    pub speaker: Option<String>,
    pub action: ReferenceAction,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceValidation {
    pub corrected: String,
    pub issues: Vec<ValidationIssue>,
    pub is_valid: bool,
}

impl ReferenceValidation {
    pub fn warnings(&self) -> Vec<String> {
        self.issues.iter().map(|i| i.detail.clone()).collect()
    }
}

struct Edit {
    start: usize,
    end: usize,
    replacement: String,
}

/// Pull `start` back over a lead-in like "As " so a replacement reads as a sentence.
fn swallow_lead_in(text: &str, start: usize) -> usize {
    let before = &text[..start];
    let trimmed = before.trim_end();
    if trimmed.len() == before.len() {
        return start;
    }
    for word in LEAD_INS {
        if trimmed.len() < word.len() {
            continue;
        }
        let cut = trimmed.len() - word.len();
        if !trimmed.is_char_boundary(cut) || !trimmed[cut..].eq_ignore_ascii_case(word) {
            continue;
        }
        let prefix = &trimmed[..cut];
        if prefix.is_empty() || !prefix.ends_with(|c: char| c.is_alphanumeric()) {
            return cut;
        }
    }
    start
}

fn tidy(text: &str) -> String {
    let text = MULTI_SPACE.replace_all(text, " ");
    let text = SPACE_BEFORE_PUNCT.replace_all(&text, "$1");
    let text = STACKED_PUNCT.replace_all(&text, "$1");
    let trimmed = text.trim().trim_start_matches(|c: char| matches!(c, ',' | '.' | ';' | ':' | '-' | ' '));
    let mut chars = trimmed.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn honest_fallback(name: &str) -> String {
    format!("I don't recall {} mentioning that", name)
}

pub struct ReferenceValidator {
    analyzer: Arc<dyn TextAnalyzer>,
    /// Minimum overlap for rewriting a wrong attribution into an exact quote.
    rewrite_floor: f64,
}

impl ReferenceValidator {
    pub fn new(analyzer: Arc<dyn TextAnalyzer>, rewrite_floor: f64) -> Self {
        Self { analyzer, rewrite_floor }
    }

    /// Names in `text` are resolved through `roster`, so "Bob" can stand for
    /// "Bob Jones". Attributions to anyone off the roster are dropped.
    pub fn validate_response(
        &self,
        speaker: &str,
        text: &str,
        tracker: &ConversationTracker,
        roster: &Roster,
    ) -> ReferenceValidation {
        let mut issues: Vec<ValidationIssue> = Vec::new();
        let mut edits: Vec<Edit> = Vec::new();

        for reference in self.analyzer.extract_references(text) {
            let written = match &reference.speaker {
                Some(name) if reference.kind != ReferenceKind::Vague => name.clone(),
                _ => {
                    let (start, end) = sentence_span(text, reference.start);
                    edits.push(Edit { start, end, replacement: String::new() });
                    issues.push(ValidationIssue {
                        kind: IssueKind::VagueReference,
                        phrase: reference.phrase.clone(),
                        speaker: None,
                        action: ReferenceAction::Removed,
                        detail: format!("Vague reference removed: \"{}\"", reference.phrase),
                    });
                    continue;
                }
            };

            let Some(name) = roster.resolve(&written).map(str::to_string) else {
                debug!(speaker, referenced = %written, "attribution to non-participant removed");
                let (start, end) = sentence_span(text, reference.start);
                edits.push(Edit { start, end, replacement: String::new() });
                issues.push(ValidationIssue {
                    kind: IssueKind::UnknownParticipant,
                    phrase: reference.phrase.clone(),
                    speaker: Some(written.clone()),
                    action: ReferenceAction::Removed,
                    detail: format!("Reference to non-existent participant removed: \"{}\"", written),
                });
                continue;
            };

            if name == speaker {
                issues.push(ValidationIssue {
                    kind: IssueKind::SelfReference,
                    phrase: reference.phrase.clone(),
                    speaker: Some(name),
                    action: ReferenceAction::Kept,
                    detail: "Cannot reference own statement".to_string(),
                });
                continue;
            }

            let span_start = swallow_lead_in(text, reference.start);

            if !tracker.has_spoken(&name) {
                edits.push(Edit { start: span_start, end: reference.claim_end, replacement: honest_fallback(&name) });
                issues.push(ValidationIssue {
                    kind: IssueKind::SpeakerHasNotSpoken,
                    phrase: reference.phrase.clone(),
                    speaker: Some(name.clone()),
                    action: ReferenceAction::Replaced,
                    detail: format!("{} has not spoken yet", name),
                });
                continue;
            }

            // Bare "what Bob said": anchor it to something Bob actually said
            if reference.claim.is_empty() {
                if let Some(quote) = tracker.latest_quote(&name) {
                    edits.push(Edit {
                        start: reference.start,
                        end: reference.end,
                        replacement: format!("{} said \"{}\"", name, quote),
                    });
                }
                continue;
            }

            let check = tracker.validate_reference(speaker, &reference.claim, &name);
            if check.is_valid {
                continue;
            }

            match tracker.closest_quote(&name, &reference.claim) {
                Some((quote, score)) if score >= self.rewrite_floor => {
                    debug!(speaker, referenced = %name, score, "attribution rewritten to exact quote");
                    edits.push(Edit {
                        start: span_start,
                        end: reference.claim_end,
                        replacement: format!("{} said \"{}\"", name, quote),
                    });
                    issues.push(ValidationIssue {
                        kind: IssueKind::HallucinatedAttribution,
                        phrase: reference.phrase.clone(),
                        speaker: Some(name.clone()),
                        action: ReferenceAction::Rewritten,
                        detail: format!("Inaccurate reference to {} rewritten to an exact quote", name),
                    });
                }
                _ => {
                    debug!(speaker, referenced = %name, "unsupported attribution replaced");
                    edits.push(Edit { start: span_start, end: reference.claim_end, replacement: honest_fallback(&name) });
                    issues.push(ValidationIssue {
                        kind: IssueKind::HallucinatedAttribution,
                        phrase: reference.phrase.clone(),
                        speaker: Some(name.clone()),
                        action: ReferenceAction::Replaced,
                        detail: check
                            .error
                            .unwrap_or_else(|| format!("Could not find matching statement from {}", name)),
                    });
                }
            }
        }

        let mut corrected = Self::apply_edits(text, edits);

        for (phrase, pattern) in FORBIDDEN_PATTERNS.iter() {
            if pattern.is_match(&corrected) {
                corrected = pattern.replace_all(&corrected, "").into_owned();
                issues.push(ValidationIssue {
                    kind: IssueKind::TemplatePhrase,
                    phrase: phrase.to_string(),
                    speaker: None,
                    action: ReferenceAction::Removed,
                    detail: format!("Forbidden template phrase removed: \"{}\"", phrase),
                });
            }
        }

        let corrected = tidy(&corrected);
        ReferenceValidation { is_valid: issues.is_empty(), corrected, issues }
    }

    /// Non-overlapping edits, applied back to front.
    fn apply_edits(text: &str, mut edits: Vec<Edit>) -> String {
        edits.sort_by_key(|e| e.start);
        let mut accepted: Vec<Edit> = Vec::new();
        for edit in edits {
            if accepted.last().map(|a| edit.start < a.end).unwrap_or(false) {
                continue;
            }
            accepted.push(edit);
        }
        let mut out = text.to_string();
        for edit in accepted.into_iter().rev() {
            out.replace_range(edit.start..edit.end, &edit.replacement);
        }
        out
    }

    /// Up to three citations the speaker could legitimately make.
    pub fn suggestions(&self, speaker: &str, tracker: &ConversationTracker, topic: &str) -> Vec<String> {
        tracker
            .available_references(speaker, topic)
            .into_iter()
            .take(3)
            .map(|r| {
                let snippet: String = r.statement.chars().take(40).collect();
                let ellipsis = if r.statement.chars().count() > 40 { "..." } else { "" };
                format!("When {} said \"{}{}\"", r.speaker, snippet, ellipsis)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::KeywordAnalyzer;
    use chrono::Utc;

    fn validator() -> ReferenceValidator {
        ReferenceValidator::new(Arc::new(KeywordAnalyzer), 0.15)
    }

    fn room() -> (ConversationTracker, Roster) {
        let mut tracker = ConversationTracker::new("small business taxes", 0.6, 0.3);
        tracker.commit("Bob", "Taxes on small businesses are far too high. We need relief.", Utc::now());
        (tracker, Roster::new(["Alice", "Bob", "Cal"]))
    }

    fn full_name_room() -> (ConversationTracker, Roster) {
        let mut tracker = ConversationTracker::new("gun laws", 0.6, 0.3);
        tracker.commit("Bob Jones", "Hunting with my father taught me respect for firearms.", Utc::now());
        (tracker, Roster::new(["Alice Smith", "Bob Jones", "DeShawn Carter"]))
    }

    #[test]
    fn test_accurate_attribution_is_kept() {
        let (tracker, names) = room();
        let text = "Bob said taxes on small businesses are far too high. I see it too.";
        let result = validator().validate_response("Alice", text, &tracker, &names);
        assert!(result.is_valid);
        assert_eq!(result.corrected, text);
    }

    #[test]
    fn test_partial_attribution_rewritten_to_exact_quote() {
        let (tracker, names) = room();
        let result = validator().validate_response("Alice", "Bob said taxes are high for everyone. Fair enough.", &tracker, &names);
        assert!(!result.is_valid);
        assert_eq!(result.issues[0].action, ReferenceAction::Rewritten);
        assert_eq!(
            result.corrected,
            "Bob said \"Taxes on small businesses are far too high\". Fair enough."
        );
    }

    #[test]
    fn test_fabricated_attribution_replaced() {
        let (tracker, names) = room();
        let result =
            validator().validate_response("Alice", "As Bob said, pineapple belongs on pizza. Anyway.", &tracker, &names);
        assert_eq!(result.corrected, "I don't recall Bob mentioning that. Anyway.");
        assert_eq!(result.issues[0].kind, IssueKind::HallucinatedAttribution);
        assert_eq!(result.issues[0].action, ReferenceAction::Replaced);
    }

    #[test]
    fn test_silent_participant_cannot_be_quoted() {
        let (tracker, names) = room();
        let result = validator().validate_response("Alice", "Cal said we should wait.", &tracker, &names);
        assert_eq!(result.corrected, "I don't recall Cal mentioning that.");
        assert_eq!(result.issues[0].kind, IssueKind::SpeakerHasNotSpoken);
    }

    #[test]
    fn test_non_participant_attribution_removed() {
        let (tracker, names) = room();
        let result =
            validator().validate_response("Alice", "Zed said taxes are fine. I pay plenty of them.", &tracker, &names);
        assert_eq!(result.corrected, "I pay plenty of them.");
        assert_eq!(result.issues[0].kind, IssueKind::UnknownParticipant);
        assert_eq!(result.issues[0].action, ReferenceAction::Removed);
        assert_eq!(result.issues[0].speaker.as_deref(), Some("Zed"));
    }

    #[test]
    fn test_first_name_resolves_to_full_name() {
        let (tracker, names) = full_name_room();
        let result = validator().validate_response(
            "Alice Smith",
            "Bob said we should confiscate every rifle tomorrow.",
            &tracker,
            &names,
        );
        assert!(!result.corrected.contains("confiscate"), "{}", result.corrected);
        assert_eq!(result.corrected, "I don't recall Bob Jones mentioning that.");
        assert_eq!(result.issues[0].kind, IssueKind::HallucinatedAttribution);
        assert_eq!(result.issues[0].speaker.as_deref(), Some("Bob Jones"));

        let accurate = "Bob said hunting with his father taught him respect for firearms.";
        let result = validator().validate_response("Alice Smith", accurate, &tracker, &names);
        assert!(result.is_valid, "{:?}", result.issues);
        assert_eq!(result.corrected, accurate);
    }

    #[test]
    fn test_camel_case_name_cannot_be_misquoted() {
        let (tracker, names) = full_name_room();
        let result = validator().validate_response(
            "Alice Smith",
            "DeShawn said we should confiscate every rifle tomorrow. Hmm.",
            &tracker,
            &names,
        );
        assert_eq!(result.corrected, "I don't recall DeShawn Carter mentioning that. Hmm.");
        assert_eq!(result.issues[0].kind, IssueKind::SpeakerHasNotSpoken);
    }

    #[test]
    fn test_self_reference_flagged() {
        let (tracker, names) = room();
        let result = validator().validate_response("Bob", "Bob said it best. Taxes hurt.", &tracker, &names);
        assert_eq!(result.issues[0].kind, IssueKind::SelfReference);
    }

    #[test]
    fn test_vague_reference_sentence_removed() {
        let (tracker, names) = room();
        let result =
            validator().validate_response("Alice", "Someone mentioned prices. I care about prices.", &tracker, &names);
        assert_eq!(result.corrected, "I care about prices.");
        assert_eq!(result.issues[0].kind, IssueKind::VagueReference);
    }

    #[test]
    fn test_template_phrase_stripped() {
        let (tracker, names) = room();
        let result = validator().validate_response(
            "Alice",
            "You know what, that's interesting because taxes matter.",
            &tracker,
            &names,
        );
        assert_eq!(result.corrected, "Taxes matter.");
        assert_eq!(result.issues[0].kind, IssueKind::TemplatePhrase);
    }

    #[test]
    fn test_bare_reference_anchored_to_latest_quote() {
        let (tracker, names) = room();
        let result = validator().validate_response("Alice", "I liked what Bob said.", &tracker, &names);
        assert_eq!(result.corrected, "I liked what Bob said \"Taxes on small businesses are far too high\".");
    }

    #[test]
    fn test_suggestions_cite_real_statements() {
        let (tracker, _) = room();
        let suggestions = validator().suggestions("Alice", &tracker, "small business taxes");
        assert_eq!(suggestions.len(), 1);
        assert!(suggestions[0].starts_with("When Bob said \"Taxes on small businesses are far too"));
        assert!(suggestions[0].ends_with("...\""));
    }
}
