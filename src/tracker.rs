// src/tracker.rs
// CONVERSATION TRACKER: the append-only who-said-what ledger
// Every committed Turn lands here; StatementRecords are a pure projection of it.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::analysis::{split_sentences, tokenize, word_overlap, ReferenceKind, TextAnalyzer};
use crate::persona::{Roster, Turn, MODERATOR};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatementRecord {
    pub speaker: String,
    pub content: String,
    pub turn: u64,
    pub topic: String,
    pub key_points: Vec<String>,
    pub quotable_content: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReferenceCheck {
    pub is_valid: bool,
    pub exact_quote: Option<String>,
    pub confidence: f64,
    pub error: Option<String>,
}

impl ReferenceCheck {
    fn invalid(confidence: f64, error: String) -> Self {
        Self { is_valid: false, exact_quote: None, confidence, error: Some(error) }
    }
}

/// Something a persona may legitimately cite.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AvailableReference {
    pub speaker: String,
    pub statement: String,
    pub context: String,
    pub turn_number: u64,
    pub timestamp: DateTime<Utc>,
}

static QUOTABLE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\bI\s+(?:believe|think|feel|know)\b[^.!?]*",
        r"(?i)\b(?:research|studies|data)\s+(?:shows?|suggests?|proves?)\b[^.!?]*",
        r"(?i)\bin\s+my\s+experience\b[^.!?]*",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("quotable pattern"))
    .collect()
});

fn key_points(text: &str) -> Vec<String> {
    split_sentences(text).into_iter().filter(|s| s.chars().count() > 10).collect()
}

fn quotable_content(text: &str) -> Vec<String> {
    QUOTABLE_PATTERNS
        .iter()
        .flat_map(|re| re.find_iter(text).map(|m| m.as_str().trim().to_string()))
        .filter(|q| !q.is_empty())
        .collect()
}

/// Share of topic words (longer than 2 chars) that show up in the text.
/// Text words count when they start with the topic word, so "taxes" hits "tax".
pub fn topic_relevance(text: &str, topic: &str) -> f64 {
    let mut topic_words: Vec<String> = tokenize(topic).into_iter().filter(|w| w.len() > 2).collect();
    if topic_words.is_empty() {
        topic_words = tokenize(topic);
    }
    if topic_words.is_empty() {
        return 0.0;
    }
    let text_words = tokenize(text);
    let hits = topic_words
        .iter()
        .filter(|tw| text_words.iter().any(|w| w.starts_with(tw.as_str())))
        .count();
    hits as f64 / topic_words.len() as f64
}

#[derive(Debug, Clone)]
pub struct ConversationTracker {
    topic: String,
    turns: Vec<Turn>,
    statements: Vec<StatementRecord>,
    similarity_threshold: f64,
    relevance_threshold: f64,
}

impl ConversationTracker {
    pub fn new(topic: &str, similarity_threshold: f64, relevance_threshold: f64) -> Self {
        Self {
            topic: topic.to_string(),
            turns: Vec::new(),
            statements: Vec::new(),
            similarity_threshold,
            relevance_threshold,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn next_turn_number(&self) -> u64 {
        self.turns.last().map(|t| t.turn_number + 1).unwrap_or(1)
    }

    /// Append one turn. Numbering is owned here, so it always grows by exactly 1.
    pub fn commit(&mut self, speaker: &str, text: &str, timestamp: DateTime<Utc>) -> &Turn {
        let turn = Turn::new(speaker, text, self.next_turn_number()).at(timestamp);

        if speaker != MODERATOR {
            self.statements.push(StatementRecord {
                speaker: speaker.to_string(),
                content: text.to_string(),
                turn: turn.turn_number,
                topic: self.topic.clone(),
                key_points: key_points(text),
                quotable_content: quotable_content(text),
                timestamp,
            });
        }

        self.turns.push(turn);
        &self.turns[self.turns.len() - 1]
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn statements(&self) -> &[StatementRecord] {
        &self.statements
    }

    pub fn statements_by<'a>(&'a self, speaker: &'a str) -> impl Iterator<Item = &'a StatementRecord> + 'a {
        self.statements.iter().filter(move |s| s.speaker == speaker)
    }

    pub fn has_spoken(&self, speaker: &str) -> bool {
        self.turns.iter().any(|t| t.speaker == speaker)
    }

    pub fn recent_history(&self, limit: usize) -> &[Turn] {
        let start = self.turns.len().saturating_sub(limit);
        &self.turns[start..]
    }

    pub fn participant_turn_count(&self, speaker: &str) -> usize {
        self.statements_by(speaker).count()
    }

    /// Texts a reference to `speaker` may be matched against: whole statements,
    /// their key points and quotable fragments. Moderator turns count as well.
    fn citable_texts(&self, speaker: &str) -> Vec<String> {
        if speaker == MODERATOR {
            return self
                .turns
                .iter()
                .filter(|t| t.is_moderator())
                .flat_map(|t| std::iter::once(t.text.clone()).chain(key_points(&t.text)))
                .collect();
        }
        self.statements_by(speaker)
            .flat_map(|s| {
                std::iter::once(s.content.clone())
                    .chain(s.key_points.iter().cloned())
                    .chain(s.quotable_content.iter().cloned())
            })
            .collect()
    }

    pub fn validate_reference(&self, speaker: &str, reference_text: &str, referenced_speaker: &str) -> ReferenceCheck {
        if speaker == referenced_speaker {
            return ReferenceCheck::invalid(0.0, "Cannot reference own statement".into());
        }

        let candidates = self.citable_texts(referenced_speaker);
        if candidates.is_empty() {
            return ReferenceCheck::invalid(0.0, format!("{} has not spoken yet", referenced_speaker));
        }

        let best = candidates
            .iter()
            .map(|c| (c, word_overlap(reference_text, c, 2)))
            .fold(None::<(&String, f64)>, |acc, (c, score)| match acc {
                Some((_, best)) if best >= score => acc,
                _ => Some((c, score)),
            });

        match best {
            Some((quote, confidence)) if confidence >= self.similarity_threshold => ReferenceCheck {
                is_valid: true,
                exact_quote: Some(quote.clone()),
                confidence,
                error: None,
            },
            Some((_, confidence)) => ReferenceCheck::invalid(
                confidence,
                format!("Could not find matching statement from {}", referenced_speaker),
            ),
            None => ReferenceCheck::invalid(0.0, format!("{} has not spoken yet", referenced_speaker)),
        }
    }

    /// Closest citable sentence by `speaker` to a (possibly wrong) paraphrase.
    pub fn closest_quote(&self, speaker: &str, reference_text: &str) -> Option<(String, f64)> {
        let mut best: Option<(String, f64)> = None;
        let sentences: Vec<String> = if speaker == MODERATOR {
            self.turns.iter().filter(|t| t.is_moderator()).flat_map(|t| key_points(&t.text)).collect()
        } else {
            self.statements_by(speaker)
                .flat_map(|s| s.key_points.iter().chain(s.quotable_content.iter()).cloned())
                .collect()
        };
        for sentence in sentences {
            let score = word_overlap(reference_text, &sentence, 2);
            if best.as_ref().map(|(_, b)| score > *b).unwrap_or(true) {
                best = Some((sentence, score));
            }
        }
        best
    }

    /// First key point of the speaker's most recent statement.
    pub fn latest_quote(&self, speaker: &str) -> Option<String> {
        if speaker == MODERATOR {
            return self
                .turns
                .iter()
                .rev()
                .find(|t| t.is_moderator())
                .and_then(|t| key_points(&t.text).into_iter().next());
        }
        self.statements_by(speaker).last().and_then(|s| s.key_points.first().cloned())
    }

    fn statement_context(&self, turn_number: u64) -> String {
        let idx = self.turns.iter().position(|t| t.turn_number == turn_number);
        match idx {
            Some(i) if i > 0 => format!("In response to {}", self.turns[i - 1].speaker),
            _ => "Opening statement".to_string(),
        }
    }

    /// Other participants' on-topic statements, most recent first.
    pub fn available_references(&self, speaker: &str, topic: &str) -> Vec<AvailableReference> {
        let mut refs: Vec<AvailableReference> = self
            .statements
            .iter()
            .filter(|s| s.speaker != speaker)
            .filter(|s| topic_relevance(&s.content, topic) > self.relevance_threshold)
            .map(|s| AvailableReference {
                speaker: s.speaker.clone(),
                statement: s.content.clone(),
                context: self.statement_context(s.turn),
                turn_number: s.turn,
                timestamp: s.timestamp,
            })
            .collect();
        refs.sort_by(|a, b| b.turn_number.cmp(&a.turn_number));
        refs
    }

    /// Advisory scan: vague references and names that are not on the roster.
    pub fn detect_invalid_references(&self, analyzer: &dyn TextAnalyzer, text: &str, roster: &Roster) -> Vec<String> {
        analyzer
            .extract_references(text)
            .into_iter()
            .filter_map(|r| match (&r.kind, &r.speaker) {
                (_, Some(name)) if roster.resolve(name).is_none() => {
                    Some(format!("Reference to non-existent participant: \"{}\"", name))
                }
                (ReferenceKind::Vague, _) | (ReferenceKind::Temporal, None) => {
                    Some(format!("Vague reference detected: \"{}\"", r.phrase))
                }
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::KeywordAnalyzer;

    fn tracker() -> ConversationTracker {
        let mut t = ConversationTracker::new("gun laws", 0.6, 0.3);
        let now = Utc::now();
        t.commit(MODERATOR, "What do you all think about gun laws?", now);
        t.commit("Alice", "Gun laws should protect the constitutional right to self defense. I believe rural families need guns.", now);
        t.commit("Bob", "Stricter gun laws would reduce violence in cities.", now);
        t
    }

    #[test]
    fn test_turn_numbers_increase_by_one() {
        let t = tracker();
        let numbers: Vec<u64> = t.turns().iter().map(|t| t.turn_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(t.next_turn_number(), 4);
    }

    #[test]
    fn test_statements_skip_moderator() {
        let t = tracker();
        assert_eq!(t.statements().len(), 2);
        assert_eq!(t.statements()[0].key_points.len(), 2);
        assert_eq!(t.statements()[0].quotable_content, vec!["I believe rural families need guns".to_string()]);
    }

    #[test]
    fn test_validate_reference() {
        let t = tracker();
        let ok = t.validate_reference("Bob", "rural families need guns", "Alice");
        assert!(ok.is_valid, "{:?}", ok);
        assert_eq!(ok.exact_quote.as_deref(), Some("I believe rural families need guns"));

        let wrong = t.validate_reference("Bob", "Alice wants to ban everything", "Alice");
        assert!(!wrong.is_valid);

        let own = t.validate_reference("Alice", "rural families need guns", "Alice");
        assert_eq!(own.error.as_deref(), Some("Cannot reference own statement"));

        let silent = t.validate_reference("Alice", "anything", "Carol");
        assert_eq!(silent.error.as_deref(), Some("Carol has not spoken yet"));
    }

    #[test]
    fn test_available_references_most_recent_first() {
        let t = tracker();
        let refs = t.available_references("Carol", "gun laws");
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].speaker, "Bob");
        assert_eq!(refs[0].context, "In response to Alice");
        assert!(t.available_references("Alice", "gun laws").iter().all(|r| r.speaker != "Alice"));
    }

    #[test]
    fn test_closest_quote_and_latest() {
        let t = tracker();
        let (quote, score) = t.closest_quote("Bob", "violence in cities is bad").unwrap();
        assert_eq!(quote, "Stricter gun laws would reduce violence in cities");
        assert!(score > 0.0);
        assert_eq!(t.latest_quote("Bob").as_deref(), Some("Stricter gun laws would reduce violence in cities"));
        assert!(t.latest_quote("Nobody").is_none());
    }

    #[test]
    fn test_detect_invalid_references() {
        let t = tracker();
        let roster = Roster::new(["Alice Moore", "Bob"]);
        let issues = t.detect_invalid_references(&KeywordAnalyzer, "Zed said guns are fine. Someone mentioned costs.", &roster);
        assert_eq!(issues.len(), 2);
        assert!(t.detect_invalid_references(&KeywordAnalyzer, "Alice said guns protect families.", &roster).is_empty());
    }

    #[test]
    fn test_topic_relevance_prefix_match() {
        assert_eq!(topic_relevance("Taxes are too high", "tax policy"), 0.5);
        assert_eq!(topic_relevance("nothing here", "tax"), 0.0);
    }
}
