// src/flow.rs
// CONVERSATION FLOW CONTROLLER: reads the room, advises the moderator
// Advisory only. Nothing here touches persona state; the moderator path
// turns recommendations into an intervention directive.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analysis::{contains_phrase, tokenize, TextAnalyzer, CONSENSUS_LEXICON};
use crate::persona::{PersonaProfile, Turn, MODERATOR};
use crate::turns::participation_counts;

const ENERGY_WINDOW: usize = 5;
const BALANCE_WINDOW: usize = 8;
const AGREEMENT_WINDOW: usize = 6;
const DEPTH_WINDOW: usize = 10;
const STAGNATION_WINDOW: usize = 6;
const FOCUS_WINDOW: usize = 3;

const ENERGY_WORDS: &[&str] = &["really", "absolutely", "definitely", "passionate", "excited"];
const DEPTH_MARKERS: &[&str] = &["because", "specifically", "for example", "in particular", "let me explain"];
const ENGAGEMENT_WORDS: &[&str] = &["why", "how", "what", "really", "interesting"];
const TRANSITION_MARKERS: &[&str] = &["that brings up", "this relates to", "another thing", "also important", "speaking of"];
const FOCUS_STOPWORDS: &[&str] = &["this", "that", "with", "they", "their", "there", "where", "when", "about", "think", "would", "really"];

const THEMES: &[(&str, &[&str])] = &[
    ("economic_impact", &["cost", "money", "expensive", "afford", "price", "budget", "jobs", "economy"]),
    ("government_role", &["government", "regulation", "policy", "law", "control", "mandate"]),
    ("personal_responsibility", &["individual", "personal", "responsibility", "choice", "behavior"]),
    ("corporate_responsibility", &["business", "company", "corporate", "industry", "profit"]),
    ("scientific_uncertainty", &["science", "research", "study", "evidence", "proof", "data"]),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnergyLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipationBalanceLevel {
    Balanced,
    Dominated,
    Silent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgreementLevel {
    HighConsensus,
    Mixed,
    Polarized,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergingTheme {
    pub theme: String,
    pub mentions: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationFlowState {
    pub topic: String,
    /// +0.5 per recent turn that digs in ("because", "for example", ...).
    pub subtopic_depth: f64,
    pub energy_level: EnergyLevel,
    pub participation_balance: ParticipationBalanceLevel,
    pub agreement_level: AgreementLevel,
    pub stagnation: bool,
    pub current_focus: String,
    pub elapsed_minutes: f64,
    /// Recent vs earlier utterance length trend, 0..=1.
    pub momentum: f64,
    pub emerging_themes: Vec<EmergingTheme>,
}

impl ConversationFlowState {
    pub fn fresh(topic: &str) -> Self {
        Self {
            topic: topic.to_string(),
            subtopic_depth: 0.0,
            energy_level: EnergyLevel::Medium,
            participation_balance: ParticipationBalanceLevel::Balanced,
            agreement_level: AgreementLevel::Mixed,
            stagnation: false,
            current_focus: String::new(),
            elapsed_minutes: 0.0,
            momentum: 0.5,
            emerging_themes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowAction {
    BreakArtificialConsensus,
    BalanceParticipation,
    RevitalizeDiscussion,
    DeepenExploration,
    ChangeSubtopic,
    NaturalTransition,
    NaturalFacilitation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowRecommendation {
    pub action: FlowAction,
    pub reason: String,
    pub suggested_intervention: Option<String>,
    pub target_persona: Option<String>,
    pub priority: Priority,
}

impl FlowRecommendation {
    fn new(action: FlowAction, priority: Priority, reason: impl Into<String>, intervention: impl Into<String>) -> Self {
        Self {
            action,
            reason: reason.into(),
            suggested_intervention: Some(intervention.into()),
            target_persona: None,
            priority,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicShift {
    pub should_shift: bool,
    pub reason: String,
    pub new_topic_suggestion: Option<String>,
}

/// What the moderator should do on its next turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeratorIntervention {
    pub action: FlowAction,
    pub priority: Priority,
    pub instruction: String,
    pub tone: String,
}

fn window(history: &[Turn], size: usize) -> &[Turn] {
    &history[history.len().saturating_sub(size)..]
}

fn avg_len(turns: &[&Turn]) -> f64 {
    if turns.is_empty() {
        return 0.0;
    }
    turns.iter().map(|t| t.text.chars().count()).sum::<usize>() as f64 / turns.len() as f64
}

fn energy_level(history: &[Turn]) -> EnergyLevel {
    let recent: Vec<&Turn> = window(history, ENERGY_WINDOW).iter().collect();
    if recent.is_empty() {
        return EnergyLevel::Medium;
    }
    let markers: usize = recent
        .iter()
        .map(|t| {
            let tokens = tokenize(&t.text);
            usize::from(t.text.contains('!')) + ENERGY_WORDS.iter().filter(|w| contains_phrase(&tokens, w)).count()
        })
        .sum();
    let length = avg_len(&recent);
    if length > 100.0 && markers > 3 {
        EnergyLevel::High
    } else if length > 50.0 && markers > 1 {
        EnergyLevel::Medium
    } else {
        EnergyLevel::Low
    }
}

fn participation_balance(history: &[Turn]) -> ParticipationBalanceLevel {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for turn in window(history, BALANCE_WINDOW).iter().filter(|t| t.speaker != MODERATOR) {
        *counts.entry(turn.speaker.as_str()).or_insert(0) += 1;
    }
    if counts.is_empty() {
        return ParticipationBalanceLevel::Silent;
    }
    let max = counts.values().copied().max().unwrap_or(0) as f64;
    let avg = counts.values().sum::<usize>() as f64 / counts.len() as f64;
    if max > avg * 2.0 {
        ParticipationBalanceLevel::Dominated
    } else if counts.len() >= 2 && counts.values().all(|&c| (c as f64 - avg).abs() <= 1.0) {
        ParticipationBalanceLevel::Balanced
    } else {
        ParticipationBalanceLevel::Silent
    }
}

fn subtopic_depth(history: &[Turn]) -> f64 {
    window(history, DEPTH_WINDOW)
        .iter()
        .filter(|t| {
            let tokens = tokenize(&t.text);
            DEPTH_MARKERS.iter().any(|m| contains_phrase(&tokens, m))
        })
        .count() as f64
        * 0.5
}

/// Near-duplicate turns, very short turns, or nobody asking or exclaiming.
fn stagnation(history: &[Turn]) -> bool {
    let recent: Vec<&Turn> = window(history, STAGNATION_WINDOW).iter().collect();
    if recent.len() < 3 {
        return false;
    }
    let unique: std::collections::HashSet<String> = recent.iter().map(|t| tokenize(&t.text).join(" ")).collect();
    if (unique.len() as f64) < recent.len() as f64 * 0.7 {
        return true;
    }
    if avg_len(&recent) < 30.0 {
        return true;
    }
    let engagement: usize = recent
        .iter()
        .map(|t| {
            let tokens = tokenize(&t.text);
            usize::from(t.text.contains('?'))
                + usize::from(t.text.contains('!'))
                + ENGAGEMENT_WORDS.iter().filter(|w| contains_phrase(&tokens, w)).count()
        })
        .sum();
    engagement < 2
}

fn current_focus(history: &[Turn]) -> String {
    let mut order: Vec<String> = Vec::new();
    let mut freq: HashMap<String, usize> = HashMap::new();
    for turn in window(history, FOCUS_WINDOW) {
        for word in tokenize(&turn.text) {
            if word.chars().count() <= 4 || FOCUS_STOPWORDS.contains(&word.as_str()) {
                continue;
            }
            let count = freq.entry(word.clone()).or_insert(0);
            if *count == 0 {
                order.push(word);
            }
            *count += 1;
        }
    }
    // First word to reach the top count wins ties
    let mut best: Option<(&String, usize)> = None;
    for word in &order {
        let count = freq[word];
        if best.map(|(_, c)| count > c).unwrap_or(true) {
            best = Some((word, count));
        }
    }
    best.map(|(w, _)| w.clone()).unwrap_or_else(|| "general discussion".to_string())
}

fn momentum(history: &[Turn]) -> f64 {
    let participant: Vec<&Turn> = window(history, BALANCE_WINDOW).iter().filter(|t| t.speaker != MODERATOR).collect();
    if participant.len() < 2 {
        return 0.5;
    }
    let n = participant.len();
    let recent = &participant[n.saturating_sub(3)..];
    let earlier = &participant[n.saturating_sub(6)..n.saturating_sub(3)];
    let trend = avg_len(recent) / avg_len(earlier).max(1.0);
    ((trend + 1.0) / 2.0).min(1.0)
}

fn emerging_themes(history: &[Turn]) -> Vec<EmergingTheme> {
    let participant: Vec<String> = window(history, BALANCE_WINDOW)
        .iter()
        .filter(|t| t.speaker != MODERATOR)
        .map(|t| t.text.to_lowercase())
        .collect();
    let mut themes: Vec<EmergingTheme> = THEMES
        .iter()
        .filter_map(|(theme, keywords)| {
            let mentions = participant.iter().filter(|text| keywords.iter().any(|k| text.contains(k))).count();
            (mentions > 0).then(|| EmergingTheme { theme: theme.to_string(), mentions })
        })
        .collect();
    themes.sort_by(|a, b| b.mentions.cmp(&a.mentions));
    themes
}

pub struct ConversationFlowController {
    analyzer: Arc<dyn TextAnalyzer>,
    state: ConversationFlowState,
    started_at: DateTime<Utc>,
}

impl ConversationFlowController {
    pub fn new(analyzer: Arc<dyn TextAnalyzer>, topic: &str, now: DateTime<Utc>) -> Self {
        Self { analyzer, state: ConversationFlowState::fresh(topic), started_at: now }
    }

    pub fn state(&self) -> &ConversationFlowState {
        &self.state
    }

    pub fn elapsed_minutes(&self, now: DateTime<Utc>) -> f64 {
        ((now - self.started_at).num_milliseconds() as f64 / 60_000.0).max(0.0)
    }

    fn agreement_level(&self, history: &[Turn]) -> AgreementLevel {
        let score = self.analyzer.score_turns(window(history, AGREEMENT_WINDOW), &CONSENSUS_LEXICON);
        if score.agreement + score.disagreement == 0 {
            return AgreementLevel::Mixed;
        }
        let ratio = score.consensus();
        if ratio > 0.7 {
            AgreementLevel::HighConsensus
        } else if ratio < 0.3 {
            AgreementLevel::Polarized
        } else {
            AgreementLevel::Mixed
        }
    }

    /// Flow metrics for `history` without storing them.
    pub fn compute_state(&self, history: &[Turn], now: DateTime<Utc>) -> ConversationFlowState {
        let mut state = ConversationFlowState::fresh(&self.state.topic);
        state.elapsed_minutes = self.elapsed_minutes(now);
        if history.is_empty() {
            return state;
        }
        state.energy_level = energy_level(history);
        state.participation_balance = participation_balance(history);
        state.agreement_level = self.agreement_level(history);
        state.subtopic_depth = subtopic_depth(history);
        state.stagnation = stagnation(history);
        state.current_focus = current_focus(history);
        state.momentum = momentum(history);
        state.emerging_themes = emerging_themes(history);
        state
    }

    /// Applied as part of a turn commit.
    pub fn update_state(&mut self, history: &[Turn], now: DateTime<Utc>) {
        self.state = self.compute_state(history, now);
    }

    /// Priority-sorted advice for the moderator. Deterministic, non-mutating.
    pub fn analyze_conversation_flow(
        &self,
        history: &[Turn],
        participants: &[PersonaProfile],
        now: DateTime<Utc>,
    ) -> Vec<FlowRecommendation> {
        let state = self.compute_state(history, now);
        let mut recs = Vec::new();

        if state.agreement_level == AgreementLevel::HighConsensus {
            recs.push(FlowRecommendation::new(
                FlowAction::BreakArtificialConsensus,
                Priority::High,
                "Too much agreement - may be superficial",
                "Challenge the consensus: \"Does everyone really feel the same way? Who sees this differently?\"",
            ));
        }

        if state.stagnation {
            recs.push(FlowRecommendation::new(
                FlowAction::ChangeSubtopic,
                Priority::High,
                "Conversation showing signs of stagnation",
                "Introduce a new angle or ask for specific examples",
            ));
        }

        recs.extend(self.manage_participation_balance(&participation_counts(history), participants));

        if state.energy_level == EnergyLevel::Low && !history.is_empty() {
            recs.push(FlowRecommendation::new(
                FlowAction::RevitalizeDiscussion,
                Priority::Medium,
                "Low energy detected in responses",
                "Ask a provocative question or introduce a scenario",
            ));
        }

        if state.subtopic_depth < 1.0 && history.len() > 8 {
            let themes: Vec<&str> = state.emerging_themes.iter().map(|t| t.theme.as_str()).collect();
            let intervention = if themes.is_empty() {
                "Ask for specific examples or personal experiences".to_string()
            } else {
                format!("Themes emerging: {}. Ask for specific examples or deeper explanation.", themes.join(", "))
            };
            recs.push(FlowRecommendation::new(
                FlowAction::DeepenExploration,
                Priority::Medium,
                "Discussion remaining surface-level",
                intervention,
            ));
        }

        let transition = window(history, BALANCE_WINDOW).iter().any(|t| {
            let tokens = tokenize(&t.text);
            TRANSITION_MARKERS.iter().any(|m| contains_phrase(&tokens, m))
        });
        if transition {
            recs.push(FlowRecommendation::new(
                FlowAction::NaturalTransition,
                Priority::Low,
                "Natural transition opportunity detected",
                "Guide to the next angle smoothly",
            ));
        }

        let since_moderator = history.iter().rev().take_while(|t| t.speaker != MODERATOR).count();
        if since_moderator >= 6 {
            recs.push(FlowRecommendation::new(
                FlowAction::NaturalFacilitation,
                Priority::Low,
                "Moderator has been quiet for a while",
                "Provide gentle facilitation to maintain momentum",
            ));
        }

        // One entry per action, highest priority first
        recs.sort_by(|a, b| b.priority.cmp(&a.priority));
        let mut seen = std::collections::HashSet::new();
        recs.retain(|r| seen.insert(r.action));
        recs
    }

    pub fn manage_participation_balance(
        &self,
        counts: &HashMap<String, usize>,
        participants: &[PersonaProfile],
    ) -> Vec<FlowRecommendation> {
        if participants.is_empty() {
            return Vec::new();
        }
        let count = |p: &PersonaProfile| counts.get(&p.name).copied().unwrap_or(0) as f64;
        let avg = participants.iter().map(count).sum::<f64>() / participants.len() as f64;

        let mut dominators = Vec::new();
        let mut quiet = Vec::new();
        for p in participants {
            if count(p) > avg * 1.5 {
                dominators.push(p.name.clone());
            } else if count(p) < avg * 0.5 {
                quiet.push(p.name.clone());
            }
        }

        let mut recs = Vec::new();
        if !dominators.is_empty() && !quiet.is_empty() {
            let mut rec = FlowRecommendation::new(
                FlowAction::BalanceParticipation,
                Priority::Medium,
                format!("{} dominating while {} are quiet", dominators.join(", "), quiet.join(", ")),
                format!("Gently redirect to quieter participants: \"{}, what's your experience with this?\"", quiet[0]),
            );
            rec.target_persona = Some(quiet[0].clone());
            recs.push(rec);
        }
        if quiet.len() as f64 > participants.len() as f64 / 2.0 {
            recs.push(FlowRecommendation::new(
                FlowAction::RevitalizeDiscussion,
                Priority::High,
                "Too many participants are withdrawn",
                "Ask a more engaging or personal question to revitalize discussion",
            ));
        }
        recs
    }

    /// Judged on the last committed state.
    pub fn should_continue_topic(&self) -> bool {
        let s = &self.state;
        if s.subtopic_depth < 2.0 {
            return true;
        }
        if s.energy_level == EnergyLevel::High && s.participation_balance == ParticipationBalanceLevel::Balanced {
            return true;
        }
        if s.stagnation || s.agreement_level == AgreementLevel::HighConsensus {
            return false;
        }
        if s.agreement_level == AgreementLevel::Polarized {
            return true;
        }
        s.elapsed_minutes < 10.0
    }

    pub fn trigger_topic_shift(&self, energy: f64, engagement: &HashMap<String, f64>) -> TopicShift {
        let avg = if engagement.is_empty() {
            0.0
        } else {
            engagement.values().sum::<f64>() / engagement.len() as f64
        };
        let shift = |reason: &str, suggestion: &str| TopicShift {
            should_shift: true,
            reason: reason.to_string(),
            new_topic_suggestion: Some(suggestion.to_string()),
        };

        if energy < 0.3 && avg < 0.4 {
            return shift("Low energy and engagement levels", "More engaging or personal topic");
        }
        if self.state.stagnation {
            return shift("Conversation has stagnated", "Related but fresh perspective");
        }
        if self.state.agreement_level == AgreementLevel::HighConsensus && self.state.subtopic_depth < 2.0 {
            return shift("Superficial consensus reached", "More controversial or nuanced aspect");
        }
        if self.state.elapsed_minutes > 15.0 {
            return shift("Topic has been exhausted", "Next planned discussion topic");
        }
        TopicShift { should_shift: false, reason: "Topic still productive".to_string(), new_topic_suggestion: None }
    }

    /// Directive for the moderator built from the top recommendation.
    pub fn moderator_intervention(&self, recs: &[FlowRecommendation], topic: &str) -> ModeratorIntervention {
        let Some(top) = recs.first() else {
            return ModeratorIntervention {
                action: FlowAction::NaturalFacilitation,
                priority: Priority::Low,
                instruction: format!("Ask an open-ended follow-up question about {} to maintain engagement.", topic),
                tone: "gentle_probe".to_string(),
            };
        };

        let (base, tone) = match top.action {
            FlowAction::BreakArtificialConsensus => (
                "Participants are agreeing too much. Create productive disagreement by asking: \"Who sees this differently?\" or \"What concerns would people have?\"".to_string(),
                "challenge_consensus",
            ),
            FlowAction::BalanceParticipation => (
                match &top.target_persona {
                    Some(name) => format!("Call on quiet participants: \"{}, what are your thoughts?\" and manage dominant voices.", name),
                    None => "Redistribute airtime toward quieter participants.".to_string(),
                },
                "redistribute_focus",
            ),
            FlowAction::RevitalizeDiscussion => (
                "Discussion is losing energy. Inject energy with a provocative question or hypothetical scenario.".to_string(),
                "energize",
            ),
            FlowAction::DeepenExploration => {
                ("Ask for specific examples, personal experiences, or deeper reasoning.".to_string(), "probe_deeper")
            }
            FlowAction::ChangeSubtopic => (
                format!("The discussion is going in circles. Introduce a fresh angle on {}.", topic),
                "redirect",
            ),
            FlowAction::NaturalTransition => {
                ("Natural transition opportunity detected. Guide to a new angle smoothly.".to_string(), "transition")
            }
            FlowAction::NaturalFacilitation => (
                "Provide gentle facilitation to maintain momentum without disrupting natural flow.".to_string(),
                "minimal_guidance",
            ),
        };

        let instruction = match &top.suggested_intervention {
            Some(hint) => format!("{} Suggested: {}", base, hint),
            None => base,
        };
        ModeratorIntervention { action: top.action, priority: top.priority, instruction, tone: tone.to_string() }
    }
}
