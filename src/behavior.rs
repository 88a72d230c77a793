// src/behavior.rs
// BEHAVIOR STATE TRACKER: per-persona emotional state that drifts turn by turn
//
// Initial values are linear combinations of Big Five scores plus a few
// demographic nudges; updates react to silence, relevance and elapsed time.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::analysis::{contains_phrase, tokenize};
use crate::persona::{PersonaProfile, Turn, MODERATOR};

const RECENT_WINDOW: usize = 5;
const DISAGREEMENT_CUES: &[&str] = &["wrong", "disagree", "incorrect", "no way", "absolutely not"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipationPattern {
    Active,
    Moderate,
    Passive,
    Withdrawn,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EmotionalState {
    pub energy: f64,
    pub engagement: f64,
    pub frustration: f64,
    pub confidence: f64,
    pub agreeableness: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorState {
    pub persona_id: String,
    pub emotional: EmotionalState,
    pub turns_since_last_spoke: u32,
    pub topic_relevance: f64,
    pub interruption_tendency: f64,
    pub dominance_level: f64,
    pub participation_pattern: ParticipationPattern,
    /// Agreeableness recovers toward this after frustration passes.
    pub baseline_agreeableness: f64,
    /// Conversation minutes already charged against energy.
    pub elapsed_minutes: f64,
    pub last_updated: DateTime<Utc>,
}

impl BehaviorState {
    /// Middle-of-the-road state handed out for personas nobody initialized.
    pub fn neutral(persona_id: &str) -> Self {
        Self {
            persona_id: persona_id.to_string(),
            emotional: EmotionalState {
                energy: 0.5,
                engagement: 0.5,
                frustration: 0.1,
                confidence: 0.5,
                agreeableness: 0.5,
            },
            turns_since_last_spoke: 0,
            topic_relevance: 0.5,
            interruption_tendency: 0.5,
            dominance_level: 0.5,
            participation_pattern: ParticipationPattern::Moderate,
            baseline_agreeableness: 0.5,
            elapsed_minutes: 0.0,
            last_updated: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptionStyle {
    Aggressive,
    Polite,
    Passionate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterruptionTrigger {
    pub should_interrupt: bool,
    pub confidence: f64,
    pub reason: Option<String>,
    pub style: Option<InterruptionStyle>,
}

impl InterruptionTrigger {
    fn none() -> Self {
        Self { should_interrupt: false, confidence: 0.0, reason: None, style: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseLength {
    Short,
    Medium,
    Long,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmotionalIntensity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgreementTendency {
    Disagreeable,
    Neutral,
    Agreeable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BehaviorModifiers {
    pub response_length: ResponseLength,
    pub emotional_intensity: EmotionalIntensity,
    pub agreement_tendency: AgreementTendency,
    pub participation_style: ParticipationPattern,
}

impl BehaviorModifiers {
    pub fn from_state(state: &BehaviorState) -> Self {
        let e = &state.emotional;

        let response_length = if e.energy < 0.3 || state.participation_pattern == ParticipationPattern::Withdrawn {
            ResponseLength::Short
        } else if e.engagement > 0.7 && state.topic_relevance > 0.6 {
            ResponseLength::Long
        } else {
            ResponseLength::Medium
        };

        let intensity = e.engagement + e.frustration + state.topic_relevance;
        let emotional_intensity = if intensity > 2.0 {
            EmotionalIntensity::High
        } else if intensity > 1.0 {
            EmotionalIntensity::Medium
        } else {
            EmotionalIntensity::Low
        };

        let agreement_tendency = if e.agreeableness > 0.7 {
            AgreementTendency::Agreeable
        } else if e.agreeableness < 0.3 {
            AgreementTendency::Disagreeable
        } else {
            AgreementTendency::Neutral
        };

        Self {
            response_length,
            emotional_intensity,
            agreement_tendency,
            participation_style: state.participation_pattern,
        }
    }
}

fn title_has(persona: &PersonaProfile, words: &[&str]) -> bool {
    let title = persona.occupation.title.to_lowercase();
    words.iter().any(|w| title.contains(w))
}

// --- Initial state (personality -> numbers) ---

fn initial_energy(p: &PersonaProfile) -> f64 {
    let big5 = &p.personality;
    let mut energy = (big5.extraversion + big5.conscientiousness) as f64 / 10.0;
    if p.age < 30 {
        energy += 0.1;
    } else if p.age > 60 {
        energy -= 0.1;
    }
    let stage = p.background.life_stage.to_lowercase();
    if stage.contains("student") {
        energy += 0.15;
    }
    if stage.contains("retired") {
        energy -= 0.1;
    }
    energy.clamp(0.1, 1.0)
}

fn initial_engagement(p: &PersonaProfile) -> f64 {
    let mut engagement = (p.personality.openness + p.personality.conscientiousness) as f64 / 10.0;
    if title_has(p, &["teacher", "consultant", "manager"]) {
        engagement += 0.1;
    }
    engagement.clamp(0.2, 1.0)
}

fn initial_confidence(p: &PersonaProfile) -> f64 {
    let mut confidence = (p.personality.extraversion as f64 + (5.0 - p.personality.neuroticism as f64)) / 10.0;
    if p.occupation.experience_years > 10 {
        confidence += 0.1;
    }
    let education = p.background.education.to_lowercase();
    if education.contains("masters") || education.contains("phd") {
        confidence += 0.1;
    }
    confidence.clamp(0.2, 1.0)
}

fn interruption_tendency(p: &PersonaProfile) -> f64 {
    let mut tendency = (p.personality.extraversion as f64 + (5.0 - p.personality.agreeableness as f64)) / 10.0;
    if title_has(p, &["sales", "lawyer", "manager"]) {
        tendency += 0.1;
    }
    tendency.clamp(0.0, 1.0)
}

fn dominance_level(p: &PersonaProfile) -> f64 {
    let big5 = &p.personality;
    let mut dominance =
        (big5.extraversion as f64 + big5.conscientiousness as f64 + (5.0 - big5.agreeableness as f64)) / 15.0;
    if title_has(p, &["director", "ceo", "president"]) {
        dominance += 0.2;
    }
    dominance.clamp(0.0, 1.0)
}

fn initial_participation(p: &PersonaProfile) -> ParticipationPattern {
    let social = p.personality.extraversion as i32 + p.personality.agreeableness as i32 - p.personality.neuroticism as i32;
    match social {
        s if s >= 8 => ParticipationPattern::Active,
        s if s >= 5 => ParticipationPattern::Moderate,
        s if s >= 2 => ParticipationPattern::Passive,
        _ => ParticipationPattern::Withdrawn,
    }
}

/// Expertise, interests, values and occupation mentioned in recent talk.
fn relevance_from_content(p: &PersonaProfile, recent_content: &str) -> f64 {
    let content = recent_content.to_lowercase();
    let hit = |needle: &str| !needle.is_empty() && content.contains(&needle.to_lowercase());

    let mut score = 0.0;
    score += 0.3 * p.expertise_areas.iter().filter(|a| hit(a)).count() as f64;
    score += 0.2 * p.preferences.interests.iter().filter(|i| hit(i)).count() as f64;
    score += 0.2 * p.preferences.values.iter().filter(|v| hit(v)).count() as f64;
    if hit(&p.occupation.title) || hit(&p.occupation.industry) {
        score += 0.3;
    }
    score.min(1.0)
}

#[derive(Debug, Clone)]
pub struct BehaviorStateTracker {
    states: HashMap<String, BehaviorState>,
    names: HashMap<String, String>,
    trigger_threshold: f64,
}

impl BehaviorStateTracker {
    pub fn new(trigger_threshold: f64) -> Self {
        Self { states: HashMap::new(), names: HashMap::new(), trigger_threshold }
    }

    pub fn initialize(&mut self, persona: &PersonaProfile) {
        let agreeableness = persona.personality.agreeableness as f64 / 5.0;
        let state = BehaviorState {
            persona_id: persona.id.clone(),
            emotional: EmotionalState {
                energy: initial_energy(persona),
                engagement: initial_engagement(persona),
                frustration: 0.1,
                confidence: initial_confidence(persona),
                agreeableness,
            },
            turns_since_last_spoke: 0,
            topic_relevance: 0.5,
            interruption_tendency: interruption_tendency(persona),
            dominance_level: dominance_level(persona),
            participation_pattern: initial_participation(persona),
            baseline_agreeableness: agreeableness,
            elapsed_minutes: 0.0,
            last_updated: Utc::now(),
        };
        debug!(persona = %persona.name, energy = state.emotional.energy, "behavior state initialized");
        self.names.insert(persona.id.clone(), persona.name.clone());
        self.states.insert(persona.id.clone(), state);
    }

    pub fn state(&self, persona_id: &str) -> Option<&BehaviorState> {
        self.states.get(persona_id)
    }

    /// Known state, or a neutral one with a diagnostic.
    pub fn state_or_default(&self, persona_id: &str) -> BehaviorState {
        match self.states.get(persona_id) {
            Some(state) => state.clone(),
            None => {
                warn!(persona_id, "behavior state requested for uninitialized persona");
                BehaviorState::neutral(persona_id)
            }
        }
    }

    pub fn states(&self) -> impl Iterator<Item = &BehaviorState> {
        self.states.values()
    }

    /// Compute the refreshed state without touching the tracker.
    /// `elapsed_minutes` is total conversation time; only the delta since the
    /// last refresh is charged against energy.
    pub fn refreshed(&self, persona: &PersonaProfile, history: &[Turn], elapsed_minutes: f64) -> BehaviorState {
        let mut state = self.state_or_default(&persona.id);
        let recent = &history[history.len().saturating_sub(RECENT_WINDOW)..];
        let spoke_recently = recent.iter().any(|t| t.speaker == persona.name);
        let big5 = &persona.personality;

        // Relevance first: the emotional rules below read it.
        let recent_content: Vec<&str> = recent.iter().map(|t| t.text.as_str()).collect();
        state.topic_relevance = relevance_from_content(persona, &recent_content.join(" "));

        let silent = state.turns_since_last_spoke;
        let relevance = state.topic_relevance;
        let e = &mut state.emotional;

        // Energy
        let delta = (elapsed_minutes - state.elapsed_minutes).max(0.0);
        e.energy = (e.energy - delta * 0.02).max(0.1);
        if spoke_recently && e.energy < 0.8 {
            e.energy += 0.1;
        }

        // Engagement
        if relevance > 0.7 {
            e.engagement = (e.engagement + 0.1).min(1.0);
        }
        if silent > 4 {
            e.engagement = (e.engagement - 0.1).max(0.1);
        }
        if big5.openness >= 4 {
            e.engagement = (e.engagement + 0.05).min(1.0);
        }

        // Frustration
        if silent > 5 && e.engagement > 0.6 {
            e.frustration = (e.frustration + 0.15).min(1.0);
        }
        if big5.neuroticism >= 4 {
            e.frustration = (e.frustration + 0.05).min(1.0);
        }
        if spoke_recently {
            e.frustration = (e.frustration - 0.1).max(0.0);
        }

        // Confidence
        if relevance > 0.8 {
            e.confidence = (e.confidence + 0.1).min(1.0);
        }
        if silent > 3 && relevance > 0.7 {
            e.confidence = (e.confidence - 0.05).max(0.1);
        }

        // Agreeableness dips under frustration, recovers toward baseline
        if e.frustration > 0.7 {
            e.agreeableness = (e.agreeableness - 0.1).max(0.0);
        }
        if e.frustration < 0.3 && e.agreeableness < state.baseline_agreeableness {
            e.agreeableness = (e.agreeableness + 0.05).min(state.baseline_agreeableness);
        }

        // Participation share of recent non-moderator turns
        let spoken = recent.iter().filter(|t| t.speaker == persona.name).count();
        let total = recent.iter().filter(|t| t.speaker != MODERATOR).count();
        if total > 0 {
            let ratio = spoken as f64 / total as f64;
            state.participation_pattern = if ratio > 0.4 {
                ParticipationPattern::Active
            } else if ratio > 0.2 {
                ParticipationPattern::Moderate
            } else if ratio > 0.05 {
                ParticipationPattern::Passive
            } else {
                ParticipationPattern::Withdrawn
            };
        }

        state.elapsed_minutes = elapsed_minutes.max(state.elapsed_minutes);
        state.last_updated = Utc::now();
        state
    }

    /// Store a state computed by `refreshed`. Unknown personas are ignored.
    pub fn apply(&mut self, state: BehaviorState) {
        if self.states.contains_key(&state.persona_id) {
            self.states.insert(state.persona_id.clone(), state);
        } else {
            warn!(persona_id = %state.persona_id, "dropping state for uninitialized persona");
        }
    }

    pub fn update(&mut self, persona: &PersonaProfile, history: &[Turn], elapsed_minutes: f64) {
        if !self.states.contains_key(&persona.id) {
            warn!(persona = %persona.name, "update for uninitialized persona skipped");
            return;
        }
        let next = self.refreshed(persona, history, elapsed_minutes);
        self.apply(next);
    }

    /// Silence bookkeeping after a committed turn. Moderator turns don't count.
    pub fn record_turn(&mut self, turn: &Turn) {
        if turn.is_moderator() {
            return;
        }
        for (id, state) in self.states.iter_mut() {
            if self.names.get(id).map(|n| n == &turn.speaker).unwrap_or(false) {
                state.turns_since_last_spoke = 0;
            } else {
                state.turns_since_last_spoke += 1;
            }
        }
    }

    pub fn should_interrupt<R: Rng + ?Sized>(
        &self,
        persona: &PersonaProfile,
        current_speaker: &str,
        statement: &str,
        rng: &mut R,
    ) -> InterruptionTrigger {
        let Some(state) = self.states.get(&persona.id) else {
            warn!(persona = %persona.name, "interruption check for uninitialized persona");
            return InterruptionTrigger::none();
        };
        if current_speaker == persona.name {
            return InterruptionTrigger::none();
        }

        let e = &state.emotional;
        let mut score = state.interruption_tendency * 0.3;
        let mut reason = "";
        let mut style = InterruptionStyle::Polite;

        if e.engagement > 0.7 && e.frustration > 0.6 {
            score += 0.4;
            reason = "high engagement and frustration";
            style = InterruptionStyle::Passionate;
        }

        let tokens = tokenize(statement);
        let disagrees = DISAGREEMENT_CUES.iter().any(|cue| contains_phrase(&tokens, cue));
        if state.dominance_level > 0.7 && disagrees {
            score += 0.5;
            reason = "disagreement with dominant personality";
            style = InterruptionStyle::Aggressive;
        }

        if e.agreeableness < 0.4 && state.topic_relevance > 0.8 {
            score += 0.3;
            reason = "strong opinion on relevant topic";
            style = InterruptionStyle::Aggressive;
        }

        if state.turns_since_last_spoke > 3 && persona.personality.extraversion >= 4 {
            score += 0.2;
            reason = "extrovert breaking long silence";
            style = InterruptionStyle::Polite;
        }

        if matches!(state.participation_pattern, ParticipationPattern::Withdrawn | ParticipationPattern::Passive) {
            score *= 0.3;
        }

        score += (rng.gen::<f64>() - 0.5) * 0.2;

        let should_interrupt = score > self.trigger_threshold;
        InterruptionTrigger {
            should_interrupt,
            confidence: score.clamp(0.0, 1.0),
            reason: should_interrupt.then(|| reason.to_string()),
            style: should_interrupt.then_some(style),
        }
    }

    pub fn modifiers(&self, persona_id: &str) -> BehaviorModifiers {
        BehaviorModifiers::from_state(&self.state_or_default(persona_id))
    }
}
