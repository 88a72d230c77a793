// src/disagreement.rs
// DISAGREEMENT ENFORCER: safety net against artificial unanimity
// Runs its own consensus check over a phrase dictionary and, when the room is
// agreeing too much, picks who should push back and hands the orchestrator a
// structured directive. The directive feeds the generation context; it is
// never emitted as dialogue.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analysis::{contains_phrase, tokenize, word_overlap, TextAnalyzer, ENFORCER_LEXICON};
use crate::behavior::EmotionalIntensity;
use crate::persona::{PersonaProfile, Turn};
use crate::stance::{AssignedStance, DisagreementType};

const ENFORCER_WINDOW: usize = 8;

const CONTROVERSIAL_TOPICS: &[&str] = &[
    "gun", "weapon", "firearm", "second amendment",
    "climate", "environment", "global warming", "carbon",
    "immigration", "border", "refugee", "asylum",
    "healthcare", "insurance", "medical", "medicare",
    "abortion", "reproductive", "pro-life", "pro-choice",
    "taxation", "taxes", "government spending", "welfare",
    "police", "law enforcement", "justice", "prison",
    "education", "school", "university", "student debt",
    "economy", "recession", "unemployment", "minimum wage",
    "religion", "church", "faith", "prayer",
    "technology", "privacy", "surveillance", "data",
    "military", "war", "defense", "veteran",
];

const LOGICAL_OPENERS: &[&str] = &[
    "I have to disagree with that analysis because",
    "The data actually shows",
    "That's not supported by evidence -",
    "I think that misses the key point:",
    "Actually, research indicates",
];

const EMOTIONAL_OPENERS: &[&str] = &[
    "I strongly disagree because",
    "That really bothers me -",
    "I can't accept that perspective because",
    "No, that's completely wrong!",
    "I feel very differently about this:",
];

const EXPERIENCE_OPENERS: &[&str] = &[
    "That hasn't been my experience at all -",
    "I've seen the opposite happen when",
    "From what I've lived through,",
    "In my situation,",
    "Based on what I've witnessed,",
];

const CONTRARIAN_ARGUMENTS: &[&str] = &[
    "The group is glossing over real downsides",
    "Not everyone in this room is affected the same way",
    "We haven't heard the strongest objections yet",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisagreementStyle {
    Logical,
    Emotional,
    PersonalExperience,
}

impl DisagreementStyle {
    fn openers(self) -> &'static [&'static str] {
        match self {
            DisagreementStyle::Logical => LOGICAL_OPENERS,
            DisagreementStyle::Emotional => EMOTIONAL_OPENERS,
            DisagreementStyle::PersonalExperience => EXPERIENCE_OPENERS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisagreementAnalysis {
    pub consensus_level: f64,
    pub controversial_topic: bool,
    pub needs_disagreement: bool,
    pub disagreement_type: DisagreementType,
    pub reason: String,
}

/// Who should push back, with what, and how hard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisagreementDirective {
    pub target_persona_id: String,
    pub target_name: String,
    pub required_position: String,
    /// The stance the target argues from; a contrarian stand-in when the topic has none.
    pub stance: AssignedStance,
    pub argument: String,
    pub personal_connection: Option<String>,
    pub intensity: EmotionalIntensity,
    pub style: DisagreementStyle,
    pub disagreement_type: DisagreementType,
    pub consensus_level: f64,
    /// Ready-to-embed instruction block for the generation prompt.
    pub prompt: String,
}

pub fn intensity_for(investment: f64) -> EmotionalIntensity {
    if investment > 0.7 {
        EmotionalIntensity::High
    } else if investment > 0.4 {
        EmotionalIntensity::Medium
    } else {
        EmotionalIntensity::Low
    }
}

pub fn disagreement_style(persona: &PersonaProfile, investment: f64) -> DisagreementStyle {
    let big5 = &persona.personality;
    if big5.openness >= 4 && investment > 0.7 {
        return DisagreementStyle::Emotional;
    }
    if big5.conscientiousness >= 4
        || persona.background.education.to_lowercase().contains("college")
        || persona.occupation.title.to_lowercase().contains("analyst")
    {
        return DisagreementStyle::Logical;
    }
    DisagreementStyle::PersonalExperience
}

/// Argument with the highest word overlap against `text`; the first one if nothing overlaps.
fn counter_argument(stance: &AssignedStance, text: &str) -> String {
    let mut best = stance.arguments.first().cloned().unwrap_or_else(|| stance.position.clone());
    let mut best_score = 0.0;
    for argument in &stance.arguments {
        let score = word_overlap(text, argument, 3);
        if score > best_score {
            best_score = score;
            best = argument.clone();
        }
    }
    best
}

/// Prefer connections that sound first-hand.
fn personal_connection<R: Rng + ?Sized>(stance: &AssignedStance, rng: &mut R) -> Option<String> {
    let personal: Vec<&String> = stance
        .personal_connections
        .iter()
        .filter(|c| {
            let tokens = tokenize(c);
            ["my", "family", "experience"].iter().any(|w| contains_phrase(&tokens, w))
        })
        .collect();
    if let Some(pick) = personal.choose(rng) {
        return Some((*pick).clone());
    }
    stance.personal_connections.first().cloned()
}

/// Stand-in stance for a target when no catalog stance exists for the topic.
fn contrarian_stance(persona: &PersonaProfile, topic: &str) -> AssignedStance {
    let mut connections = Vec::new();
    if !persona.occupation.title.is_empty() {
        connections.push(format!(
            "Working as a {}, I rarely see things work out that neatly",
            persona.occupation.title.to_lowercase()
        ));
    }
    if !persona.location.is_empty() {
        connections.push(format!("Where I live in {}, people see this differently", persona.location));
    }
    let pushback = 5u8.saturating_sub(persona.personality.agreeableness) as f64;
    AssignedStance {
        category: "general".to_string(),
        stance_key: "contrarian".to_string(),
        position: format!("Skeptical of the emerging consensus on {}", topic),
        arguments: CONTRARIAN_ARGUMENTS.iter().map(|a| a.to_string()).collect(),
        concerns: vec!["Groupthink".to_string()],
        personal_connections: connections,
        emotional_investment: (0.4 + pushback * 0.1).min(1.0),
    }
}

pub struct DisagreementEnforcer {
    analyzer: Arc<dyn TextAnalyzer>,
}

impl DisagreementEnforcer {
    pub fn new(analyzer: Arc<dyn TextAnalyzer>) -> Self {
        Self { analyzer }
    }

    pub fn is_controversial(&self, topic: &str) -> bool {
        let tokens = tokenize(topic);
        CONTROVERSIAL_TOPICS.iter().any(|k| contains_phrase(&tokens, k))
    }

    /// Phrase-based agreement share over the trailing window. No turns means
    /// no consensus (0.0); turns without any marker read as neutral (0.5).
    pub fn consensus_level(&self, recent: &[Turn]) -> f64 {
        let window = &recent[recent.len().saturating_sub(ENFORCER_WINDOW)..];
        if window.is_empty() {
            return 0.0;
        }
        self.analyzer.score_turns(window, &ENFORCER_LEXICON).consensus()
    }

    pub fn requires_disagreement(&self, topic: &str, recent: &[Turn]) -> DisagreementAnalysis {
        let controversial = self.is_controversial(topic);
        let consensus = self.consensus_level(recent);
        let observed = recent.len().min(ENFORCER_WINDOW);

        let (needs, kind, reason) = if controversial && consensus > 0.7 {
            (true, DisagreementType::Strong, "High consensus on controversial topic is unrealistic")
        } else if consensus > 0.6 && observed > 4 {
            (true, DisagreementType::Moderate, "Sustained agreement needs natural disagreement")
        } else if consensus > 0.8 && observed > 2 {
            (true, DisagreementType::Mild, "Near-unanimous run is unnatural even on a mild topic")
        } else {
            (false, DisagreementType::Mild, "")
        };

        DisagreementAnalysis {
            consensus_level: consensus,
            controversial_topic: controversial,
            needs_disagreement: needs,
            disagreement_type: kind,
            reason: reason.to_string(),
        }
    }

    /// Target for a pushback: someone outside the last three speakers (when
    /// possible) with the highest `(5 - agreeableness) + extraversion`,
    /// ties broken by emotional investment. With a non-empty stance map only
    /// personas holding a stance qualify.
    pub fn select_target<'a>(
        &self,
        personas: &'a [PersonaProfile],
        recent: &[Turn],
        stances: &BTreeMap<String, AssignedStance>,
    ) -> Option<&'a PersonaProfile> {
        let recent_speakers: HashSet<&str> = recent.iter().rev().take(3).map(|t| t.speaker.as_str()).collect();
        let eligible = |p: &&PersonaProfile| stances.is_empty() || stances.contains_key(&p.id);

        let mut candidates: Vec<&PersonaProfile> = personas
            .iter()
            .filter(eligible)
            .filter(|p| !recent_speakers.contains(p.name.as_str()))
            .collect();
        if candidates.is_empty() {
            candidates = personas.iter().filter(eligible).collect();
        }

        let disagreeable = |p: &PersonaProfile| 5 - p.personality.agreeableness as i32 + p.personality.extraversion as i32;
        let investment = |p: &PersonaProfile| stances.get(&p.id).map(|s| s.emotional_investment).unwrap_or(0.0);

        // min_by with reversed keys keeps the earliest persona on a full tie
        candidates.into_iter().min_by(|a, b| {
            disagreeable(b)
                .cmp(&disagreeable(a))
                .then_with(|| investment(b).partial_cmp(&investment(a)).unwrap_or(Ordering::Equal))
        })
    }

    /// Directive for the next generated turn, or `None` when the room is
    /// disagreeing enough on its own.
    pub fn inject_disagreement<R: Rng + ?Sized>(
        &self,
        personas: &[PersonaProfile],
        recent: &[Turn],
        stances: &BTreeMap<String, AssignedStance>,
        topic: &str,
        rng: &mut R,
    ) -> Option<DisagreementDirective> {
        let analysis = self.requires_disagreement(topic, recent);
        if !analysis.needs_disagreement {
            return None;
        }

        let target = self.select_target(personas, recent, stances)?;
        let stance = stances.get(&target.id).cloned().unwrap_or_else(|| contrarian_stance(target, topic));

        let latest = recent.last().map(|t| t.text.as_str()).unwrap_or("");
        let argument = counter_argument(&stance, latest);
        let connection = personal_connection(&stance, rng);
        let intensity = intensity_for(stance.emotional_investment);
        let style = disagreement_style(target, stance.emotional_investment);
        let prompt = Self::render_prompt(target, &stance, &analysis, recent, &argument, connection.as_deref());

        debug!(
            target = %target.name,
            topic,
            kind = ?analysis.disagreement_type,
            consensus = analysis.consensus_level,
            "🗡️ disagreement directive issued"
        );

        Some(DisagreementDirective {
            target_persona_id: target.id.clone(),
            target_name: target.name.clone(),
            required_position: stance.position.clone(),
            stance,
            argument,
            personal_connection: connection,
            intensity,
            style,
            disagreement_type: analysis.disagreement_type,
            consensus_level: analysis.consensus_level,
            prompt,
        })
    }

    /// Rebuttal text in the persona's disagreement style.
    pub fn generate_counter_position<R: Rng + ?Sized>(
        &self,
        persona: &PersonaProfile,
        agreeable_text: &str,
        stance: &AssignedStance,
        rng: &mut R,
    ) -> String {
        let investment = stance.emotional_investment;
        let style = disagreement_style(persona, investment);
        let mut parts: Vec<String> = Vec::new();

        if investment > 0.7 {
            parts.push("[PASSIONATE]".to_string());
        } else if investment > 0.5 {
            parts.push("[FIRM]".to_string());
        }

        // High intensity sticks to the two most direct openers
        let openers = style.openers();
        let pool = if investment > 0.7 { &openers[..2.min(openers.len())] } else { openers };
        if let Some(opener) = pool.choose(rng) {
            parts.push(opener.to_string());
        }

        parts.push(format!("{}.", counter_argument(stance, agreeable_text)));

        if investment > 0.6 {
            if let Some(connection) = personal_connection(stance, rng) {
                parts.push(format!("{}.", connection.trim_end_matches('.')));
            }
        }
        if investment > 0.8 {
            if let Some(concern) = stance.concerns.choose(rng) {
                parts.push(format!("I'm worried about {}.", concern.to_lowercase()));
            }
        }

        parts.join(" ")
    }

    fn render_prompt(
        persona: &PersonaProfile,
        stance: &AssignedStance,
        analysis: &DisagreementAnalysis,
        recent: &[Turn],
        argument: &str,
        connection: Option<&str>,
    ) -> String {
        let consensus_statement = recent[recent.len().saturating_sub(3)..]
            .iter()
            .map(|t| t.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        let mut prompt = format!(
            "You are {}. The recent discussion has shown too much agreement ({:.0}% consensus). \
            Your assigned stance is: {}. You need to express disagreement with the current consensus. ",
            persona.name,
            analysis.consensus_level * 100.0,
            stance.position
        );
        if analysis.controversial_topic {
            prompt.push_str("This is a controversial topic where people with your background would have strong opinions. ");
        }
        prompt.push_str(&format!("Recent consensus statement: \"{}\"\n", consensus_statement));
        prompt.push_str("Your response should:\n");
        prompt.push_str("1. Clearly disagree with the consensus\n");
        prompt.push_str(&format!("2. Present your stance: {}\n", stance.position));
        prompt.push_str(&format!("3. Use this argument: {}\n", argument));
        prompt.push_str(&format!(
            "4. Show emotional investment level: {}\n",
            if stance.emotional_investment > 0.7 { "HIGH" } else { "MODERATE" }
        ));
        if let Some(connection) = connection {
            prompt.push_str(&format!("5. Include personal connection: {}\n", connection));
        }
        prompt
    }
}
