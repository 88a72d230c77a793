// src/stance.rs
// STANCE MANAGER: who believes what on a controversial topic
// Assigns positions from demographic fit, guarantees at least two distinct
// positions in the room, and turns a stance into counter-argument text.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::analysis::{contains_phrase, tokenize, word_overlap, TextAnalyzer, CONSENSUS_LEXICON};
use crate::catalog::{StanceTemplate, TopicCategory};
use crate::config::ConsensusThresholds;
use crate::persona::{PersonaProfile, Turn};

const CONSENSUS_WINDOW: usize = 6;

const CONTROVERSIAL_KEYWORDS: &[&str] = &[
    "gun", "weapon", "firearm", "climate", "environment", "global warming", "immigration", "border",
    "refugee", "abortion", "reproductive", "healthcare", "insurance", "taxation", "taxes", "police",
    "law enforcement",
];

const DISAGREEMENT_STARTERS: &[&str] = &[
    "I have to disagree with that because",
    "That's not how I see it at all -",
    "I understand that perspective, but",
    "Actually, I think that's completely wrong because",
    "Hold on, that doesn't match my experience:",
];

const GENERIC_DISAGREEMENTS: &[&str] = &[
    "I have to disagree with that perspective.",
    "That's not how I see it at all.",
    "I think there's another way to look at this.",
    "Actually, I have a different opinion.",
    "I'm not convinced by that argument.",
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssignedStance {
    /// Catalog category this stance was drawn from.
    pub category: String,
    pub stance_key: String,
    pub position: String,
    pub arguments: Vec<String>,
    pub concerns: Vec<String>,
    pub personal_connections: Vec<String>,
    pub emotional_investment: f64,
}

impl AssignedStance {
    pub fn from_template(persona: &PersonaProfile, category: &TopicCategory, template: &StanceTemplate) -> Self {
        Self {
            category: category.key.to_string(),
            stance_key: template.key.to_string(),
            position: template.position.to_string(),
            arguments: template.arguments.iter().map(|a| a.to_string()).collect(),
            concerns: template.concerns.iter().map(|c| c.to_string()).collect(),
            personal_connections: personal_connections(persona, template),
            emotional_investment: emotional_investment(persona, template),
        }
    }

    /// `[PASSIONATE]`-style tag scaled by emotional investment.
    pub fn intensity_markers(&self) -> [&'static str; 2] {
        if self.emotional_investment > 0.7 {
            ["[PASSIONATE]", "[FRUSTRATED]"]
        } else if self.emotional_investment > 0.5 {
            ["[CONCERNED]", "[FIRM]"]
        } else {
            ["[THOUGHTFUL]", "[MEASURED]"]
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisagreementType {
    Mild,
    Moderate,
    Strong,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisagreementContext {
    pub topic: String,
    pub current_consensus: f64,
    pub needs_disagreement: bool,
    pub disagreement_type: DisagreementType,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StanceExportEntry {
    pub name: String,
    pub stance_key: String,
    pub position: String,
    pub emotional_investment: f64,
    pub arguments: Vec<String>,
    pub personal_connections: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StanceExport {
    pub topic: String,
    pub participants: Vec<StanceExportEntry>,
    pub stance_distribution: BTreeMap<String, usize>,
}

fn ensure_sentence(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.ends_with(|c: char| matches!(c, '.' | '!' | '?')) {
        trimmed.to_string()
    } else {
        format!("{}.", trimmed)
    }
}

fn personal_connections(persona: &PersonaProfile, template: &StanceTemplate) -> Vec<String> {
    let mut connections: Vec<String> = template.personal_connections.iter().map(|c| c.to_string()).collect();

    let relevant = persona.background.experiences.iter().find(|exp| {
        let exp = exp.to_lowercase();
        template
            .personal_connections
            .iter()
            .chain(template.concerns.iter())
            .any(|c| {
                let c = c.to_lowercase();
                exp.contains(&c) || c.contains(&exp) || word_overlap(&exp, &c, 3) > 0.0
            })
    });
    if let Some(exp) = relevant {
        connections.push(format!("From my experience with {}, I know what's at stake", exp.to_lowercase()));
    }

    if !persona.occupation.title.is_empty() {
        connections.push(format!(
            "As someone working as a {}, I see this up close",
            persona.occupation.title.to_lowercase()
        ));
    }
    if !persona.location.is_empty() {
        connections.push(format!("Living in {}, I've seen how this plays out", persona.location));
    }
    connections
}

fn emotional_investment(persona: &PersonaProfile, template: &StanceTemplate) -> f64 {
    let big5 = &persona.personality;
    let mut investment = template.emotional_investment;
    if big5.neuroticism >= 4 {
        investment += 0.1;
    }
    if big5.openness >= 4 {
        investment += 0.05;
    }
    if big5.agreeableness <= 2 {
        investment += 0.1;
    }
    let fear_hit = persona.goals.fears.iter().any(|fear| {
        let fear = fear.to_lowercase();
        template.concerns.iter().any(|c| {
            let c = c.to_lowercase();
            fear.contains(&c) || c.contains(&fear)
        })
    });
    if fear_hit {
        investment += 0.15;
    }
    investment.min(1.0)
}

/// Stances of a category ordered by alignment, best first. Ties keep catalog order.
fn ranked(category: &'static TopicCategory, persona: &PersonaProfile) -> Vec<(&'static StanceTemplate, i32)> {
    let mut scored: Vec<(&'static StanceTemplate, i32)> =
        category.stances.iter().map(|s| (s, s.alignment(persona))).collect();
    scored.sort_by(|a, b| b.1.cmp(&a.1));
    scored
}

pub struct StanceManager {
    analyzer: Arc<dyn TextAnalyzer>,
    thresholds: ConsensusThresholds,
    variety_probability: f64,
    /// topic -> persona id -> stance
    assigned: HashMap<String, BTreeMap<String, AssignedStance>>,
}

impl StanceManager {
    pub fn new(analyzer: Arc<dyn TextAnalyzer>, thresholds: ConsensusThresholds, variety_probability: f64) -> Self {
        Self { analyzer, thresholds, variety_probability, assigned: HashMap::new() }
    }

    /// Pick a stance per persona, then make sure the room isn't unanimous.
    /// `spoken` holds names of personas who already have turns on record;
    /// those are the last choice when a stance has to be moved.
    pub fn assign_stances<R: Rng + ?Sized>(
        &mut self,
        personas: &[PersonaProfile],
        topic: &str,
        spoken: &HashSet<String>,
        rng: &mut R,
    ) -> BTreeMap<String, AssignedStance> {
        let Some(category) = self.analyzer.detect_topic(topic) else {
            info!(topic, "topic is not controversial, no stances assigned");
            self.assigned.remove(topic);
            return BTreeMap::new();
        };

        let mut picks: Vec<&'static StanceTemplate> = personas
            .iter()
            .map(|persona| {
                let options = ranked(category, persona);
                if options.len() > 1 && rng.gen::<f64>() < self.variety_probability {
                    options[1].0
                } else {
                    options[0].0
                }
            })
            .collect();

        Self::ensure_diversity(category, personas, &mut picks, spoken);

        let stances: BTreeMap<String, AssignedStance> = personas
            .iter()
            .zip(picks)
            .map(|(persona, template)| (persona.id.clone(), AssignedStance::from_template(persona, category, template)))
            .collect();

        self.log_distribution(topic, &stances);
        self.assigned.insert(topic.to_string(), stances.clone());
        stances
    }

    /// If everyone landed on one stance, move exactly one persona.
    /// Preference: someone who hasn't spoken, then the smallest margin
    /// between their current stance and their best alternative.
    fn ensure_diversity(
        category: &'static TopicCategory,
        personas: &[PersonaProfile],
        picks: &mut [&'static StanceTemplate],
        spoken: &HashSet<String>,
    ) {
        if personas.len() < 2 || category.stances.len() < 2 {
            return;
        }
        let first = picks[0].key;
        if picks.iter().any(|p| p.key != first) {
            return;
        }

        let unspoken: Vec<usize> = (0..personas.len()).filter(|&i| !spoken.contains(&personas[i].name)).collect();
        let pool: Vec<usize> = if unspoken.is_empty() { (0..personas.len()).collect() } else { unspoken };

        let mut best: Option<(usize, &'static StanceTemplate, i32)> = None;
        for i in pool {
            let current = picks[i].alignment(&personas[i]);
            let Some((alt, alt_score)) = ranked(category, &personas[i])
                .into_iter()
                .find(|(s, _)| s.key != picks[i].key)
            else {
                continue;
            };
            let margin = current - alt_score;
            if best.map(|(_, _, m)| margin <= m).unwrap_or(true) {
                best = Some((i, alt, margin));
            }
        }

        if let Some((i, alt, margin)) = best {
            debug!(
                persona = %personas[i].name,
                from = first,
                to = alt.key,
                margin,
                "reassigned stance to break unanimity"
            );
            picks[i] = alt;
        }
    }

    fn log_distribution(&self, topic: &str, stances: &BTreeMap<String, AssignedStance>) {
        let mut distribution: BTreeMap<&str, usize> = BTreeMap::new();
        for stance in stances.values() {
            *distribution.entry(stance.stance_key.as_str()).or_insert(0) += 1;
        }
        info!(topic, ?distribution, "⚖️ stances assigned");
    }

    /// Install stances loaded from a store instead of recomputing them.
    pub fn restore(&mut self, topic: &str, stances: BTreeMap<String, AssignedStance>) {
        self.log_distribution(topic, &stances);
        self.assigned.insert(topic.to_string(), stances);
    }

    pub fn stances_for(&self, topic: &str) -> Option<&BTreeMap<String, AssignedStance>> {
        self.assigned.get(topic)
    }

    pub fn stance_for(&self, persona_id: &str, topic: &str) -> Option<&AssignedStance> {
        self.assigned.get(topic).and_then(|m| m.get(persona_id))
    }

    pub fn distinct_positions(&self, topic: &str) -> usize {
        self.assigned
            .get(topic)
            .map(|m| m.values().map(|s| s.position.as_str()).collect::<HashSet<_>>().len())
            .unwrap_or(0)
    }

    pub fn is_controversial(&self, topic: &str) -> bool {
        let tokens = tokenize(topic);
        CONTROVERSIAL_KEYWORDS.iter().any(|k| contains_phrase(&tokens, k)) || self.analyzer.detect_topic(topic).is_some()
    }

    /// Agreement share over the last few turns, 0.5 when there is no signal.
    pub fn consensus_level(&self, history: &[Turn]) -> f64 {
        let window = &history[history.len().saturating_sub(CONSENSUS_WINDOW)..];
        if window.is_empty() {
            return 0.5;
        }
        self.analyzer.score_turns(window, &CONSENSUS_LEXICON).consensus()
    }

    pub fn requires_disagreement(&self, topic: &str, history: &[Turn]) -> DisagreementContext {
        let consensus = self.consensus_level(history);
        let controversial = self.is_controversial(topic);

        // Escalation order is fixed: strong, then moderate, then mild.
        let (needs, kind) = if controversial && consensus > self.thresholds.controversial {
            (true, DisagreementType::Strong)
        } else if consensus > self.thresholds.moderate {
            (true, DisagreementType::Moderate)
        } else if consensus > self.thresholds.mild {
            (true, DisagreementType::Mild)
        } else {
            (false, DisagreementType::Mild)
        };

        DisagreementContext {
            topic: topic.to_string(),
            current_consensus: consensus,
            needs_disagreement: needs,
            disagreement_type: kind,
        }
    }

    /// Counter-argument for `persona` when the room has drifted into agreement.
    pub fn enforce_disagreement<R: Rng + ?Sized>(
        &self,
        persona: &PersonaProfile,
        previous_text: &str,
        topic: &str,
        history: &[Turn],
        rng: &mut R,
    ) -> Option<String> {
        let context = self.requires_disagreement(topic, history);
        if !context.needs_disagreement {
            return None;
        }
        let stance = self.stance_for(&persona.id, topic)?;
        let response = Self::disagreement_response(stance, previous_text, rng);
        debug!(
            persona = %persona.name,
            topic,
            kind = ?context.disagreement_type,
            consensus = context.current_consensus,
            "forced disagreement"
        );
        Some(response)
    }

    /// Stance-backed rebuttal, or a generic one if the persona has no stance.
    pub fn generate_counter_argument<R: Rng + ?Sized>(
        &self,
        persona: &PersonaProfile,
        previous_text: &str,
        topic: &str,
        rng: &mut R,
    ) -> String {
        match self.stance_for(&persona.id, topic) {
            Some(stance) => Self::disagreement_response(stance, previous_text, rng),
            None => Self::generic_disagreement(persona, rng),
        }
    }

    /// `[MARKER] starter argument. connection.`
    /// The argument that best overlaps the previous statement is used as the
    /// rebuttal; with no overlap one is drawn at random.
    pub fn disagreement_response<R: Rng + ?Sized>(stance: &AssignedStance, previous_text: &str, rng: &mut R) -> String {
        let markers = stance.intensity_markers();
        let marker = markers.choose(rng).copied().unwrap_or("[FIRM]");
        let starter = DISAGREEMENT_STARTERS.choose(rng).copied().unwrap_or(DISAGREEMENT_STARTERS[0]);

        let scored = stance
            .arguments
            .iter()
            .map(|a| (a, word_overlap(previous_text, a, 3)))
            .fold(None::<(&String, f64)>, |acc, (a, s)| match acc {
                Some((_, best)) if best >= s => acc,
                _ => Some((a, s)),
            });
        let argument = match scored {
            Some((a, s)) if s > 0.0 => a.clone(),
            _ => stance.arguments.choose(rng).cloned().unwrap_or_else(|| stance.position.clone()),
        };

        let connection = stance
            .personal_connections
            .choose(rng)
            .map(|c| format!(" {}", ensure_sentence(c)))
            .unwrap_or_default();

        format!("{} {} {}.{}", marker, starter, argument, connection)
    }

    pub fn generic_disagreement<R: Rng + ?Sized>(persona: &PersonaProfile, rng: &mut R) -> String {
        let line = GENERIC_DISAGREEMENTS.choose(rng).copied().unwrap_or(GENERIC_DISAGREEMENTS[0]);
        if persona.personality.agreeableness <= 2 {
            format!("[FIRM] {}", line)
        } else if persona.personality.neuroticism >= 4 {
            format!("[HESITANT] {}", line)
        } else {
            line.to_string()
        }
    }

    pub fn export_stance_data(&self, topic: &str, personas: &[PersonaProfile]) -> Option<StanceExport> {
        let stances = self.assigned.get(topic)?;
        let mut participants = Vec::new();
        let mut distribution: BTreeMap<String, usize> = BTreeMap::new();

        for persona in personas {
            let Some(stance) = stances.get(&persona.id) else { continue };
            participants.push(StanceExportEntry {
                name: persona.name.clone(),
                stance_key: stance.stance_key.clone(),
                position: stance.position.clone(),
                emotional_investment: stance.emotional_investment,
                arguments: stance.arguments.clone(),
                personal_connections: stance.personal_connections.clone(),
            });
            *distribution.entry(stance.position.clone()).or_insert(0) += 1;
        }

        Some(StanceExport { topic: topic.to_string(), participants, stance_distribution: distribution })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::KeywordAnalyzer;
    use crate::catalog;
    use crate::persona::Personality;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn manager() -> StanceManager {
        StanceManager::new(Arc::new(KeywordAnalyzer), ConsensusThresholds::default(), 0.3)
    }

    fn agreeing_history(n: u64) -> Vec<Turn> {
        (1..=n)
            .map(|i| Turn::new(if i % 2 == 0 { "Bob" } else { "Alice" }, "I agree, exactly.", i))
            .collect()
    }

    #[test]
    fn test_identical_personas_still_disagree() {
        let personas: Vec<PersonaProfile> = (0..4)
            .map(|i| PersonaProfile::new(format!("p{}", i), format!("Clone{}", i)).with_location("Rural Texas"))
            .collect();
        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut mgr = StanceManager::new(Arc::new(KeywordAnalyzer), ConsensusThresholds::default(), 0.0);
            let stances = mgr.assign_stances(&personas, "gun_laws", &HashSet::new(), &mut rng);
            assert_eq!(stances.len(), 4);
            assert!(mgr.distinct_positions("gun_laws") >= 2, "seed {}", seed);
        }
    }

    #[test]
    fn test_reassignment_prefers_persona_who_has_not_spoken() {
        let personas = vec![
            PersonaProfile::new("a", "Ann").with_location("Rural Texas"),
            PersonaProfile::new("b", "Ben").with_location("Rural Texas"),
        ];
        let spoken: HashSet<String> = ["Ben".to_string()].into_iter().collect();
        let mut rng = StdRng::seed_from_u64(1);
        let mut mgr = StanceManager::new(Arc::new(KeywordAnalyzer), ConsensusThresholds::default(), 0.0);
        let stances = mgr.assign_stances(&personas, "gun_laws", &spoken, &mut rng);
        assert_eq!(stances["b"].stance_key, "pro_gun_rights");
        assert_ne!(stances["a"].stance_key, "pro_gun_rights");
    }

    #[test]
    fn test_unknown_topic_yields_no_stances() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut mgr = manager();
        let personas = vec![PersonaProfile::new("a", "Ann"), PersonaProfile::new("b", "Ben")];
        assert!(mgr.assign_stances(&personas, "favorite snacks", &HashSet::new(), &mut rng).is_empty());
        assert!(mgr.stances_for("favorite snacks").is_none());
        assert!(mgr.export_stance_data("favorite snacks", &personas).is_none());
    }

    #[test]
    fn test_consensus_triggers_strong_disagreement() {
        let mgr = manager();
        let ctx = mgr.requires_disagreement("gun_laws", &agreeing_history(6));
        assert!(ctx.needs_disagreement);
        assert_eq!(ctx.disagreement_type, DisagreementType::Strong);
        assert_eq!(ctx.current_consensus, 1.0);
    }

    #[test]
    fn test_consensus_non_controversial_is_moderate() {
        let mgr = manager();
        let ctx = mgr.requires_disagreement("snack packaging", &agreeing_history(6));
        assert_eq!(ctx.disagreement_type, DisagreementType::Moderate);
        let calm = mgr.requires_disagreement("snack packaging", &[]);
        assert!(!calm.needs_disagreement);
        assert_eq!(calm.current_consensus, 0.5);
    }

    #[test]
    fn test_mild_needs_a_lower_moderate_threshold() {
        let thresholds = ConsensusThresholds { controversial: 0.7, moderate: 0.95, mild: 0.9 };
        let mgr = StanceManager::new(Arc::new(KeywordAnalyzer), thresholds, 0.3);
        let history = vec![
            Turn::new("A", "I agree, exactly right, absolutely true, yes correct", 1),
            Turn::new("C", "Yes, agree, exactly, absolutely right, true and correct", 2),
            Turn::new("B", "Hmm but", 3),
        ];
        let ctx = mgr.requires_disagreement("snack packaging", &history);
        assert!(ctx.needs_disagreement);
        assert_eq!(ctx.disagreement_type, DisagreementType::Mild);
    }

    #[test]
    fn test_enforce_disagreement_uses_stance_argument() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut mgr = manager();
        let personas = vec![
            PersonaProfile::new("a", "Alice").with_personality(Personality::new(3, 3, 5, 2, 3)),
            PersonaProfile::new("b", "Bob").with_personality(Personality::new(3, 3, 2, 4, 3)),
        ];
        mgr.assign_stances(&personas, "gun_laws", &HashSet::new(), &mut rng);
        let history = agreeing_history(5);

        let text = mgr
            .enforce_disagreement(&personas[1], "I agree, exactly.", "gun_laws", &history, &mut rng)
            .unwrap();
        let stance = mgr.stance_for("b", "gun_laws").unwrap();
        assert!(stance.arguments.iter().any(|a| text.contains(a.as_str())), "{}", text);
        assert!(text.starts_with('['));

        assert!(mgr.enforce_disagreement(&personas[1], "meh", "gun_laws", &[], &mut rng).is_none());
    }

    #[test]
    fn test_counter_argument_prefers_overlapping_argument() {
        let mut rng = StdRng::seed_from_u64(5);
        let persona = PersonaProfile::new("a", "Alice");
        let category = catalog::category("gun_laws").unwrap();
        let stance = AssignedStance::from_template(&persona, category, category.stance("moderate_regulation").unwrap());
        let text = StanceManager::disagreement_response(&stance, "Background checks are useless", &mut rng);
        assert!(text.contains("Background checks"));
    }

    #[test]
    fn test_generic_disagreement_markers() {
        let mut rng = StdRng::seed_from_u64(2);
        let firm = PersonaProfile::new("f", "F").with_personality(Personality::new(3, 3, 3, 1, 3));
        let nervous = PersonaProfile::new("n", "N").with_personality(Personality::new(3, 3, 3, 4, 5));
        assert!(StanceManager::generic_disagreement(&firm, &mut rng).starts_with("[FIRM]"));
        assert!(StanceManager::generic_disagreement(&nervous, &mut rng).starts_with("[HESITANT]"));
    }

    #[test]
    fn test_emotional_investment_and_connections() {
        let persona = PersonaProfile::new("x", "Xia")
            .with_personality(Personality::new(4, 3, 3, 2, 4))
            .with_fears(&["school safety"])
            .with_occupation("Teacher", "Education")
            .with_location("Chicago");
        let category = catalog::category("gun_laws").unwrap();
        let stance = AssignedStance::from_template(&persona, category, category.stance("gun_control_advocate").unwrap());
        assert_eq!(stance.emotional_investment, 1.0);
        assert!(stance.personal_connections.iter().any(|c| c.contains("teacher")));
        assert!(stance.personal_connections.iter().any(|c| c.starts_with("Living in Chicago")));
        assert_eq!(stance.intensity_markers()[0], "[PASSIONATE]");
    }

    #[test]
    fn test_export_counts_positions() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut mgr = manager();
        let personas: Vec<PersonaProfile> = (0..3).map(|i| PersonaProfile::archetype(i, "Skeptic")).collect();
        mgr.assign_stances(&personas, "healthcare", &HashSet::new(), &mut rng);
        let export = mgr.export_stance_data("healthcare", &personas).unwrap();
        assert_eq!(export.participants.len(), 3);
        assert_eq!(export.stance_distribution.values().sum::<usize>(), 3);
        assert!(export.stance_distribution.len() >= 2);
    }
}
