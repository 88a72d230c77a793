// src/turns.rs
// TURN MANAGER: who takes the floor next
// Priority: interruption > participation balance > natural flow > least active.

use std::collections::HashMap;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::behavior::{BehaviorStateTracker, InterruptionStyle, ParticipationPattern};
use crate::config::EngineConfig;
use crate::persona::{PersonaProfile, Turn, MODERATOR};

const RECENT_TURNS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnReason {
    NaturalFlow,
    BalanceNeeded,
    Interruption,
    ModeratorPrompt,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnDecision {
    /// Persona id of the next speaker.
    pub next_speaker: String,
    pub next_speaker_name: String,
    pub reason: TurnReason,
    pub confidence: f64,
    pub should_moderator_intervene: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterruptionOutcome {
    pub allow_interruption: bool,
    pub style: InterruptionStyle,
    /// Short lead-in phrase, only when the interruption is allowed.
    pub lead_in: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParticipationBalance {
    pub needs_balancing: bool,
    pub encourage_participation: Vec<String>,
    pub limit_participation: Vec<String>,
    pub moderator_action: Option<String>,
}

/// Committed participant turns per speaker name. Moderator turns excluded.
pub fn participation_counts(history: &[Turn]) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for turn in history.iter().filter(|t| t.speaker != MODERATOR) {
        *counts.entry(turn.speaker.clone()).or_insert(0) += 1;
    }
    counts
}

fn lead_ins(style: InterruptionStyle) -> &'static [&'static str] {
    match style {
        InterruptionStyle::Polite => &["Sorry to interrupt, but", "If I may add", "Excuse me, I just wanted to say"],
        InterruptionStyle::Aggressive => &["Wait, that's not right", "Hold on a second", "Actually, no"],
        InterruptionStyle::Passionate => &[
            "[INTERRUPTS] This is really important -",
            "[PASSIONATE] I have to say something about this",
            "[URGENT] Wait, we need to talk about",
        ],
    }
}

#[derive(Debug, Clone)]
pub struct TurnManager {
    interruption_threshold: f64,
    balance_ratio: f64,
    runner_up_probability: f64,
    recent_speaker_penalty: f64,
}

impl TurnManager {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            interruption_threshold: config.interruption_threshold,
            balance_ratio: config.balance_ratio,
            runner_up_probability: config.runner_up_probability,
            recent_speaker_penalty: config.recent_speaker_penalty,
        }
    }

    /// `None` only when there is nobody to pick.
    pub fn decide_next_speaker<R: Rng + ?Sized>(
        &self,
        history: &[Turn],
        personas: &[PersonaProfile],
        topic: &str,
        behavior: &BehaviorStateTracker,
        rng: &mut R,
    ) -> Option<TurnDecision> {
        if personas.is_empty() {
            return None;
        }
        let recent = &history[history.len().saturating_sub(RECENT_TURNS)..];
        let counts = participation_counts(history);

        // 1. Interruptions
        if let Some(persona) = self.interruption_candidate(personas, recent, behavior, rng) {
            return Some(Self::decision(persona, TurnReason::Interruption, 0.8, false, topic));
        }

        // 2. Participation balance
        if let Some(persona) = self.balance_candidate(personas, &counts) {
            return Some(Self::decision(persona, TurnReason::BalanceNeeded, 0.7, true, topic));
        }

        // 3. Natural flow
        if let Some(persona) = self.natural_candidate(personas, recent, behavior, rng) {
            return Some(Self::decision(persona, TurnReason::NaturalFlow, 0.9, false, topic));
        }

        // 4. Least active
        let persona = Self::least_active(personas, &counts);
        Some(Self::decision(persona, TurnReason::BalanceNeeded, 0.5, true, topic))
    }

    fn decision(
        persona: &PersonaProfile,
        reason: TurnReason,
        confidence: f64,
        should_moderator_intervene: bool,
        topic: &str,
    ) -> TurnDecision {
        debug!(speaker = %persona.name, ?reason, topic, "🎙️ next speaker");
        TurnDecision {
            next_speaker: persona.id.clone(),
            next_speaker_name: persona.name.clone(),
            reason,
            confidence,
            should_moderator_intervene,
        }
    }

    fn interruption_candidate<'a, R: Rng + ?Sized>(
        &self,
        personas: &'a [PersonaProfile],
        recent: &[Turn],
        behavior: &BehaviorStateTracker,
        rng: &mut R,
    ) -> Option<&'a PersonaProfile> {
        let last = recent.last()?;
        personas.iter().filter(|p| p.name != last.speaker).find(|p| {
            let trigger = behavior.should_interrupt(p, &last.speaker, &last.text, rng);
            trigger.should_interrupt && trigger.confidence > self.interruption_threshold
        })
    }

    /// Under-participating personas (below `balance_ratio` of the average),
    /// extroverts first.
    fn balance_candidate<'a>(
        &self,
        personas: &'a [PersonaProfile],
        counts: &HashMap<String, usize>,
    ) -> Option<&'a PersonaProfile> {
        let total: usize = personas.iter().map(|p| counts.get(&p.name).copied().unwrap_or(0)).sum();
        let floor = total as f64 / personas.len() as f64 * self.balance_ratio;

        let quiet: Vec<&PersonaProfile> = personas
            .iter()
            .filter(|p| (counts.get(&p.name).copied().unwrap_or(0) as f64) < floor)
            .collect();
        quiet
            .iter()
            .find(|p| p.personality.extraversion >= 3)
            .or_else(|| quiet.first())
            .copied()
    }

    /// Engagement scoring. Withdrawn personas don't volunteer; they come back
    /// through balance or the least-active fallback.
    fn natural_candidate<'a, R: Rng + ?Sized>(
        &self,
        personas: &'a [PersonaProfile],
        recent: &[Turn],
        behavior: &BehaviorStateTracker,
        rng: &mut R,
    ) -> Option<&'a PersonaProfile> {
        let mut scored: Vec<(&PersonaProfile, f64)> = personas
            .iter()
            .filter_map(|p| {
                let state = behavior.state(&p.id);
                if state.map(|s| s.participation_pattern == ParticipationPattern::Withdrawn).unwrap_or(false) {
                    return None;
                }
                let big5 = &p.personality;
                let mut score = big5.extraversion as f64 * 0.2 + big5.openness as f64 * 0.1;
                if let Some(state) = state {
                    score += state.emotional.engagement * 0.4 + state.topic_relevance * 0.3;
                }
                if recent.iter().any(|t| t.speaker == p.name) {
                    score -= self.recent_speaker_penalty;
                }
                Some((p, score))
            })
            .collect();
        if scored.is_empty() {
            return None;
        }
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        if scored.len() > 1 && rng.gen::<f64>() < self.runner_up_probability {
            Some(scored[1].0)
        } else {
            Some(scored[0].0)
        }
    }

    fn least_active<'a>(personas: &'a [PersonaProfile], counts: &HashMap<String, usize>) -> &'a PersonaProfile {
        let mut least = &personas[0];
        let mut lowest = counts.get(&least.name).copied().unwrap_or(0);
        for persona in personas {
            let count = counts.get(&persona.name).copied().unwrap_or(0);
            if count < lowest {
                least = persona;
                lowest = count;
            }
        }
        least
    }

    /// Whether `persona` may cut in on `current_speaker`, and how.
    pub fn handle_interruption<R: Rng + ?Sized>(
        &self,
        persona: &PersonaProfile,
        current_speaker: &str,
        behavior: &BehaviorStateTracker,
        rng: &mut R,
    ) -> InterruptionOutcome {
        let refused = InterruptionOutcome { allow_interruption: false, style: InterruptionStyle::Polite, lead_in: None };
        let Some(state) = behavior.state(&persona.id) else {
            warn!(persona = %persona.name, "interruption requested for uninitialized persona");
            return refused;
        };
        if persona.name == current_speaker {
            return refused;
        }

        let big5 = &persona.personality;
        let e = &state.emotional;
        let mut score = 0.0;
        if big5.extraversion >= 4 {
            score += 0.3;
        }
        if big5.agreeableness <= 2 {
            score += 0.2;
        }
        if e.frustration > 0.7 {
            score += 0.4;
        }
        if e.engagement > 0.8 {
            score += 0.3;
        }
        if state.topic_relevance > 0.8 {
            score += 0.2;
        }

        let style = if e.frustration > 0.8 {
            InterruptionStyle::Aggressive
        } else if e.engagement > 0.8 {
            InterruptionStyle::Passionate
        } else {
            InterruptionStyle::Polite
        };

        let allow_interruption = score > 0.6;
        let lead_in = if allow_interruption {
            lead_ins(style).choose(rng).map(|s| s.to_string())
        } else {
            None
        };
        InterruptionOutcome { allow_interruption, style, lead_in }
    }

    /// Dominators sit above 1.5x the average, quiet ones below `balance_ratio` of it.
    pub fn manage_participation_balance(
        &self,
        personas: &[PersonaProfile],
        counts: &HashMap<String, usize>,
    ) -> ParticipationBalance {
        if personas.is_empty() {
            return ParticipationBalance::default();
        }
        let count = |p: &PersonaProfile| counts.get(&p.name).copied().unwrap_or(0) as f64;
        let total: f64 = personas.iter().map(count).sum();
        let avg = total / personas.len() as f64;

        let limit: Vec<String> = personas.iter().filter(|p| count(p) > avg * 1.5).map(|p| p.name.clone()).collect();
        let encourage: Vec<String> =
            personas.iter().filter(|p| count(p) < avg * self.balance_ratio).map(|p| p.name.clone()).collect();

        let needs_balancing = !limit.is_empty() && !encourage.is_empty();
        let moderator_action = if !needs_balancing {
            None
        } else if encourage.len() == 1 {
            Some(format!("{}, I'd love to hear your thoughts on this.", encourage[0]))
        } else {
            Some(format!(
                "Let's hear from some other perspectives. {} or {}, what do you think?",
                encourage[0], encourage[1]
            ))
        };

        ParticipationBalance {
            needs_balancing,
            encourage_participation: encourage,
            limit_participation: limit,
            moderator_action,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persona::Personality;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn setup(personas: &[PersonaProfile]) -> BehaviorStateTracker {
        let mut behavior = BehaviorStateTracker::new(0.6);
        for p in personas {
            behavior.initialize(p);
        }
        behavior
    }

    fn turns(speakers: &[&str]) -> Vec<Turn> {
        speakers
            .iter()
            .enumerate()
            .map(|(i, s)| Turn::new(*s, "I like it fine", i as u64 + 1))
            .collect()
    }

    fn config(runner_up: f64) -> EngineConfig {
        EngineConfig { runner_up_probability: runner_up, ..EngineConfig::default() }
    }

    #[test]
    fn test_balance_picks_quiet_persona() {
        let personas = vec![
            PersonaProfile::new("a", "Ann"),
            PersonaProfile::new("b", "Ben"),
            PersonaProfile::new("c", "Cal"),
        ];
        let behavior = setup(&personas);
        let history = turns(&["Ann", "Ben", "Ann", "Ben", "Ann", "Ben", "Ann", "Ben"]);
        let mut rng = StdRng::seed_from_u64(1);
        let decision = TurnManager::new(&config(0.2))
            .decide_next_speaker(&history, &personas, "coffee", &behavior, &mut rng)
            .unwrap();
        assert_eq!(decision.next_speaker, "c");
        assert_eq!(decision.reason, TurnReason::BalanceNeeded);
        assert!(decision.should_moderator_intervene);
        assert_eq!(decision.confidence, 0.7);
    }

    #[test]
    fn test_natural_flow_prefers_engaged_extrovert() {
        let personas = vec![
            PersonaProfile::new("q", "Quinn").with_personality(Personality::new(3, 3, 2, 3, 3)),
            PersonaProfile::new("l", "Lou").with_personality(Personality::new(4, 4, 5, 3, 2)),
        ];
        let behavior = setup(&personas);
        let mut rng = StdRng::seed_from_u64(5);
        let decision = TurnManager::new(&config(0.0))
            .decide_next_speaker(&[], &personas, "coffee", &behavior, &mut rng)
            .unwrap();
        assert_eq!(decision.next_speaker_name, "Lou");
        assert_eq!(decision.reason, TurnReason::NaturalFlow);
        assert_eq!(decision.confidence, 0.9);

        let runner_up = TurnManager::new(&config(1.0))
            .decide_next_speaker(&[], &personas, "coffee", &behavior, &mut rng)
            .unwrap();
        assert_eq!(runner_up.next_speaker_name, "Quinn");
    }

    #[test]
    fn test_all_withdrawn_falls_back_to_least_active() {
        let shy = Personality::new(3, 3, 1, 1, 5);
        let personas = vec![
            PersonaProfile::new("a", "Ann").with_personality(shy),
            PersonaProfile::new("b", "Ben").with_personality(shy),
        ];
        let behavior = setup(&personas);
        let mut rng = StdRng::seed_from_u64(2);
        let decision = TurnManager::new(&config(0.2))
            .decide_next_speaker(&[], &personas, "coffee", &behavior, &mut rng)
            .unwrap();
        assert_eq!(decision.next_speaker, "a");
        assert_eq!(decision.confidence, 0.5);
        assert!(decision.should_moderator_intervene);
    }

    #[test]
    fn test_no_personas_no_decision() {
        let behavior = BehaviorStateTracker::new(0.6);
        let mut rng = StdRng::seed_from_u64(2);
        assert!(TurnManager::new(&config(0.2))
            .decide_next_speaker(&[], &[], "coffee", &behavior, &mut rng)
            .is_none());
    }

    #[test]
    fn test_dominant_persona_interrupts_disagreement() {
        let personas = vec![
            PersonaProfile::new("b", "Bob"),
            PersonaProfile::new("g", "Gus")
                .with_personality(Personality::new(3, 5, 5, 1, 1))
                .with_occupation("CEO", "Tech"),
        ];
        let mut behavior = setup(&personas);
        let mut gus = behavior.state("g").unwrap().clone();
        gus.topic_relevance = 0.9;
        behavior.apply(gus);
        let history = vec![Turn::new("Bob", "That is just wrong and I disagree", 1)];
        let mut rng = StdRng::seed_from_u64(7);
        let decision = TurnManager::new(&config(0.2))
            .decide_next_speaker(&history, &personas, "coffee", &behavior, &mut rng)
            .unwrap();
        assert_eq!(decision.next_speaker_name, "Gus");
        assert_eq!(decision.reason, TurnReason::Interruption);
    }

    #[test]
    fn test_handle_interruption_styles() {
        let loud = PersonaProfile::new("l", "Lou").with_personality(Personality::new(5, 5, 5, 1, 3));
        let mut behavior = setup(std::slice::from_ref(&loud));
        let mut rng = StdRng::seed_from_u64(4);
        let manager = TurnManager::new(&config(0.2));

        // E>=4 (+0.3), A<=2 (+0.2), engagement 1.0 (+0.3)
        let outcome = manager.handle_interruption(&loud, "Bob", &behavior, &mut rng);
        assert!(outcome.allow_interruption);
        assert_eq!(outcome.style, InterruptionStyle::Passionate);
        assert!(outcome.lead_in.is_some());

        let mut state = behavior.state("l").unwrap().clone();
        state.emotional.frustration = 0.9;
        behavior.apply(state);
        let outcome = manager.handle_interruption(&loud, "Bob", &behavior, &mut rng);
        assert_eq!(outcome.style, InterruptionStyle::Aggressive);

        assert!(!manager.handle_interruption(&loud, "Lou", &behavior, &mut rng).allow_interruption);
    }

    #[test]
    fn test_participation_balance_report() {
        let personas = vec![
            PersonaProfile::new("a", "Ann"),
            PersonaProfile::new("b", "Ben"),
            PersonaProfile::new("c", "Cal"),
        ];
        let counts = participation_counts(&turns(&["Ann", "Ann", "Ann", "Ann", "Ann", "Ben", MODERATOR]));
        assert_eq!(counts.get(MODERATOR), None);

        let report = TurnManager::new(&config(0.2)).manage_participation_balance(&personas, &counts);
        assert!(report.needs_balancing);
        assert_eq!(report.limit_participation, vec!["Ann".to_string()]);
        assert_eq!(report.encourage_participation, vec!["Cal".to_string()]);
        assert_eq!(report.moderator_action.as_deref(), Some("Cal, I'd love to hear your thoughts on this."));
    }
}
