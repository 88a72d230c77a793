// tests/dynamics_properties.rs
// Room-level guarantees: stance diversity, consensus detection, speaker skew,
// turn numbering and reference hygiene.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use oraculum_dynamics::analysis::{KeywordAnalyzer, ReferenceKind, TextAnalyzer};
use oraculum_dynamics::config::{ConsensusThresholds, EngineConfig};
use oraculum_dynamics::persona::{PersonaProfile, Personality, Roster, Turn, MODERATOR};
use oraculum_dynamics::stance::{DisagreementType, StanceManager};
use oraculum_dynamics::turns::TurnReason;
use oraculum_dynamics::{ConversationOrchestrator, ScriptedGenerator};

const TOPICS: &[&str] = &["gun_laws", "climate_change", "healthcare", "immigration", "taxation", "education"];

fn panel() -> Vec<PersonaProfile> {
    ["Advocate", "Skeptic", "Pragmatist", "Veteran", "Newcomer"]
        .iter()
        .enumerate()
        .map(|(i, role)| PersonaProfile::archetype(i as u32, role))
        .collect()
}

#[test]
fn test_every_controversial_topic_gets_at_least_two_positions() {
    let twins = vec![
        PersonaProfile::new("t1", "Tess").with_location("Rural Texas"),
        PersonaProfile::new("t2", "Tom").with_location("Rural Texas"),
    ];
    for topic in TOPICS {
        for seed in 0..10 {
            for personas in [panel(), twins.clone()] {
                let mut rng = StdRng::seed_from_u64(seed);
                let mut manager = StanceManager::new(Arc::new(KeywordAnalyzer), ConsensusThresholds::default(), 0.3);
                let stances = manager.assign_stances(&personas, topic, &HashSet::new(), &mut rng);
                assert_eq!(stances.len(), personas.len(), "{} seed {}", topic, seed);
                assert!(manager.distinct_positions(topic) >= 2, "{} seed {}", topic, seed);
            }
        }
    }
}

#[test]
fn test_agreeing_room_on_controversial_topic_needs_strong_disagreement() {
    let manager = StanceManager::new(Arc::new(KeywordAnalyzer), ConsensusThresholds::default(), 0.3);
    let history: Vec<Turn> = (1..=6)
        .map(|i| Turn::new(if i % 2 == 0 { "Bob" } else { "Alice" }, "Yes, I agree.", i))
        .collect();

    let context = manager.requires_disagreement("gun_laws", &history);
    assert!(context.needs_disagreement);
    assert_eq!(context.disagreement_type, DisagreementType::Strong);
}

#[test]
fn test_extrovert_takes_more_turns_under_real_turn_taking() {
    let personas = vec![
        PersonaProfile::new("a", "Ava").with_personality(Personality::new(3, 3, 5, 3, 3)),
        PersonaProfile::new("b", "Bea").with_personality(Personality::new(3, 3, 1, 3, 3)),
    ];
    let mut orchestrator = ConversationOrchestrator::new(EngineConfig::default().with_seed(2024));
    orchestrator.initialize_conversation("coffee", personas, None).unwrap();

    let mut picks: HashMap<String, usize> = HashMap::new();
    let mut reasons: Vec<TurnReason> = Vec::new();
    for _ in 0..50 {
        let decision = orchestrator.decide_next_speaker().unwrap();
        let prepared = orchestrator.prepare_persona_response(&decision.next_speaker).unwrap();
        orchestrator.validate_and_process_response(&prepared, "I like my coffee strong.").unwrap();
        *picks.entry(decision.next_speaker).or_insert(0) += 1;
        reasons.push(decision.reason);
    }

    let picks_a = picks.get("a").copied().unwrap_or(0);
    let picks_b = picks.get("b").copied().unwrap_or(0);
    assert_eq!(orchestrator.transcript().len(), 50);
    assert!(picks_a > picks_b, "A {} vs B {}", picks_a, picks_b);
    assert!(picks_b > 0, "the quiet persona never got the floor");
    assert!(reasons.contains(&TurnReason::BalanceNeeded));
}

#[tokio::test]
async fn test_turn_numbers_and_speakers_over_a_session() {
    let mut config = EngineConfig::default().with_seed(7);
    config.max_moderator_turns = 10;
    let mut orchestrator = ConversationOrchestrator::new(config);
    let personas = panel();
    let names: HashSet<String> = personas.iter().map(|p| p.name.clone()).collect();
    orchestrator.initialize_conversation("healthcare", personas, None).unwrap();
    let generator = ScriptedGenerator::new();

    for round in 0..4 {
        orchestrator.run_moderator_turn(&generator).await.unwrap();
        for _ in 0..4 {
            let outcome = orchestrator.run_turn(&generator).await.unwrap();
            assert!(names.contains(&outcome.response.turn.speaker), "round {}", round);
        }
    }

    let transcript = orchestrator.transcript();
    assert_eq!(transcript.len(), 20);
    for (i, turn) in transcript.iter().enumerate() {
        assert_eq!(turn.turn_number, i as u64 + 1);
        assert!(turn.speaker == MODERATOR || names.contains(&turn.speaker));
    }
}

#[test]
fn test_no_unsupported_attribution_survives_commit() {
    let mut config = EngineConfig::default().with_seed(3);
    config.style_pattern_probability = 0.0;
    let mut orchestrator = ConversationOrchestrator::new(config);
    let personas = vec![
        PersonaProfile::new("a", "Alice"),
        PersonaProfile::new("b", "Bob"),
        PersonaProfile::new("c", "Cara"),
    ];
    orchestrator.initialize_conversation("gun_laws", personas, None).unwrap();

    let script = [
        ("b", "Hunting with my father taught me respect for firearms."),
        ("a", "Bob said hunting with his father taught him respect for firearms. I get that."),
        ("c", "Alice said we should confiscate every rifle tomorrow. That worries me."),
        ("b", "Cara said that background checks are pointless. I'm not sure."),
        ("a", "Someone mentioned taxes earlier. Background checks still matter to me."),
        ("c", "Dave said gun shows are the real problem."),
    ];
    for (id, text) in script {
        let prepared = orchestrator.prepare_persona_response(id).unwrap();
        orchestrator.validate_and_process_response(&prepared, text).unwrap();
    }

    assert_attributions_sound(&orchestrator);

    let texts: Vec<&str> = orchestrator.transcript().iter().map(|t| t.text.as_str()).collect();
    assert!(!texts[2].contains("confiscate"));
    assert!(texts[2].contains("I don't recall Alice mentioning that"));
    assert!(!texts[3].contains("pointless"));
    assert!(!texts[4].to_lowercase().contains("someone mentioned"));
    assert!(texts[4].contains("Background checks still matter"));
    assert!(!texts[5].contains("gun shows"));
}

#[test]
fn test_full_names_and_strangers_cannot_carry_fabricated_claims() {
    let mut config = EngineConfig::default().with_seed(3);
    config.style_pattern_probability = 0.0;
    let mut orchestrator = ConversationOrchestrator::new(config);
    let personas = vec![
        PersonaProfile::new("a", "Alice Smith"),
        PersonaProfile::new("b", "Bob Jones"),
        PersonaProfile::new("c", "DeShawn Carter"),
    ];
    orchestrator.initialize_conversation("gun_laws", personas, None).unwrap();

    let script = [
        ("b", "Hunting with my father taught me respect for firearms."),
        ("a", "Bob said we should confiscate every rifle tomorrow. I disagree."),
        ("c", "Alice mentioned that hunters are the problem. Not my view."),
        ("a", "Dave said gun shows are the real problem. Jones talked about hunting with his father."),
        ("b", "DeShawn said nobody needs a license. Hmm."),
    ];
    for (id, text) in script {
        let prepared = orchestrator.prepare_persona_response(id).unwrap();
        orchestrator.validate_and_process_response(&prepared, text).unwrap();
    }

    assert_attributions_sound(&orchestrator);

    let texts: Vec<&str> = orchestrator.transcript().iter().map(|t| t.text.as_str()).collect();
    assert!(!texts[1].contains("confiscate"), "{}", texts[1]);
    assert!(texts[1].contains("I don't recall Bob Jones mentioning that"), "{}", texts[1]);
    assert!(!texts[2].contains("hunters are the problem"), "{}", texts[2]);
    assert!(!texts[3].contains("gun shows"), "{}", texts[3]);
    assert!(!texts[3].contains("Dave"), "{}", texts[3]);
    assert!(texts[3].contains("Bob Jones said \"Hunting with my father"), "{}", texts[3]);
    assert!(!texts[4].contains("license"), "{}", texts[4]);
}

/// Every named attribution left in the transcript points at someone in the
/// room and is backed by what that person actually said.
fn assert_attributions_sound(orchestrator: &ConversationOrchestrator) {
    let context = orchestrator.context().unwrap();
    let tracker = context.tracker();
    let roster = Roster::from_personas(context.personas());
    let analyzer = KeywordAnalyzer;

    for turn in orchestrator.transcript() {
        for reference in analyzer.extract_references(&turn.text) {
            assert_ne!(reference.kind, ReferenceKind::Vague, "vague reference kept: {}", turn.text);
            let Some(written) = reference.speaker.as_deref() else { continue };
            let name = roster
                .resolve(written)
                .unwrap_or_else(|| panic!("attribution to non-participant committed: {}", turn.text));
            if reference.claim.is_empty() {
                continue;
            }
            let check = tracker.validate_reference(&turn.speaker, &reference.claim, name);
            assert!(check.is_valid, "unsupported attribution committed: {}", turn.text);
        }
    }
}
