// src/main.rs
// ORACULUM DYNAMICS - DEMO DRIVER
// Runs a short offline focus group and prints the transcript + insights as JSON.
//
// Usage: oraculum_dynamics [topic] [config.toml]

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use oraculum_dynamics::{ConversationOrchestrator, ConversationStatus, EngineConfig, PersonaProfile, ScriptedGenerator};

const PERSONA_TURNS_PER_ROUND: usize = 3;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let topic = args.next().unwrap_or_else(|| "gun_laws".to_string());
    let config = match args.next() {
        Some(path) => EngineConfig::load(&path).with_context(|| format!("loading config from {}", path))?,
        None => EngineConfig::default().with_seed(42),
    };

    info!("🚀 Oraculum focus group starting on '{}'", topic);

    // 1. Participants
    let personas: Vec<PersonaProfile> = ["Advocate", "Skeptic", "Pragmatist", "Veteran", "Newcomer"]
        .iter()
        .enumerate()
        .map(|(i, role)| PersonaProfile::archetype(i as u32, role))
        .collect();

    // 2. Conversation
    let mut orchestrator = ConversationOrchestrator::new(config);
    orchestrator.initialize_conversation(&topic, personas, Some("Understand where the room splits and why"))?;
    let generator = ScriptedGenerator::new();

    // 3. Moderator opens each round, personas respond, until the moderator budget pauses us
    while orchestrator.status() == ConversationStatus::Running {
        let opener = orchestrator.run_moderator_turn(&generator).await?;
        info!("🎙️ Moderator: {}", opener.turn.text);
        if orchestrator.status() != ConversationStatus::Running {
            break;
        }

        for _ in 0..PERSONA_TURNS_PER_ROUND {
            match orchestrator.run_turn(&generator).await {
                Ok(outcome) => {
                    info!(
                        reason = ?outcome.decision.reason,
                        issues = outcome.response.issues.len(),
                        "{}: {}",
                        outcome.response.turn.speaker,
                        outcome.response.turn.text
                    );
                }
                Err(e) if e.is_retryable() => {
                    warn!(error = %e, "generation gave up; skipping speaker");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    orchestrator.end()?;

    // 4. Report
    let report = orchestrator.export()?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
