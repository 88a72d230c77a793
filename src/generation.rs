// src/generation.rs
// GENERATION BOUNDARY: the context handed to an external text generator
// The engine never talks to a model. It assembles a `GenerationContext`,
// awaits a `TextGenerator`, and only then touches conversation state.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::behavior::BehaviorModifiers;
use crate::disagreement::DisagreementDirective;
use crate::error::{EngineError, EngineResult};
use crate::flow::FlowRecommendation;
use crate::persona::Turn;
use crate::stance::AssignedStance;
use crate::tracker::AvailableReference;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationContext {
    pub conversation_id: Uuid,
    /// Transcript turn this text will be committed as.
    pub turn_number: u64,
    pub speaker_id: String,
    pub speaker_name: String,
    pub identity: String,
    pub topic: String,
    pub research_goal: Option<String>,
    pub recent_history: Vec<Turn>,
    pub latest_statement: Option<String>,
    pub modifiers: Option<BehaviorModifiers>,
    pub stance: Option<AssignedStance>,
    pub disagreement: Option<DisagreementDirective>,
    /// Ready-made rebuttal from the stance manager.
    pub counter_argument: Option<String>,
    pub flow_guidance: Vec<FlowRecommendation>,
    /// The only statements this speaker may cite.
    pub allowed_references: Vec<AvailableReference>,
    pub reference_suggestions: Vec<String>,
    pub style_hint: Option<String>,
    pub interruption_lead_in: Option<String>,
    /// Set for moderator turns only.
    pub moderator_instruction: Option<String>,
}

impl GenerationContext {
    pub fn is_moderator(&self) -> bool {
        self.moderator_instruction.is_some()
    }

    /// Plain-text prompt for providers that want one string.
    pub fn render_prompt(&self) -> String {
        let history = if self.recent_history.is_empty() {
            "No conversation yet.".to_string()
        } else {
            self.recent_history
                .iter()
                .map(|t| format!("{}: \"{}\"", t.speaker, t.text))
                .collect::<Vec<_>>()
                .join("\n")
        };

        let mut orders: Vec<String> = Vec::new();
        if let Some(instruction) = &self.moderator_instruction {
            orders.push(instruction.clone());
        }
        if let Some(m) = &self.modifiers {
            orders.push(format!(
                "Length: {:?}. Intensity: {:?}. Tendency: {:?}.",
                m.response_length, m.emotional_intensity, m.agreement_tendency
            ));
        }
        if let Some(stance) = &self.stance {
            orders.push(format!("Your position: {}", stance.position));
            if !stance.arguments.is_empty() {
                orders.push(format!("Arguments you hold: {}", stance.arguments.join("; ")));
            }
        }
        if let Some(directive) = &self.disagreement {
            orders.push(directive.prompt.clone());
        }
        if let Some(counter) = &self.counter_argument {
            orders.push(format!("Push back along these lines: {}", counter));
        }
        for rec in self.flow_guidance.iter().take(2) {
            if let Some(hint) = &rec.suggested_intervention {
                orders.push(format!("Flow: {}", hint));
            }
        }
        if let Some(hint) = &self.style_hint {
            orders.push(format!("Style: {}", hint));
        }
        if let Some(lead_in) = &self.interruption_lead_in {
            orders.push(format!("You are cutting in. Start with: \"{}\"", lead_in));
        }

        let references = if self.allowed_references.is_empty() {
            "CONSTRAINT: Nobody else has said anything you may quote. Do not attribute statements to anyone.".to_string()
        } else {
            let list = self
                .allowed_references
                .iter()
                .take(5)
                .map(|r| format!("- {} (turn {}): \"{}\"", r.speaker, r.turn_number, r.statement))
                .collect::<Vec<_>>()
                .join("\n");
            format!("You may ONLY reference these statements, quoted exactly:\n{}", list)
        };

        let anti_echo = match &self.latest_statement {
            Some(last) if !last.is_empty() => {
                let snippet: String = last.chars().take(60).collect();
                format!("CONSTRAINT: Do NOT repeat or paraphrase \"{}...\". Add a NEW perspective.", snippet)
            }
            _ => "CONSTRAINT: Open with a clear, personal opinion.".to_string(),
        };

        format!(
            "Roleplay as a participant in a focus group.\n\n\
            --- IDENTITY ---\n\
            {}\n\n\
            --- ROOM CONTEXT ---\n\
            Topic: {}\n\
            {}\
            History:\n{}\n\n\
            --- YOUR ORDERS ---\n\
            {}\n\n\
            --- REFERENCES ---\n\
            {}\n\n\
            {}\n\n\
            MANDATORY RESPONSE FORMAT:\n\
            [Thinking]\n\
            (Private reasoning.)\n\
            [Verdict]\n\
            (What you say out loud, under 3 sentences.)",
            self.identity,
            self.topic,
            self.research_goal.as_ref().map(|g| format!("Research goal: {}\n", g)).unwrap_or_default(),
            history,
            if orders.is_empty() { "Speak naturally.".to_string() } else { orders.join("\n") },
            references,
            anti_echo,
        )
    }
}

/// Keep only the spoken part of a raw generation: drop any `[Thinking]`
/// block, a leading "Name:" label and wrapping quotes.
pub fn extract_spoken(raw: &str, speaker_name: &str) -> String {
    let spoken = match raw.find("[Verdict]") {
        Some(idx) => &raw[idx + "[Verdict]".len()..],
        None => match raw.find("[Thinking]") {
            // thinking without a verdict: nothing was said out loud
            Some(_) => "",
            None => raw,
        },
    };
    let mut spoken = spoken.trim();
    let label = format!("{}:", speaker_name);
    if let Some(rest) = spoken.strip_prefix(&label) {
        spoken = rest.trim_start();
    }
    if spoken.len() >= 2 && spoken.starts_with('"') && spoken.ends_with('"') && spoken.matches('"').count() == 2 {
        spoken = &spoken[1..spoken.len() - 1];
    }
    spoken.trim().to_string()
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, context: &GenerationContext) -> EngineResult<String>;

    /// Streamed variant. The default sends the whole text as one chunk.
    async fn generate_stream(&self, context: &GenerationContext, tx: mpsc::Sender<String>) -> EngineResult<()> {
        let text = self.generate(context).await?;
        // a dropped receiver just means nobody is listening any more
        let _ = tx.send(text).await;
        Ok(())
    }
}

/// Drain a streamed generation into one string. Returns only after the
/// stream completes.
pub async fn collect_stream<G: TextGenerator + ?Sized>(
    generator: &G,
    context: &GenerationContext,
    buffer: usize,
) -> EngineResult<String> {
    let (tx, mut rx) = mpsc::channel::<String>(buffer.max(1));
    let produce = generator.generate_stream(context, tx);
    let consume = async move {
        let mut text = String::new();
        while let Some(chunk) = rx.recv().await {
            text.push_str(&chunk);
        }
        text
    };
    let (result, text) = tokio::join!(produce, consume);
    result?;
    Ok(text)
}

// --- Offline generator ---

/// Deterministic generator for demos and tests. Serves queued lines first,
/// then composes a reply from the context itself.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    script: Mutex<VecDeque<String>>,
    failures_left: AtomicU32,
    delay: Option<Duration>,
    calls: AtomicU32,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { script: Mutex::new(lines.into_iter().map(Into::into).collect()), ..Self::default() }
    }

    /// Fail the next `n` calls.
    pub fn failing_first(self, n: u32) -> Self {
        self.failures_left.store(n, Ordering::SeqCst);
        self
    }

    /// Sleep before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_scripted(&self) -> Option<String> {
        self.script.lock().ok().and_then(|mut q| q.pop_front())
    }

    fn compose(context: &GenerationContext) -> String {
        if let Some(instruction) = &context.moderator_instruction {
            return match context.flow_guidance.first().and_then(|r| r.target_persona.as_ref()) {
                Some(name) => format!("{}, what's your experience with {}?", name, context.topic),
                None if instruction.contains("differently") => {
                    "Does everyone really feel the same way? Who sees this differently?".to_string()
                }
                None => format!("What else comes to mind when you think about {}?", context.topic),
            };
        }

        let mut parts: Vec<String> = Vec::new();
        if let Some(lead_in) = &context.interruption_lead_in {
            parts.push(strip_tags(lead_in));
        }

        if let Some(counter) = &context.counter_argument {
            parts.push(strip_tags(counter));
        } else if let Some(directive) = &context.disagreement {
            parts.push(format!("I see it differently. {}.", directive.argument.trim_end_matches('.')));
        } else if let Some(stance) = &context.stance {
            if let Some(reference) = context.allowed_references.first().filter(|_| context.turn_number % 2 == 0) {
                if let Some(sentence) = crate::analysis::split_sentences(&reference.statement).first() {
                    parts.push(format!("{} said \"{}\".", reference.speaker, sentence));
                }
            }
            let idx = context.turn_number as usize % stance.arguments.len().max(1);
            let argument = stance.arguments.get(idx).cloned().unwrap_or_else(|| stance.position.clone());
            parts.push(format!("{}.", argument.trim_end_matches('.')));
        } else {
            parts.push(format!("I'd like to hear more about {} before I make up my mind.", context.topic));
        }
        parts.join(" ")
    }
}

/// Drop bracketed stage directions such as `[FIRM]`.
fn strip_tags(text: &str) -> String {
    text.split_whitespace()
        .filter(|w| !(w.starts_with('[') && w.ends_with(']')))
        .collect::<Vec<_>>()
        .join(" ")
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, context: &GenerationContext) -> EngineResult<String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(EngineError::Generation { attempts: call, message: "scripted failure".into() });
        }
        Ok(self.next_scripted().unwrap_or_else(|| Self::compose(context)))
    }

    async fn generate_stream(&self, context: &GenerationContext, tx: mpsc::Sender<String>) -> EngineResult<()> {
        let text = self.generate(context).await?;
        for (i, word) in text.split(' ').enumerate() {
            let chunk = if i == 0 { word.to_string() } else { format!(" {}", word) };
            if tx.send(chunk).await.is_err() {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> GenerationContext {
        GenerationContext {
            conversation_id: Uuid::new_v4(),
            turn_number: 3,
            speaker_id: "p1".into(),
            speaker_name: "Alice".into(),
            identity: "Alice, 41, Nurse".into(),
            topic: "healthcare".into(),
            research_goal: None,
            recent_history: vec![Turn::new("Bob", "Premiums keep rising every year.", 2)],
            latest_statement: Some("Premiums keep rising every year.".into()),
            modifiers: None,
            stance: None,
            disagreement: None,
            counter_argument: None,
            flow_guidance: Vec::new(),
            allowed_references: Vec::new(),
            reference_suggestions: Vec::new(),
            style_hint: None,
            interruption_lead_in: None,
            moderator_instruction: None,
        }
    }

    #[test]
    fn test_prompt_sections() {
        let prompt = context().render_prompt();
        assert!(prompt.contains("--- IDENTITY ---\nAlice, 41, Nurse"));
        assert!(prompt.contains("Bob: \"Premiums keep rising every year.\""));
        assert!(prompt.contains("Do not attribute statements to anyone"));
        assert!(prompt.contains("Do NOT repeat or paraphrase"));
    }

    #[test]
    fn test_extract_spoken() {
        assert_eq!(extract_spoken("[Thinking] hmm [Verdict] Alice: \"Costs matter.\"", "Alice"), "Costs matter.");
        assert_eq!(extract_spoken("  Plain answer. ", "Alice"), "Plain answer.");
        assert_eq!(extract_spoken("[Thinking] only thoughts", "Alice"), "");
    }

    #[tokio::test]
    async fn test_script_then_compose() {
        let generator = ScriptedGenerator::with_script(["First line."]);
        let ctx = context();
        assert_eq!(generator.generate(&ctx).await.unwrap(), "First line.");
        let composed = generator.generate(&ctx).await.unwrap();
        assert!(composed.contains("healthcare"));
        assert_eq!(generator.calls(), 2);
    }

    #[tokio::test]
    async fn test_failures_then_success() {
        let generator = ScriptedGenerator::with_script(["Recovered."]).failing_first(1);
        let ctx = context();
        assert!(generator.generate(&ctx).await.unwrap_err().is_retryable());
        assert_eq!(generator.generate(&ctx).await.unwrap(), "Recovered.");
    }

    #[tokio::test]
    async fn test_collect_stream_reassembles_chunks() {
        let generator = ScriptedGenerator::with_script(["Costs keep going up for everyone."]);
        let text = collect_stream(&generator, &context(), 2).await.unwrap();
        assert_eq!(text, "Costs keep going up for everyone.");
    }
}
