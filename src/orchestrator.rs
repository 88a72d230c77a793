// src/orchestrator.rs
// CONVERSATION ORCHESTRATOR: the facade a host drives turn by turn
//
// One `ConversationContext` owns every tracker for one conversation.
// Per turn: decide -> prepare -> (await generator) -> validate -> style ->
// re-validate -> commit. Nothing mutates before the generator returns, and
// the commit touches all trackers in one synchronous step.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::analysis::{KeywordAnalyzer, TextAnalyzer};
use crate::behavior::{BehaviorModifiers, BehaviorStateTracker, InterruptionStyle, ParticipationPattern};
use crate::config::EngineConfig;
use crate::disagreement::DisagreementEnforcer;
use crate::error::{EngineError, EngineResult};
use crate::flow::{ConversationFlowController, ConversationFlowState, FlowRecommendation, ModeratorIntervention, TopicShift};
use crate::generation::{collect_stream, extract_spoken, GenerationContext, TextGenerator};
use crate::persona::{PersonaProfile, Roster, Turn, MODERATOR};
use crate::references::{ReferenceValidator, ValidationIssue};
use crate::stance::{AssignedStance, DisagreementContext, StanceExport, StanceManager};
use crate::store::{InMemoryStanceStore, StanceStore};
use crate::style::ResponseStyleManager;
use crate::tracker::ConversationTracker;
use crate::turns::{participation_counts, ParticipationBalance, TurnDecision, TurnManager, TurnReason};

const HISTORY_FOR_PROMPT: usize = 10;
const STREAM_BUFFER: usize = 32;
const FILLER_LINE: &str = "I'd rather listen for a bit before I weigh in.";
const EMPTY_AFTER_VALIDATION: &str = "I'm still thinking this through.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Idle,
    Running,
    Paused,
    Ended,
}

impl fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConversationStatus::Idle => "idle",
            ConversationStatus::Running => "running",
            ConversationStatus::Paused => "paused",
            ConversationStatus::Ended => "ended",
        };
        f.write_str(label)
    }
}

/// Everything the caller needs to call a generator for one persona turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreparedResponse {
    pub persona_id: String,
    pub persona_name: String,
    /// Turn number this response will be committed as.
    pub turn_number: u64,
    pub modifiers: BehaviorModifiers,
    pub disagreement: DisagreementContext,
    pub context: GenerationContext,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedResponse {
    pub turn: Turn,
    pub raw_text: String,
    pub issues: Vec<ValidationIssue>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnOutcome {
    pub decision: TurnDecision,
    pub response: ProcessedResponse,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeratorTurn {
    pub turn: Turn,
    pub intervention: ModeratorIntervention,
    pub issues: Vec<ValidationIssue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaInsight {
    pub persona_id: String,
    pub name: String,
    pub turns: usize,
    pub energy: f64,
    pub engagement: f64,
    pub frustration: f64,
    pub participation_pattern: ParticipationPattern,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationInsights {
    pub conversation_id: Uuid,
    pub topic: String,
    pub status: ConversationStatus,
    pub turn_count: usize,
    pub moderator_turns: u32,
    pub participants: Vec<PersonaInsight>,
    pub flow: ConversationFlowState,
    pub recommendations: Vec<FlowRecommendation>,
    pub consensus: DisagreementContext,
    pub participation_balance: ParticipationBalance,
    pub stance_data: Option<StanceExport>,
    pub should_continue_topic: bool,
    pub topic_shift: TopicShift,
    pub topic_suggestions: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    timeout: Duration,
    attempts: u32,
}

// --- Per-conversation state ---

pub struct ConversationContext {
    id: Uuid,
    topic: String,
    research_goal: Option<String>,
    personas: Vec<PersonaProfile>,
    roster: Roster,
    started_at: DateTime<Utc>,
    analyzer: Arc<dyn TextAnalyzer>,
    tracker: ConversationTracker,
    behavior: BehaviorStateTracker,
    stances: StanceManager,
    enforcer: DisagreementEnforcer,
    turns: TurnManager,
    flow: ConversationFlowController,
    validator: ReferenceValidator,
    styles: ResponseStyleManager,
    rng: StdRng,
    status: ConversationStatus,
    moderator_turns: u32,
}

fn find_persona<'a>(personas: &'a [PersonaProfile], persona_id: &str) -> EngineResult<&'a PersonaProfile> {
    personas
        .iter()
        .find(|p| p.id == persona_id)
        .ok_or_else(|| EngineError::UnknownPersona(persona_id.to_string()))
}

impl ConversationContext {
    fn new(
        config: &EngineConfig,
        analyzer: Arc<dyn TextAnalyzer>,
        topic: &str,
        personas: Vec<PersonaProfile>,
        research_goal: Option<String>,
    ) -> Self {
        let now = Utc::now();
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            id: Uuid::new_v4(),
            topic: topic.to_string(),
            research_goal,
            roster: Roster::from_personas(&personas),
            personas,
            started_at: now,
            analyzer: analyzer.clone(),
            tracker: ConversationTracker::new(topic, config.reference_similarity, config.reference_relevance),
            behavior: BehaviorStateTracker::new(config.interrupt_trigger_threshold),
            stances: StanceManager::new(analyzer.clone(), config.consensus.clone(), config.stance_variety_probability),
            enforcer: DisagreementEnforcer::new(analyzer.clone()),
            turns: TurnManager::new(config),
            flow: ConversationFlowController::new(analyzer.clone(), topic, now),
            validator: ReferenceValidator::new(analyzer, config.quote_rewrite_floor),
            styles: ResponseStyleManager::new(config.style_pattern_probability),
            rng,
            status: ConversationStatus::Idle,
            moderator_turns: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn research_goal(&self) -> Option<&str> {
        self.research_goal.as_deref()
    }

    pub fn personas(&self) -> &[PersonaProfile] {
        &self.personas
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn tracker(&self) -> &ConversationTracker {
        &self.tracker
    }

    pub fn behavior(&self) -> &BehaviorStateTracker {
        &self.behavior
    }

    pub fn stances(&self) -> &StanceManager {
        &self.stances
    }

    pub fn enforcer(&self) -> &DisagreementEnforcer {
        &self.enforcer
    }

    pub fn turn_manager(&self) -> &TurnManager {
        &self.turns
    }

    pub fn flow(&self) -> &ConversationFlowController {
        &self.flow
    }

    pub fn styles(&self) -> &ResponseStyleManager {
        &self.styles
    }

    pub fn status(&self) -> ConversationStatus {
        self.status
    }

    pub fn moderator_turns(&self) -> u32 {
        self.moderator_turns
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    /// The single place a turn enters the transcript. Every tracker update
    /// for the turn happens here, after generation is over.
    fn commit(&mut self, speaker: &str, text: &str, now: DateTime<Utc>) -> Turn {
        let turn = self.tracker.commit(speaker, text, now).clone();
        let elapsed = self.flow.elapsed_minutes(now);

        self.behavior.record_turn(&turn);
        for persona in &self.personas {
            self.behavior.update(persona, self.tracker.turns(), elapsed);
        }
        self.flow.update_state(self.tracker.turns(), now);

        debug!(turn = turn.turn_number, speaker, "turn committed");
        turn
    }
}

// --- Facade ---

pub struct ConversationOrchestrator {
    config: EngineConfig,
    analyzer: Arc<dyn TextAnalyzer>,
    store: Arc<dyn StanceStore>,
    context: Option<ConversationContext>,
}

impl ConversationOrchestrator {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config: config.normalized(),
            analyzer: Arc::new(KeywordAnalyzer),
            store: Arc::new(InMemoryStanceStore::new()),
            context: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn StanceStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_analyzer(mut self, analyzer: Arc<dyn TextAnalyzer>) -> Self {
        self.analyzer = analyzer;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn context(&self) -> Option<&ConversationContext> {
        self.context.as_ref()
    }

    pub fn status(&self) -> ConversationStatus {
        self.context.as_ref().map(|c| c.status).unwrap_or(ConversationStatus::Idle)
    }

    fn context_mut(&mut self) -> EngineResult<&mut ConversationContext> {
        self.context.as_mut().ok_or(EngineError::NotInitialized)
    }

    fn running_mut(&mut self) -> EngineResult<&mut ConversationContext> {
        let ctx = self.context_mut()?;
        match ctx.status {
            ConversationStatus::Running => Ok(ctx),
            other => Err(EngineError::NotRunning(other.to_string())),
        }
    }

    /// A turn already in flight may still land while the conversation is paused.
    fn committable_mut(&mut self) -> EngineResult<&mut ConversationContext> {
        let ctx = self.context_mut()?;
        match ctx.status {
            ConversationStatus::Running | ConversationStatus::Paused => Ok(ctx),
            other => Err(EngineError::NotRunning(other.to_string())),
        }
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_secs_f64(self.config.generation_timeout_secs),
            attempts: self.config.generation_retries + 1,
        }
    }

    // --- Lifecycle ---

    /// Fresh conversation scope: new trackers, behavior and style per persona,
    /// stances restored from the store or assigned and persisted.
    pub fn initialize_conversation(
        &mut self,
        topic: &str,
        personas: Vec<PersonaProfile>,
        research_goal: Option<&str>,
    ) -> EngineResult<Uuid> {
        if personas.is_empty() {
            return Err(EngineError::Config("a conversation needs at least one participant".into()));
        }
        let mut names = HashSet::new();
        let mut ids = HashSet::new();
        for persona in &personas {
            if persona.name == MODERATOR {
                return Err(EngineError::Config(format!("\"{}\" is reserved for the moderator", MODERATOR)));
            }
            if !names.insert(persona.name.as_str()) {
                return Err(EngineError::Config(format!("duplicate participant name: {}", persona.name)));
            }
            if !ids.insert(persona.id.as_str()) {
                return Err(EngineError::Config(format!("duplicate participant id: {}", persona.id)));
            }
        }

        let mut ctx = ConversationContext::new(
            &self.config,
            self.analyzer.clone(),
            topic,
            personas,
            research_goal.map(str::to_string),
        );

        for persona in &ctx.personas {
            ctx.behavior.initialize(persona);
            ctx.styles.generate_style(persona);
        }

        match self.load_stances(topic, &ctx.personas) {
            Some(stored) => ctx.stances.restore(topic, stored),
            None => {
                let assigned = ctx.stances.assign_stances(&ctx.personas, topic, &HashSet::new(), &mut ctx.rng);
                self.persist_stances(topic, &ctx.personas, &assigned);
            }
        }

        ctx.status = ConversationStatus::Running;
        let id = ctx.id;
        info!(
            conversation = %id,
            topic,
            participants = ctx.personas.len(),
            "🎙️ conversation initialized"
        );
        self.context = Some(ctx);
        Ok(id)
    }

    /// Stored stances are reused only when every persona has one and the
    /// room is not unanimous.
    fn load_stances(&self, topic: &str, personas: &[PersonaProfile]) -> Option<BTreeMap<String, AssignedStance>> {
        self.analyzer.detect_topic(topic)?;
        let mut stored = BTreeMap::new();
        for persona in personas {
            match self.store.get(&persona.name, topic) {
                Ok(Some(stance)) => {
                    stored.insert(persona.id.clone(), stance);
                }
                Ok(None) => return None,
                Err(e) => {
                    warn!(persona = %persona.name, error = %e, "stance store read failed; reassigning");
                    return None;
                }
            }
        }
        let distinct: HashSet<&str> = stored.values().map(|s| s.position.as_str()).collect();
        if personas.len() >= 2 && distinct.len() < 2 {
            debug!(topic, "stored stances are unanimous; reassigning");
            return None;
        }
        Some(stored)
    }

    fn persist_stances(&self, topic: &str, personas: &[PersonaProfile], stances: &BTreeMap<String, AssignedStance>) {
        for persona in personas {
            let Some(stance) = stances.get(&persona.id) else { continue };
            if let Err(e) = self.store.set(&persona.name, topic, stance) {
                warn!(persona = %persona.name, error = %e, "stance store write failed");
            }
        }
    }

    pub fn pause(&mut self) -> EngineResult<()> {
        let ctx = self.running_mut()?;
        ctx.status = ConversationStatus::Paused;
        info!(conversation = %ctx.id, "conversation paused");
        Ok(())
    }

    /// Resuming also opens a fresh moderator budget.
    pub fn resume(&mut self) -> EngineResult<()> {
        let ctx = self.context_mut()?;
        if ctx.status != ConversationStatus::Paused {
            return Err(EngineError::NotRunning(ctx.status.to_string()));
        }
        ctx.status = ConversationStatus::Running;
        ctx.moderator_turns = 0;
        info!(conversation = %ctx.id, "conversation resumed");
        Ok(())
    }

    pub fn end(&mut self) -> EngineResult<()> {
        let ctx = self.context_mut()?;
        ctx.status = ConversationStatus::Ended;
        info!(conversation = %ctx.id, turns = ctx.tracker.turns().len(), "conversation ended");
        Ok(())
    }

    /// Drop the conversation and every tracker with it. Stored stances stay.
    pub fn reset(&mut self) {
        if let Some(ctx) = self.context.take() {
            debug!(conversation = %ctx.id, "conversation reset");
        }
    }

    pub fn transcript(&self) -> &[Turn] {
        self.context.as_ref().map(|c| c.tracker.turns()).unwrap_or(&[])
    }

    // --- Turn cycle ---

    pub fn decide_next_speaker(&mut self) -> EngineResult<TurnDecision> {
        let ctx = self.running_mut()?;
        ctx.turns
            .decide_next_speaker(ctx.tracker.turns(), &ctx.personas, &ctx.topic, &ctx.behavior, &mut ctx.rng)
            .ok_or_else(|| EngineError::Config("no participants to choose from".into()))
    }

    /// Fold behavior modifiers, stance or disagreement directives, flow advice,
    /// the reference allowlist and style hints into one generation context.
    /// Reads state only; nothing is committed.
    pub fn prepare_persona_response(&mut self, persona_id: &str) -> EngineResult<PreparedResponse> {
        let ctx = self.running_mut()?;
        let now = Utc::now();
        let persona = find_persona(&ctx.personas, persona_id)?;
        let history = ctx.tracker.turns();
        let topic = ctx.topic.as_str();

        let state = ctx.behavior.refreshed(persona, history, ctx.flow.elapsed_minutes(now));
        let modifiers = BehaviorModifiers::from_state(&state);

        let latest = history.iter().rev().find(|t| t.speaker != persona.name).map(|t| t.text.clone());
        let stance = ctx.stances.stance_for(&persona.id, topic).cloned();
        let disagreement = ctx.stances.requires_disagreement(topic, history);

        let mut counter_argument = None;
        let mut directive = None;
        if stance.is_some() {
            counter_argument = ctx.stances.enforce_disagreement(
                persona,
                latest.as_deref().unwrap_or(""),
                topic,
                history,
                &mut ctx.rng,
            );
        } else {
            let empty = BTreeMap::new();
            let assigned = ctx.stances.stances_for(topic).unwrap_or(&empty);
            directive = ctx
                .enforcer
                .inject_disagreement(&ctx.personas, history, assigned, topic, &mut ctx.rng)
                .filter(|d| d.target_persona_id == persona.id);
            if let Some(d) = &directive {
                counter_argument = Some(ctx.enforcer.generate_counter_position(
                    persona,
                    latest.as_deref().unwrap_or(""),
                    &d.stance,
                    &mut ctx.rng,
                ));
            }
        }

        let turn_number = ctx.tracker.next_turn_number();
        let context = GenerationContext {
            conversation_id: ctx.id,
            turn_number,
            speaker_id: persona.id.clone(),
            speaker_name: persona.name.clone(),
            identity: persona.identity_line(),
            topic: topic.to_string(),
            research_goal: ctx.research_goal.clone(),
            recent_history: ctx.tracker.recent_history(HISTORY_FOR_PROMPT).to_vec(),
            latest_statement: latest,
            modifiers: Some(modifiers),
            stance,
            disagreement: directive,
            counter_argument,
            flow_guidance: ctx.flow.analyze_conversation_flow(history, &ctx.personas, now),
            allowed_references: ctx.tracker.available_references(&persona.name, topic),
            reference_suggestions: ctx.validator.suggestions(&persona.name, &ctx.tracker, topic),
            style_hint: ctx.styles.style(&persona.id).map(|s| s.hint()),
            interruption_lead_in: None,
            moderator_instruction: None,
        };

        Ok(PreparedResponse {
            persona_id: persona.id.clone(),
            persona_name: persona.name.clone(),
            turn_number,
            modifiers,
            disagreement,
            context,
        })
    }

    /// Validate, style, re-validate and commit generated text for a prepared turn.
    pub fn validate_and_process_response(
        &mut self,
        prepared: &PreparedResponse,
        raw_text: &str,
    ) -> EngineResult<ProcessedResponse> {
        let ctx = self.committable_mut()?;
        let current = ctx.tracker.next_turn_number();
        if current != prepared.turn_number {
            return Err(EngineError::StaleTurn { prepared: prepared.turn_number, current });
        }
        let persona = find_persona(&ctx.personas, &prepared.persona_id)?;
        let name = persona.name.clone();

        let spoken = extract_spoken(raw_text, &name);
        if spoken.is_empty() {
            return Err(EngineError::Generation { attempts: 1, message: "generator returned no spoken text".into() });
        }

        let first = ctx.validator.validate_response(&name, &spoken, &ctx.tracker, &ctx.roster);
        let styled = ctx.styles.apply_style(&persona.id, &first.corrected, &mut ctx.rng);
        let second = ctx.validator.validate_response(&name, &styled, &ctx.tracker, &ctx.roster);

        // Flags the first pass kept come back from the second one
        let mut issues = first.issues;
        for issue in second.issues {
            if !issues.contains(&issue) {
                issues.push(issue);
            }
        }
        let mut warnings: Vec<String> = issues.iter().map(|i| i.detail.clone()).collect();

        let text = if second.corrected.is_empty() {
            warnings.push("Response was empty after validation; neutral line committed".to_string());
            EMPTY_AFTER_VALIDATION.to_string()
        } else {
            second.corrected
        };

        let residual = ctx.tracker.detect_invalid_references(ctx.analyzer.as_ref(), &text, &ctx.roster);
        if !residual.is_empty() {
            warn!(speaker = %name, residual = ?residual, "references left after validation");
            warnings.extend(residual);
        }
        if !issues.is_empty() {
            debug!(speaker = %name, issues = issues.len(), "response corrected before commit");
        }

        let turn = ctx.commit(&name, &text, Utc::now());
        Ok(ProcessedResponse { turn, raw_text: raw_text.to_string(), issues, warnings })
    }

    /// Explicit, caller-approved stand-in after generation failed for good.
    pub fn commit_filler(&mut self, persona_id: &str) -> EngineResult<Turn> {
        let ctx = self.committable_mut()?;
        let name = find_persona(&ctx.personas, persona_id)?.name.clone();
        warn!(speaker = %name, "committing filler turn");
        Ok(ctx.commit(&name, FILLER_LINE, Utc::now()))
    }

    /// One full persona turn against `generator`, with timeout and retries.
    /// On exhausted retries the retryable error is returned and nothing is committed.
    pub async fn run_turn<G: TextGenerator + ?Sized>(&mut self, generator: &G) -> EngineResult<TurnOutcome> {
        let decision = self.decide_next_speaker()?;
        let mut prepared = self.prepare_persona_response(&decision.next_speaker)?;

        if decision.reason == TurnReason::Interruption {
            if let Some(last) = self.transcript().last().cloned() {
                prepared.context.interruption_lead_in =
                    self.should_persona_interrupt(&decision.next_speaker, &last.speaker, &last.text)?;
            }
        }

        let raw = generate_with_retry(generator, &prepared.context, self.retry_policy()).await?;
        let response = self.validate_and_process_response(&prepared, &raw)?;
        Ok(TurnOutcome { decision, response })
    }

    /// A moderator turn steered by the current flow recommendations. Reaching
    /// `max_moderator_turns` pauses the conversation.
    pub async fn run_moderator_turn<G: TextGenerator + ?Sized>(&mut self, generator: &G) -> EngineResult<ModeratorTurn> {
        let policy = self.retry_policy();
        let max_turns = self.config.max_moderator_turns;

        let (context, intervention) = {
            let ctx = self.running_mut()?;
            let now = Utc::now();
            let history = ctx.tracker.turns();

            let mut recs = ctx.flow.analyze_conversation_flow(history, &ctx.personas, now);
            recs.extend(ctx.flow.manage_participation_balance(&participation_counts(history), &ctx.personas));
            recs.sort_by(|a, b| b.priority.cmp(&a.priority));
            let mut seen = HashSet::new();
            recs.retain(|r| seen.insert(r.action));

            let intervention = ctx.flow.moderator_intervention(&recs, &ctx.topic);
            let context = GenerationContext {
                conversation_id: ctx.id,
                turn_number: ctx.tracker.next_turn_number(),
                speaker_id: MODERATOR.to_string(),
                speaker_name: MODERATOR.to_string(),
                identity: "Moderator: neutral facilitator of this focus group".to_string(),
                topic: ctx.topic.clone(),
                research_goal: ctx.research_goal.clone(),
                recent_history: ctx.tracker.recent_history(HISTORY_FOR_PROMPT).to_vec(),
                latest_statement: history.last().map(|t| t.text.clone()),
                modifiers: None,
                stance: None,
                disagreement: None,
                counter_argument: None,
                flow_guidance: recs,
                allowed_references: ctx.tracker.available_references(MODERATOR, &ctx.topic),
                reference_suggestions: Vec::new(),
                style_hint: Some(intervention.tone.clone()),
                interruption_lead_in: None,
                moderator_instruction: Some(intervention.instruction.clone()),
            };
            (context, intervention)
        };

        let raw = generate_with_retry(generator, &context, policy).await?;

        let ctx = self.committable_mut()?;
        let current = ctx.tracker.next_turn_number();
        if current != context.turn_number {
            return Err(EngineError::StaleTurn { prepared: context.turn_number, current });
        }
        let spoken = extract_spoken(&raw, MODERATOR);
        let validation = ctx.validator.validate_response(MODERATOR, &spoken, &ctx.tracker, &ctx.roster);
        let text = if validation.corrected.is_empty() {
            format!("Let's keep going. What else comes to mind about {}?", ctx.topic)
        } else {
            validation.corrected
        };

        let turn = ctx.commit(MODERATOR, &text, Utc::now());
        ctx.moderator_turns += 1;
        if ctx.moderator_turns >= max_turns {
            ctx.status = ConversationStatus::Paused;
            info!(conversation = %ctx.id, moderator_turns = ctx.moderator_turns, "moderator budget reached; conversation paused");
        }
        Ok(ModeratorTurn { turn, intervention, issues: validation.issues })
    }

    /// `[INTERRUPTS]` lead-in when `persona_id` would cut in on `current_speaker`.
    /// Passionate interruptions carry the persona's counter-argument.
    pub fn should_persona_interrupt(
        &mut self,
        persona_id: &str,
        current_speaker: &str,
        text: &str,
    ) -> EngineResult<Option<String>> {
        let ctx = self.context_mut()?;
        let persona = find_persona(&ctx.personas, persona_id)?;
        let trigger = ctx.behavior.should_interrupt(persona, current_speaker, text, &mut ctx.rng);
        if !trigger.should_interrupt {
            return Ok(None);
        }

        let line = match trigger.style {
            Some(InterruptionStyle::Passionate) => {
                let counter = ctx.stances.generate_counter_argument(persona, text, &ctx.topic, &mut ctx.rng);
                format!("[INTERRUPTS] {}", counter)
            }
            _ => {
                let outcome = ctx.turns.handle_interruption(persona, current_speaker, &ctx.behavior, &mut ctx.rng);
                let lead_in = outcome.lead_in.unwrap_or_else(|| "Sorry to interrupt, but".to_string());
                if lead_in.starts_with('[') {
                    lead_in
                } else {
                    format!("[INTERRUPTS] {}", lead_in)
                }
            }
        };
        debug!(persona = %persona.name, interrupted = current_speaker, reason = ?trigger.reason, "interruption");
        Ok(Some(line))
    }

    // --- Reporting ---

    pub fn get_conversation_insights(&self) -> EngineResult<ConversationInsights> {
        let ctx = self.context.as_ref().ok_or(EngineError::NotInitialized)?;
        let now = Utc::now();
        let history = ctx.tracker.turns();
        let counts = participation_counts(history);

        let participants: Vec<PersonaInsight> = ctx
            .personas
            .iter()
            .map(|p| {
                let state = ctx.behavior.state_or_default(&p.id);
                PersonaInsight {
                    persona_id: p.id.clone(),
                    name: p.name.clone(),
                    turns: ctx.tracker.participant_turn_count(&p.name),
                    energy: state.emotional.energy,
                    engagement: state.emotional.engagement,
                    frustration: state.emotional.frustration,
                    participation_pattern: state.participation_pattern,
                }
            })
            .collect();

        let avg_energy = participants.iter().map(|p| p.energy).sum::<f64>() / participants.len().max(1) as f64;
        let engagement: HashMap<String, f64> = participants.iter().map(|p| (p.name.clone(), p.engagement)).collect();

        Ok(ConversationInsights {
            conversation_id: ctx.id,
            topic: ctx.topic.clone(),
            status: ctx.status,
            turn_count: history.len(),
            moderator_turns: ctx.moderator_turns,
            flow: ctx.flow.compute_state(history, now),
            recommendations: ctx.flow.analyze_conversation_flow(history, &ctx.personas, now),
            consensus: ctx.stances.requires_disagreement(&ctx.topic, history),
            participation_balance: ctx.turns.manage_participation_balance(&ctx.personas, &counts),
            stance_data: ctx.stances.export_stance_data(&ctx.topic, &ctx.personas),
            should_continue_topic: ctx.flow.should_continue_topic(),
            topic_shift: ctx.flow.trigger_topic_shift(avg_energy, &engagement),
            topic_suggestions: topic_suggestions(&ctx.topic, &ctx.personas),
            participants,
        })
    }

    /// Whole conversation as one JSON document.
    pub fn export(&self) -> EngineResult<serde_json::Value> {
        let ctx = self.context.as_ref().ok_or(EngineError::NotInitialized)?;
        let insights = serde_json::to_value(self.get_conversation_insights()?)?;
        let styles: BTreeMap<&str, serde_json::Value> = ctx
            .personas
            .iter()
            .filter_map(|p| ctx.styles.style(&p.id).map(|s| (p.name.as_str(), s)))
            .map(|(name, s)| serde_json::to_value(s).map(|v| (name, v)))
            .collect::<Result<_, _>>()?;

        Ok(json!({
            "conversation_id": ctx.id,
            "topic": ctx.topic,
            "research_goal": ctx.research_goal,
            "status": ctx.status,
            "started_at": ctx.started_at,
            "participants": serde_json::to_value(&ctx.personas)?,
            "turns": serde_json::to_value(ctx.tracker.turns())?,
            "stances": serde_json::to_value(ctx.stances.export_stance_data(&ctx.topic, &ctx.personas))?,
            "styles": styles,
            "analytics": insights,
        }))
    }
}

/// Follow-up angles drawn from who is in the room.
fn topic_suggestions(topic: &str, personas: &[PersonaProfile]) -> Vec<String> {
    let mut suggestions = Vec::new();
    if personas.iter().any(|p| !p.occupation.title.is_empty()) {
        suggestions.push(format!("How does {} show up in your work?", topic));
    }
    if personas.iter().any(|p| {
        let family = p.background.family_status.to_lowercase();
        family.contains("married") || family.contains("children") || family.contains("parent")
    }) {
        suggestions.push(format!("How does {} affect your family?", topic));
    }
    if personas.iter().any(|p| {
        p.preferences.interests.iter().any(|i| i.to_lowercase().contains("tech"))
            || p.occupation.industry.to_lowercase().contains("tech")
    }) {
        suggestions.push(format!("What role does technology play in {}?", topic));
    }
    suggestions.push(format!("What would change your mind about {}?", topic));
    suggestions
}

async fn generate_with_retry<G: TextGenerator + ?Sized>(
    generator: &G,
    context: &GenerationContext,
    policy: RetryPolicy,
) -> EngineResult<String> {
    let mut last_error: Option<EngineError> = None;

    for attempt in 1..=policy.attempts {
        match tokio::time::timeout(policy.timeout, collect_stream(generator, context, STREAM_BUFFER)).await {
            Ok(Ok(text)) if !extract_spoken(&text, &context.speaker_name).is_empty() => return Ok(text),
            Ok(Ok(_)) => {
                warn!(attempt, speaker = %context.speaker_name, "generator returned no spoken text");
                last_error = Some(EngineError::Generation { attempts: attempt, message: "empty response".into() });
            }
            Ok(Err(e)) => {
                warn!(attempt, speaker = %context.speaker_name, error = %e, "generation failed");
                last_error = Some(e);
            }
            Err(_) => {
                warn!(attempt, speaker = %context.speaker_name, "generation timed out");
                last_error = Some(EngineError::GenerationTimeout { seconds: policy.timeout.as_secs_f64() });
            }
        }
    }

    Err(match last_error {
        Some(EngineError::GenerationTimeout { seconds }) => EngineError::GenerationTimeout { seconds },
        Some(e) => EngineError::Generation { attempts: policy.attempts, message: e.to_string() },
        None => EngineError::Generation { attempts: 0, message: "no generation attempts configured".into() },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::ScriptedGenerator;
    use crate::persona::Personality;
    use crate::references::IssueKind;

    fn personas() -> Vec<PersonaProfile> {
        vec![
            PersonaProfile::new("a", "Alice").with_personality(Personality::new(3, 3, 5, 2, 3)),
            PersonaProfile::new("b", "Bob").with_personality(Personality::new(3, 3, 2, 4, 3)),
        ]
    }

    fn orchestrator() -> ConversationOrchestrator {
        let mut o = ConversationOrchestrator::new(EngineConfig::default().with_seed(11));
        o.initialize_conversation("gun_laws", personas(), Some("Gauge support for background checks")).unwrap();
        o
    }

    #[test]
    fn test_rejects_reserved_and_duplicate_names() {
        let mut o = ConversationOrchestrator::new(EngineConfig::default());
        let clash = vec![PersonaProfile::new("a", "Alice"), PersonaProfile::new("b", "Alice")];
        assert!(matches!(o.initialize_conversation("x", clash, None), Err(EngineError::Config(_))));
        let reserved = vec![PersonaProfile::new("m", MODERATOR)];
        assert!(o.initialize_conversation("x", reserved, None).is_err());
        assert!(o.initialize_conversation("x", Vec::new(), None).is_err());
        assert_eq!(o.status(), ConversationStatus::Idle);
    }

    #[test]
    fn test_calls_before_init_fail() {
        let mut o = ConversationOrchestrator::new(EngineConfig::default());
        assert!(matches!(o.decide_next_speaker(), Err(EngineError::NotInitialized)));
        assert!(o.get_conversation_insights().is_err());
        assert!(o.transcript().is_empty());
    }

    #[test]
    fn test_prepare_and_commit() {
        let mut o = orchestrator();
        let prepared = o.prepare_persona_response("a").unwrap();
        assert_eq!(prepared.turn_number, 1);
        assert!(prepared.context.stance.is_some());
        assert!(prepared.context.render_prompt().contains("Alice"));

        let processed = o
            .validate_and_process_response(&prepared, "[Thinking] hm [Verdict] Background checks matter to me.")
            .unwrap();
        assert_eq!(processed.turn.turn_number, 1);
        assert_eq!(processed.turn.speaker, "Alice");
        assert_eq!(o.transcript().len(), 1);
        assert_eq!(o.context().unwrap().tracker().statements().len(), 1);
    }

    #[test]
    fn test_stale_prepared_response_rejected() {
        let mut o = orchestrator();
        let first = o.prepare_persona_response("a").unwrap();
        let second = o.prepare_persona_response("b").unwrap();
        o.validate_and_process_response(&first, "Background checks work.").unwrap();
        let err = o.validate_and_process_response(&second, "Owning a gun is a right.").unwrap_err();
        assert!(matches!(err, EngineError::StaleTurn { prepared: 1, current: 2 }));
        assert_eq!(o.transcript().len(), 1);
    }

    #[test]
    fn test_hallucinated_quote_fixed_before_commit() {
        let mut o = orchestrator();
        let p = o.prepare_persona_response("b").unwrap();
        o.validate_and_process_response(&p, "Hunting is a family tradition for us.").unwrap();
        let p = o.prepare_persona_response("a").unwrap();
        let processed = o.validate_and_process_response(&p, "Bob said we should ban all rifles. Not me.").unwrap();
        assert!(!processed.issues.is_empty());
        assert!(!processed.turn.text.contains("ban all rifles"));
    }

    #[test]
    fn test_enforcer_counter_text_reaches_stanceless_target() {
        let mut config = EngineConfig::default().with_seed(8);
        config.style_pattern_probability = 0.0;
        let mut o = ConversationOrchestrator::new(config);
        let room = vec![
            PersonaProfile::new("a", "Ann"),
            PersonaProfile::new("b", "Ben"),
            PersonaProfile::new("c", "Cy").with_personality(Personality::new(3, 3, 5, 1, 3)),
        ];
        o.initialize_conversation("coffee", room, None).unwrap();
        for id in ["a", "b", "a", "b", "a"] {
            let p = o.prepare_persona_response(id).unwrap();
            assert!(p.context.counter_argument.is_none());
            o.validate_and_process_response(&p, "I agree, exactly.").unwrap();
        }

        let bystander = o.prepare_persona_response("b").unwrap();
        assert!(bystander.context.disagreement.is_none());
        assert!(bystander.context.counter_argument.is_none());

        let prepared = o.prepare_persona_response("c").unwrap();
        assert!(prepared.context.stance.is_none());
        let directive = prepared.context.disagreement.as_ref().expect("Cy is asked to push back");
        assert!(directive.stance.position.starts_with("Skeptical"));
        let counter = prepared.context.counter_argument.as_deref().expect("counter text for the target");
        assert!(counter.contains(directive.argument.as_str()), "{}", counter);
    }

    #[test]
    fn test_kept_flags_reported_once() {
        let mut config = EngineConfig::default().with_seed(2);
        config.style_pattern_probability = 0.0;
        let mut o = ConversationOrchestrator::new(config);
        o.initialize_conversation("gun_laws", personas(), None).unwrap();
        let p = o.prepare_persona_response("b").unwrap();
        let processed = o.validate_and_process_response(&p, "Bob said it best. Hunting matters.").unwrap();
        let self_refs = processed.issues.iter().filter(|i| i.kind == IssueKind::SelfReference).count();
        assert_eq!(self_refs, 1, "{:?}", processed.issues);
        assert_eq!(processed.warnings.len(), processed.issues.len());
    }

    #[test]
    fn test_pause_resume_end() {
        let mut o = orchestrator();
        o.pause().unwrap();
        assert!(matches!(o.decide_next_speaker(), Err(EngineError::NotRunning(_))));
        assert!(o.pause().is_err());
        o.resume().unwrap();
        assert!(o.decide_next_speaker().is_ok());
        o.end().unwrap();
        assert_eq!(o.status(), ConversationStatus::Ended);
        assert!(o.commit_filler("a").is_err());
    }

    #[tokio::test]
    async fn test_moderator_budget_pauses() {
        let mut config = EngineConfig::default().with_seed(5);
        config.max_moderator_turns = 2;
        let mut o = ConversationOrchestrator::new(config);
        o.initialize_conversation("gun_laws", personas(), None).unwrap();
        let generator = ScriptedGenerator::new();

        o.run_moderator_turn(&generator).await.unwrap();
        assert_eq!(o.status(), ConversationStatus::Running);
        let second = o.run_moderator_turn(&generator).await.unwrap();
        assert_eq!(second.turn.speaker, MODERATOR);
        assert_eq!(o.status(), ConversationStatus::Paused);
        assert!(o.run_moderator_turn(&generator).await.is_err());
    }

    #[test]
    fn test_insights_and_export() {
        let mut o = orchestrator();
        let p = o.prepare_persona_response("a").unwrap();
        o.validate_and_process_response(&p, "Background checks matter.").unwrap();
        let insights = o.get_conversation_insights().unwrap();
        assert_eq!(insights.turn_count, 1);
        assert_eq!(insights.participants.len(), 2);
        assert!(insights.stance_data.is_some());
        assert!(insights.topic_suggestions.last().unwrap().contains("gun_laws"));

        let export = o.export().unwrap();
        assert_eq!(export["topic"], "gun_laws");
        assert_eq!(export["turns"].as_array().unwrap().len(), 1);
        assert!(export["styles"]["Alice"].is_object());
    }
}
