// src/lib.rs
// ORACULUM DYNAMICS - CONVERSATION ENGINE
// Behavior, stances, turn-taking and reference hygiene for synthetic focus groups.
// Text generation stays outside: hosts plug in a `TextGenerator`.

// Modules
pub mod analysis; // Keyword/regex text analysis behind the TextAnalyzer seam
pub mod behavior;
pub mod catalog; // Controversial topic catalog
pub mod config;
pub mod disagreement;
pub mod error;
pub mod flow;
pub mod generation;
pub mod orchestrator;
pub mod persona;
pub mod references;
pub mod stance;
pub mod store;
pub mod style;
pub mod tracker;
pub mod turns;

pub use analysis::{KeywordAnalyzer, TextAnalyzer};
pub use behavior::{BehaviorModifiers, BehaviorState, BehaviorStateTracker};
pub use config::EngineConfig;
pub use disagreement::{DisagreementDirective, DisagreementEnforcer};
pub use error::{EngineError, EngineResult};
pub use flow::{ConversationFlowController, FlowRecommendation, ModeratorIntervention};
pub use generation::{GenerationContext, ScriptedGenerator, TextGenerator};
pub use orchestrator::{
    ConversationInsights, ConversationOrchestrator, ConversationStatus, PreparedResponse, ProcessedResponse,
    TurnOutcome,
};
pub use persona::{PersonaProfile, Personality, Roster, Turn, MODERATOR};
pub use references::{ReferenceValidation, ReferenceValidator};
pub use stance::{AssignedStance, StanceManager};
pub use store::{InMemoryStanceStore, JsonFileStanceStore, StanceStore};
pub use style::{ResponseStyle, ResponseStyleManager};
pub use tracker::ConversationTracker;
pub use turns::{TurnDecision, TurnManager, TurnReason};
