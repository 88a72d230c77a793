// src/config.rs
// ENGINE CONFIG: thresholds and budgets, loadable from TOML

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConsensusThresholds {
    /// Controversial topic above this level needs a strong disagreement.
    pub controversial: f64,
    /// Any topic above this level needs a moderate disagreement.
    pub moderate: f64,
    /// Anything above this level asks for a mild push back.
    pub mild: f64,
}

impl Default for ConsensusThresholds {
    fn default() -> Self {
        Self { controversial: 0.7, moderate: 0.8, mild: 0.9 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Fixed seed for every random choice. `None` seeds from entropy.
    pub seed: Option<u64>,

    /// Turn manager: interruption candidates above this confidence take the floor.
    pub interruption_threshold: f64,
    /// Behavior tracker: interruption score needed to report `should_interrupt`.
    pub interrupt_trigger_threshold: f64,
    pub balance_ratio: f64,
    pub runner_up_probability: f64,
    pub recent_speaker_penalty: f64,
    pub stance_variety_probability: f64,

    pub reference_similarity: f64,
    pub reference_relevance: f64,
    /// Minimum overlap for rewriting a wrong attribution into an exact quote.
    pub quote_rewrite_floor: f64,

    pub consensus: ConsensusThresholds,
    pub style_pattern_probability: f64,

    pub generation_timeout_secs: f64,
    pub generation_retries: u32,
    pub max_moderator_turns: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            seed: None,
            interruption_threshold: 0.7,
            interrupt_trigger_threshold: 0.6,
            balance_ratio: 0.5,
            runner_up_probability: 0.2,
            recent_speaker_penalty: 0.2,
            stance_variety_probability: 0.3,
            reference_similarity: 0.6,
            reference_relevance: 0.3,
            quote_rewrite_floor: 0.15,
            consensus: ConsensusThresholds::default(),
            style_pattern_probability: 0.3,
            generation_timeout_secs: 30.0,
            generation_retries: 2,
            max_moderator_turns: 3,
        }
    }
}

impl EngineConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn from_toml_str(raw: &str) -> EngineResult<Self> {
        let config: EngineConfig =
            toml::from_str(raw).map_err(|e| EngineError::Config(e.to_string()))?;
        Ok(config.normalized())
    }

    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }

    /// Clamp probabilities into [0, 1] and the moderator budget into 1..=50.
    pub fn normalized(mut self) -> Self {
        for p in [
            &mut self.interruption_threshold,
            &mut self.interrupt_trigger_threshold,
            &mut self.balance_ratio,
            &mut self.runner_up_probability,
            &mut self.recent_speaker_penalty,
            &mut self.stance_variety_probability,
            &mut self.reference_similarity,
            &mut self.reference_relevance,
            &mut self.quote_rewrite_floor,
            &mut self.consensus.controversial,
            &mut self.consensus.moderate,
            &mut self.consensus.mild,
            &mut self.style_pattern_probability,
        ] {
            *p = p.clamp(0.0, 1.0);
        }

        let clamped = self.max_moderator_turns.clamp(1, 50);
        if clamped != self.max_moderator_turns {
            warn!(
                requested = self.max_moderator_turns,
                used = clamped,
                "max_moderator_turns out of range"
            );
            self.max_moderator_turns = clamped;
        }

        if !(self.generation_timeout_secs > 0.0) {
            self.generation_timeout_secs = 30.0;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.interruption_threshold, 0.7);
        assert_eq!(cfg.interrupt_trigger_threshold, 0.6);
        assert_eq!(cfg.consensus.controversial, 0.7);
        assert_eq!(cfg.consensus.moderate, 0.8);
        assert_eq!(cfg.max_moderator_turns, 3);
        assert_eq!(cfg.seed, None);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let cfg = EngineConfig::from_toml_str(
            r#"
            seed = 42
            max_moderator_turns = 500

            [consensus]
            controversial = 0.65
            "#,
        )
        .unwrap();
        assert_eq!(cfg.seed, Some(42));
        assert_eq!(cfg.max_moderator_turns, 50);
        assert_eq!(cfg.consensus.controversial, 0.65);
        assert_eq!(cfg.consensus.moderate, 0.8);
        assert_eq!(cfg.generation_retries, 2);
    }

    #[test]
    fn test_bad_toml_is_config_error() {
        let err = EngineConfig::from_toml_str("seed = \"not a number\"").unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(&path, "max_moderator_turns = 0\ngeneration_timeout_secs = -1.0\n").unwrap();
        let cfg = EngineConfig::load(&path).unwrap();
        assert_eq!(cfg.max_moderator_turns, 1);
        assert_eq!(cfg.generation_timeout_secs, 30.0);
    }
}
