// src/error.rs
// ENGINE ERRORS: one enum for every failure the orchestrator can surface

use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Text generation failed after {attempts} attempt(s): {message}")]
    Generation { attempts: u32, message: String },

    #[error("Text generation timed out after {seconds:.1}s")]
    GenerationTimeout { seconds: f64 },

    #[error("No conversation has been initialized")]
    NotInitialized,

    #[error("Conversation is not running (status: {0})")]
    NotRunning(String),

    #[error("Unknown persona: {0}")]
    UnknownPersona(String),

    #[error("Stale response: prepared for turn {prepared}, transcript is at turn {current}")]
    StaleTurn { prepared: u64, current: u64 },

    #[error("Stance store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl EngineError {
    /// True when the caller may retry the same turn (or commit an explicit filler).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Generation { .. } | EngineError::GenerationTimeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_failures_are_retryable() {
        let err = EngineError::Generation { attempts: 3, message: "boom".into() };
        assert!(err.is_retryable());
        assert!(EngineError::GenerationTimeout { seconds: 30.0 }.is_retryable());
        assert!(!EngineError::NotInitialized.is_retryable());
        assert!(!EngineError::UnknownPersona("ghost".into()).is_retryable());
    }

    #[test]
    fn test_display_mentions_attempts() {
        let err = EngineError::Generation { attempts: 2, message: "model offline".into() };
        let text = err.to_string();
        assert!(text.contains("2 attempt"));
        assert!(text.contains("model offline"));
    }
}
