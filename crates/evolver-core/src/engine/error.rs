use super::config::ConfigError;
use super::pipeline::PipelineError;
use crate::core::grid::GridError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Initialization failed: {0}")]
    Initialization(String),

    #[error("Invalid configuration: {source}")]
    Config {
        #[from]
        source: ConfigError,
    },

    #[error("Exclusion grid error: {source}")]
    Grid {
        #[from]
        source: GridError,
    },

    #[error(
        "Offspring production failed {attempts} times in one generation; rejections: {}",
        .rejections.join("; ")
    )]
    OffspringFailureOverflow {
        attempts: usize,
        rejections: Vec<String>,
    },

    #[error("Too few scored candidates: {message}")]
    TooFewScoredCandidates { message: String },

    #[error("Run was terminated on request")]
    ForcedTermination,

    #[error("Initial sampling failed: {0}")]
    Sampling(String),

    #[error("I/O error on '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Pipeline failure: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Internal logic error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn too_few(message: impl Into<String>) -> Self {
        Self::TooFewScoredCandidates {
            message: message.into(),
        }
    }

    /// A cooperative stop rather than a fault.
    pub fn is_graceful(&self) -> bool {
        matches!(self, Self::ForcedTermination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_message_lists_rejections() {
        let err = EngineError::OffspringFailureOverflow {
            attempts: 48,
            rejections: vec!["no product".into(), "too heavy".into()],
        };
        let text = err.to_string();
        assert!(text.contains("48"));
        assert!(text.contains("no product; too heavy"));
    }

    #[test]
    fn only_forced_termination_is_graceful() {
        assert!(EngineError::ForcedTermination.is_graceful());
        assert!(!EngineError::too_few("empty").is_graceful());
    }
}
