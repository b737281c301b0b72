//! Error types for Colloquy operations

/// Result type for Colloquy operations
pub type Result<T> = std::result::Result<T, ColloquyError>;

/// Error types for the Colloquy crates
#[derive(Debug, thiserror::Error)]
pub enum ColloquyError {
    /// Missing credential or invalid configuration; fatal at startup
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The text-generation collaborator failed or timed out
    #[error("Generation failed: {0}")]
    Generation(String),

    /// Trim policy cannot be applied (e.g. a zero token budget)
    #[error("Invalid trim policy: {0}")]
    TrimPolicy(String),

    /// A prompt template referenced a variable that was not supplied
    #[error("Template error: {0}")]
    Template(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl ColloquyError {
    /// Whether this error came from the generation collaborator.
    pub fn is_generation_failure(&self) -> bool {
        matches!(self, ColloquyError::Generation(_))
    }

    /// Whether this error is a configuration problem.
    pub fn is_configuration(&self) -> bool {
        matches!(self, ColloquyError::Configuration(_))
    }
}

impl From<String> for ColloquyError {
    fn from(s: String) -> Self {
        ColloquyError::Other(s)
    }
}

impl From<&str> for ColloquyError {
    fn from(s: &str) -> Self {
        ColloquyError::Other(s.to_string())
    }
}

impl From<reqwest::Error> for ColloquyError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ColloquyError::Generation(format!("request timed out: {}", err))
        } else {
            ColloquyError::Generation(err.to_string())
        }
    }
}
