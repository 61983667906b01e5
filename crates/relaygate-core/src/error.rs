//! Error taxonomy for relaygate.
//!
//! Gate operations never surface these to their callers: failures are folded
//! into result values at the point of invocation. The enums exist for the
//! internal seams (config loading, reviewer calls, verdict parsing).

/// Errors produced by a review provider call.
#[derive(Debug, thiserror::Error)]
pub enum ReviewError {
    #[error("no review provider registered for model {model}")]
    NoProvider { model: String },

    #[error("review call to {model} timed out after {timeout_ms}ms")]
    Timeout { model: String, timeout_ms: u64 },

    #[error("review provider failed: {0}")]
    Provider(String),

    #[error("review response could not be parsed: {0}")]
    Unparseable(String),
}

/// relaygate errors.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("invalid gate config: {0}")]
    InvalidConfig(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("git error: {0}")]
    GitError(String),

    #[error("test report error: {0}")]
    TestReport(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("review error: {0}")]
    Review(#[from] ReviewError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for relaygate operations.
pub type Result<T> = std::result::Result<T, GateError>;
