use thiserror::Error;

#[derive(Debug, Error)]
pub enum BanditError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Empty candidate set")]
    EmptyCandidateSet,
    #[error("Action {arg} out of range for {len} candidates")]
    ActionOutOfRange { arg: usize, len: usize },
    #[error("Policy '{0}' needs scorer output but none was provided")]
    MissingScores(&'static str),
    #[error("Got {scores} scores for {candidates} candidates")]
    ScoreLengthMismatch { scores: usize, candidates: usize },
    #[error("Feature dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("Snapshot deserialization failed: {0}")]
    Snapshot(#[from] serde_json::Error),
}

impl BanditError {
    /// Errors that only concern a single decision and leave the policy usable.
    pub fn is_per_decision(&self) -> bool {
        !matches!(self, Self::InvalidConfiguration(_) | Self::Snapshot(_))
    }
}

pub type Result<T> = std::result::Result<T, BanditError>;
