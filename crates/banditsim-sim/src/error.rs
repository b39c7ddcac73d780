use banditsim_bandits::BanditError;
use banditsim_core::ScorerError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Policy(#[from] BanditError),
    #[error("{path}:{line}: {message}")]
    Data {
        path: PathBuf,
        line: usize,
        message: String,
    },
    #[error("Scorer setup failed: {0}")]
    Scorer(#[from] ScorerError),
    #[error("Episode {episode} aborted with {log_len} logged observations: {source}")]
    EpisodeAborted {
        episode: usize,
        log_len: usize,
        #[source]
        source: ScorerError,
    },
    #[error("Simulator already finished")]
    Finished,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SimError>;
