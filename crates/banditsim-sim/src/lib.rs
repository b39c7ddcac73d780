#![warn(clippy::unwrap_used, clippy::expect_used)]

//! Episodic bandit simulation.
//!
//! A [`Simulator`] replays an interaction stream against a policy, logs what
//! the policy chose together with the propensity of that choice, and retrains
//! its [`Scorer`](banditsim_core::Scorer) on the log between episodes. The
//! bundled scorer is a [`FactorizationMachine`].

pub mod checkpoint;
pub mod config;
pub mod data;
pub mod early_stopping;
pub mod error;
pub mod fm;
pub mod log;
pub mod simulator;

#[cfg(test)]
mod testing;

pub use checkpoint::Checkpoint;
pub use config::SimulationConfig;
pub use data::{PreparedData, ValSplitType};
pub use early_stopping::{fit_with_validation, EarlyStopping, FitReport, FitRequest};
pub use error::{Result, SimError};
pub use fm::FactorizationMachine;
pub use log::InteractionLog;
pub use simulator::{EpisodeReport, SimState, SimulationOutcome, Simulator, SkipCounts};
