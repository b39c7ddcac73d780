//! Trains the factorization machine on an interaction file and prints the
//! evaluation report of its held-out tail.
//!
//! Run with: cargo run -p banditsim-eval --example evaluate_fixture -- tests/fixtures/interactions/sample.jsonl

use banditsim_core::Scorer;
use banditsim_eval::Evaluator;
use banditsim_sim::{FactorizationMachine, PreparedData, SimulationConfig};
use std::error::Error;
use std::path::PathBuf;

fn main() -> Result<(), Box<dyn Error>> {
    let input = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .ok_or("usage: evaluate_fixture <interactions.jsonl>")?;

    let config = SimulationConfig {
        n_factors: 4,
        learning_rate: 0.05,
        epochs: 20,
        batch_size: 16,
        fairness_columns: vec!["platform".into()],
        ..SimulationConfig::default()
    };
    config.validate()?;
    let data = PreparedData::prepare(&input, None, None, &config)?;

    let mut fm = FactorizationMachine::new(data.feature_dim()?, config.n_factors, config.seed);
    let loss = fm.fit(&data.train_examples(), &config.hyperparameters())?;
    println!("final training loss: {loss:.4}");

    let report = Evaluator::new(config.fairness_columns.clone()).evaluate(&fm, &data.test);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
