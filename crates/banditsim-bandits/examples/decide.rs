//! Reads one decision request from stdin and prints the chosen candidate.
//!
//! ```text
//! echo '{"policy":"epsilon_greedy","params":{"epsilon":0.1},
//!        "context":{"features":[0.3]},
//!        "candidates":[{"item":"a"},{"item":"b"}],
//!        "scores":[0.2,0.7]}' | cargo run --example decide
//! ```

use std::io::{self, Read};

use banditsim_bandits::{Decision, DecisionInput, PolicySpec};
use banditsim_core::{iso8601_now, Candidate, Context};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Deserialize)]
struct Request {
    policy: String,
    #[serde(default)]
    params: Value,
    #[serde(default)]
    context: Context,
    candidates: Vec<Candidate>,
    #[serde(default)]
    scores: Option<Vec<f64>>,
    #[serde(default)]
    seed: u64,
}

#[derive(Serialize)]
struct DecisionRecord {
    ts: String,
    signature: String,
    context: Context,
    decision: Decision,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut input = String::new();
    io::stdin().read_to_string(&mut input)?;
    let req: Request = serde_json::from_str(&input)?;

    let spec = PolicySpec::new(req.policy.parse()?, req.params);
    let policy = spec.build()?;
    let mut decision_input = DecisionInput::new(&req.context, &req.candidates);
    if let Some(scores) = req.scores.as_deref() {
        decision_input = decision_input.with_scores(scores);
    }
    let mut rng = StdRng::seed_from_u64(req.seed);
    let decision = policy.choose_action(&decision_input, &mut rng)?;

    let record = DecisionRecord {
        ts: iso8601_now(),
        signature: spec.signature().to_string(),
        context: req.context.clone(),
        decision,
    };
    serde_json::to_writer_pretty(io::stdout(), &record)?;
    println!();
    Ok(())
}
