//! CLI for banditsim.
//!
//! `run` replays an interaction file through the episodic simulator, retrains
//! the factorization machine between episodes and evaluates it on the test
//! split. `evaluate` re-scores a finished run directory against a test file.
//!
//! Every run writes its artifacts to `<output>/<project>/<policy signature>/`.

use anyhow::{Context, Result};
use banditsim_bandits::{PolicyArena, PolicyKind};
use banditsim_core::{iso8601_now, Metric, Optimizer, Scorer};
use banditsim_eval::{write_predictions, EvaluationReport, Evaluator};
use banditsim_sim::data::parse_filter;
use banditsim_sim::{
    Checkpoint, EpisodeReport, FactorizationMachine, FitReport, InteractionLog, PreparedData,
    SimError, SimulationConfig, Simulator, ValSplitType,
};
use clap::{ArgAction, Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const PARAMS_FILE: &str = "params.json";
const INTERACTIONS_FILE: &str = "interactions.jsonl";
const CHECKPOINT_FILE: &str = "checkpoint.json";
const EPISODES_FILE: &str = "episodes.json";
const EVALUATION_FILE: &str = "evaluation.json";
const PREDICTIONS_FILE: &str = "test_predictions.jsonl";

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// More log output (-v debug, -vv trace). `RUST_LOG` takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// No log output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate episodes, retrain between them and evaluate on the test split
    Run(RunArgs),
    /// Evaluate the final model of a run directory on a test file
    Evaluate(EvaluateArgs),
}

#[derive(Args)]
struct RunArgs {
    /// JSON-lines file of interaction records
    #[arg(long)]
    input: PathBuf,

    /// Separate test file (default: tail of --input, see --test-size)
    #[arg(long)]
    test_input: Option<PathBuf>,

    /// Separate validation file (default: carved from the log at retrain time)
    #[arg(long)]
    val_input: Option<PathBuf>,

    /// JSON configuration file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Root directory for run artifacts
    #[arg(long, default_value = "runs")]
    output: PathBuf,

    #[command(flatten)]
    overrides: ConfigOverrides,
}

#[derive(Args)]
struct ConfigOverrides {
    #[arg(long)]
    project: Option<String>,

    /// Free-text note stored with the run parameters
    #[arg(long)]
    observation: Option<String>,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long)]
    test_size: Option<f64>,

    #[arg(long)]
    val_size: Option<f64>,

    /// random | time
    #[arg(long)]
    val_split_type: Option<ValSplitType>,

    /// Context attribute to keep records by, as key=value (repeatable)
    #[arg(long = "filter")]
    filters: Vec<String>,

    /// Context attributes to break evaluation metrics down by
    #[arg(long, value_delimiter = ',')]
    fairness_columns: Option<Vec<String>>,

    #[arg(long)]
    n_factors: Option<usize>,

    #[arg(long)]
    learning_rate: Option<f64>,

    /// sgd | adam | adagrad
    #[arg(long)]
    optimizer: Option<Optimizer>,

    /// Comma-separated subset of loss,accuracy
    #[arg(long, value_delimiter = ',')]
    metrics: Option<Vec<Metric>>,

    #[arg(long)]
    epochs: Option<usize>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    early_stopping_patience: Option<usize>,

    #[arg(long)]
    early_stopping_min_delta: Option<f64>,

    /// Wall-clock limit for one retrain
    #[arg(long)]
    retrain_timeout_secs: Option<u64>,

    /// Fit the scorer on the training split before the first episode
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    warm_start: Option<bool>,

    #[arg(long)]
    obs_batch_size: Option<usize>,

    #[arg(long)]
    num_episodes: Option<usize>,

    /// Retrain from scratch on the whole log instead of on new observations
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    full_refit: Option<bool>,

    /// random | fixed | model | epsilon_greedy | softmax_explorer | lin_ucb |
    /// custom_lin_ucb | explore_then_exploit
    #[arg(long)]
    bandit_policy: Option<PolicyKind>,

    /// Policy parameters as a JSON object
    #[arg(long)]
    bandit_policy_params: Option<String>,
}

impl ConfigOverrides {
    fn apply(self, mut cfg: SimulationConfig) -> Result<SimulationConfig> {
        if let Some(v) = self.project {
            cfg.project = v;
        }
        if let Some(v) = self.observation {
            cfg.observation = v;
        }
        if let Some(v) = self.seed {
            cfg.seed = v;
        }
        if let Some(v) = self.test_size {
            cfg.test_size = v;
        }
        if let Some(v) = self.val_size {
            cfg.val_size = v;
        }
        if let Some(v) = self.val_split_type {
            cfg.val_split_type = v;
        }
        for raw in &self.filters {
            let (key, value) = parse_filter(raw)?;
            cfg.filters.insert(key, value);
        }
        if let Some(v) = self.fairness_columns {
            cfg.fairness_columns = v;
        }
        if let Some(v) = self.n_factors {
            cfg.n_factors = v;
        }
        if let Some(v) = self.learning_rate {
            cfg.learning_rate = v;
        }
        if let Some(v) = self.optimizer {
            cfg.optimizer = v;
        }
        if let Some(v) = self.metrics {
            cfg.metrics = v;
        }
        if let Some(v) = self.epochs {
            cfg.epochs = v;
        }
        if let Some(v) = self.batch_size {
            cfg.batch_size = v;
        }
        if let Some(v) = self.early_stopping_patience {
            cfg.early_stopping_patience = v;
        }
        if let Some(v) = self.early_stopping_min_delta {
            cfg.early_stopping_min_delta = v;
        }
        if let Some(v) = self.retrain_timeout_secs {
            cfg.retrain_timeout_secs = Some(v);
        }
        if let Some(v) = self.warm_start {
            cfg.warm_start = v;
        }
        if let Some(v) = self.obs_batch_size {
            cfg.obs_batch_size = v;
        }
        if let Some(v) = self.num_episodes {
            cfg.num_episodes = v;
        }
        if let Some(v) = self.full_refit {
            cfg.full_refit = v;
        }
        if let Some(v) = self.bandit_policy {
            // params of another policy would not apply
            if v != cfg.bandit_policy && self.bandit_policy_params.is_none() {
                cfg.bandit_policy_params = serde_json::Value::Null;
            }
            cfg.bandit_policy = v;
        }
        if let Some(raw) = &self.bandit_policy_params {
            cfg.bandit_policy_params = serde_json::from_str(raw)
                .with_context(|| format!("--bandit-policy-params is not valid JSON: {raw}"))?;
        }
        Ok(cfg)
    }
}

#[derive(Args)]
struct EvaluateArgs {
    /// Directory written by `run`
    #[arg(long)]
    run_dir: PathBuf,

    /// JSON-lines file of test interaction records
    #[arg(long)]
    test_input: PathBuf,

    /// Override the fairness columns stored with the run
    #[arg(long, value_delimiter = ',')]
    fairness_columns: Option<Vec<String>>,

    /// Where to write evaluation.json and test_predictions.jsonl (default: --run-dir)
    #[arg(long)]
    output: Option<PathBuf>,
}

/// Contents of `params.json`.
#[derive(Debug, Serialize, Deserialize)]
struct RunParams {
    signature: String,
    created_at: String,
    input: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    test_input: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    val_input: Option<PathBuf>,
    config: SimulationConfig,
}

#[derive(Debug, Serialize)]
struct EpisodesFile<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    warm_start: Option<&'a FitReport>,
    episodes: &'a [EpisodeReport],
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(file, value)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    serde_json::from_reader(file).with_context(|| format!("Failed to parse {}", path.display()))
}

fn run(args: RunArgs) -> Result<()> {
    let base = match &args.config {
        Some(path) => SimulationConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => SimulationConfig::default(),
    };
    let config = args.overrides.apply(base)?;
    config.validate().context("Invalid configuration")?;

    let data = PreparedData::prepare(
        &args.input,
        args.test_input.as_deref(),
        args.val_input.as_deref(),
        &config,
    )
    .context("Failed to prepare data")?;
    let dim = data.feature_dim()?;
    let scorer = FactorizationMachine::new(dim, config.n_factors, config.seed);

    let signature = config.policy_spec().signature();
    let run_dir = args.output.join(&config.project).join(signature.to_string());
    write_json(
        &run_dir.join(PARAMS_FILE),
        &RunParams {
            signature: signature.to_string(),
            created_at: iso8601_now(),
            input: args.input.clone(),
            test_input: args.test_input.clone(),
            val_input: args.val_input.clone(),
            config: config.clone(),
        },
    )?;
    tracing::info!(run_dir = %run_dir.display(), "writing run artifacts");

    let evaluator = Evaluator::new(config.fairness_columns.clone());
    let seed = config.seed;
    let arena = PolicyArena::new();
    let mut sim = Simulator::with_arena(config, data, scorer, &arena)?;

    let run_result = sim.run().map(|_| ());
    if let Err(err) = run_result {
        // keep what was logged and the last good model
        sim.log().write_jsonl(&run_dir.join(INTERACTIONS_FILE))?;
        sim.checkpoint().save(&run_dir.join(CHECKPOINT_FILE))?;
        write_json(
            &run_dir.join(EPISODES_FILE),
            &EpisodesFile {
                warm_start: None,
                episodes: sim.reports(),
            },
        )?;
        return Err(abort_context(err, &run_dir));
    }

    let outcome = sim.into_outcome();
    outcome.log.write_jsonl(&run_dir.join(INTERACTIONS_FILE))?;
    outcome.checkpoint.save(&run_dir.join(CHECKPOINT_FILE))?;
    write_json(
        &run_dir.join(EPISODES_FILE),
        &EpisodesFile {
            warm_start: outcome.warm_start.as_ref(),
            episodes: &outcome.reports,
        },
    )?;

    let report =
        evaluator.evaluate_with_log(&outcome.scorer, &outcome.data.test, outcome.log.entries());
    report.save(&run_dir.join(EVALUATION_FILE))?;
    let predictions = {
        let policy = outcome.policy.lock();
        evaluator.predictions(&outcome.scorer, policy.as_ref(), &outcome.data.test, seed)?
    };
    write_predictions(&run_dir.join(PREDICTIONS_FILE), &predictions)?;

    print_summary(&run_dir, &outcome.reports, &report);
    Ok(())
}

fn abort_context(err: SimError, run_dir: &Path) -> anyhow::Error {
    let msg = format!(
        "Simulation aborted; partial artifacts in {}",
        run_dir.display()
    );
    anyhow::Error::new(err).context(msg)
}

fn print_summary(run_dir: &Path, episodes: &[EpisodeReport], report: &EvaluationReport) {
    println!("Run directory: {}", run_dir.display());
    for ep in episodes {
        println!(
            "Episode {}: {} observations, {} skipped, mean reward {:.4}",
            ep.episode,
            ep.processed,
            ep.skipped.total(),
            ep.mean_reward
        );
    }
    let m = &report.overall;
    println!(
        "Test ({} records): hit@1 {:.4}, MRR {:.4}, nDCG@5 {:.4}, nDCG@10 {:.4}",
        m.records, m.hit_rate_at_1, m.mrr, m.ndcg_at_5, m.ndcg_at_10
    );
    if let Some(op) = &report.off_policy {
        println!(
            "Logged reward {:.4}, IPS {:.4}, SNIPS {}",
            op.average_logged_reward,
            op.ips,
            op.snips
                .map_or_else(|| "n/a".to_string(), |v| format!("{v:.4}"))
        );
    }
}

fn evaluate(args: EvaluateArgs) -> Result<()> {
    let params: RunParams = read_json(&args.run_dir.join(PARAMS_FILE))?;
    let checkpoint = Checkpoint::load(&args.run_dir.join(CHECKPOINT_FILE))
        .context("Failed to load checkpoint")?;
    if checkpoint.signature.to_string() != params.signature {
        anyhow::bail!(
            "Checkpoint signature {} does not match run parameters {}",
            checkpoint.signature,
            params.signature
        );
    }

    let mut scorer = FactorizationMachine::new(0, 0, params.config.seed);
    scorer
        .load(checkpoint.scorer.clone())
        .context("Checkpoint does not hold a factorization machine")?;
    let mut policy = params.config.policy_spec().build()?;
    policy
        .load(checkpoint.policy.clone())
        .context("Failed to restore policy state")?;

    let test = banditsim_sim::data::apply_filters(
        banditsim_sim::data::read_records(&args.test_input)?,
        &params.config.filters,
    );
    let log_path = args.run_dir.join(INTERACTIONS_FILE);
    let log = if log_path.exists() {
        InteractionLog::read_jsonl(&log_path)?
    } else {
        InteractionLog::new()
    };

    let columns = args
        .fairness_columns
        .unwrap_or_else(|| params.config.fairness_columns.clone());
    let evaluator = Evaluator::new(columns);
    let report = evaluator.evaluate_with_log(&scorer, &test, log.entries());
    let predictions = evaluator.predictions(&scorer, policy.as_ref(), &test, params.config.seed)?;

    let out_dir = args.output.unwrap_or(args.run_dir);
    report.save(&out_dir.join(EVALUATION_FILE))?;
    write_predictions(&out_dir.join(PREDICTIONS_FILE), &predictions)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn init_tracing(cli: &Cli) {
    if cli.quiet {
        return;
    }

    let filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    match cli.command {
        Commands::Run(args) => run(args),
        Commands::Evaluate(args) => evaluate(args),
    }
}
