//! The episodic interaction and retraining loop.
//!
//! ```text
//!   Preparing ─┬─▶ RunningEpisode ─▶ Retraining ─┬─▶ RunningEpisode ...
//!              │                                  ├─▶ Done
//!              │                                  └─▶ Aborted
//!              └─▶ WarmStartFailed
//! ```
//!
//! Every episode replays the training stream in a seeded order, batch by
//! batch. Scores for a batch are computed in parallel. Stateless policies
//! also decide in parallel, each decision with its own RNG derived from
//! `(seed, episode, position)`. Stateful policies decide and update one
//! record at a time while holding the policy lock for the whole batch.
//! Retraining happens only after the last batch of an episode.

use crate::checkpoint::Checkpoint;
use crate::config::SimulationConfig;
use crate::data::{split_validation, PreparedData};
use crate::early_stopping::{fit_with_validation, FitReport, FitRequest};
use crate::log::InteractionLog;
use crate::{Result, SimError};
use banditsim_bandits::stats::stable_hash64;
use banditsim_bandits::{
    BanditError, Decision, DecisionInput, Policy, PolicyArena, PolicySignature, SharedPolicy,
};
use banditsim_core::{
    Hyperparameters, InteractionRecord, Observation, Scorer, ScorerError, TrainingSet,
};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SimState {
    Preparing,
    RunningEpisode { episode: usize },
    Retraining { episode: usize },
    Done,
    Aborted { episode: usize },
    WarmStartFailed,
}

/// Decisions that did not make it into the log, by reason.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipCounts {
    pub reward_unavailable: usize,
    pub policy_error: usize,
    pub invalid_observation: usize,
}

impl SkipCounts {
    pub fn total(&self) -> usize {
        self.reward_unavailable + self.policy_error + self.invalid_observation
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeReport {
    pub episode: usize,
    /// Observations appended to the log during this episode.
    pub processed: usize,
    pub skipped: SkipCounts,
    pub cumulative_reward: f64,
    pub mean_reward: f64,
    /// Log length after the episode.
    pub log_len: usize,
    /// `None` when there was nothing to retrain on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fit: Option<FitReport>,
}

impl EpisodeReport {
    fn new(episode: usize) -> Self {
        Self {
            episode,
            processed: 0,
            skipped: SkipCounts::default(),
            cumulative_reward: 0.0,
            mean_reward: 0.0,
            log_len: 0,
            fit: None,
        }
    }
}

/// What a finished simulation hands over to evaluation.
#[derive(Debug)]
pub struct SimulationOutcome<S> {
    pub reports: Vec<EpisodeReport>,
    pub warm_start: Option<FitReport>,
    pub log: InteractionLog,
    pub checkpoint: Checkpoint,
    pub scorer: S,
    pub policy: SharedPolicy,
    pub data: PreparedData,
}

fn decision_rng(seed: u64, episode: usize, position: usize) -> StdRng {
    StdRng::seed_from_u64(stable_hash64(seed, &format!("{episode}:{position}")))
}

fn decide(
    policy: &dyn Policy,
    record: &InteractionRecord,
    scores: Option<&[f64]>,
    rng: &mut StdRng,
) -> std::result::Result<Decision, BanditError> {
    let mut input = DecisionInput::new(&record.context, &record.candidates);
    if let Some(s) = scores {
        input = input.with_scores(s);
    }
    policy.choose_action(&input, rng)
}

/// Turns a decision into an observation, counting and logging every skip.
fn resolve(
    decision: std::result::Result<Decision, BanditError>,
    record: &InteractionRecord,
    report: &mut EpisodeReport,
) -> Result<Option<Observation>> {
    let episode = report.episode;
    let decision = match decision {
        Ok(d) => d,
        Err(err) if err.is_per_decision() => {
            tracing::warn!(episode, %err, "decision skipped");
            report.skipped.policy_error += 1;
            return Ok(None);
        }
        Err(err) => return Err(err.into()),
    };
    let Some(reward) = record.reward_for(&decision.item) else {
        tracing::warn!(episode, item = %decision.item, "reward unavailable, observation skipped");
        report.skipped.reward_unavailable += 1;
        return Ok(None);
    };
    match Observation::new(
        episode,
        record.context.clone(),
        record.candidates.clone(),
        decision.action,
        decision.propensity,
        reward,
        decision.why,
    ) {
        Ok(obs) => {
            report.processed += 1;
            report.cumulative_reward += reward;
            Ok(Some(obs))
        }
        Err(err) => {
            tracing::warn!(episode, %err, "invalid observation skipped");
            report.skipped.invalid_observation += 1;
            Ok(None)
        }
    }
}

pub struct Simulator<S: Scorer> {
    config: SimulationConfig,
    hp: Hyperparameters,
    signature: PolicySignature,
    data: PreparedData,
    scorer: S,
    policy: SharedPolicy,
    log: InteractionLog,
    state: SimState,
    retrained_upto: usize,
    reports: Vec<EpisodeReport>,
    warm_start: Option<FitReport>,
    checkpoint: Checkpoint,
}

impl<S: Scorer> Simulator<S> {
    /// Validates `config` and takes ownership of the splits, the initial
    /// scorer and the policy instance configured by `config`.
    pub fn new(
        config: SimulationConfig,
        data: PreparedData,
        scorer: S,
        policy: SharedPolicy,
    ) -> Result<Self> {
        config.validate()?;
        let spec = config.policy_spec();
        let policy_snapshot = {
            let p = policy.lock();
            if p.name() != spec.kind.as_str() {
                return Err(SimError::Config(format!(
                    "policy instance '{}' does not match configured '{}'",
                    p.name(),
                    spec.kind
                )));
            }
            p.snapshot()
        };
        let signature = spec.signature();
        let checkpoint = Checkpoint::capture(
            signature.clone(),
            None,
            None,
            0,
            scorer.snapshot(),
            policy_snapshot,
        );
        Ok(Self {
            hp: config.hyperparameters(),
            config,
            signature,
            data,
            scorer,
            policy,
            log: InteractionLog::new(),
            state: SimState::Preparing,
            retrained_upto: 0,
            reports: Vec::new(),
            warm_start: None,
            checkpoint,
        })
    }

    /// Like [`Simulator::new`], taking the policy from `arena`.
    pub fn with_arena(
        config: SimulationConfig,
        data: PreparedData,
        scorer: S,
        arena: &PolicyArena,
    ) -> Result<Self> {
        let policy = arena.get_or_create(&config.policy_spec())?;
        Self::new(config, data, scorer, policy)
    }

    pub fn state(&self) -> SimState {
        self.state
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn signature(&self) -> &PolicySignature {
        &self.signature
    }

    pub fn log(&self) -> &InteractionLog {
        &self.log
    }

    pub fn reports(&self) -> &[EpisodeReport] {
        &self.reports
    }

    /// Last successful checkpoint. Survives an aborted run.
    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    pub fn scorer(&self) -> &S {
        &self.scorer
    }

    pub fn policy(&self) -> &SharedPolicy {
        &self.policy
    }

    /// Runs every episode. Can be called once.
    pub fn run(&mut self) -> Result<&[EpisodeReport]> {
        if self.state != SimState::Preparing {
            return Err(SimError::Finished);
        }
        tracing::info!(
            signature = %self.signature,
            project = %self.config.project,
            episodes = self.config.num_episodes,
            stream = self.data.train.len(),
            "simulation started"
        );
        self.prepare()?;
        for episode in 0..self.config.num_episodes {
            let mut report = match self.run_episode(episode) {
                Ok(r) => r,
                Err(err) => {
                    self.state = SimState::Aborted { episode };
                    return Err(err);
                }
            };
            report.fit = self.retrain(episode)?;
            tracing::info!(
                episode,
                processed = report.processed,
                skipped = report.skipped.total(),
                mean_reward = report.mean_reward,
                log_len = report.log_len,
                "episode finished"
            );
            self.reports.push(report);
        }
        self.state = SimState::Done;
        Ok(&self.reports)
    }

    pub fn into_outcome(self) -> SimulationOutcome<S> {
        SimulationOutcome {
            reports: self.reports,
            warm_start: self.warm_start,
            log: self.log,
            checkpoint: self.checkpoint,
            scorer: self.scorer,
            policy: self.policy,
            data: self.data,
        }
    }

    fn prepare(&mut self) -> Result<()> {
        if !self.config.warm_start || self.data.train.is_empty() {
            return Ok(());
        }
        let examples = self.data.train_examples();
        tracing::info!(examples = examples.len(), "warm start");
        match self.fit(examples, "warm-start") {
            Ok(fit) => {
                self.checkpoint = self.capture(None, &fit);
                self.warm_start = fit;
                Ok(())
            }
            Err(source) => {
                if let Err(err) = self.scorer.load(self.checkpoint.scorer.clone()) {
                    tracing::warn!(%err, "could not restore the initial scorer");
                }
                self.state = SimState::WarmStartFailed;
                tracing::error!(%source, "warm start failed");
                Err(SimError::Scorer(source))
            }
        }
    }

    fn run_episode(&mut self, episode: usize) -> Result<EpisodeReport> {
        self.state = SimState::RunningEpisode { episode };
        let seed = self.config.seed;
        let batch_size = self.config.obs_batch_size;
        let mut report = EpisodeReport::new(episode);

        let mut order: Vec<usize> = (0..self.data.train.len()).collect();
        order.shuffle(&mut StdRng::seed_from_u64(stable_hash64(
            seed,
            &format!("episode:{episode}"),
        )));

        let policy = Arc::clone(&self.policy);
        let (needs_scores, stateful) = {
            let p = policy.lock();
            (p.requires_scores(), p.is_stateful())
        };

        for (batch_no, batch) in order.chunks(batch_size).enumerate() {
            let base = batch_no * batch_size;
            let records: Vec<&InteractionRecord> =
                batch.iter().map(|&i| &self.data.train[i]).collect();
            let scorer = &self.scorer;
            let scores: Vec<Option<Vec<f64>>> = if needs_scores {
                records
                    .par_iter()
                    .map(|r| Some(scorer.predict(&r.context, &r.candidates)))
                    .collect()
            } else {
                vec![None; records.len()]
            };

            if stateful {
                let mut guard = policy.lock();
                for (j, record) in records.iter().enumerate() {
                    let mut rng = decision_rng(seed, episode, base + j);
                    let decision = decide(guard.as_ref(), record, scores[j].as_deref(), &mut rng);
                    if let Some(obs) = resolve(decision, record, &mut report)? {
                        guard.update(&obs);
                        self.log.append(obs);
                    }
                }
            } else {
                let decisions: Vec<_> = {
                    let guard = policy.lock();
                    let p: &dyn Policy = guard.as_ref();
                    records
                        .par_iter()
                        .zip(scores.par_iter())
                        .enumerate()
                        .map(|(j, (record, s))| {
                            let mut rng = decision_rng(seed, episode, base + j);
                            decide(p, record, s.as_deref(), &mut rng)
                        })
                        .collect()
                };
                for (decision, record) in decisions.into_iter().zip(&records) {
                    if let Some(obs) = resolve(decision, record, &mut report)? {
                        self.log.append(obs);
                    }
                }
            }
            tracing::debug!(episode, batch = batch_no, log_len = self.log.len(), "batch done");
        }

        report.log_len = self.log.len();
        if report.processed > 0 {
            #[allow(clippy::cast_precision_loss)]
            let mean = report.cumulative_reward / report.processed as f64;
            report.mean_reward = mean;
        }
        Ok(report)
    }

    fn retrain(&mut self, episode: usize) -> Result<Option<FitReport>> {
        self.state = SimState::Retraining { episode };
        let result = if self.config.full_refit {
            self.retrain_full(episode)
        } else {
            self.retrain_incremental(episode)
        };
        match result {
            Ok(fit) => {
                self.retrained_upto = self.log.len();
                self.checkpoint = self.capture(Some(episode), &fit);
                Ok(fit)
            }
            Err(source) => {
                if let Err(err) = self.scorer.load(self.checkpoint.scorer.clone()) {
                    tracing::warn!(%err, "could not restore scorer from last checkpoint");
                }
                self.state = SimState::Aborted { episode };
                tracing::error!(episode, log_len = self.log.len(), %source, "retraining failed");
                Err(SimError::EpisodeAborted {
                    episode,
                    log_len: self.log.len(),
                    source,
                })
            }
        }
    }

    /// Reinitializes the scorer and fits it on the whole log.
    fn retrain_full(&mut self, episode: usize) -> std::result::Result<Option<FitReport>, ScorerError> {
        let examples = InteractionLog::training_examples(self.log.entries());
        if examples.is_empty() {
            tracing::warn!(episode, "interaction log is empty, retraining skipped");
            return Ok(None);
        }
        tracing::info!(episode, examples = examples.len(), "full refit");
        self.scorer.reinitialize(self.config.seed);
        self.fit(examples, &format!("episode:{episode}"))
    }

    /// Continues training on the observations logged since the last retrain.
    fn retrain_incremental(
        &mut self,
        episode: usize,
    ) -> std::result::Result<Option<FitReport>, ScorerError> {
        let examples = InteractionLog::training_examples(self.log.since(self.retrained_upto));
        if examples.is_empty() {
            tracing::warn!(episode, "no new observations, retraining skipped");
            return Ok(None);
        }
        tracing::info!(episode, examples = examples.len(), "incremental retrain");
        self.fit(examples, &format!("episode:{episode}"))
    }

    fn fit(
        &mut self,
        examples: TrainingSet,
        salt: &str,
    ) -> std::result::Result<Option<FitReport>, ScorerError> {
        let (mut train, mut val) = if self.data.val.is_empty() {
            split_validation(
                examples,
                self.config.val_size,
                self.config.val_split_type,
                stable_hash64(self.config.seed, &format!("val:{salt}")),
            )
        } else {
            (examples, self.data.val_examples())
        };
        if train.is_empty() {
            train = std::mem::take(&mut val);
        }
        let req = FitRequest {
            hp: &self.hp,
            patience: self.config.early_stopping_patience,
            min_delta: self.config.early_stopping_min_delta,
            deadline: self
                .config
                .retrain_timeout_secs
                .map(|s| Instant::now() + Duration::from_secs(s)),
        };
        let report = fit_with_validation(&mut self.scorer, &train, &val, &req)?;
        tracing::info!(
            epochs = report.epochs_run,
            train_loss = report.train_loss,
            val_loss = report.best_val_loss,
            stopped_early = report.stopped_early,
            "fit finished"
        );
        Ok(Some(report))
    }

    fn capture(&self, episode: Option<usize>, fit: &Option<FitReport>) -> Checkpoint {
        Checkpoint::capture(
            self.signature.clone(),
            episode,
            fit.as_ref().and_then(|f| f.best_val_loss),
            self.log.len(),
            self.scorer.snapshot(),
            self.policy.lock().snapshot(),
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::testing::ScriptedScorer;
    use banditsim_bandits::PolicyKind;
    use banditsim_core::{Candidate, Context};
    use serde_json::{json, Value};
    use std::collections::BTreeMap;

    fn record(i: usize) -> InteractionRecord {
        InteractionRecord {
            context: Context::new(vec![1.0]),
            candidates: vec![
                Candidate::new("a", vec![0.1]),
                Candidate::new("b", vec![0.9]),
                Candidate::new("c", vec![0.5]),
            ],
            clicked: Some(if i % 2 == 0 { "b" } else { "a" }.to_string()),
            rewards: None,
        }
    }

    fn stream(n: usize) -> Vec<InteractionRecord> {
        (0..n).map(record).collect()
    }

    fn config(kind: PolicyKind, params: Value) -> SimulationConfig {
        SimulationConfig {
            epochs: 1,
            obs_batch_size: 3,
            num_episodes: 3,
            bandit_policy: kind,
            bandit_policy_params: params,
            ..SimulationConfig::default()
        }
    }

    fn simulator(
        cfg: SimulationConfig,
        data: PreparedData,
        scorer: ScriptedScorer,
    ) -> Simulator<ScriptedScorer> {
        Simulator::with_arena(cfg, data, scorer, &PolicyArena::new()).unwrap()
    }

    #[test]
    fn log_length_is_the_sum_of_processed_observations() {
        let mut train = stream(10);
        // no ground truth at all
        train[3].clicked = None;
        // explicit rewards that miss the chosen item
        let mut rewards = BTreeMap::new();
        rewards.insert("a".to_string(), 1.0);
        train[5].rewards = Some(rewards);
        // nothing to choose from
        train[7].candidates.clear();

        let cfg = config(PolicyKind::Fixed, json!({"arg": 1}));
        let mut sim = simulator(cfg, PreparedData::new(train, vec![], vec![]), ScriptedScorer::default());
        let reports = sim.run().unwrap().to_vec();

        assert_eq!(reports.len(), 3);
        let processed: usize = reports.iter().map(|r| r.processed).sum();
        assert_eq!(sim.log().len(), processed);
        for r in &reports {
            assert_eq!(r.processed, 7);
            assert_eq!(r.skipped.reward_unavailable, 2);
            assert_eq!(r.skipped.policy_error, 1);
        }
        assert_eq!(sim.state(), SimState::Done);
        assert!(sim.log().iter().all(|o| o.action() == 1));
    }

    #[test]
    fn full_refit_retrains_on_the_whole_log_at_episode_boundaries() {
        let data = PreparedData::new(stream(10), stream(2), vec![]);
        let cfg = SimulationConfig {
            full_refit: true,
            ..config(PolicyKind::Model, Value::Null)
        };
        let mut sim = simulator(cfg, data, ScriptedScorer::default());
        sim.run().unwrap();
        assert_eq!(sim.scorer().fit_sizes, vec![10, 20, 30]);
        assert_eq!(sim.scorer().reinitialized, 3);
    }

    #[test]
    fn incremental_retrain_uses_only_new_observations() {
        let data = PreparedData::new(stream(10), stream(2), vec![]);
        let cfg = config(PolicyKind::Model, Value::Null);
        let mut sim = simulator(cfg, data, ScriptedScorer::default());
        sim.run().unwrap();
        assert_eq!(sim.scorer().fit_sizes, vec![10, 10, 10]);
        assert_eq!(sim.scorer().reinitialized, 0);
        assert_eq!(sim.checkpoint().episode, Some(2));
        assert_eq!(sim.checkpoint().log_len, 30);
    }

    #[test]
    fn validation_is_carved_when_no_split_is_given() {
        let data = PreparedData::new(stream(10), vec![], vec![]);
        let cfg = SimulationConfig {
            num_episodes: 1,
            ..config(PolicyKind::Model, Value::Null)
        };
        let mut sim = simulator(cfg, data, ScriptedScorer::default());
        let reports = sim.run().unwrap();
        let fit = reports[0].fit.as_ref().unwrap();
        assert_eq!(fit.examples, 8);
        assert_eq!(fit.val_examples, 2);
    }

    #[test]
    fn divergence_aborts_and_keeps_the_last_checkpoint() {
        let data = PreparedData::new(stream(10), vec![], vec![]);
        let cfg = config(PolicyKind::Random, Value::Null);
        let mut sim = simulator(cfg, data, ScriptedScorer::diverging_at(0));
        let err = sim.run().unwrap_err();
        match err {
            SimError::EpisodeAborted {
                episode,
                log_len,
                source: ScorerError::Divergence(_),
            } => {
                assert_eq!(episode, 0);
                assert_eq!(log_len, 10);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(sim.state(), SimState::Aborted { episode: 0 });
        assert_eq!(sim.checkpoint().episode, None);
        assert_eq!(sim.log().len(), 10);
        assert!(matches!(sim.run(), Err(SimError::Finished)));
    }

    #[test]
    fn failed_warm_start_ends_the_run_before_any_episode() {
        let data = PreparedData::new(stream(10), vec![], vec![]);
        let cfg = SimulationConfig {
            warm_start: true,
            ..config(PolicyKind::Random, Value::Null)
        };
        let mut sim = simulator(cfg, data, ScriptedScorer::diverging_at(0));
        assert!(matches!(
            sim.run(),
            Err(SimError::Scorer(ScorerError::Divergence(_)))
        ));
        assert_eq!(sim.state(), SimState::WarmStartFailed);
        assert!(sim.log().is_empty());
        assert!(sim.reports().is_empty());
        assert_eq!(sim.checkpoint().episode, None);
        assert!(matches!(sim.run(), Err(SimError::Finished)));
    }

    #[test]
    fn retrain_timeout_is_fatal() {
        let data = PreparedData::new(stream(6), stream(2), vec![]);
        let cfg = SimulationConfig {
            epochs: 5,
            retrain_timeout_secs: Some(0),
            ..config(PolicyKind::Model, Value::Null)
        };
        let mut sim = simulator(cfg, data, ScriptedScorer::default());
        assert!(matches!(
            sim.run(),
            Err(SimError::EpisodeAborted {
                source: ScorerError::Timeout { epochs: 1 },
                ..
            })
        ));
        assert_eq!(sim.scorer().epochs_trained(), 0);
    }

    #[test]
    fn same_seed_same_log() {
        let run = || {
            let data = PreparedData::new(stream(20), vec![], vec![]);
            let cfg = config(PolicyKind::EpsilonGreedy, json!({"epsilon": 0.5}));
            let mut sim = simulator(cfg, data, ScriptedScorer::default());
            sim.run().unwrap();
            sim.log().iter().map(Observation::action).collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn logged_propensities_replay_against_the_policy() {
        let data = PreparedData::new(stream(20), vec![], vec![]);
        let cfg = config(PolicyKind::SoftmaxExplorer, json!({"logit_multiplier": 4.0}));
        let mut sim = simulator(cfg, data, ScriptedScorer::default());
        sim.run().unwrap();
        let policy = sim.policy().lock();
        for obs in sim.log() {
            let scores = sim.scorer().predict(obs.context(), obs.candidates());
            let input = DecisionInput::new(obs.context(), obs.candidates()).with_scores(&scores);
            let probs = policy.action_probabilities(&input).unwrap();
            assert!((probs[obs.action()] - obs.propensity()).abs() < 1e-12);
        }
    }

    #[test]
    fn stateful_policy_sees_every_logged_observation() {
        let data = PreparedData::new(stream(12), vec![], vec![]);
        let cfg = config(PolicyKind::ExploreThenExploit, json!({"explore_rounds": 5}));
        let mut sim = simulator(cfg, data, ScriptedScorer::default());
        sim.run().unwrap();
        let round = sim.policy().lock().snapshot()["round"].as_u64().unwrap();
        assert_eq!(round, 36);
        assert_eq!(sim.log().len(), 36);
        // no decay_rate: greedy once the five exploration rounds are spent
        for obs in sim.log().iter().skip(5) {
            assert!((obs.propensity() - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn mismatched_policy_instance_is_rejected() {
        let arena = PolicyArena::new();
        let other = arena
            .get_or_create(&banditsim_bandits::PolicySpec::new(PolicyKind::Random, Value::Null))
            .unwrap();
        let cfg = config(PolicyKind::Fixed, json!({"arg": 0}));
        assert!(matches!(
            Simulator::new(cfg, PreparedData::default(), ScriptedScorer::default(), other),
            Err(SimError::Config(_))
        ));
    }
}
