use std::sync::atomic::{AtomicUsize, Ordering};

use lifeverse::simulation::{CollapseAssessment, Hedge, ImpulseSchedule, PathPropagator, StateSnapshot};
use lifeverse::{
    run_multiverse, run_multiverse_laned, BranchId, GoalWeights, Impulse, InfluenceMatrix, MetricDelta,
    MetricId, MetricVector, Mulberry32, MultiverseConfig, NoHooks, ReferenceScoring, ShockMode, SimulationHooks,
    StabilityMatrix, StateScoring, Toggles,
};

fn influence() -> InfluenceMatrix {
    InfluenceMatrix::zeros()
        .with_edge(MetricId::SleepHours, MetricId::Energy, 0.6)
        .with_edge(MetricId::Energy, MetricId::Focus, 0.5)
        .with_edge(MetricId::Stress, MetricId::Mood, -0.4)
        .with_edge(MetricId::Focus, MetricId::Productivity, 0.7)
}

fn noisy_config() -> MultiverseConfig {
    MultiverseConfig::new(MetricVector::default().with(MetricId::Stress, 6.0), influence())
        .runs(600)
        .horizon_days(10)
        .seed(1234)
        .shock_mode(ShockMode::BlackSwan)
        .stability(StabilityMatrix::uniform(0.3))
        .forecast_residuals(vec![-1.2, -0.4, 0.0, 0.3, 0.9, 1.6])
        .goal_weights(GoalWeights::new().with(MetricId::Focus, 1.0).with(MetricId::Health, 0.5))
        .impulse(Impulse::new(0, MetricId::SleepHours, 1.0))
        .impulse(Impulse::new(3, MetricId::Stress, -1.0))
}

fn quiet_config() -> MultiverseConfig {
    MultiverseConfig::new(MetricVector::default(), influence())
        .runs(1000)
        .horizon_days(7)
        .shock_mode(ShockMode::Off)
        .toggles(Toggles::none())
        .impulse(Impulse::new(0, MetricId::Energy, 2.0))
}

#[test]
fn identical_config_yields_identical_result() {
    let config = noisy_config();
    let a = run_multiverse(&config, &ReferenceScoring, &NoHooks).unwrap();
    let b = run_multiverse(&config, &ReferenceScoring, &NoHooks).unwrap();
    assert_eq!(a, b);
    assert_eq!(a.run_id, b.run_id);

    let other = run_multiverse(&config.clone().seed(99), &ReferenceScoring, &NoHooks).unwrap();
    assert_ne!(a.run_id, other.run_id);
    assert_ne!(a.distributions.terminal_index, other.distributions.terminal_index);
}

#[test]
fn quiet_batch_replays_one_deterministic_path() {
    let result = run_multiverse(&quiet_config(), &ReferenceScoring, &NoHooks).unwrap();
    assert_eq!(result.audit.runs_completed, 1000);

    let first = &result.sample_paths[0];
    assert_eq!(first.len(), 7);
    for path in result.sample_paths.iter().chain(&result.explorer.best).chain(&result.explorer.worst) {
        assert_eq!(path, first);
    }
    let terminal = result.distributions.terminal_index[0];
    assert!(result.distributions.terminal_index.iter().all(|t| *t == terminal));

    let band = &result.quantiles.index;
    assert_eq!(band.p10, band.p90);
    assert_eq!(band.p10, band.p50);
    let collapse = &result.quantiles.p_collapse;
    assert_eq!(collapse.p10, collapse.p90);
    assert_eq!(collapse.p10, collapse.p50);

    let occupied: Vec<_> = result.branches.iter().filter(|b| b.paths > 0).collect();
    assert_eq!(occupied.len(), 1);
    assert_eq!(occupied[0].probability, 1.0);
}

#[test]
fn quiet_batch_points_match_on_every_path() {
    let config = quiet_config();
    let schedule = ImpulseSchedule::new(&config.impulses);
    let mut rng = Mulberry32::new(config.seed);
    let paths: Vec<_> = (0..config.runs)
        .map(|_| PathPropagator::new(&config, &ReferenceScoring, &schedule, &mut rng).run(&mut rng))
        .collect();

    let first = &paths[0];
    assert_eq!(first.len(), config.horizon_days);
    for (run, path) in paths.iter().enumerate() {
        for (a, b) in path.iter().zip(first) {
            assert_eq!(a.index, b.index, "run {run} day {}", a.day);
            assert_eq!(a.p_collapse, b.p_collapse, "run {run} day {}", a.day);
            assert_eq!(a.regime, b.regime, "run {run} day {}", a.day);
            assert_eq!(a.risk, b.risk, "run {run} day {}", a.day);
        }
        assert_eq!(path, first);
    }
    assert!(first.iter().all(|p| p.regime == config.base_regime));

    // The batch result was built from exactly these paths.
    let result = run_multiverse(&config, &ReferenceScoring, &NoHooks).unwrap();
    assert_eq!(&result.sample_paths[0], first);
}

#[test]
fn quantile_bands_are_monotonic() {
    let result = run_multiverse(&noisy_config(), &ReferenceScoring, &NoHooks).unwrap();
    let q = &result.quantiles;
    assert_eq!(q.days, (1..=10).collect::<Vec<_>>());
    assert!(q.index.is_monotonic());
    assert!(q.p_collapse.is_monotonic());
    assert!(q.goal_score.as_ref().unwrap().is_monotonic());
    assert_eq!(q.index.p50.len(), 10);
}

#[test]
fn branches_partition_every_path() {
    let result = run_multiverse(&noisy_config(), &ReferenceScoring, &NoHooks).unwrap();
    let ids: Vec<BranchId> = result.branches.iter().map(|b| b.id).collect();
    assert_eq!(ids, vec![BranchId::Gold, BranchId::Grey, BranchId::Abyss]);

    let counted: usize = result.branches.iter().map(|b| b.paths).sum();
    assert_eq!(counted, 600);
    let total: f64 = result.branches.iter().map(|b| b.probability).sum();
    assert!((total - 1.0).abs() < 1e-9);

    for branch in &result.branches {
        assert!(branch.drivers.len() <= 3);
        assert!(branch.tail_risk_chip.starts_with("RED "));
        if branch.paths > 0 {
            assert_eq!(branch.expected_index.len(), 10);
            assert!(branch.goal_score_end.is_some());
        }
    }
}

#[test]
fn shock_off_suppresses_forecast_noise() {
    let mut with_noise = Toggles::all();
    with_noise.stochastic_regime = false;
    let mut without_noise = with_noise;
    without_noise.forecast_noise = false;

    let base = noisy_config().shock_mode(ShockMode::Off);
    let a = run_multiverse(&base.clone().toggles(with_noise), &ReferenceScoring, &NoHooks).unwrap();
    let b = run_multiverse(&base.toggles(without_noise), &ReferenceScoring, &NoHooks).unwrap();

    assert_eq!(a.quantiles, b.quantiles);
    assert_eq!(a.distributions, b.distributions);
    assert_eq!(a.sample_paths, b.sample_paths);
}

#[test]
fn tail_summary_and_worst_path_are_consistent() {
    let result = run_multiverse(&noisy_config(), &ReferenceScoring, &NoHooks).unwrap();
    let tail = &result.tail;
    assert!(tail.var_97_5 >= 0.0);
    assert!(tail.es_97_5 >= tail.var_97_5);
    assert!((0.0..=1.0).contains(&tail.p_below_floor));
    assert!((0.0..=1.0).contains(&tail.red_share));

    let worst = result.representative_worst.as_ref().unwrap();
    let worst_terminal = worst.last().unwrap().index;
    assert!(tail.worst_terminal_index <= worst_terminal);
    let below = result
        .distributions
        .terminal_index
        .iter()
        .filter(|t| **t < worst_terminal)
        .count();
    assert!(below <= 600 / 20);
    assert_eq!(result.sample_paths.len(), 3);
    assert_eq!(&result.sample_paths[2], worst);
}

#[test]
fn regime_snapshots_cover_checkpoints() {
    let result = run_multiverse(&noisy_config(), &ReferenceScoring, &NoHooks).unwrap();
    let days: Vec<usize> = result.regime_snapshots.iter().map(|s| s.day).collect();
    assert_eq!(days, vec![1, 3, 10]);
    for snapshot in &result.regime_snapshots {
        let sum: f64 = snapshot.shares.values().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }
}

#[test]
fn hedges_and_levers_align() {
    let result = run_multiverse(&noisy_config(), &ReferenceScoring, &NoHooks).unwrap();
    assert!(!result.hedges.is_empty());
    assert_eq!(result.hedges.len(), result.levers.len());
    for (hedge, lever) in result.hedges.iter().zip(&result.levers) {
        assert_eq!(hedge.metric, lever.metric);
        assert_eq!(hedge.delta, lever.delta);
        assert!(!hedge.note.is_empty());
    }
}

struct StopAfter {
    limit: usize,
    polls: AtomicUsize,
}

impl SimulationHooks for StopAfter {
    fn should_cancel(&self) -> bool {
        self.polls.fetch_add(1, Ordering::SeqCst) >= self.limit
    }
}

#[test]
fn cancellation_mid_batch_returns_valid_partial_result() {
    let hooks = StopAfter {
        limit: 37,
        polls: AtomicUsize::new(0),
    };
    let result = run_multiverse(&noisy_config(), &ReferenceScoring, &hooks).unwrap();
    assert!(result.is_partial());
    assert_eq!(result.audit.runs_completed, 37);
    assert_eq!(result.audit.runs_requested, 600);
    assert_eq!(result.distributions.terminal_index.len(), 37);
    assert!(result.quantiles.index.is_monotonic());

    // The completed prefix matches an uncancelled batch of the same length.
    let prefix = run_multiverse(&noisy_config().runs(37), &ReferenceScoring, &NoHooks).unwrap();
    assert_eq!(prefix.distributions, result.distributions);
}

#[test]
fn laned_batches_are_reproducible_per_lane_count() {
    let config = noisy_config();
    let a = run_multiverse_laned(&config, &ReferenceScoring, &NoHooks, 4).unwrap();
    let b = run_multiverse_laned(&config, &ReferenceScoring, &NoHooks, 4).unwrap();
    assert_eq!(a, b);
    assert_eq!(a.audit.lanes, 4);
    assert_eq!(a.distributions.terminal_index.len(), 600);

    // More lanes than runs collapses to one lane per run.
    let tiny = run_multiverse_laned(&config.clone().runs(3), &ReferenceScoring, &NoHooks, 8).unwrap();
    assert_eq!(tiny.audit.lanes, 3);
    assert_eq!(tiny.audit.runs_completed, 3);
}

/// Scoring that ignores the matrix and pins every score.
struct FlatScoring;

impl StateScoring for FlatScoring {
    fn propagate(&self, vector: &MetricVector, impulses: &MetricDelta, _matrix: &InfluenceMatrix) -> MetricVector {
        let mut next = *vector;
        for (metric, delta) in impulses.iter() {
            next.nudge(metric, delta);
        }
        next
    }

    fn index_of(&self, _vector: &MetricVector) -> f64 {
        8.0
    }

    fn assess_collapse(&self, _snapshot: &StateSnapshot, _vector: &MetricVector) -> CollapseAssessment {
        CollapseAssessment { p_collapse: 0.05 }
    }

    fn rank_hedges(&self, _: &MetricVector, _: &InfluenceMatrix, _: f64, _: f64) -> Vec<Hedge> {
        Vec::new()
    }

    fn goal_score(&self, _vector: &MetricVector, _weights: Option<&GoalWeights>) -> Option<f64> {
        None
    }

    fn name(&self) -> &'static str {
        "flat"
    }
}

#[test]
fn custom_scoring_collaborator_drives_the_batch() {
    let config = quiet_config().runs(50);
    let result = run_multiverse(&config, &FlatScoring, &NoHooks).unwrap();
    assert_eq!(result.audit.scoring, "flat");
    assert_eq!(result.branch(BranchId::Gold).unwrap().probability, 1.0);
    assert!(result.hedges.is_empty());
    assert!(result.quantiles.goal_score.is_none());
}

#[test]
fn result_serializes_with_snake_case_labels() {
    let result = run_multiverse(&noisy_config().runs(20), &ReferenceScoring, &NoHooks).unwrap();
    let json = serde_json::to_value(&result).unwrap();
    assert!(json.get("run_id").is_some());
    assert_eq!(json["branches"][0]["id"], "gold");
    assert_eq!(json["audit"]["weights_source"], "manual");
}

#[test]
fn malformed_config_is_rejected_before_running() {
    let err = run_multiverse(&noisy_config().horizon_days(0), &ReferenceScoring, &NoHooks).unwrap_err();
    assert!(err.is_validation());
    let err = run_multiverse(&noisy_config().index_floor(f64::INFINITY), &ReferenceScoring, &NoHooks).unwrap_err();
    assert!(err.is_validation());
}
