//! Batch aggregation: quantiles, branches, tails and path subsets.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use crate::influence::round4;

use super::config::{MultiverseConfig, ShockMode};
use super::regime::{collapse_offset, RegimeId};
use super::result::{
    ActionLever, Audit, BranchId, BranchSummary, Distributions, MultiverseRunResult, Path, PathPoint,
    QuantileBand, Quantiles, RegimeSnapshot, RiskLevel, RunId, TailSummary, TrajectoryExplorer,
};
use super::scoring::{Hedge, StateScoring, StateSnapshot};

/// Paths kept per explorer subset.
pub const EXPLORER_SIZE: usize = 5;
/// Percentile of terminal index used for the representative worst path.
pub const WORST_PERCENTILE: f64 = 0.05;
/// Confidence level of the tail loss statistics.
pub const TAIL_CONFIDENCE: f64 = 0.975;

const MAX_DRIVERS: usize = 3;

/// How a batch of paths came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BatchOutcome {
    pub runs_requested: usize,
    pub cancelled: bool,
    pub lanes: usize,
}

/// Linear-interpolated quantile of unsorted values; `None` when empty.
#[must_use]
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    Some(quantile_sorted(&sorted, q))
}

fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    let pos = (sorted.len() - 1) as f64 * q.clamp(0.0, 1.0);
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

fn band(paths: &[Path], horizon: usize, fallback: f64, value: impl Fn(&PathPoint) -> f64) -> QuantileBand {
    let mut out = QuantileBand::default();
    for day in 0..horizon {
        let mut values: Vec<f64> = paths.iter().filter_map(|p| p.get(day)).map(&value).collect();
        if values.is_empty() {
            values.push(fallback);
        }
        values.sort_by(f64::total_cmp);
        out.p10.push(round4(quantile_sorted(&values, 0.1)));
        out.p50.push(round4(quantile_sorted(&values, 0.5)));
        out.p90.push(round4(quantile_sorted(&values, 0.9)));
    }
    out
}

fn terminal(path: &Path) -> Option<&PathPoint> {
    path.last()
}

fn terminal_index(path: &Path) -> f64 {
    terminal(path).map_or(0.0, |p| p.index)
}

fn terminal_p_collapse(path: &Path) -> f64 {
    terminal(path).map_or(0.0, |p| p.p_collapse)
}

fn ever_red(path: &Path) -> bool {
    path.iter().any(|p| p.risk == RiskLevel::Red)
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

fn per_day_mean(paths: &[&Path], horizon: usize, value: impl Fn(&PathPoint) -> f64) -> Vec<f64> {
    if paths.is_empty() {
        return Vec::new();
    }
    (0..horizon)
        .map(|day| round4(mean(paths.iter().filter_map(|p| p.get(day)).map(&value)).unwrap_or(0.0)))
        .collect()
}

/// Up to three short explanations: branch hint, largest impulses, then setup.
fn narrative_drivers(branch: BranchId, config: &MultiverseConfig) -> Vec<String> {
    let mut drivers = vec![match branch {
        BranchId::Gold => "Low collapse probability holds through the horizon".to_string(),
        BranchId::Grey => "Growth and risk stay in balance".to_string(),
        BranchId::Abyss => "Collapse risk dominates the horizon".to_string(),
    }];

    let mut impulses = config.impulses.clone();
    impulses.sort_by(|a, b| b.delta.abs().total_cmp(&a.delta.abs()));
    for impulse in impulses.iter().filter(|i| i.delta != 0.0) {
        if drivers.len() >= MAX_DRIVERS {
            break;
        }
        drivers.push(format!(
            "Lever {} {:+} on day {}",
            impulse.metric.spec().label,
            impulse.delta,
            impulse.day
        ));
    }

    let setup = [
        match config.shock_mode {
            ShockMode::Off => "Shocks disabled".to_string(),
            ShockMode::Normal => "Normal shock profile".to_string(),
            ShockMode::BlackSwan => "Black-swan shock profile".to_string(),
        },
        format!("Weights source: {}", config.weights_source),
    ];
    for line in setup {
        if drivers.len() >= MAX_DRIVERS {
            break;
        }
        drivers.push(line);
    }
    drivers
}

fn branches(
    paths: &[Path],
    config: &MultiverseConfig,
    base_goal: Option<f64>,
    with_goal: bool,
) -> Vec<BranchSummary> {
    let total = paths.len();
    let horizon = config.horizon_days;
    let mut grouped: BTreeMap<BranchId, Vec<&Path>> = BTreeMap::new();
    for path in paths {
        if let Some(end) = terminal(path) {
            grouped.entry(BranchId::classify(end.index, end.p_collapse)).or_default().push(path);
        }
    }

    BranchId::ALL
        .into_iter()
        .map(|id| {
            let members = grouped.remove(&id).unwrap_or_default();
            let n = members.len();
            let red = members.iter().filter(|p| ever_red(p)).count();
            let red_tail_pct = if n == 0 { 0.0 } else { red as f64 / n as f64 * 100.0 };
            let goal_score_end = if with_goal {
                mean(
                    members
                        .iter()
                        .filter_map(|p| terminal(p))
                        .map(|p| p.goal_score.unwrap_or(0.0)),
                )
                .map(round4)
            } else {
                None
            };
            let goal_score_delta = match (goal_score_end, base_goal) {
                (Some(end), Some(base)) => Some(round4(end - base)),
                _ => None,
            };

            BranchSummary {
                id,
                label: id.label().to_string(),
                probability: if total == 0 { 0.0 } else { n as f64 / total as f64 },
                paths: n,
                expected_index: per_day_mean(&members, horizon, |p| p.index),
                expected_p_collapse: per_day_mean(&members, horizon, |p| p.p_collapse),
                goal_score_end,
                goal_score_delta,
                red_tail_pct: round4(red_tail_pct),
                tail_risk_chip: format!("RED {red_tail_pct:.1}%"),
                drivers: narrative_drivers(id, config),
            }
        })
        .collect()
}

fn tail_summary(paths: &[Path], base_index: f64, index_floor: f64) -> TailSummary {
    if paths.is_empty() {
        return TailSummary {
            worst_terminal_index: base_index,
            ..TailSummary::default()
        };
    }
    let n = paths.len() as f64;
    let denom = base_index.max(1e-6);
    let mut losses: Vec<f64> = paths
        .iter()
        .map(|p| ((base_index - terminal_index(p)) / denom).max(0.0))
        .collect();
    losses.sort_by(f64::total_cmp);
    let var = quantile_sorted(&losses, TAIL_CONFIDENCE);
    let es = mean(losses.iter().copied().filter(|l| *l >= var)).unwrap_or(var);

    let below = paths.iter().filter(|p| terminal_index(p) < index_floor).count();
    let red = paths.iter().filter(|p| ever_red(p)).count();
    let worst = paths.iter().map(terminal_index).fold(f64::INFINITY, f64::min);

    TailSummary {
        var_97_5: round4(var),
        es_97_5: round4(es),
        p_below_floor: round4(below as f64 / n),
        red_share: round4(red as f64 / n),
        worst_terminal_index: worst,
    }
}

fn representative_worst(paths: &[Path]) -> Option<Path> {
    if paths.is_empty() {
        return None;
    }
    let mut order: Vec<&Path> = paths.iter().collect();
    order.sort_by(|a, b| terminal_index(a).total_cmp(&terminal_index(b)));
    let pick = ((order.len() as f64 * WORST_PERCENTILE).floor() as usize).min(order.len() - 1);
    Some(order[pick].clone())
}

fn top_paths(paths: &[Path], mut cmp: impl FnMut(&Path, &Path) -> Ordering) -> Vec<Path> {
    let mut order: Vec<&Path> = paths.iter().collect();
    order.sort_by(|a, b| cmp(a, b));
    order.into_iter().take(EXPLORER_SIZE).cloned().collect()
}

fn explorer(paths: &[Path]) -> TrajectoryExplorer {
    let terminals: Vec<f64> = paths.iter().map(terminal_index).collect();
    let Some(median) = quantile(&terminals, 0.5) else {
        return TrajectoryExplorer::default();
    };
    let distance = |p: &Path| (terminal_index(p) - median).abs();

    TrajectoryExplorer {
        probable: top_paths(paths, |a, b| distance(a).total_cmp(&distance(b))),
        best: top_paths(paths, |a, b| terminal_index(b).total_cmp(&terminal_index(a))),
        worst: top_paths(paths, |a, b| {
            terminal_p_collapse(b)
                .total_cmp(&terminal_p_collapse(a))
                .then_with(|| terminal_index(a).total_cmp(&terminal_index(b)))
        }),
    }
}

/// Checkpoint days: 1, min(3, horizon) and horizon, de-duplicated.
fn checkpoint_days(horizon: usize) -> Vec<usize> {
    [1, horizon.min(3), horizon].into_iter().collect::<BTreeSet<_>>().into_iter().collect()
}

fn regime_snapshots(paths: &[Path], config: &MultiverseConfig) -> Vec<RegimeSnapshot> {
    let regimes = config.transition_matrix.regimes();
    checkpoint_days(config.horizon_days)
        .into_iter()
        .map(|day| {
            let mut counts: BTreeMap<RegimeId, usize> = (0..regimes)
                .filter_map(|r| RegimeId::try_from(r).ok())
                .map(|r| (r, 0))
                .collect();
            let mut seen = 0usize;
            for path in paths {
                if let Some(point) = path.get(day - 1) {
                    *counts.entry(point.regime).or_insert(0) += 1;
                    seen += 1;
                }
            }
            let shares = if seen == 0 {
                counts
                    .into_keys()
                    .map(|r| (r, if r == config.base_regime { 1.0 } else { 0.0 }))
                    .collect()
            } else {
                counts
                    .into_iter()
                    .map(|(r, c)| (r, c as f64 / seen as f64))
                    .collect()
            };
            RegimeSnapshot { day, shares }
        })
        .collect()
}

fn levers(hedges: &[Hedge], config: &MultiverseConfig) -> Vec<ActionLever> {
    hedges
        .iter()
        .map(|h| ActionLever {
            metric: h.metric,
            delta: h.delta,
            label: format!("{} {:+}", h.metric.spec().label, h.delta),
            expected_index: round4(h.expected_index),
            expected_p_collapse: round4(h.expected_p_collapse),
            meets_constraints: h.expected_index >= config.index_floor
                && h.expected_p_collapse * 100.0 <= config.collapse_constraint_pct,
        })
        .collect()
}

/// Build the batch result from completed paths.
pub(crate) fn aggregate<S: StateScoring + ?Sized>(
    config: &MultiverseConfig,
    scoring: &S,
    paths: Vec<Path>,
    outcome: BatchOutcome,
) -> MultiverseRunResult {
    let horizon = config.horizon_days;
    let base = config.base_vector;
    let base_index_raw = scoring.index_of(&base);
    let base_p_raw = scoring
        .assess_collapse(&StateSnapshot::baseline(base_index_raw, config.base_regime), &base)
        .p_collapse;
    let base_index = round4(base_index_raw);
    let base_p_collapse = round4((base_p_raw + collapse_offset(config.base_regime)).clamp(0.0, 1.0));
    let base_goal_score = scoring.goal_score(&base, config.goal_weights.as_ref());
    let with_goal = config.goal_weights.is_some();

    let quantiles = Quantiles {
        days: (1..=horizon).collect(),
        index: band(&paths, horizon, base_index, |p| p.index),
        p_collapse: band(&paths, horizon, base_p_collapse, |p| p.p_collapse),
        goal_score: with_goal.then(|| {
            band(&paths, horizon, base_goal_score.unwrap_or(0.0), |p| p.goal_score.unwrap_or(0.0))
        }),
    };

    let representative_worst = representative_worst(&paths);
    let sample_paths = match (paths.first(), paths.get(paths.len() / 2), &representative_worst) {
        (Some(first), Some(middle), Some(worst)) => vec![first.clone(), middle.clone(), worst.clone()],
        _ => Vec::new(),
    };

    let hedges = scoring.rank_hedges(&base, &config.matrix, config.index_floor, config.collapse_constraint_pct);
    let levers = levers(&hedges, config);
    let fingerprint = config.fingerprint();

    MultiverseRunResult {
        run_id: RunId::from_fingerprint(&fingerprint),
        fingerprint,
        seed: config.seed,
        horizon_days: horizon,
        base_index,
        base_p_collapse,
        base_goal_score,
        tail: tail_summary(&paths, base_index, config.index_floor),
        branches: branches(&paths, config, base_goal_score, with_goal),
        regime_snapshots: regime_snapshots(&paths, config),
        explorer: explorer(&paths),
        distributions: Distributions {
            terminal_index: paths.iter().map(terminal_index).collect(),
            terminal_goal_score: with_goal.then(|| {
                paths
                    .iter()
                    .map(|p| terminal(p).and_then(|t| t.goal_score).unwrap_or(0.0))
                    .collect()
            }),
        },
        quantiles,
        representative_worst,
        sample_paths,
        hedges,
        levers,
        audit: Audit {
            weights_source: config.weights_source,
            mix: config.mix,
            runs_requested: outcome.runs_requested,
            runs_completed: paths.len(),
            cancelled: outcome.cancelled,
            lanes: outcome.lanes,
            scoring: scoring.name().to_string(),
        },
    }
}
