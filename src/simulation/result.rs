//! Simulation output types.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::influence::WeightsSource;
use crate::metric::MetricId;

use super::regime::RegimeId;
use super::scoring::Hedge;

/// Collapse probability above which a day is red.
pub const RED_THRESHOLD: f64 = 0.35;
/// Collapse probability at or above which a day is amber.
pub const AMBER_THRESHOLD: f64 = 0.20;

/// Namespace for deterministic run identifiers.
const RUN_NAMESPACE: Uuid = Uuid::from_u128(0x6c69_6665_7665_7273_652e_7275_6e2e_6964);

/// Deterministic identifier of a simulation batch.
///
/// Derived from the configuration fingerprint, so identical configurations
/// share an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(Uuid);

impl RunId {
    /// Derive the id for a configuration fingerprint.
    #[must_use]
    pub fn from_fingerprint(fingerprint: &str) -> Self {
        Self(Uuid::new_v5(&RUN_NAMESPACE, fingerprint.as_bytes()))
    }

    /// Underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Traffic-light level derived from collapse probability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    /// Collapse probability below 0.2.
    Green,
    /// Collapse probability from 0.2 to 0.35.
    Amber,
    /// Collapse probability above 0.35.
    Red,
}

impl RiskLevel {
    /// Red above 0.35, amber from 0.20, otherwise green.
    #[must_use]
    pub fn from_p_collapse(p: f64) -> Self {
        if p > RED_THRESHOLD {
            Self::Red
        } else if p >= AMBER_THRESHOLD {
            Self::Amber
        } else {
            Self::Green
        }
    }
}

/// One simulated day of one path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathPoint {
    /// 1-based simulated day.
    pub day: usize,
    /// Composite state index in [0, 10].
    pub index: f64,
    /// Collapse probability in [0, 1].
    pub p_collapse: f64,
    /// Traffic light for `p_collapse`.
    pub risk: RiskLevel,
    /// Goal score, when goal weights were supplied.
    pub goal_score: Option<f64>,
    /// Regime at the end of the day.
    pub regime: RegimeId,
}

/// One full trajectory, one point per horizon day.
pub type Path = Vec<PathPoint>;

/// Per-day p10/p50/p90 series.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuantileBand {
    /// 10th percentile.
    pub p10: Vec<f64>,
    /// Median.
    pub p50: Vec<f64>,
    /// 90th percentile.
    pub p90: Vec<f64>,
}

impl QuantileBand {
    /// Returns true if `p10 <= p50 <= p90` on every day.
    #[must_use]
    pub fn is_monotonic(&self) -> bool {
        self.p10
            .iter()
            .zip(&self.p50)
            .zip(&self.p90)
            .all(|((lo, mid), hi)| lo <= mid && mid <= hi)
    }
}

/// Quantile bands for every simulated day.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Quantiles {
    /// Day numbers the band entries refer to.
    pub days: Vec<usize>,
    /// Composite index band.
    pub index: QuantileBand,
    /// Collapse probability band.
    pub p_collapse: QuantileBand,
    /// Present only when goal weights were supplied.
    pub goal_score: Option<QuantileBand>,
}

/// Coarse outcome class of a terminal point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchId {
    /// High index, low collapse.
    Gold,
    /// Neither gold nor abyss.
    Grey,
    /// Low index or high collapse.
    Abyss,
}

impl BranchId {
    /// Branches in reporting order.
    pub const ALL: [BranchId; 3] = [Self::Gold, Self::Grey, Self::Abyss];

    /// Classify a terminal point.
    ///
    /// Gold needs index >= 7 and collapse < 0.2; abyss is index <= 5 or
    /// collapse >= 0.35; everything else is grey.
    #[must_use]
    pub fn classify(index: f64, p_collapse: f64) -> Self {
        if index >= 7.0 && p_collapse < 0.2 {
            Self::Gold
        } else if index <= 5.0 || p_collapse >= 0.35 {
            Self::Abyss
        } else {
            Self::Grey
        }
    }

    /// Display label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Gold => "Gold branch",
            Self::Grey => "Grey branch",
            Self::Abyss => "Abyss",
        }
    }
}

/// Aggregate view of the paths that ended in one branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchSummary {
    /// Which branch.
    pub id: BranchId,
    /// Display label.
    pub label: String,
    /// Fraction of all paths classified into this branch.
    pub probability: f64,
    /// Number of paths in the branch.
    pub paths: usize,
    /// Per-day mean index across this branch's paths.
    pub expected_index: Vec<f64>,
    /// Per-day mean collapse probability across this branch's paths.
    pub expected_p_collapse: Vec<f64>,
    /// Mean terminal goal score, when goal weights were supplied.
    pub goal_score_end: Option<f64>,
    /// `goal_score_end` minus the baseline goal score.
    pub goal_score_delta: Option<f64>,
    /// Percentage of branch paths that were red on at least one day.
    pub red_tail_pct: f64,
    /// Display chip, e.g. `RED 12.5%`.
    pub tail_risk_chip: String,
    /// Up to three narrative drivers.
    pub drivers: Vec<String>,
}

/// Tail statistics over terminal outcomes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TailSummary {
    /// 97.5% value-at-risk of the relative index loss.
    pub var_97_5: f64,
    /// Mean loss at or beyond `var_97_5`.
    pub es_97_5: f64,
    /// Probability that the terminal index ends below the index floor.
    pub p_below_floor: f64,
    /// Share of paths that were red on at least one day.
    pub red_share: f64,
    /// Lowest terminal index across all paths.
    pub worst_terminal_index: f64,
}

/// Exploratory subsets of paths.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryExplorer {
    /// Terminal index closest to the median.
    pub probable: Vec<Path>,
    /// Highest terminal index.
    pub best: Vec<Path>,
    /// Highest terminal collapse, ties broken by lowest terminal index.
    pub worst: Vec<Path>,
}

/// Regime occupancy at one checkpoint day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeSnapshot {
    /// Checkpoint day.
    pub day: usize,
    /// Share of paths per regime; sums to 1.
    pub shares: BTreeMap<RegimeId, f64>,
}

/// Hedge rendered for presentation, with its constraint check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionLever {
    /// Metric the hedge moves.
    pub metric: MetricId,
    /// Change applied to `metric`.
    pub delta: f64,
    /// Display label.
    pub label: String,
    /// Index after one hedged step.
    pub expected_index: f64,
    /// Collapse probability after one hedged step.
    pub expected_p_collapse: f64,
    /// True when the hedge keeps the index at or above the floor and
    /// collapse within the constraint.
    pub meets_constraints: bool,
}

/// Raw terminal distributions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Distributions {
    /// Terminal index per path, in path order.
    pub terminal_index: Vec<f64>,
    /// Terminal goal score per path, when goal weights were supplied.
    pub terminal_goal_score: Option<Vec<f64>>,
}

/// How the batch ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Audit {
    /// Provenance of the influence matrix.
    pub weights_source: WeightsSource,
    /// Learned share for mixed weights.
    pub mix: f64,
    /// Paths asked for.
    pub runs_requested: usize,
    /// Paths actually simulated.
    pub runs_completed: usize,
    /// True if cancellation cut the batch short.
    pub cancelled: bool,
    /// Independent RNG lanes used (1 for the sequential engine).
    pub lanes: usize,
    /// Name of the scoring collaborator.
    pub scoring: String,
}

/// Aggregate of every path simulated for one configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiverseRunResult {
    /// Deterministic id derived from `fingerprint`.
    pub run_id: RunId,
    /// blake3 hex digest of the canonical config.
    pub fingerprint: String,
    /// Seed the batch ran with.
    pub seed: u32,
    /// Simulated days per path.
    pub horizon_days: usize,
    /// Index of the day-0 vector.
    pub base_index: f64,
    /// Collapse probability of the day-0 vector.
    pub base_p_collapse: f64,
    /// Goal score of the day-0 vector.
    pub base_goal_score: Option<f64>,
    /// Per-day bands.
    pub quantiles: Quantiles,
    /// Loss tail over terminal outcomes.
    pub tail: TailSummary,
    /// Path at the 5th percentile of terminal index.
    pub representative_worst: Option<Path>,
    /// Gold, grey and abyss, in that order.
    pub branches: Vec<BranchSummary>,
    /// Regime shares at checkpoint days.
    pub regime_snapshots: Vec<RegimeSnapshot>,
    /// Probable, best and worst paths.
    pub explorer: TrajectoryExplorer,
    /// Raw terminal values.
    pub distributions: Distributions,
    /// First, middle and representative worst path.
    pub sample_paths: Vec<Path>,
    /// Ranked corrective actions from the baseline.
    pub hedges: Vec<Hedge>,
    /// `hedges` checked against the constraints.
    pub levers: Vec<ActionLever>,
    /// Run provenance.
    pub audit: Audit,
}

impl MultiverseRunResult {
    /// Summary of one branch.
    #[must_use]
    pub fn branch(&self, id: BranchId) -> Option<&BranchSummary> {
        self.branches.iter().find(|b| b.id == id)
    }

    /// Returns true if cancellation stopped the batch early.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        self.audit.cancelled
    }
}
