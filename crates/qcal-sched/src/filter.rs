//! Pair filter pipeline.
//!
//! The CR scheduler runs candidate pairs through an ordered list of
//! [`PairFilter`]s. The default pipeline is candidate membership, then
//! direction, then an optional quality gate, then MUX mapping; callers can
//! supply their own list through [`CrScheduler::generate_with_plugins`].
//!
//! [`CrScheduler::generate_with_plugins`]: crate::cr::CrScheduler::generate_with_plugins

use qcal_topo::{ConflictModel, Topology, canonical_qid};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::error::SchedResult;
use crate::metrics::QubitMetrics;
use crate::pair::CouplingPair;

/// How the direction of the scheduled pairs was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectionMethod {
    /// Taken from the topology's explicit direction table.
    Explicit,
    /// Inferred from checkerboard parity of grid coordinates.
    DesignBased,
    /// Lower measured frequency drives the higher one.
    Measured,
    /// No direction filter ran.
    Unfiltered,
}

impl std::fmt::Display for DirectionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DirectionMethod::Explicit => "explicit",
            DirectionMethod::DesignBased => "design_based",
            DirectionMethod::Measured => "measured",
            DirectionMethod::Unfiltered => "unfiltered",
        };
        write!(f, "{s}")
    }
}

/// Read-only inputs shared by every filter of one `generate` call.
#[derive(Debug, Clone, Copy)]
pub struct FilterContext<'a> {
    pub topology: &'a Topology,
    pub model: &'a ConflictModel,
    pub metrics: &'a QubitMetrics,
    /// Reverse every direction rule.
    pub inverse: bool,
}

/// One stage of the pair filter pipeline.
pub trait PairFilter: Send + Sync {
    /// Stage name reported in the filtering statistics.
    fn name(&self) -> &str;

    /// Keep the pairs that pass this stage, preserving order.
    fn apply(&self, pairs: Vec<CouplingPair>, ctx: &FilterContext<'_>) -> SchedResult<Vec<CouplingPair>>;

    /// The direction method this stage implements, if it is a direction filter.
    fn direction_method(&self, _ctx: &FilterContext<'_>) -> Option<DirectionMethod> {
        None
    }
}

/// Keeps pairs whose two qubits are both in the candidate set.
#[derive(Debug, Clone)]
pub struct CandidateQubitFilter {
    qids: FxHashSet<String>,
}

impl CandidateQubitFilter {
    pub fn new<I, S>(qids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            qids: qids.into_iter().map(|q| canonical_qid(q.as_ref())).collect(),
        }
    }
}

impl PairFilter for CandidateQubitFilter {
    fn name(&self) -> &str {
        "candidate_qubits"
    }

    fn apply(&self, pairs: Vec<CouplingPair>, _ctx: &FilterContext<'_>) -> SchedResult<Vec<CouplingPair>> {
        Ok(pairs
            .into_iter()
            .filter(|p| self.qids.contains(p.control()) && self.qids.contains(p.target()))
            .collect())
    }
}

/// Keeps pairs listed in the topology's direction table.
///
/// When the table lists both directions of a coupling only the first listed
/// one is allowed. With `inverse` the allowed directions are reversed.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExplicitDirectionFilter;

impl ExplicitDirectionFilter {
    fn allowed(ctx: &FilterContext<'_>) -> FxHashSet<CouplingPair> {
        let mut allowed = FxHashSet::default();
        for [control, target] in ctx.topology.direction_table().unwrap_or(&[]) {
            let pair = CouplingPair::new(control, target);
            let pair = if ctx.inverse { pair.reversed() } else { pair };
            if !allowed.contains(&pair.reversed()) {
                allowed.insert(pair);
            }
        }
        allowed
    }
}

impl PairFilter for ExplicitDirectionFilter {
    fn name(&self) -> &str {
        "explicit_direction"
    }

    fn apply(&self, pairs: Vec<CouplingPair>, ctx: &FilterContext<'_>) -> SchedResult<Vec<CouplingPair>> {
        let allowed = Self::allowed(ctx);
        Ok(pairs.into_iter().filter(|p| allowed.contains(p)).collect())
    }

    fn direction_method(&self, _ctx: &FilterContext<'_>) -> Option<DirectionMethod> {
        Some(DirectionMethod::Explicit)
    }
}

/// Checkerboard direction inference: the control sits on an even
/// `row + col` square and the target on an odd one.
#[derive(Debug, Clone, Copy, Default)]
pub struct DesignBasedDirectionFilter;

impl DesignBasedDirectionFilter {
    fn parity(topology: &Topology, qid: &str) -> Option<u32> {
        let index = Topology::qubit_index(qid)?;
        let (row, col) = topology.coordinates(index);
        Some((row + col) % 2)
    }

    /// Whether the design rule keeps `pair` in the given orientation.
    pub fn keeps(topology: &Topology, pair: &CouplingPair, inverse: bool) -> bool {
        let (Some(control), Some(target)) = (
            Self::parity(topology, pair.control()),
            Self::parity(topology, pair.target()),
        ) else {
            return false;
        };
        if inverse {
            control == 1 && target == 0
        } else {
            control == 0 && target == 1
        }
    }
}

impl PairFilter for DesignBasedDirectionFilter {
    fn name(&self) -> &str {
        "design_based_direction"
    }

    fn apply(&self, pairs: Vec<CouplingPair>, ctx: &FilterContext<'_>) -> SchedResult<Vec<CouplingPair>> {
        Ok(pairs
            .into_iter()
            .filter(|p| Self::keeps(ctx.topology, p, ctx.inverse))
            .collect())
    }

    fn direction_method(&self, _ctx: &FilterContext<'_>) -> Option<DirectionMethod> {
        Some(DirectionMethod::DesignBased)
    }
}

/// Measured direction: keep `a-b` iff `freq(a) < freq(b)`.
///
/// Pairs with a missing or equal frequency are dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrequencyDirectionFilter;

impl PairFilter for FrequencyDirectionFilter {
    fn name(&self) -> &str {
        "frequency_direction"
    }

    fn apply(&self, pairs: Vec<CouplingPair>, ctx: &FilterContext<'_>) -> SchedResult<Vec<CouplingPair>> {
        Ok(pairs
            .into_iter()
            .filter(|p| {
                match (
                    ctx.metrics.frequency(p.control()),
                    ctx.metrics.frequency(p.target()),
                ) {
                    (Some(c), Some(t)) if ctx.inverse => c > t,
                    (Some(c), Some(t)) => c < t,
                    _ => false,
                }
            })
            .collect())
    }

    fn direction_method(&self, _ctx: &FilterContext<'_>) -> Option<DirectionMethod> {
        Some(DirectionMethod::Measured)
    }
}

/// Three-tier automatic direction filter.
///
/// Uses the explicit table when the topology has one, design-based inference
/// when no frequencies were measured, and measured frequencies otherwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectionFilter;

impl DirectionFilter {
    /// The tier this filter picks for the given context.
    pub fn select(ctx: &FilterContext<'_>) -> DirectionMethod {
        if ctx.topology.direction_table().is_some() {
            DirectionMethod::Explicit
        } else if !ctx.metrics.has_frequencies() {
            DirectionMethod::DesignBased
        } else {
            DirectionMethod::Measured
        }
    }
}

impl PairFilter for DirectionFilter {
    fn name(&self) -> &str {
        "direction"
    }

    fn apply(&self, pairs: Vec<CouplingPair>, ctx: &FilterContext<'_>) -> SchedResult<Vec<CouplingPair>> {
        let method = Self::select(ctx);
        tracing::debug!(%method, inverse = ctx.inverse, "Selected direction method");
        match method {
            DirectionMethod::Explicit => ExplicitDirectionFilter.apply(pairs, ctx),
            DirectionMethod::DesignBased => DesignBasedDirectionFilter.apply(pairs, ctx),
            DirectionMethod::Measured => FrequencyDirectionFilter.apply(pairs, ctx),
            DirectionMethod::Unfiltered => Ok(pairs),
        }
    }

    fn direction_method(&self, ctx: &FilterContext<'_>) -> Option<DirectionMethod> {
        Some(Self::select(ctx))
    }
}

/// Keeps pairs whose qubits both reach `threshold` on a quality metric.
#[derive(Debug, Clone)]
pub struct QualityThresholdFilter {
    pub metric: String,
    pub threshold: f64,
}

impl QualityThresholdFilter {
    pub fn new(metric: impl Into<String>, threshold: f64) -> Self {
        Self {
            metric: metric.into(),
            threshold,
        }
    }
}

impl PairFilter for QualityThresholdFilter {
    fn name(&self) -> &str {
        "quality_threshold"
    }

    fn apply(&self, pairs: Vec<CouplingPair>, ctx: &FilterContext<'_>) -> SchedResult<Vec<CouplingPair>> {
        Ok(pairs
            .into_iter()
            .filter(|p| {
                p.qids().iter().all(|q| {
                    ctx.metrics
                        .quality(&self.metric, q)
                        .is_some_and(|v| v >= self.threshold)
                })
            })
            .collect())
    }
}

/// Drops pairs with a qubit that has no MUX assignment.
#[derive(Debug, Clone, Copy, Default)]
pub struct MuxMappedFilter;

impl PairFilter for MuxMappedFilter {
    fn name(&self) -> &str {
        "mux_mapped"
    }

    fn apply(&self, pairs: Vec<CouplingPair>, ctx: &FilterContext<'_>) -> SchedResult<Vec<CouplingPair>> {
        Ok(pairs
            .into_iter()
            .filter(|p| ctx.model.is_mapped(p.control()) && ctx.model.is_mapped(p.target()))
            .collect())
    }
}
