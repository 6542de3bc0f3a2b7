//! Cross-resonance (two-qubit) calibration scheduler.
//!
//! Pipeline for one `generate` call:
//!
//! 1. enumerate every coupling edge in both directions,
//! 2. run the filter pipeline (candidates, direction, optional quality),
//! 3. keep one direction per coupling edge and drop pairs with an
//!    unmapped qubit,
//! 4. hand the survivors to a [`SchedulingStrategy`] that colors the pair
//!    conflict graph into parallel groups.
//!
//! Every stage records how many pairs it kept in [`FilteringStats`].

use qcal_topo::{Topology, TopologyContext};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::coloring::ColoringStrategy;
use crate::error::{SchedError, SchedResult};
use crate::filter::{
    CandidateQubitFilter, DirectionFilter, DirectionMethod, FilterContext, MuxMappedFilter,
    PairFilter, QualityThresholdFilter,
};
use crate::metrics::QubitMetrics;
use crate::pair::CouplingPair;
use crate::strategy::{MuxConflictStrategy, SchedulingStrategy, is_fast_pair};

/// Default upper bound on the size of one parallel group.
pub const DEFAULT_MAX_GROUP_SIZE: usize = 10;

/// Options for [`CrScheduler::generate`].
#[derive(Debug, Clone, PartialEq)]
pub struct CrScheduleOptions {
    /// Restrict to pairs whose two qubits are both listed.
    pub candidate_qids: Option<Vec<String>>,
    /// Largest allowed parallel group.
    pub max_group_size: usize,
    /// Coloring algorithm for the pair conflict graph.
    pub coloring: ColoringStrategy,
    /// Reverse the direction rule.
    pub inverse: bool,
    /// Optional `(metric, threshold)` quality gate on both qubits.
    pub quality_threshold: Option<(String, f64)>,
}

impl Default for CrScheduleOptions {
    fn default() -> Self {
        Self {
            candidate_qids: None,
            max_group_size: DEFAULT_MAX_GROUP_SIZE,
            coloring: ColoringStrategy::default(),
            inverse: false,
            quality_threshold: None,
        }
    }
}

impl CrScheduleOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_candidates<I, S>(mut self, qids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.candidate_qids = Some(qids.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_max_group_size(mut self, size: usize) -> Self {
        self.max_group_size = size;
        self
    }

    pub fn with_coloring(mut self, coloring: ColoringStrategy) -> Self {
        self.coloring = coloring;
        self
    }

    pub fn with_inverse(mut self, inverse: bool) -> Self {
        self.inverse = inverse;
        self
    }

    pub fn with_quality_threshold(mut self, metric: impl Into<String>, threshold: f64) -> Self {
        self.quality_threshold = Some((metric.into(), threshold));
        self
    }
}

/// Pair count kept by one filter stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterStageStats {
    pub filter: String,
    pub input: usize,
    pub output: usize,
}

/// How many pairs survived each stage of the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilteringStats {
    /// Pairs enumerated from the topology (both directions).
    pub all_pairs: usize,
    /// Filter stages in the order they ran.
    pub stages: Vec<FilterStageStats>,
    /// Pairs left after MUX mapping.
    pub mux_mapped: usize,
}

/// Summary of a generated CR schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleMetadata {
    pub total_pairs: usize,
    pub scheduled_pairs: usize,
    pub num_groups: usize,
    pub fast_pairs: usize,
    pub slow_pairs: usize,
    pub fast_groups: usize,
    pub slow_groups: usize,
    pub max_group_size: usize,
    pub strategy: String,
    pub coloring_strategy: String,
    pub direction_method: DirectionMethod,
    pub inverse: bool,
}

/// Ordered parallel groups of coupling pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleResult {
    /// Groups to run one after another; pairs within a group run in parallel.
    pub parallel_groups: Vec<Vec<CouplingPair>>,
    pub metadata: ScheduleMetadata,
    pub filtering_stats: FilteringStats,
}

impl ScheduleResult {
    /// Every scheduled pair in execution order.
    pub fn pairs(&self) -> impl Iterator<Item = &CouplingPair> {
        self.parallel_groups.iter().flatten()
    }

    /// Groups rendered as `"control-target"` strings.
    pub fn group_strings(&self) -> Vec<Vec<String>> {
        self.parallel_groups
            .iter()
            .map(|g| g.iter().map(ToString::to_string).collect())
            .collect()
    }
}

/// Two-qubit calibration scheduler for one topology.
#[derive(Debug)]
pub struct CrScheduler {
    context: TopologyContext,
    metrics: QubitMetrics,
}

impl CrScheduler {
    pub fn new(context: TopologyContext, metrics: QubitMetrics) -> Self {
        Self { context, metrics }
    }

    /// Validate `topology` and build a scheduler for it.
    pub fn from_topology(topology: Topology, metrics: QubitMetrics) -> SchedResult<Self> {
        Ok(Self::new(TopologyContext::new(topology)?, metrics))
    }

    pub fn context(&self) -> &TopologyContext {
        &self.context
    }

    pub fn metrics(&self) -> &QubitMetrics {
        &self.metrics
    }

    /// Every coupling edge in both directions, sorted.
    pub fn all_pairs(&self) -> Vec<CouplingPair> {
        let mut pairs: Vec<CouplingPair> = self
            .context
            .topology()
            .coupling_edges()
            .into_iter()
            .flat_map(|(a, b)| {
                let pair = CouplingPair::new(a.to_string(), b.to_string());
                [pair.reversed(), pair]
            })
            .collect();
        pairs.sort_by_key(|p| {
            (
                Topology::qubit_index(p.control()),
                Topology::qubit_index(p.target()),
            )
        });
        pairs
    }

    /// Generate a schedule with the default filter pipeline and the
    /// [`MuxConflictStrategy`].
    pub fn generate(&self, options: &CrScheduleOptions) -> SchedResult<ScheduleResult> {
        let mut filters: Vec<Box<dyn PairFilter>> = Vec::new();
        if let Some(candidates) = &options.candidate_qids {
            filters.push(Box::new(CandidateQubitFilter::new(candidates)));
        }
        filters.push(Box::new(DirectionFilter));
        if let Some((metric, threshold)) = &options.quality_threshold {
            filters.push(Box::new(QualityThresholdFilter::new(metric.clone(), *threshold)));
        }

        let strategy = MuxConflictStrategy::new(options.coloring);
        self.generate_with_plugins(&filters, &strategy, options.max_group_size, options.inverse)
    }

    /// Generate a schedule with a caller-supplied filter list and strategy.
    ///
    /// Pairs with an unmapped qubit are always dropped after the last filter.
    pub fn generate_with_plugins(
        &self,
        filters: &[Box<dyn PairFilter>],
        strategy: &dyn SchedulingStrategy,
        max_group_size: usize,
        inverse: bool,
    ) -> SchedResult<ScheduleResult> {
        if max_group_size == 0 {
            return Err(SchedError::InvalidMaxGroupSize(max_group_size));
        }

        let model = self.context.conflict_model();
        let ctx = FilterContext {
            topology: self.context.topology(),
            model,
            metrics: &self.metrics,
            inverse,
        };

        let mut pairs = self.all_pairs();
        let total_pairs = pairs.len();
        if pairs.is_empty() {
            return Err(SchedError::NoCandidatePairs {
                stage: "enumeration".to_string(),
            });
        }

        let mut stats = FilteringStats {
            all_pairs: total_pairs,
            ..Default::default()
        };
        let mut direction_method = DirectionMethod::Unfiltered;

        for filter in filters {
            if let Some(method) = filter.direction_method(&ctx) {
                direction_method = method;
            }
            let input = pairs.len();
            pairs = filter.apply(pairs, &ctx)?;
            debug!(filter = filter.name(), input, output = pairs.len(), "Applied pair filter");
            stats.stages.push(FilterStageStats {
                filter: filter.name().to_string(),
                input,
                output: pairs.len(),
            });
            if pairs.is_empty() {
                return Err(SchedError::NoCandidatePairs {
                    stage: filter.name().to_string(),
                });
            }
        }

        // Pipelines without a direction filter still emit one direction per edge.
        let filtered = pairs.len();
        pairs = keep_one_direction(pairs);
        if pairs.len() < filtered {
            debug!(dropped = filtered - pairs.len(), "Dropped reverse-direction duplicates");
        }

        pairs = MuxMappedFilter.apply(pairs, &ctx)?;
        stats.mux_mapped = pairs.len();
        if pairs.is_empty() {
            return Err(SchedError::NoMappedPairs);
        }

        let parallel_groups = strategy.schedule(&pairs, model, max_group_size)?;

        let fast_pairs = pairs.iter().filter(|p| is_fast_pair(p, model)).count();
        let fast_groups = parallel_groups
            .iter()
            .filter(|g| g.iter().all(|p| is_fast_pair(p, model)))
            .count();
        let metadata = ScheduleMetadata {
            total_pairs,
            scheduled_pairs: parallel_groups.iter().map(Vec::len).sum(),
            num_groups: parallel_groups.len(),
            fast_pairs,
            slow_pairs: pairs.len() - fast_pairs,
            fast_groups,
            slow_groups: parallel_groups.len() - fast_groups,
            max_group_size,
            strategy: strategy.name().to_string(),
            coloring_strategy: strategy.coloring_name().to_string(),
            direction_method,
            inverse,
        };

        info!(
            topology = %self.context.topology().name,
            pairs = metadata.scheduled_pairs,
            groups = metadata.num_groups,
            direction = %direction_method,
            coloring = %metadata.coloring_strategy,
            "Generated CR schedule"
        );

        Ok(ScheduleResult {
            parallel_groups,
            metadata,
            filtering_stats: stats,
        })
    }
}

/// Keep the first listed direction of every unordered pair.
fn keep_one_direction(pairs: Vec<CouplingPair>) -> Vec<CouplingPair> {
    let mut seen: FxHashSet<(String, String)> = FxHashSet::default();
    pairs
        .into_iter()
        .filter(|pair| {
            let [a, b] = pair.qids();
            let edge = if a <= b { (a, b) } else { (b, a) };
            seen.insert((edge.0.to_string(), edge.1.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::DesignBasedDirectionFilter;
    use crate::strategy::{FlatColoringStrategy, pairs_conflict};
    use qcal_topo::MuxWiring;

    fn line_in_one_mux() -> CrScheduler {
        let topology = Topology::new("line", 4, 2)
            .with_coupling(0, 1)
            .with_coupling(1, 2)
            .with_coupling(2, 3)
            .with_direction("0", "1")
            .with_direction("1", "2")
            .with_direction("2", "3");
        CrScheduler::from_topology(topology, QubitMetrics::new()).unwrap()
    }

    #[test]
    fn test_all_pairs_both_directions() {
        let scheduler = line_in_one_mux();
        let pairs: Vec<String> = scheduler.all_pairs().iter().map(ToString::to_string).collect();
        assert_eq!(pairs, ["0-1", "1-0", "1-2", "2-1", "2-3", "3-2"]);
    }

    #[test]
    fn test_single_mux_line_needs_multiple_groups() {
        let result = line_in_one_mux().generate(&CrScheduleOptions::default()).unwrap();

        assert!(result.parallel_groups.len() >= 2);
        assert_eq!(result.metadata.scheduled_pairs, 3);
        assert_eq!(result.metadata.direction_method, DirectionMethod::Explicit);
        assert_eq!(result.metadata.fast_pairs, 3);
        let model = line_in_one_mux().context().conflict_model().clone();
        for group in &result.parallel_groups {
            for (i, a) in group.iter().enumerate() {
                for b in &group[i + 1..] {
                    assert!(!a.shares_qubit(b));
                    assert!(!pairs_conflict(a, b, &model));
                }
            }
        }
    }

    #[test]
    fn test_design_based_direction_on_grid() {
        let topology = Topology::new("grid", 64, 8);
        let scheduler = CrScheduler::from_topology(topology, QubitMetrics::new()).unwrap();
        let result = scheduler
            .generate(&CrScheduleOptions::new().with_candidates(["0", "1"]))
            .unwrap();

        assert_eq!(result.group_strings(), vec![vec!["0-1".to_string()]]);
        assert_eq!(result.metadata.direction_method, DirectionMethod::DesignBased);
    }

    #[test]
    fn test_filtering_stats_track_each_stage() {
        let topology = Topology::new("partial", 8, 4)
            .with_mux(MuxWiring::new(0).with_ctrl(["Q1A-CTRL1"]));
        let scheduler = CrScheduler::from_topology(topology, QubitMetrics::new()).unwrap();
        let result = scheduler.generate(&CrScheduleOptions::default()).unwrap();
        let stats = &result.filtering_stats;

        // 4x4 row-major grid with 8 qubits: 10 edges.
        assert_eq!(stats.all_pairs, 20);
        assert_eq!(stats.stages.len(), 1);
        assert_eq!(stats.stages[0].filter, "direction");
        assert_eq!(stats.stages[0].output, 10);
        // Only qubits 0..4 are wired.
        assert!(stats.mux_mapped < stats.stages[0].output);
        assert!(result.pairs().all(|p| p.qids().iter().all(|q| q.parse::<u32>().unwrap() < 4)));
    }

    #[test]
    fn test_error_when_candidates_remove_everything() {
        let scheduler = line_in_one_mux();
        let err = scheduler
            .generate(&CrScheduleOptions::new().with_candidates(["7"]))
            .unwrap_err();
        assert!(matches!(err, SchedError::NoCandidatePairs { ref stage } if stage == "candidate_qubits"));
    }

    #[test]
    fn test_error_when_nothing_is_mapped() {
        let topology = Topology::new("unwired", 16, 4)
            .with_mux(MuxWiring::new(3).with_ctrl(["Q1A-CTRL1"]))
            .with_coupling(0, 1);
        let scheduler = CrScheduler::from_topology(topology, QubitMetrics::new()).unwrap();
        let err = scheduler.generate(&CrScheduleOptions::default()).unwrap_err();
        assert!(matches!(err, SchedError::NoMappedPairs));
    }

    #[test]
    fn test_inverse_flips_direction() {
        let scheduler = line_in_one_mux();
        let result = scheduler
            .generate(&CrScheduleOptions::new().with_inverse(true))
            .unwrap();
        let mut pairs: Vec<String> = result.pairs().map(ToString::to_string).collect();
        pairs.sort();
        assert_eq!(pairs, ["1-0", "2-1", "3-2"]);
        assert!(result.metadata.inverse);
    }

    #[test]
    fn test_max_group_size_batches_color_classes() {
        let topology = Topology::new("grid", 64, 8)
            .with_mux_size(1)
            .with_coupling(0, 1)
            .with_coupling(2, 3)
            .with_coupling(4, 5);
        let scheduler = CrScheduler::from_topology(topology, QubitMetrics::new()).unwrap();
        let result = scheduler
            .generate(&CrScheduleOptions::new().with_max_group_size(2))
            .unwrap();
        assert_eq!(result.metadata.scheduled_pairs, 3);
        assert!(result.parallel_groups.iter().all(|g| g.len() <= 2));
        assert_eq!(result.metadata.slow_pairs, 3);

        let err = scheduler.generate(&CrScheduleOptions::new().with_max_group_size(0));
        assert!(matches!(err, Err(SchedError::InvalidMaxGroupSize(0))));
    }

    #[test]
    fn test_custom_pipeline_without_direction_filter() {
        let scheduler = line_in_one_mux();
        let filters: Vec<Box<dyn PairFilter>> = Vec::new();
        let strategy = FlatColoringStrategy::new(ColoringStrategy::SmallestLast);
        let result = scheduler.generate_with_plugins(&filters, &strategy, 10, false).unwrap();

        assert_eq!(result.metadata.direction_method, DirectionMethod::Unfiltered);
        assert_eq!(result.metadata.strategy, "flat_coloring");
        assert_eq!(result.metadata.scheduled_pairs, 3);
        let scheduled: Vec<&CouplingPair> = result.parallel_groups.iter().flatten().collect();
        for pair in &scheduled {
            assert!(!scheduled.contains(&&pair.reversed()));
        }

        let filters: Vec<Box<dyn PairFilter>> = vec![Box::new(DesignBasedDirectionFilter)];
        let result = scheduler.generate_with_plugins(&filters, &strategy, 10, false).unwrap();
        assert_eq!(result.metadata.direction_method, DirectionMethod::DesignBased);
    }

    #[test]
    fn test_result_serializes_pairs_as_arrays() {
        let result = line_in_one_mux().generate(&CrScheduleOptions::default()).unwrap();
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["parallel_groups"][0][0].as_array().unwrap().len(), 2);
        assert_eq!(json["metadata"]["direction_method"], "explicit");
    }
}
