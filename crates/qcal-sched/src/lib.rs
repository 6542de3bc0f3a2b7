//! qcal Calibration Schedulers
//!
//! Turns a topology's conflict model into conflict-free parallel groups:
//!
//! - [`CrScheduler`] schedules directed two-qubit (cross-resonance) pairs.
//!   Pairs are filtered (candidates, direction, quality, MUX mapping), then
//!   a greedy graph coloring of the pair conflict graph yields parallel
//!   groups, same-MUX pairs first.
//! - [`OneQubitScheduler`] splits qubits into box-type stages A, B and MIXED,
//!   each holding lanes of qubits that may run in parallel.
//!
//! Both schedulers are synchronous and pure: they never block and hold no
//! state between calls.
//!
//! # Example
//!
//! ```ignore
//! use qcal_sched::{CrScheduleOptions, CrScheduler, QubitMetrics};
//! use qcal_topo::Topology;
//!
//! let topology = Topology::from_file("chip.yaml")?;
//! let scheduler = CrScheduler::from_topology(topology, QubitMetrics::new())?;
//! let schedule = scheduler.generate(&CrScheduleOptions::default())?;
//!
//! for (i, group) in schedule.parallel_groups.iter().enumerate() {
//!     println!("group {i}: {group:?}");
//! }
//! ```

pub mod coloring;
pub mod cr;
pub mod error;
pub mod filter;
pub mod metrics;
pub mod one_qubit;
pub mod pair;
pub mod strategy;

pub use coloring::{Coloring, ColoringStrategy, ConflictGraph, color_classes, is_valid_coloring};
pub use cr::{
    CrScheduleOptions, CrScheduler, DEFAULT_MAX_GROUP_SIZE, FilterStageStats, FilteringStats,
    ScheduleMetadata, ScheduleResult,
};
pub use error::{SchedError, SchedResult};
pub use filter::{
    CandidateQubitFilter, DesignBasedDirectionFilter, DirectionFilter, DirectionMethod,
    ExplicitDirectionFilter, FilterContext, FrequencyDirectionFilter, MuxMappedFilter, PairFilter,
    QualityThresholdFilter,
};
pub use metrics::QubitMetrics;
pub use one_qubit::{OneQubitMetadata, OneQubitScheduleResult, OneQubitScheduler, OneQubitStage};
pub use pair::CouplingPair;
pub use strategy::{
    FlatColoringStrategy, MuxConflictStrategy, SchedulingStrategy, build_conflict_graph,
    is_fast_pair, pairs_conflict,
};
