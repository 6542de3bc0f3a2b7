//! Property-based tests for the calibration schedulers.
//!
//! Random square lattices with random shared readout modules are scheduled
//! with every coloring strategy; the emitted groups must never conflict.

use std::collections::BTreeSet;

use proptest::prelude::*;
use qcal_sched::{
    ColoringStrategy, CrScheduleOptions, CrScheduler, OneQubitScheduler, QubitMetrics, SchedError,
    is_fast_pair, pairs_conflict,
};
use qcal_topo::{BoxType, MuxWiring, Topology};

/// Wiring of one MUX: readout module number and box letter for readout and control.
#[derive(Debug, Clone)]
struct MuxSpec {
    readout_module: u8,
    readout_b: bool,
    ctrl_b: bool,
}

fn arb_mux_spec() -> impl Strategy<Value = MuxSpec> {
    (0_u8..4, any::<bool>(), any::<bool>()).prop_map(|(readout_module, readout_b, ctrl_b)| MuxSpec {
        readout_module,
        readout_b,
        ctrl_b,
    })
}

fn arb_topology() -> impl Strategy<Value = Topology> {
    prop_oneof![Just(2_u32), Just(4), Just(6)].prop_flat_map(|grid| {
        let num_muxes = (grid * grid / 4) as usize;
        prop::collection::vec(arb_mux_spec(), num_muxes).prop_map(move |specs| {
            let mut topology = Topology::square_lattice("random", grid);
            for (mux, spec) in specs.into_iter().enumerate() {
                let letter = |b: bool| if b { "B" } else { "A" };
                topology = topology.with_mux(
                    MuxWiring::new(mux as u32)
                        .with_ctrl([format!("Q{mux}{}-CTRL0", letter(spec.ctrl_b))])
                        .with_read_out([format!(
                            "R{}{}-READ{mux}",
                            spec.readout_module,
                            letter(spec.readout_b)
                        )]),
                );
            }
            topology
        })
    })
}

fn arb_metrics(num_qubits: u32) -> impl Strategy<Value = QubitMetrics> {
    prop::option::of(prop::collection::vec(7.0_f64..9.0, num_qubits as usize)).prop_map(|freqs| {
        let mut metrics = QubitMetrics::new();
        for (q, f) in freqs.into_iter().flatten().enumerate() {
            metrics = metrics.with_frequency(q.to_string(), f);
        }
        metrics
    })
}

fn arb_case() -> impl Strategy<Value = (Topology, QubitMetrics, Vec<u32>, bool)> {
    arb_topology().prop_flat_map(|topology| {
        let n = topology.num_qubits;
        (
            Just(topology),
            arb_metrics(n),
            prop::collection::vec(0..n, 2..=(n as usize)),
            any::<bool>(),
        )
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// No two pairs in one group share a qubit or a conflicting MUX, for
    /// every coloring strategy.
    #[test]
    fn cr_groups_never_conflict((topology, metrics, candidates, inverse) in arb_case()) {
        let scheduler = CrScheduler::from_topology(topology, metrics).unwrap();
        let model = scheduler.context().conflict_model().clone();

        for coloring in ColoringStrategy::all() {
            let options = CrScheduleOptions::new()
                .with_candidates(candidates.iter().map(ToString::to_string))
                .with_coloring(coloring)
                .with_max_group_size(3)
                .with_inverse(inverse);
            let result = match scheduler.generate(&options) {
                Ok(result) => result,
                Err(SchedError::NoCandidatePairs { .. }) => continue,
                Err(e) => return Err(TestCaseError::fail(e.to_string())),
            };

            for group in &result.parallel_groups {
                prop_assert!(!group.is_empty());
                prop_assert!(group.len() <= 3);
                for (i, a) in group.iter().enumerate() {
                    for b in &group[i + 1..] {
                        prop_assert!(!pairs_conflict(a, b, &model), "{} and {} conflict ({})", a, b, coloring);
                    }
                }
            }
            prop_assert_eq!(result.metadata.scheduled_pairs, result.filtering_stats.mux_mapped);
        }
    }

    /// A generate call never emits both `a-b` and `b-a`.
    #[test]
    fn cr_direction_is_exclusive((topology, metrics, candidates, inverse) in arb_case()) {
        let scheduler = CrScheduler::from_topology(topology, metrics).unwrap();
        let options = CrScheduleOptions::new()
            .with_candidates(candidates.iter().map(ToString::to_string))
            .with_inverse(inverse);
        if let Ok(result) = scheduler.generate(&options) {
            let emitted: BTreeSet<_> = result.pairs().cloned().collect();
            prop_assert_eq!(emitted.len(), result.metadata.scheduled_pairs);
            for pair in &emitted {
                prop_assert!(!emitted.contains(&pair.reversed()), "both directions of {}", pair);
            }
        }
    }

    /// Groups made only of same-MUX pairs come before any group holding a
    /// cross-MUX pair.
    #[test]
    fn cr_fast_groups_come_first((topology, metrics, candidates, inverse) in arb_case()) {
        let scheduler = CrScheduler::from_topology(topology, metrics).unwrap();
        let model = scheduler.context().conflict_model().clone();
        let options = CrScheduleOptions::new()
            .with_candidates(candidates.iter().map(ToString::to_string))
            .with_inverse(inverse);
        if let Ok(result) = scheduler.generate(&options) {
            let fast: Vec<bool> = result
                .parallel_groups
                .iter()
                .map(|g| g.iter().all(|p| is_fast_pair(p, &model)))
                .collect();
            if let Some(first_slow) = fast.iter().position(|f| !f) {
                prop_assert!(fast[first_slow..].iter().all(|f| !f));
            }
            prop_assert_eq!(fast.iter().filter(|f| **f).count(), result.metadata.fast_groups);
        }
    }

    /// One-qubit lanes of a stage never share or conflict on a MUX, and
    /// every requested qubit is scheduled exactly once.
    #[test]
    fn one_qubit_lanes_never_conflict((topology, _metrics, qids, _inverse) in arb_case()) {
        let scheduler = OneQubitScheduler::from_topology(topology).unwrap();
        let model = scheduler.context().conflict_model().clone();
        let qids: Vec<String> = qids.iter().map(ToString::to_string).collect();
        let result = scheduler.generate(&qids).unwrap();

        let unique: BTreeSet<&String> = qids.iter().collect();
        let scheduled: Vec<&String> = result.stages.iter().flat_map(|s| &s.qids).collect();
        prop_assert_eq!(scheduled.len(), unique.len());

        let mut previous = None;
        for stage in &result.stages {
            if let Some(prev) = previous {
                prop_assert!(BoxType::ORDER.iter().position(|b| *b == prev) < BoxType::ORDER.iter().position(|b| *b == stage.box_type));
            }
            previous = Some(stage.box_type);

            for qid in &stage.qids {
                prop_assert_eq!(model.qubit_box_type(qid), stage.box_type);
            }
            for (i, lane) in stage.parallel_groups.iter().enumerate() {
                for other in &stage.parallel_groups[i + 1..] {
                    for a in lane {
                        for b in other {
                            let (Some(ma), Some(mb)) = (model.mux_of(a), model.mux_of(b)) else {
                                continue;
                            };
                            prop_assert!(!model.muxes_conflict(ma, mb), "{} and {} conflict", a, b);
                        }
                    }
                }
            }
        }
    }
}

#[test]
fn test_single_mux_line_needs_two_groups() {
    let topology = Topology::new("line", 4, 2)
        .with_coupling(0, 1)
        .with_coupling(1, 2)
        .with_coupling(2, 3)
        .with_direction("0", "1")
        .with_direction("1", "2")
        .with_direction("2", "3");
    let scheduler = CrScheduler::from_topology(topology, QubitMetrics::new()).unwrap();
    let result = scheduler.generate(&CrScheduleOptions::default()).unwrap();

    assert!(result.parallel_groups.len() >= 2);
    for group in &result.parallel_groups {
        for (i, a) in group.iter().enumerate() {
            for b in &group[i + 1..] {
                assert!(!a.shares_qubit(b));
            }
        }
    }
}

#[test]
fn test_design_based_direction_on_grid() {
    let topology = Topology::new("grid", 64, 8).with_coupling(0, 1);
    let scheduler = CrScheduler::from_topology(topology, QubitMetrics::new()).unwrap();
    let result = scheduler.generate(&CrScheduleOptions::default()).unwrap();

    let pairs: Vec<String> = result.pairs().map(ToString::to_string).collect();
    assert_eq!(pairs, ["0-1"]);
}
