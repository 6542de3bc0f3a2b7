//! Single-qubit calibration scheduler.
//!
//! Qubits are split into box-type stages (A, then B, then MIXED). Inside a
//! stage every parallel group is a lane of qubits that run one after another;
//! different lanes never share or conflict on a MUX and may run in parallel.

use std::collections::BTreeMap;

use petgraph::unionfind::UnionFind;
use qcal_topo::{BoxType, ConflictModel, Topology, TopologyContext, canonical_qid};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::error::{SchedError, SchedResult};

/// One box-type stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OneQubitStage {
    pub box_type: BoxType,
    /// All qubits in the stage, in lane order.
    pub qids: Vec<String>,
    /// Lanes that may run in parallel; qubits within a lane run sequentially.
    pub parallel_groups: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OneQubitMetadata {
    pub total_qubits: usize,
    pub num_stages: usize,
    pub box_a: usize,
    pub box_b: usize,
    pub mixed: usize,
    /// Qubits without a MUX, scheduled in the MIXED stage.
    pub unmapped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OneQubitScheduleResult {
    pub stages: Vec<OneQubitStage>,
    pub metadata: OneQubitMetadata,
}

impl OneQubitScheduleResult {
    /// Stage of a given box type, if present.
    pub fn stage(&self, box_type: BoxType) -> Option<&OneQubitStage> {
        self.stages.iter().find(|s| s.box_type == box_type)
    }
}

/// Box-aware scheduler for single-qubit calibrations.
#[derive(Debug)]
pub struct OneQubitScheduler {
    context: TopologyContext,
}

impl OneQubitScheduler {
    pub fn new(context: TopologyContext) -> Self {
        Self { context }
    }

    pub fn from_topology(topology: Topology) -> SchedResult<Self> {
        Ok(Self::new(TopologyContext::new(topology)?))
    }

    pub fn context(&self) -> &TopologyContext {
        &self.context
    }

    /// Schedule the given qubits.
    pub fn generate<S: AsRef<str>>(&self, qids: &[S]) -> SchedResult<OneQubitScheduleResult> {
        if qids.is_empty() {
            return Err(SchedError::EmptyInput("no qubits to schedule".to_string()));
        }

        let mut seen = FxHashSet::default();
        let qids: Vec<String> = qids
            .iter()
            .map(|q| canonical_qid(q.as_ref()))
            .filter(|q| seen.insert(q.clone()))
            .collect();

        let model = self.context.conflict_model();
        let mut by_box: BTreeMap<BoxType, BTreeMap<u32, Vec<String>>> = BTreeMap::new();
        let mut unmapped = Vec::new();
        for qid in &qids {
            match model.mux_of(qid) {
                Some(mux) => by_box
                    .entry(model.box_type(mux))
                    .or_default()
                    .entry(mux)
                    .or_default()
                    .push(qid.clone()),
                None => unmapped.push(qid.clone()),
            }
        }

        let mut metadata = OneQubitMetadata {
            total_qubits: qids.len(),
            unmapped: unmapped.len(),
            ..Default::default()
        };

        let mut stages = Vec::new();
        for box_type in BoxType::ORDER {
            let mut groups = by_box
                .remove(&box_type)
                .map(|muxes| lanes(model, muxes))
                .unwrap_or_default();
            if box_type == BoxType::Mixed && !unmapped.is_empty() {
                groups.push(std::mem::take(&mut unmapped));
            }
            if groups.is_empty() {
                continue;
            }

            let stage_qids: Vec<String> = groups.iter().flatten().cloned().collect();
            match box_type {
                BoxType::A => metadata.box_a = stage_qids.len(),
                BoxType::B => metadata.box_b = stage_qids.len(),
                BoxType::Mixed => metadata.mixed = stage_qids.len(),
            }
            stages.push(OneQubitStage {
                box_type,
                qids: stage_qids,
                parallel_groups: groups,
            });
        }
        metadata.num_stages = stages.len();

        tracing::info!(
            qubits = metadata.total_qubits,
            stages = metadata.num_stages,
            box_a = metadata.box_a,
            box_b = metadata.box_b,
            mixed = metadata.mixed,
            unmapped = metadata.unmapped,
            "Generated one-qubit schedule"
        );

        Ok(OneQubitScheduleResult { stages, metadata })
    }

    /// Schedule every qubit of the given MUXes, minus `exclude`.
    pub fn generate_from_mux<S: AsRef<str>>(
        &self,
        muxes: &[u32],
        exclude: &[S],
    ) -> SchedResult<OneQubitScheduleResult> {
        if muxes.is_empty() {
            return Err(SchedError::EmptyInput("no MUXes to schedule".to_string()));
        }

        let excluded: FxHashSet<String> = exclude.iter().map(|q| canonical_qid(q.as_ref())).collect();
        let model = self.context.conflict_model();
        let mut qids = Vec::new();
        for &mux in muxes {
            let members = model.mux_qids(mux).ok_or(SchedError::UnknownMux {
                mux,
                num_muxes: model.num_muxes(),
            })?;
            qids.extend(members.into_iter().filter(|q| !excluded.contains(q)));
        }

        if qids.is_empty() {
            return Err(SchedError::AllExcluded);
        }
        self.generate(&qids)
    }
}

/// Merge MUXes that conflict with each other into sequential lanes.
fn lanes(model: &ConflictModel, muxes: BTreeMap<u32, Vec<String>>) -> Vec<Vec<String>> {
    let entries: Vec<(u32, Vec<String>)> = muxes
        .into_iter()
        .map(|(mux, mut qids)| {
            qids.sort_by_key(|q| Topology::qubit_index(q));
            (mux, qids)
        })
        .collect();

    let mut components = UnionFind::<usize>::new(entries.len());
    for i in 0..entries.len() {
        for j in (i + 1)..entries.len() {
            if model.muxes_conflict(entries[i].0, entries[j].0) {
                components.union(i, j);
            }
        }
    }

    // Lanes are ordered by their lowest MUX.
    let mut lanes: BTreeMap<usize, Vec<String>> = BTreeMap::new();
    let mut lane_of_root: BTreeMap<usize, usize> = BTreeMap::new();
    for (i, (_, qids)) in entries.iter().enumerate() {
        let root = components.find(i);
        let lane = *lane_of_root.entry(root).or_insert(i);
        lanes.entry(lane).or_default().extend(qids.iter().cloned());
    }
    lanes.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use qcal_topo::MuxWiring;

    /// MUX 0, 1: box A and sharing R1A. MUX 2: box B. MUX 3: mixed.
    fn scheduler() -> OneQubitScheduler {
        let topology = Topology::new("boxes", 16, 4)
            .with_mux(MuxWiring::new(0).with_ctrl(["Q1A-CTRL0"]).with_read_out(["R1A-READ0"]))
            .with_mux(MuxWiring::new(1).with_ctrl(["Q2A-CTRL0"]).with_read_out(["R1A-READ1"]))
            .with_mux(MuxWiring::new(2).with_ctrl(["Q3B-CTRL0"]).with_read_out(["R2B-READ0"]))
            .with_mux(MuxWiring::new(3).with_ctrl(["Q4A-CTRL0"]).with_read_out(["R3B-READ0"]));
        OneQubitScheduler::from_topology(topology).unwrap()
    }

    #[test]
    fn test_stages_in_box_order() {
        let result = scheduler().generate(&["12", "8", "0", "4"]).unwrap();
        let order: Vec<BoxType> = result.stages.iter().map(|s| s.box_type).collect();
        assert_eq!(order, [BoxType::A, BoxType::B, BoxType::Mixed]);
        assert_eq!(result.metadata.box_a, 2);
        assert_eq!(result.metadata.box_b, 1);
        assert_eq!(result.metadata.mixed, 1);
    }

    #[test]
    fn test_conflicting_muxes_share_a_lane() {
        let result = scheduler().generate(&["5", "0", "1", "9", "8"]).unwrap();

        let a = result.stage(BoxType::A).unwrap();
        // MUX 0 and 1 conflict through R1A, so they form one sequential lane.
        assert_eq!(a.parallel_groups, vec![vec!["0", "1", "5"]]);

        let b = result.stage(BoxType::B).unwrap();
        assert_eq!(b.parallel_groups, vec![vec!["8", "9"]]);
    }

    #[test]
    fn test_independent_muxes_run_in_parallel() {
        let topology = Topology::new("independent", 16, 4)
            .with_mux(MuxWiring::new(0).with_ctrl(["Q1A-CTRL0"]))
            .with_mux(MuxWiring::new(1).with_ctrl(["Q2A-CTRL0"]));
        let scheduler = OneQubitScheduler::from_topology(topology).unwrap();
        let result = scheduler.generate(&["4", "0", "1"]).unwrap();

        assert_eq!(result.stages.len(), 1);
        assert_eq!(
            result.stages[0].parallel_groups,
            vec![vec!["0".to_string(), "1".to_string()], vec!["4".to_string()]]
        );
    }

    #[test]
    fn test_unmapped_qubits_go_to_mixed() {
        let result = scheduler().generate(&["Q00", "99"]).unwrap();
        assert_eq!(result.metadata.unmapped, 1);
        let mixed = result.stage(BoxType::Mixed).unwrap();
        assert_eq!(mixed.qids, ["99"]);
    }

    #[test]
    fn test_duplicates_removed() {
        let result = scheduler().generate(&["0", "Q0", "00"]).unwrap();
        assert_eq!(result.metadata.total_qubits, 1);
    }

    #[test]
    fn test_generate_from_mux() {
        let result = scheduler().generate_from_mux(&[2], &["Q9"]).unwrap();
        assert_eq!(result.stages[0].qids, ["8", "10", "11"]);

        let err = scheduler().generate_from_mux(&[2], &["8", "9", "10", "11"]);
        assert!(matches!(err, Err(SchedError::AllExcluded)));
    }

    #[test]
    fn test_generate_from_unknown_mux() {
        let empty: [&str; 0] = [];
        assert!(matches!(
            scheduler().generate_from_mux(&[0, 4], &empty),
            Err(SchedError::UnknownMux { mux: 4, num_muxes: 4 })
        ));
        assert!(matches!(
            scheduler().generate_from_mux(&[u32::MAX / 2], &empty),
            Err(SchedError::UnknownMux { .. })
        ));
    }

    #[test]
    fn test_empty_input_rejected() {
        let empty: [&str; 0] = [];
        assert!(matches!(scheduler().generate(&empty), Err(SchedError::EmptyInput(_))));
        assert!(matches!(
            scheduler().generate_from_mux(&[], &empty),
            Err(SchedError::EmptyInput(_))
        ));
    }
}
