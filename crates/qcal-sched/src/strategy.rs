//! Scheduling strategies that turn filtered pairs into parallel groups.

use qcal_topo::ConflictModel;

use crate::coloring::{Coloring, ColoringStrategy, ConflictGraph, color_classes};
use crate::error::{SchedError, SchedResult};
use crate::pair::CouplingPair;

/// Turns a filtered pair list into ordered, conflict-free parallel groups.
pub trait SchedulingStrategy: Send + Sync {
    /// Strategy name reported in schedule metadata.
    fn name(&self) -> &str;

    /// Name of the coloring algorithm used, if any.
    fn coloring_name(&self) -> &str;

    /// Group `pairs` so that no two pairs in a group conflict and no group
    /// holds more than `max_group_size` pairs.
    fn schedule(
        &self,
        pairs: &[CouplingPair],
        model: &ConflictModel,
        max_group_size: usize,
    ) -> SchedResult<Vec<Vec<CouplingPair>>>;
}

/// Whether both qubits of the pair sit on the same MUX.
pub fn is_fast_pair(pair: &CouplingPair, model: &ConflictModel) -> bool {
    match (model.mux_of(pair.control()), model.mux_of(pair.target())) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Whether two pairs may not run at the same time.
///
/// Pairs conflict when they share a qubit, or when a MUX of one is the same
/// as, or conflicts with, a MUX of the other. A pair with an unmapped qubit
/// conflicts with every other pair.
pub fn pairs_conflict(a: &CouplingPair, b: &CouplingPair, model: &ConflictModel) -> bool {
    if a.shares_qubit(b) {
        return true;
    }
    let muxes = |p: &CouplingPair| -> Option<[u32; 2]> {
        Some([model.mux_of(p.control())?, model.mux_of(p.target())?])
    };
    let (Some(ma), Some(mb)) = (muxes(a), muxes(b)) else {
        return true;
    };
    ma.iter()
        .any(|&x| mb.iter().any(|&y| model.muxes_conflict(x, y)))
}

/// Conflict graph over `pairs`; node `i` carries weight `i`.
pub fn build_conflict_graph(pairs: &[CouplingPair], model: &ConflictModel) -> ConflictGraph {
    let mut graph = ConflictGraph::with_capacity(pairs.len(), 0);
    let nodes: Vec<_> = (0..pairs.len()).map(|i| graph.add_node(i)).collect();
    for i in 0..pairs.len() {
        for j in (i + 1)..pairs.len() {
            if pairs_conflict(&pairs[i], &pairs[j], model) {
                graph.add_edge(nodes[i], nodes[j], ());
            }
        }
    }
    graph
}

/// Color the conflict graph of `pairs` and split every color class into
/// batches of at most `max_group_size`.
pub fn color_into_groups(
    pairs: &[CouplingPair],
    model: &ConflictModel,
    coloring: &dyn Coloring,
    max_group_size: usize,
) -> SchedResult<Vec<Vec<CouplingPair>>> {
    if max_group_size == 0 {
        return Err(SchedError::InvalidMaxGroupSize(max_group_size));
    }
    if pairs.is_empty() {
        return Ok(Vec::new());
    }

    let graph = build_conflict_graph(pairs, model);
    let colors = coloring.color(&graph);
    tracing::debug!(
        pairs = pairs.len(),
        edges = graph.edge_count(),
        coloring = coloring.name(),
        colors = colors.iter().max().map_or(0, |c| c + 1),
        "Colored pair conflict graph"
    );

    let mut groups = Vec::new();
    for class in color_classes(&colors) {
        for batch in class.chunks(max_group_size) {
            groups.push(batch.iter().map(|&i| pairs[i].clone()).collect());
        }
    }
    Ok(groups)
}

/// Default strategy: same-MUX ("fast") pairs are colored and scheduled
/// before cross-MUX ("slow") pairs.
pub struct MuxConflictStrategy {
    coloring: Box<dyn Coloring>,
}

impl MuxConflictStrategy {
    pub fn new(coloring: impl Coloring + 'static) -> Self {
        Self {
            coloring: Box::new(coloring),
        }
    }
}

impl Default for MuxConflictStrategy {
    fn default() -> Self {
        Self::new(ColoringStrategy::default())
    }
}

impl SchedulingStrategy for MuxConflictStrategy {
    fn name(&self) -> &str {
        "mux_conflict"
    }

    fn coloring_name(&self) -> &str {
        self.coloring.name()
    }

    fn schedule(
        &self,
        pairs: &[CouplingPair],
        model: &ConflictModel,
        max_group_size: usize,
    ) -> SchedResult<Vec<Vec<CouplingPair>>> {
        let (fast, slow): (Vec<CouplingPair>, Vec<CouplingPair>) =
            pairs.iter().cloned().partition(|p| is_fast_pair(p, model));

        let mut groups = color_into_groups(&fast, model, self.coloring.as_ref(), max_group_size)?;
        groups.extend(color_into_groups(&slow, model, self.coloring.as_ref(), max_group_size)?);
        Ok(groups)
    }
}

/// Colors all pairs in one conflict graph, without the fast/slow split.
pub struct FlatColoringStrategy {
    coloring: Box<dyn Coloring>,
}

impl FlatColoringStrategy {
    pub fn new(coloring: impl Coloring + 'static) -> Self {
        Self {
            coloring: Box::new(coloring),
        }
    }
}

impl SchedulingStrategy for FlatColoringStrategy {
    fn name(&self) -> &str {
        "flat_coloring"
    }

    fn coloring_name(&self) -> &str {
        self.coloring.name()
    }

    fn schedule(
        &self,
        pairs: &[CouplingPair],
        model: &ConflictModel,
        max_group_size: usize,
    ) -> SchedResult<Vec<Vec<CouplingPair>>> {
        color_into_groups(pairs, model, self.coloring.as_ref(), max_group_size)
    }
}
