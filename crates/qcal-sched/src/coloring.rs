//! Greedy graph coloring over conflict graphs.
//!
//! Nodes that receive the same color never share an edge, so every color
//! class is a set of operations that may run in parallel. The strategies
//! differ only in the order nodes are visited; node index breaks every tie
//! so colorings are reproducible.

use std::cmp::Reverse;
use std::collections::VecDeque;
use std::str::FromStr;

use petgraph::graph::{NodeIndex, UnGraph};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rustc_hash::FxHashSet;

use crate::error::SchedError;

/// Conflict graph. Node weights index into the scheduled item list.
pub type ConflictGraph = UnGraph<usize, ()>;

/// A node coloring algorithm.
pub trait Coloring: Send + Sync {
    /// Strategy name as reported in schedule metadata.
    fn name(&self) -> &str;

    /// Color every node. `result[i]` is the color of node index `i`.
    fn color(&self, graph: &ConflictGraph) -> Vec<usize>;
}

/// Built-in greedy coloring strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColoringStrategy {
    /// Visit nodes by decreasing degree.
    #[default]
    LargestFirst,

    /// Repeatedly remove a minimum-degree node; color in reverse removal order.
    SmallestLast,

    /// DSATUR: always color the node with the most distinctly colored neighbours.
    SaturationLargestFirst,

    /// Visit nodes in a seeded random order.
    RandomSequential { seed: u64 },

    /// Breadth-first traversal order per connected component.
    ConnectedSequentialBfs,

    /// Depth-first traversal order per connected component.
    ConnectedSequentialDfs,
}

impl ColoringStrategy {
    /// Every built-in strategy (random with seed 0).
    pub fn all() -> [ColoringStrategy; 6] {
        [
            ColoringStrategy::LargestFirst,
            ColoringStrategy::SmallestLast,
            ColoringStrategy::SaturationLargestFirst,
            ColoringStrategy::RandomSequential { seed: 0 },
            ColoringStrategy::ConnectedSequentialBfs,
            ColoringStrategy::ConnectedSequentialDfs,
        ]
    }

    /// Canonical strategy name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ColoringStrategy::LargestFirst => "largest_first",
            ColoringStrategy::SmallestLast => "smallest_last",
            ColoringStrategy::SaturationLargestFirst => "saturation_largest_first",
            ColoringStrategy::RandomSequential { .. } => "random_sequential",
            ColoringStrategy::ConnectedSequentialBfs => "connected_sequential_bfs",
            ColoringStrategy::ConnectedSequentialDfs => "connected_sequential_dfs",
        }
    }
}

impl std::fmt::Display for ColoringStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ColoringStrategy {
    type Err = SchedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "largest_first" => Ok(ColoringStrategy::LargestFirst),
            "smallest_last" => Ok(ColoringStrategy::SmallestLast),
            "saturation_largest_first" | "dsatur" => Ok(ColoringStrategy::SaturationLargestFirst),
            "random_sequential" | "random" => Ok(ColoringStrategy::RandomSequential { seed: 0 }),
            "connected_sequential_bfs" | "connected_sequential" | "bfs" => {
                Ok(ColoringStrategy::ConnectedSequentialBfs)
            }
            "connected_sequential_dfs" | "dfs" => Ok(ColoringStrategy::ConnectedSequentialDfs),
            other => Err(SchedError::UnknownColoring(other.to_string())),
        }
    }
}

impl Coloring for ColoringStrategy {
    fn name(&self) -> &str {
        self.as_str()
    }

    fn color(&self, graph: &ConflictGraph) -> Vec<usize> {
        match self {
            ColoringStrategy::LargestFirst => greedy(graph, &largest_first_order(graph)),
            ColoringStrategy::SmallestLast => greedy(graph, &smallest_last_order(graph)),
            ColoringStrategy::SaturationLargestFirst => dsatur(graph),
            ColoringStrategy::RandomSequential { seed } => {
                let mut order: Vec<NodeIndex> = graph.node_indices().collect();
                order.shuffle(&mut StdRng::seed_from_u64(*seed));
                greedy(graph, &order)
            }
            ColoringStrategy::ConnectedSequentialBfs => greedy(graph, &traversal_order(graph, false)),
            ColoringStrategy::ConnectedSequentialDfs => greedy(graph, &traversal_order(graph, true)),
        }
    }
}

const UNCOLORED: usize = usize::MAX;

fn degree(graph: &ConflictGraph, node: NodeIndex) -> usize {
    graph.neighbors(node).count()
}

fn sorted_neighbors(graph: &ConflictGraph, node: NodeIndex) -> Vec<NodeIndex> {
    let mut neighbors: Vec<NodeIndex> = graph.neighbors(node).collect();
    neighbors.sort_unstable();
    neighbors.dedup();
    neighbors
}

fn smallest_free_color(used: &FxHashSet<usize>) -> usize {
    let mut color = 0;
    while used.contains(&color) {
        color += 1;
    }
    color
}

/// Color nodes in the given order with the smallest color free among neighbours.
fn greedy(graph: &ConflictGraph, order: &[NodeIndex]) -> Vec<usize> {
    let mut colors = vec![UNCOLORED; graph.node_count()];
    for &node in order {
        let used: FxHashSet<usize> = graph
            .neighbors(node)
            .map(|n| colors[n.index()])
            .filter(|&c| c != UNCOLORED)
            .collect();
        colors[node.index()] = smallest_free_color(&used);
    }
    colors
}

fn largest_first_order(graph: &ConflictGraph) -> Vec<NodeIndex> {
    let mut order: Vec<NodeIndex> = graph.node_indices().collect();
    order.sort_by_key(|&n| (Reverse(degree(graph, n)), n.index()));
    order
}

fn smallest_last_order(graph: &ConflictGraph) -> Vec<NodeIndex> {
    let n = graph.node_count();
    let mut degrees: Vec<usize> = graph.node_indices().map(|v| degree(graph, v)).collect();
    let mut removed = vec![false; n];
    let mut removal = Vec::with_capacity(n);

    for _ in 0..n {
        let Some(next) = (0..n)
            .filter(|&i| !removed[i])
            .min_by_key(|&i| (degrees[i], i))
        else {
            break;
        };
        removed[next] = true;
        removal.push(NodeIndex::new(next));
        for neighbor in graph.neighbors(NodeIndex::new(next)) {
            if !removed[neighbor.index()] {
                degrees[neighbor.index()] = degrees[neighbor.index()].saturating_sub(1);
            }
        }
    }

    removal.reverse();
    removal
}

fn dsatur(graph: &ConflictGraph) -> Vec<usize> {
    let n = graph.node_count();
    let mut colors = vec![UNCOLORED; n];
    let mut saturation: Vec<FxHashSet<usize>> = vec![FxHashSet::default(); n];
    let degrees: Vec<usize> = graph.node_indices().map(|v| degree(graph, v)).collect();

    for _ in 0..n {
        let Some(next) = (0..n)
            .filter(|&i| colors[i] == UNCOLORED)
            .max_by_key(|&i| (saturation[i].len(), degrees[i], Reverse(i)))
        else {
            break;
        };
        let color = smallest_free_color(&saturation[next]);
        colors[next] = color;
        for neighbor in graph.neighbors(NodeIndex::new(next)) {
            saturation[neighbor.index()].insert(color);
        }
    }

    colors
}

fn traversal_order(graph: &ConflictGraph, depth_first: bool) -> Vec<NodeIndex> {
    let n = graph.node_count();
    let mut visited = vec![false; n];
    let mut order = Vec::with_capacity(n);

    for start in graph.node_indices() {
        if visited[start.index()] {
            continue;
        }
        if depth_first {
            let mut stack = vec![start];
            while let Some(node) = stack.pop() {
                if visited[node.index()] {
                    continue;
                }
                visited[node.index()] = true;
                order.push(node);
                // Push in reverse so the lowest index is explored first.
                for neighbor in sorted_neighbors(graph, node).into_iter().rev() {
                    if !visited[neighbor.index()] {
                        stack.push(neighbor);
                    }
                }
            }
        } else {
            let mut queue = VecDeque::from([start]);
            visited[start.index()] = true;
            while let Some(node) = queue.pop_front() {
                order.push(node);
                for neighbor in sorted_neighbors(graph, node) {
                    if !visited[neighbor.index()] {
                        visited[neighbor.index()] = true;
                        queue.push_back(neighbor);
                    }
                }
            }
        }
    }

    order
}

/// Group node indices by color, lowest color first.
pub fn color_classes(colors: &[usize]) -> Vec<Vec<usize>> {
    let num_colors = colors.iter().copied().max().map_or(0, |c| c + 1);
    let mut classes = vec![Vec::new(); num_colors];
    for (node, &color) in colors.iter().enumerate() {
        classes[color].push(node);
    }
    classes.retain(|c| !c.is_empty());
    classes
}

/// Whether no edge connects two nodes of the same color.
pub fn is_valid_coloring(graph: &ConflictGraph, colors: &[usize]) -> bool {
    colors.len() == graph.node_count()
        && graph.edge_indices().all(|e| {
            graph
                .edge_endpoints(e)
                .is_none_or(|(a, b)| colors[a.index()] != colors[b.index()])
        })
}
