//! Hardware conflict model derived from the MUX wiring table.
//!
//! Two MUXes conflict when they share a physical module. Each MUX is also
//! classified into a box type from the trailing letter of its module names;
//! box types A and B can be driven at the same time, MIXED conflicts with both.

use std::collections::{BTreeMap, BTreeSet};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::topology::Topology;

/// Coarse exclusivity class of a MUX.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BoxType {
    /// Every module of the MUX is an A-type box.
    A,
    /// Every module of the MUX is a B-type box.
    B,
    /// Modules of both types, or of an unrecognised type.
    Mixed,
}

impl BoxType {
    /// Scheduling order of the box classes.
    pub const ORDER: [BoxType; 3] = [BoxType::A, BoxType::B, BoxType::Mixed];

    /// Box type of a single module from its trailing letter.
    pub fn of_module(module: &str) -> Option<BoxType> {
        match module.chars().last().map(|c| c.to_ascii_uppercase()) {
            Some('A') => Some(BoxType::A),
            Some('B') => Some(BoxType::B),
            _ => None,
        }
    }

    /// Classify a set of modules.
    ///
    /// Unknown modules and empty sets are MIXED.
    pub fn classify<'a>(modules: impl IntoIterator<Item = &'a str>) -> BoxType {
        let mut found: Option<BoxType> = None;
        let mut any = false;
        for module in modules {
            any = true;
            match (BoxType::of_module(module), found) {
                (None, _) => return BoxType::Mixed,
                (Some(t), None) => found = Some(t),
                (Some(t), Some(prev)) if t != prev => return BoxType::Mixed,
                _ => {}
            }
        }
        if any {
            found.unwrap_or(BoxType::Mixed)
        } else {
            BoxType::Mixed
        }
    }
}

impl std::fmt::Display for BoxType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BoxType::A => write!(f, "A"),
            BoxType::B => write!(f, "B"),
            BoxType::Mixed => write!(f, "MIXED"),
        }
    }
}

/// Qubit → MUX mapping plus MUX conflict and box-type tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictModel {
    num_qubits: u32,
    mux_size: u32,
    qubit_mux: FxHashMap<String, u32>,
    mux_members: BTreeMap<u32, Vec<String>>,
    mux_conflicts: BTreeMap<u32, BTreeSet<u32>>,
    mux_box: BTreeMap<u32, BoxType>,
}

impl ConflictModel {
    /// Build the conflict model for a topology.
    pub fn build(topology: &Topology) -> Self {
        let wired: BTreeSet<u32> = topology.muxes.iter().map(|w| w.mux).collect();

        let mut qubit_mux = FxHashMap::default();
        for index in 0..topology.num_qubits {
            let mux = index / topology.mux_size;
            if wired.is_empty() || wired.contains(&mux) {
                qubit_mux.insert(index.to_string(), mux);
            }
        }
        for (qid, &mux) in &topology.qubit_mux {
            qubit_mux.insert(canonical_qid(qid), mux);
        }

        let mut mux_members: BTreeMap<u32, Vec<String>> = BTreeMap::new();
        for (qid, &mux) in &qubit_mux {
            mux_members.entry(mux).or_default().push(qid.clone());
        }
        for members in mux_members.values_mut() {
            members.sort_by_key(|q| (Topology::qubit_index(q).unwrap_or(u32::MAX), q.clone()));
        }

        // module -> MUXes using it
        let mut module_users: BTreeMap<&str, BTreeSet<u32>> = BTreeMap::new();
        for wiring in &topology.muxes {
            for module in wiring.modules() {
                module_users.entry(module).or_default().insert(wiring.mux);
            }
        }

        let mut mux_conflicts: BTreeMap<u32, BTreeSet<u32>> = BTreeMap::new();
        for users in module_users.values() {
            for &a in users {
                for &b in users {
                    if a != b {
                        mux_conflicts.entry(a).or_default().insert(b);
                    }
                }
            }
        }

        let mux_box = topology
            .muxes
            .iter()
            .map(|w| (w.mux, BoxType::classify(w.modules())))
            .collect();

        tracing::debug!(
            topology = %topology.name,
            qubits = qubit_mux.len(),
            muxes = mux_members.len(),
            conflicting_muxes = mux_conflicts.len(),
            "Built conflict model"
        );

        Self {
            num_qubits: topology.num_qubits,
            mux_size: topology.mux_size,
            qubit_mux,
            mux_members,
            mux_conflicts,
            mux_box,
        }
    }

    /// Number of qubits per MUX.
    pub fn mux_size(&self) -> u32 {
        self.mux_size
    }

    /// MUX of a qubit, if it is mapped.
    pub fn mux_of(&self, qid: &str) -> Option<u32> {
        self.qubit_mux.get(&canonical_qid(qid)).copied()
    }

    /// Whether the qubit is mapped to a MUX.
    pub fn is_mapped(&self, qid: &str) -> bool {
        self.mux_of(qid).is_some()
    }

    /// Whether two MUXes are the same or conflict through a shared module.
    pub fn muxes_conflict(&self, a: u32, b: u32) -> bool {
        a == b || self.mux_conflicts.get(&a).is_some_and(|s| s.contains(&b))
    }

    /// MUXes conflicting with `mux` (never includes `mux` itself).
    pub fn conflicting_muxes(&self, mux: u32) -> impl Iterator<Item = u32> + '_ {
        self.mux_conflicts.get(&mux).into_iter().flatten().copied()
    }

    /// The full symmetric conflict map.
    pub fn conflict_map(&self) -> &BTreeMap<u32, BTreeSet<u32>> {
        &self.mux_conflicts
    }

    /// Box type of a MUX. MUXes without wiring are MIXED.
    pub fn box_type(&self, mux: u32) -> BoxType {
        self.mux_box.get(&mux).copied().unwrap_or(BoxType::Mixed)
    }

    /// Box type of the MUX a qubit belongs to. Unmapped qubits are MIXED.
    pub fn qubit_box_type(&self, qid: &str) -> BoxType {
        self.mux_of(qid).map_or(BoxType::Mixed, |mux| self.box_type(mux))
    }

    /// Box types of all wired MUXes.
    pub fn box_types(&self) -> &BTreeMap<u32, BoxType> {
        &self.mux_box
    }

    /// Mapped qubits of a MUX, in index order.
    pub fn members(&self, mux: u32) -> &[String] {
        self.mux_members.get(&mux).map_or(&[], Vec::as_slice)
    }

    /// All MUXes that have at least one mapped qubit.
    pub fn muxes(&self) -> impl Iterator<Item = u32> + '_ {
        self.mux_members.keys().copied()
    }

    /// Number of MUXes the chip's qubit range is divided into.
    pub fn num_muxes(&self) -> u32 {
        self.num_qubits.checked_div(self.mux_size).map_or(0, |full| {
            full + u32::from(self.num_qubits % self.mux_size != 0)
        })
    }

    /// The fixed-size qubit range of a MUX: `mux * size .. (mux + 1) * size`,
    /// cut at the last qubit. `None` if the MUX lies outside the chip.
    pub fn mux_qids(&self, mux: u32) -> Option<Vec<String>> {
        let start = mux
            .checked_mul(self.mux_size)
            .filter(|&start| start < self.num_qubits)?;
        let end = start.saturating_add(self.mux_size).min(self.num_qubits);
        Some((start..end).map(|i| i.to_string()).collect())
    }
}

/// Canonical form of a qubit ID: its decimal index when it has one.
pub fn canonical_qid(qid: &str) -> String {
    Topology::qubit_index(qid).map_or_else(|| qid.trim().to_string(), |i| i.to_string())
}
