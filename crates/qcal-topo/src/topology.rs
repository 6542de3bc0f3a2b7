//! Static chip topology and MUX wiring description.
//!
//! A [`Topology`] is the read-only input to every scheduler: which qubits
//! exist, how they are grouped into MUXes (channel groups), which physical
//! modules each MUX is wired to, and which qubit pairs are coupled.
//!
//! Topologies are normally loaded from YAML:
//!
//! ```yaml
//! name: square-16
//! num_qubits: 16
//! grid_size: 4
//! layout: mux_block
//! muxes:
//!   - mux: 0
//!     ctrl: ["Q2A-CTRL1", "Q2A-CTRL2"]
//!     read_out: ["R1A-READ0"]
//!   - mux: 1
//!     ctrl: ["Q3B-CTRL1"]
//!     read_out: ["R1A-READ1"]
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{TopoError, TopoResult};

fn default_mux_size() -> u32 {
    4
}

/// How qubit indices are laid out on the 2-D chip grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridLayout {
    /// `row = index / side`, `col = index % side`.
    #[default]
    RowMajor,

    /// Every MUX occupies a 2×2 block; MUXes tile the grid row-major.
    MuxBlock,
}

/// Physical ports wired to one MUX.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MuxWiring {
    /// MUX (channel group) ID.
    pub mux: u32,

    /// Control ports.
    #[serde(default)]
    pub ctrl: Vec<String>,

    /// Readout output ports.
    #[serde(default)]
    pub read_out: Vec<String>,

    /// Readout input ports.
    #[serde(default)]
    pub read_in: Vec<String>,

    /// Pump ports.
    #[serde(default)]
    pub pump: Vec<String>,
}

impl MuxWiring {
    /// Create an empty wiring entry for a MUX.
    pub fn new(mux: u32) -> Self {
        Self {
            mux,
            ..Default::default()
        }
    }

    /// Add control ports.
    pub fn with_ctrl(mut self, ports: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.ctrl.extend(ports.into_iter().map(Into::into));
        self
    }

    /// Add readout output ports.
    pub fn with_read_out(mut self, ports: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.read_out.extend(ports.into_iter().map(Into::into));
        self
    }

    /// Add readout input ports.
    pub fn with_read_in(mut self, ports: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.read_in.extend(ports.into_iter().map(Into::into));
        self
    }

    /// Add pump ports.
    pub fn with_pump(mut self, ports: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.pump.extend(ports.into_iter().map(Into::into));
        self
    }

    /// Iterate over every port wired to this MUX.
    pub fn ports(&self) -> impl Iterator<Item = &str> {
        self.ctrl
            .iter()
            .chain(&self.read_out)
            .chain(&self.read_in)
            .chain(&self.pump)
            .map(String::as_str)
    }

    /// Distinct module identifiers used by this MUX.
    pub fn modules(&self) -> BTreeSet<&str> {
        self.ports().map(module_name).collect()
    }
}

/// Module identifier of a port name.
///
/// `"Q73A-CTRL1"` belongs to module `"Q73A"`; a name without `-` is its own module.
pub fn module_name(port: &str) -> &str {
    port.split_once('-').map_or(port, |(module, _)| module)
}

/// Static topology of a chip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    /// Human-readable topology name.
    pub name: String,

    /// Number of qubits on the chip.
    pub num_qubits: u32,

    /// Number of qubits per MUX.
    #[serde(default = "default_mux_size")]
    pub mux_size: u32,

    /// Side length of the square qubit grid.
    pub grid_size: u32,

    /// Qubit index layout on the grid.
    #[serde(default)]
    pub layout: GridLayout,

    /// Per-MUX wiring table.
    #[serde(default)]
    pub muxes: Vec<MuxWiring>,

    /// Explicit qubit → MUX assignments overriding the arithmetic rule.
    #[serde(default)]
    pub qubit_mux: BTreeMap<String, u32>,

    /// Undirected coupling edges. Empty means nearest neighbours on the grid.
    #[serde(default)]
    pub couplings: Vec<[u32; 2]>,

    /// Explicit two-qubit gate direction table (control, target).
    #[serde(default)]
    pub directions: Option<Vec<[String; 2]>>,
}

impl Topology {
    /// Create a topology with no wiring and grid-derived couplings.
    pub fn new(name: impl Into<String>, num_qubits: u32, grid_size: u32) -> Self {
        Self {
            name: name.into(),
            num_qubits,
            mux_size: default_mux_size(),
            grid_size,
            layout: GridLayout::default(),
            muxes: Vec::new(),
            qubit_mux: BTreeMap::new(),
            couplings: Vec::new(),
            directions: None,
        }
    }

    /// A fully populated square lattice with MUX-block layout.
    pub fn square_lattice(name: impl Into<String>, grid_size: u32) -> Self {
        Self::new(name, grid_size * grid_size, grid_size).with_layout(GridLayout::MuxBlock)
    }

    /// Set the MUX size.
    pub fn with_mux_size(mut self, mux_size: u32) -> Self {
        self.mux_size = mux_size;
        self
    }

    /// Set the grid layout.
    pub fn with_layout(mut self, layout: GridLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Add a MUX wiring entry.
    pub fn with_mux(mut self, wiring: MuxWiring) -> Self {
        self.muxes.push(wiring);
        self
    }

    /// Add an undirected coupling edge.
    pub fn with_coupling(mut self, a: u32, b: u32) -> Self {
        self.couplings.push([a, b]);
        self
    }

    /// Add an entry to the explicit direction table.
    pub fn with_direction(mut self, control: impl Into<String>, target: impl Into<String>) -> Self {
        self.directions
            .get_or_insert_with(Vec::new)
            .push([control.into(), target.into()]);
        self
    }

    /// Override the MUX of a single qubit.
    pub fn with_qubit_mux(mut self, qid: impl Into<String>, mux: u32) -> Self {
        self.qubit_mux.insert(qid.into(), mux);
        self
    }

    /// Load and validate a topology from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> TopoResult<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&contents)
    }

    /// Parse and validate a topology from a YAML string.
    pub fn from_yaml_str(yaml: &str) -> TopoResult<Self> {
        let topology: Topology = serde_yaml_ng::from_str(yaml)?;
        topology.validate()?;
        Ok(topology)
    }

    /// Validate structural constraints.
    pub fn validate(&self) -> TopoResult<()> {
        if self.mux_size == 0 {
            return Err(TopoError::Invalid("mux_size must be positive".into()));
        }
        if self.grid_size == 0 {
            return Err(TopoError::Invalid("grid_size must be positive".into()));
        }
        if u64::from(self.num_qubits) > u64::from(self.grid_size) * u64::from(self.grid_size) {
            return Err(TopoError::Invalid(format!(
                "{} qubits do not fit on a {}x{} grid",
                self.num_qubits, self.grid_size, self.grid_size
            )));
        }
        if self.layout == GridLayout::MuxBlock && (self.mux_size != 4 || self.grid_size % 2 != 0) {
            return Err(TopoError::Invalid(
                "mux_block layout requires mux_size 4 and an even grid_size".into(),
            ));
        }

        let mut seen = BTreeSet::new();
        for wiring in &self.muxes {
            if !seen.insert(wiring.mux) {
                return Err(TopoError::DuplicateMux(wiring.mux));
            }
        }

        for &[a, b] in &self.couplings {
            if a >= self.num_qubits || b >= self.num_qubits || a == b {
                return Err(TopoError::CouplingOutOfRange(a, b));
            }
        }

        Ok(())
    }

    /// Parse a qubit ID such as `"5"`, `"Q05"` or `"q5"` into its index.
    pub fn qubit_index(qid: &str) -> Option<u32> {
        let digits = qid.trim().trim_start_matches(|c: char| c.is_ascii_alphabetic());
        digits.parse().ok()
    }

    /// Grid coordinates `(row, col)` of a qubit index.
    pub fn coordinates(&self, index: u32) -> (u32, u32) {
        match self.layout {
            GridLayout::RowMajor => (index / self.grid_size, index % self.grid_size),
            GridLayout::MuxBlock => {
                let mux = index / 4;
                let local = index % 4;
                let mux_side = (self.grid_size / 2).max(1);
                let row = (mux / mux_side) * 2 + local / 2;
                let col = (mux % mux_side) * 2 + local % 2;
                (row, col)
            }
        }
    }

    /// Undirected coupling edges as sorted `(low, high)` index pairs.
    ///
    /// Uses the explicit `couplings` list when present, otherwise connects
    /// every qubit to its right and lower grid neighbour.
    pub fn coupling_edges(&self) -> Vec<(u32, u32)> {
        let mut edges: Vec<(u32, u32)> = if self.couplings.is_empty() {
            self.grid_edges()
        } else {
            self.couplings
                .iter()
                .map(|&[a, b]| (a.min(b), a.max(b)))
                .collect()
        };
        edges.sort_unstable();
        edges.dedup();
        edges
    }

    fn grid_edges(&self) -> Vec<(u32, u32)> {
        let by_coord: FxHashMap<(u32, u32), u32> = (0..self.num_qubits)
            .map(|i| (self.coordinates(i), i))
            .collect();

        let mut edges = Vec::new();
        for i in 0..self.num_qubits {
            let (row, col) = self.coordinates(i);
            for neighbour in [(row, col + 1), (row + 1, col)] {
                if let Some(&j) = by_coord.get(&neighbour) {
                    edges.push((i.min(j), i.max(j)));
                }
            }
        }
        edges
    }

    /// The explicit direction table, if one is defined.
    pub fn direction_table(&self) -> Option<&[[String; 2]]> {
        self.directions.as_deref()
    }
}
