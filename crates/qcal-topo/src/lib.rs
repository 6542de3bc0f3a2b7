//! qcal Topology and Conflict Model
//!
//! This crate turns a static chip description (qubits, MUX wiring, coupling
//! edges) into the conflict model every calibration scheduler works from:
//!
//! - a qubit → MUX (channel group) map, built from `index / mux_size` and
//!   overridable per qubit,
//! - a symmetric MUX conflict map: two MUXes conflict when they share a
//!   physical module,
//! - a box type (A, B or MIXED) per MUX, derived from the trailing letter of
//!   its module names.
//!
//! # Example
//!
//! ```ignore
//! use qcal_topo::{Topology, TopologyContext};
//!
//! let topology = Topology::from_file("chip.yaml")?;
//! let ctx = TopologyContext::new(topology)?;
//!
//! let model = ctx.conflict_model();
//! println!("Q5 lives on MUX {:?}", model.mux_of("5"));
//! ```

pub mod conflict;
pub mod context;
pub mod error;
pub mod topology;

pub use conflict::{BoxType, ConflictModel, canonical_qid};
pub use context::TopologyContext;
pub use error::{TopoError, TopoResult};
pub use topology::{GridLayout, MuxWiring, Topology, module_name};
