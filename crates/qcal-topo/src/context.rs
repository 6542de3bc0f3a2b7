//! Shared, lazily built topology context.

use std::sync::OnceLock;

use crate::conflict::ConflictModel;
use crate::error::TopoResult;
use crate::topology::Topology;

/// A validated topology together with its cached conflict model.
///
/// The conflict model is built on first access and the same instance is
/// returned on every later call.
#[derive(Debug)]
pub struct TopologyContext {
    topology: Topology,
    model: OnceLock<ConflictModel>,
}

impl TopologyContext {
    /// Validate a topology and wrap it.
    pub fn new(topology: Topology) -> TopoResult<Self> {
        topology.validate()?;
        Ok(Self {
            topology,
            model: OnceLock::new(),
        })
    }

    /// The underlying topology.
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// The conflict model, built on first use.
    pub fn conflict_model(&self) -> &ConflictModel {
        self.model.get_or_init(|| ConflictModel::build(&self.topology))
    }
}
