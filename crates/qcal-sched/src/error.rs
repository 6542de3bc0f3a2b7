//! Error handling for the calibration schedulers.

use qcal_topo::TopoError;
use thiserror::Error;

/// Result type for scheduler operations.
pub type SchedResult<T> = Result<T, SchedError>;

/// Errors that can occur while generating a schedule.
///
/// Every variant is a configuration error: the caller must change its
/// inputs, retrying the same call cannot succeed.
#[derive(Error, Debug)]
pub enum SchedError {
    /// A filter stage removed every candidate pair.
    #[error("No candidate pairs left after {stage}")]
    NoCandidatePairs { stage: String },

    /// No surviving pair has both qubits mapped to a MUX.
    #[error("No candidate pairs left after MUX mapping")]
    NoMappedPairs,

    /// The scheduler was called with nothing to schedule.
    #[error("Empty input: {0}")]
    EmptyInput(String),

    /// A MUX ID outside the chip.
    #[error("Unknown MUX {mux}: the topology has {num_muxes} MUXes")]
    UnknownMux { mux: u32, num_muxes: u32 },

    /// Exclusions removed every candidate qubit.
    #[error("All candidate qubits were excluded")]
    AllExcluded,

    /// Unknown coloring strategy name.
    #[error("Unknown coloring strategy: {0}")]
    UnknownColoring(String),

    /// Group size limit must be at least one.
    #[error("Invalid max group size: {0}")]
    InvalidMaxGroupSize(usize),

    /// A coupling pair string could not be parsed.
    #[error("Invalid coupling pair: {0}")]
    InvalidPair(String),

    /// Topology could not be loaded or validated.
    #[error("Topology error: {0}")]
    Topology(#[from] TopoError),

    /// IO error while reading metrics.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML deserialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SchedError::NoCandidatePairs {
            stage: "direction".to_string(),
        };
        assert_eq!(err.to_string(), "No candidate pairs left after direction");

        let err = SchedError::NoMappedPairs;
        assert_eq!(err.to_string(), "No candidate pairs left after MUX mapping");
    }
}
