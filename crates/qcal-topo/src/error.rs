//! Error handling for topology loading and conflict model construction.

use thiserror::Error;

/// Result type for topology operations.
pub type TopoResult<T> = Result<T, TopoError>;

/// Errors that can occur while loading or validating a topology.
#[derive(Error, Debug)]
pub enum TopoError {
    /// The topology description is structurally invalid.
    #[error("Invalid topology: {0}")]
    Invalid(String),

    /// A coupling edge references a qubit that does not exist.
    #[error("Coupling ({0}, {1}) references a qubit outside the topology")]
    CouplingOutOfRange(u32, u32),

    /// The same MUX appears twice in the wiring table.
    #[error("Duplicate wiring entry for MUX {0}")]
    DuplicateMux(u32),

    /// IO error while reading a topology file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML deserialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TopoError::CouplingOutOfRange(3, 99);
        assert_eq!(
            err.to_string(),
            "Coupling (3, 99) references a qubit outside the topology"
        );

        let err = TopoError::DuplicateMux(7);
        assert_eq!(err.to_string(), "Duplicate wiring entry for MUX 7");
    }
}
