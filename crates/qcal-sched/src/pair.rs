//! Directed coupling pairs.

use std::str::FromStr;

use qcal_topo::canonical_qid;
use serde::{Deserialize, Serialize};

use crate::error::SchedError;

/// A direction-ordered qubit pair: `(control, target)`.
///
/// Serializes as a two-element array and displays as `"control-target"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CouplingPair(pub String, pub String);

impl CouplingPair {
    /// Create a pair, canonicalizing both qubit IDs.
    pub fn new(control: impl AsRef<str>, target: impl AsRef<str>) -> Self {
        Self(canonical_qid(control.as_ref()), canonical_qid(target.as_ref()))
    }

    /// The control (first) qubit.
    pub fn control(&self) -> &str {
        &self.0
    }

    /// The target (second) qubit.
    pub fn target(&self) -> &str {
        &self.1
    }

    /// The same pair in the opposite direction.
    pub fn reversed(&self) -> Self {
        Self(self.1.clone(), self.0.clone())
    }

    /// Both qubits, control first.
    pub fn qids(&self) -> [&str; 2] {
        [&self.0, &self.1]
    }

    /// Whether the two pairs touch a common qubit.
    pub fn shares_qubit(&self, other: &CouplingPair) -> bool {
        self.qids().iter().any(|q| other.qids().contains(q))
    }
}

impl std::fmt::Display for CouplingPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.0, self.1)
    }
}

impl FromStr for CouplingPair {
    type Err = SchedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('-') {
            Some((c, t)) if !c.trim().is_empty() && !t.trim().is_empty() => {
                Ok(CouplingPair::new(c, t))
            }
            _ => Err(SchedError::InvalidPair(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_display_and_parse() {
        let pair: CouplingPair = "Q00-Q01".parse().unwrap();
        assert_eq!(pair, CouplingPair::new("0", "1"));
        assert_eq!(pair.to_string(), "0-1");
        assert_eq!(pair.reversed().to_string(), "1-0");

        assert!("0".parse::<CouplingPair>().is_err());
        assert!("-1".parse::<CouplingPair>().is_err());
    }

    #[test]
    fn test_shares_qubit() {
        let a = CouplingPair::new("0", "1");
        assert!(a.shares_qubit(&CouplingPair::new("1", "2")));
        assert!(a.shares_qubit(&CouplingPair::new("5", "0")));
        assert!(!a.shares_qubit(&CouplingPair::new("2", "3")));
    }

    #[test]
    fn test_pair_serializes_as_array() {
        let json = serde_json::to_string(&CouplingPair::new("4", "5")).unwrap();
        assert_eq!(json, r#"["4","5"]"#);
    }
}
