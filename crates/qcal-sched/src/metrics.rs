//! Measured per-qubit data consumed by the pair filters.

use std::collections::BTreeMap;
use std::path::Path;

use qcal_topo::canonical_qid;
use serde::{Deserialize, Serialize};

use crate::error::SchedResult;

/// Frequencies and quality metrics keyed by qubit ID.
///
/// Absent frequencies make the direction filter fall back to design-based
/// inference.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QubitMetrics {
    /// Qubit frequency (GHz) per qubit.
    #[serde(default)]
    pub frequencies: BTreeMap<String, f64>,

    /// Named quality metrics (e.g. `x90_gate_fidelity`) per qubit.
    #[serde(default)]
    pub quality: BTreeMap<String, BTreeMap<String, f64>>,
}

impl QubitMetrics {
    /// Empty metrics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load metrics from a JSON or YAML file (chosen by extension).
    pub fn from_file(path: impl AsRef<Path>) -> SchedResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let metrics: QubitMetrics = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml" | "yml") => serde_yaml_ng::from_str(&contents)?,
            _ => serde_json::from_str(&contents)?,
        };
        Ok(metrics.canonicalized())
    }

    /// Set the frequency of a qubit.
    pub fn with_frequency(mut self, qid: impl AsRef<str>, frequency: f64) -> Self {
        self.frequencies.insert(canonical_qid(qid.as_ref()), frequency);
        self
    }

    /// Set a quality metric of a qubit.
    pub fn with_quality(mut self, metric: impl Into<String>, qid: impl AsRef<str>, value: f64) -> Self {
        self.quality
            .entry(metric.into())
            .or_default()
            .insert(canonical_qid(qid.as_ref()), value);
        self
    }

    /// Whether any measured frequency is available.
    pub fn has_frequencies(&self) -> bool {
        !self.frequencies.is_empty()
    }

    /// Measured frequency of a qubit.
    pub fn frequency(&self, qid: &str) -> Option<f64> {
        self.frequencies.get(&canonical_qid(qid)).copied()
    }

    /// Quality metric of a qubit.
    pub fn quality(&self, metric: &str, qid: &str) -> Option<f64> {
        self.quality
            .get(metric)
            .and_then(|m| m.get(&canonical_qid(qid)))
            .copied()
    }

    fn canonicalized(self) -> Self {
        Self {
            frequencies: self
                .frequencies
                .into_iter()
                .map(|(q, f)| (canonical_qid(&q), f))
                .collect(),
            quality: self
                .quality
                .into_iter()
                .map(|(name, values)| {
                    let values = values
                        .into_iter()
                        .map(|(q, v)| (canonical_qid(&q), v))
                        .collect();
                    (name, values)
                })
                .collect(),
        }
    }
}
