//! Accumulated calibration results keyed by qid and parameter name.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::task::{OutputParameter, ParameterMap, TaskId, TaskType};

/// Calibration data of one run, split into qubit and coupling maps.
///
/// Only qubit and coupling tasks write calibration data; calls with other
/// task types are no-ops.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibData {
    #[serde(default)]
    pub qubit: BTreeMap<String, ParameterMap>,
    #[serde(default)]
    pub coupling: BTreeMap<String, ParameterMap>,
}

impl CalibData {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self, task_type: TaskType) -> Option<&BTreeMap<String, ParameterMap>> {
        match task_type {
            TaskType::Qubit => Some(&self.qubit),
            TaskType::Coupling => Some(&self.coupling),
            TaskType::Global | TaskType::System => None,
        }
    }

    fn map_mut(&mut self, task_type: TaskType) -> Option<&mut BTreeMap<String, ParameterMap>> {
        match task_type {
            TaskType::Qubit => Some(&mut self.qubit),
            TaskType::Coupling => Some(&mut self.coupling),
            TaskType::Global | TaskType::System => None,
        }
    }

    /// Make sure `qid` has an (initially empty) entry.
    pub fn ensure_qid(&mut self, task_type: TaskType, qid: &str) {
        if let Some(map) = self.map_mut(task_type) {
            map.entry(qid.to_string()).or_default();
        }
    }

    /// Upsert parameters by name; the last write wins.
    pub fn put(&mut self, task_type: TaskType, qid: &str, params: &ParameterMap) {
        if let Some(map) = self.map_mut(task_type) {
            let entry = map.entry(qid.to_string()).or_default();
            for (name, param) in params {
                entry.insert(name.clone(), param.clone());
            }
        }
    }

    /// Remove the named parameters of `qid`.
    pub fn remove_keys<'a>(
        &mut self,
        task_type: TaskType,
        qid: &str,
        keys: impl IntoIterator<Item = &'a str>,
    ) {
        if let Some(params) = self.map_mut(task_type).and_then(|m| m.get_mut(qid)) {
            for key in keys {
                params.remove(key);
            }
        }
    }

    /// Remove every parameter of `qid` that `task_id` wrote.
    pub fn remove_task_outputs(&mut self, task_type: TaskType, qid: &str, task_id: TaskId) {
        if let Some(params) = self.map_mut(task_type).and_then(|m| m.get_mut(qid)) {
            params.retain(|_, p| p.task_id != Some(task_id));
        }
    }

    /// Parameters of `qid`.
    pub fn params(&self, task_type: TaskType, qid: &str) -> Option<&ParameterMap> {
        self.map(task_type).and_then(|m| m.get(qid))
    }

    /// One parameter of `qid`.
    pub fn get(&self, task_type: TaskType, qid: &str, name: &str) -> Option<&OutputParameter> {
        self.params(task_type, qid).and_then(|p| p.get(name))
    }

    /// Upsert every parameter of `other` into `self`.
    pub fn merge(&mut self, other: &CalibData) {
        for (qid, params) in &other.qubit {
            self.put(TaskType::Qubit, qid, params);
        }
        for (qid, params) in &other.coupling {
            self.put(TaskType::Coupling, qid, params);
        }
    }

    /// Total number of stored parameters.
    pub fn len(&self) -> usize {
        self.qubit.values().chain(self.coupling.values()).map(|p| p.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(entries: &[(&str, f64)], task_id: TaskId) -> ParameterMap {
        entries
            .iter()
            .map(|(name, v)| {
                (
                    name.to_string(),
                    OutputParameter::new(*v).with_provenance("exec-1", task_id),
                )
            })
            .collect()
    }

    #[test]
    fn test_put_is_last_write_wins() {
        let mut data = CalibData::new();
        let t1 = TaskId::new();
        data.put(TaskType::Qubit, "5", &params(&[("t1", 40.0), ("t2", 30.0)], t1));
        data.put(TaskType::Qubit, "5", &params(&[("t1", 42.0)], t1));
        assert_eq!(data.get(TaskType::Qubit, "5", "t1").unwrap().value, 42.0);
        assert_eq!(data.get(TaskType::Qubit, "5", "t2").unwrap().value, 30.0);
        assert_eq!(data.len(), 2);
    }

    #[test]
    fn test_global_tasks_do_not_write() {
        let mut data = CalibData::new();
        data.put(TaskType::Global, "", &params(&[("x", 1.0)], TaskId::new()));
        assert!(data.is_empty());
    }

    #[test]
    fn test_remove_keys_and_task_outputs() {
        let mut data = CalibData::new();
        let (a, b) = (TaskId::new(), TaskId::new());
        data.put(TaskType::Coupling, "0-1", &params(&[("cr_amp", 0.3)], a));
        data.put(TaskType::Coupling, "0-1", &params(&[("zx90", 0.9), ("fid", 0.99)], b));

        data.remove_keys(TaskType::Coupling, "0-1", ["fid"]);
        assert!(data.get(TaskType::Coupling, "0-1", "fid").is_none());

        data.remove_task_outputs(TaskType::Coupling, "0-1", b);
        assert!(data.get(TaskType::Coupling, "0-1", "zx90").is_none());
        assert!(data.get(TaskType::Coupling, "0-1", "cr_amp").is_some());
    }

    #[test]
    fn test_merge() {
        let mut base = CalibData::new();
        base.put(TaskType::Qubit, "0", &params(&[("a", 1.0)], TaskId::new()));
        let mut delta = CalibData::new();
        delta.put(TaskType::Qubit, "0", &params(&[("a", 2.0), ("b", 3.0)], TaskId::new()));
        delta.put(TaskType::Coupling, "0-1", &params(&[("c", 4.0)], TaskId::new()));

        base.merge(&delta);
        assert_eq!(base.get(TaskType::Qubit, "0", "a").unwrap().value, 2.0);
        assert_eq!(base.len(), 3);
    }
}
