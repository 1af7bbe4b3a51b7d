use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Tokens that mark a result as a failed or degraded execution.
const FAILURE_TOKENS: [&str; 2] = ["error", "failed"];

/// Output of one phase execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseResult {
    pub phase: String,
    #[serde(default)]
    pub data: Map<String, Value>,
    pub finished_at: DateTime<Utc>,
}

impl PhaseResult {
    pub fn new(phase: impl Into<String>) -> Self {
        Self {
            phase: phase.into(),
            data: Map::new(),
            finished_at: Utc::now(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Result recorded in place of a phase that returned an error.
    pub fn failure(phase: impl Into<String>, error: impl Into<String>) -> Self {
        Self::new(phase)
            .with("status", "failed")
            .with("error", error.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Read a field as a number. Integers and floats collapse to the same `f64`,
    /// so `0` and `0.0` compare equal.
    pub fn number(&self, key: &str) -> Option<f64> {
        self.data.get(key).and_then(Value::as_f64)
    }

    /// True when the serialized payload mentions an error or a failure.
    pub fn mentions_failure(&self) -> bool {
        let rendered = serde_json::to_string(&self.data).unwrap_or_default();
        FAILURE_TOKENS.iter().any(|token| rendered.contains(token))
    }

    pub fn is_zero_count(&self) -> bool {
        self.number("count") == Some(0.0)
    }
}

/// Append-only record of the results produced in one run, in execution order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct History {
    results: Vec<PhaseResult>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, result: PhaseResult) {
        self.results.push(result);
    }

    pub fn iter(&self) -> impl Iterator<Item = &PhaseResult> {
        self.results.iter()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn last(&self) -> Option<&PhaseResult> {
        self.results.last()
    }

    pub fn contains_phase(&self, phase: &str) -> bool {
        self.results.iter().any(|r| r.phase == phase)
    }

    pub fn phases_seen(&self) -> HashSet<&str> {
        self.results.iter().map(|r| r.phase.as_str()).collect()
    }

    pub fn as_slice(&self) -> &[PhaseResult] {
        &self.results
    }
}

impl<'a> IntoIterator for &'a History {
    type Item = &'a PhaseResult;
    type IntoIter = std::slice::Iter<'a, PhaseResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_number_collapses_int_and_float() {
        let int_zero = PhaseResult::new("subdomain").with("count", 0);
        let float_zero = PhaseResult::new("subdomain").with("count", json!(0.0));
        let five = PhaseResult::new("subdomain").with("count", 5u64);

        assert_eq!(int_zero.number("count"), Some(0.0));
        assert_eq!(float_zero.number("count"), Some(0.0));
        assert!(int_zero.is_zero_count());
        assert!(float_zero.is_zero_count());
        assert!(!five.is_zero_count());
        assert!(!PhaseResult::new("x").with("count", "0").is_zero_count());
    }

    #[test]
    fn test_mentions_failure() {
        assert!(PhaseResult::failure("portscan", "connection refused").mentions_failure());
        assert!(PhaseResult::new("webenum")
            .with("note", "request failed")
            .mentions_failure());
        assert!(!PhaseResult::new("passive")
            .with("ips", json!(["10.0.0.1"]))
            .mentions_failure());
    }

    #[test]
    fn test_history_is_ordered() {
        let mut history = History::new();
        history.push(PhaseResult::new("passive"));
        history.push(PhaseResult::new("subdomain"));
        history.push(PhaseResult::new("passive"));

        let order: Vec<&str> = history.iter().map(|r| r.phase.as_str()).collect();
        assert_eq!(order, vec!["passive", "subdomain", "passive"]);
        assert_eq!(history.phases_seen().len(), 2);
        assert!(history.contains_phase("subdomain"));
        assert!(!history.contains_phase("report"));
        assert_eq!(history.last().map(|r| r.phase.as_str()), Some("passive"));
    }

    #[test]
    fn test_history_serializes_as_array() {
        let mut history = History::new();
        history.push(PhaseResult::new("passive").with("count", 1));

        let value = serde_json::to_value(&history).unwrap();
        assert!(value.is_array());
        assert_eq!(value[0]["phase"], "passive");
        assert_eq!(value[0]["data"]["count"], 1);
    }
}
