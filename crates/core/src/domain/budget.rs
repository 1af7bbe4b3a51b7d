use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Budget applied to any phase without an explicit limit.
pub const DEFAULT_PHASE_BUDGET: u32 = 1;

/// Maximum number of executions allowed per phase within one run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Budget {
    #[serde(default = "default_budget")]
    pub default: u32,
    #[serde(default)]
    pub limits: BTreeMap<String, u32>,
}

fn default_budget() -> u32 {
    DEFAULT_PHASE_BUDGET
}

impl Default for Budget {
    fn default() -> Self {
        Self {
            default: DEFAULT_PHASE_BUDGET,
            limits: BTreeMap::new(),
        }
    }
}

impl Budget {
    pub fn new(default: u32) -> Self {
        Self {
            default,
            limits: BTreeMap::new(),
        }
    }

    pub fn with_limit(mut self, phase: impl Into<String>, limit: u32) -> Self {
        self.limits.insert(phase.into(), limit);
        self
    }

    /// Limits tuned for the built-in recon phases. Enumeration phases get a
    /// second run since repeated passes tend to surface more.
    pub fn recon_defaults() -> Self {
        Self::default()
            .with_limit("passive", 1)
            .with_limit("subdomain", 2)
            .with_limit("portscan", 1)
            .with_limit("webenum", 2)
            .with_limit("vulnscan", 1)
            .with_limit("report", 1)
    }

    pub fn limit(&self, phase: &str) -> u32 {
        self.limits.get(phase).copied().unwrap_or(self.default)
    }

    /// Overlay `other`'s explicit limits on top of this budget.
    pub fn merge(mut self, other: &Budget) -> Self {
        self.default = other.default;
        for (phase, limit) in &other.limits {
            self.limits.insert(phase.clone(), *limit);
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.default == 0 {
            return Err(CoreError::InvalidBudget {
                phase: "<default>".to_string(),
                limit: 0,
            });
        }
        for (phase, limit) in &self.limits {
            if *limit == 0 {
                return Err(CoreError::InvalidBudget {
                    phase: phase.clone(),
                    limit: *limit,
                });
            }
        }
        Ok(())
    }
}

/// Per-phase execution counts for one run.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ExecutionCounts {
    counts: HashMap<String, u32>,
}

impl ExecutionCounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, phase: &str) -> u32 {
        self.counts.get(phase).copied().unwrap_or(0)
    }

    pub fn increment(&mut self, phase: &str) -> u32 {
        let count = self.counts.entry(phase.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn has_capacity(&self, phase: &str, budget: &Budget) -> bool {
        self.get(phase) < budget.limit(phase)
    }

    pub fn all_exhausted<'a>(
        &self,
        phases: impl IntoIterator<Item = &'a String>,
        budget: &Budget,
    ) -> bool {
        phases
            .into_iter()
            .all(|phase| !self.has_capacity(phase, budget))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unspecified_phase_gets_default() {
        let budget = Budget::default().with_limit("subdomain", 2);
        assert_eq!(budget.limit("subdomain"), 2);
        assert_eq!(budget.limit("anything"), DEFAULT_PHASE_BUDGET);
    }

    #[test]
    fn test_recon_defaults() {
        let budget = Budget::recon_defaults();
        assert_eq!(budget.limit("subdomain"), 2);
        assert_eq!(budget.limit("webenum"), 2);
        assert_eq!(budget.limit("portscan"), 1);
        assert!(budget.validate().is_ok());
    }

    #[test]
    fn test_zero_limits_rejected() {
        assert!(Budget::new(0).validate().is_err());
        let err = Budget::default()
            .with_limit("portscan", 0)
            .validate()
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidBudget { ref phase, .. } if phase == "portscan"));
    }

    #[test]
    fn test_merge_overrides() {
        let merged = Budget::recon_defaults().merge(&Budget::new(3).with_limit("portscan", 4));
        assert_eq!(merged.limit("portscan"), 4);
        assert_eq!(merged.limit("subdomain"), 2);
        assert_eq!(merged.limit("unknown"), 3);
    }

    #[test]
    fn test_counts_against_budget() {
        let budget = Budget::default().with_limit("b", 2);
        let mut counts = ExecutionCounts::new();
        let phases = vec!["a".to_string(), "b".to_string()];

        assert!(counts.has_capacity("a", &budget));
        assert_eq!(counts.increment("a"), 1);
        assert!(!counts.has_capacity("a", &budget));
        assert!(!counts.all_exhausted(&phases, &budget));

        counts.increment("b");
        counts.increment("b");
        assert_eq!(counts.get("b"), 2);
        assert!(counts.all_exhausted(&phases, &budget));
    }

    #[test]
    fn test_budget_from_toml_shape() {
        let json = r#"{"default": 2, "limits": {"webenum": 3}}"#;
        let budget: Budget = serde_json::from_str(json).unwrap();
        assert_eq!(budget.limit("webenum"), 3);
        assert_eq!(budget.limit("passive"), 2);

        let empty: Budget = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, Budget::default());
    }
}
