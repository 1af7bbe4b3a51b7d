use std::collections::BTreeMap;

use async_trait::async_trait;
use orchestrator::{Phase, Result, PARAMS_KEY_PREFIX};
use recon_core::{ExecutionContext, PhaseResult};
use serde_json::{json, Map, Value};
use tracing::info;

use crate::vulnscan::{Finding, Severity};

pub const NAME: &str = "report";

fn array_len(ctx: &ExecutionContext, key: &str) -> usize {
    ctx.get(key)
        .and_then(|value| value.as_array().map(Vec::len))
        .unwrap_or_default()
}

/// Summarizes the context store. Writes `report.summary`.
#[derive(Debug, Default, Clone)]
pub struct ReportPhase;

impl ReportPhase {
    pub fn summarize(ctx: &ExecutionContext) -> Map<String, Value> {
        let mut entries: BTreeMap<String, usize> = BTreeMap::new();
        for key in ctx.keys() {
            if key.starts_with(PARAMS_KEY_PREFIX) {
                continue;
            }
            if let Some((phase, _)) = key.split_once('.') {
                *entries.entry(phase.to_string()).or_default() += 1;
            }
        }

        let findings: Vec<Finding> = ctx
            .get("vulnscan.findings")
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or_default();
        let mut by_severity: BTreeMap<String, usize> = BTreeMap::new();
        for finding in &findings {
            *by_severity.entry(finding.severity.to_string()).or_default() += 1;
        }

        let mut summary = Map::new();
        summary.insert("target".to_string(), json!(ctx.target()));
        summary.insert("store_entries".to_string(), json!(entries));
        summary.insert("addresses".to_string(), json!(array_len(ctx, "passive.ips")));
        summary.insert("subdomains".to_string(), json!(array_len(ctx, "subdomain.names")));
        summary.insert(
            "open_ports".to_string(),
            json!(array_len(ctx, "portscan.open_ports")),
        );
        summary.insert("web_paths".to_string(), json!(array_len(ctx, "webenum.paths")));
        summary.insert("findings".to_string(), json!(findings.len()));
        summary.insert("findings_by_severity".to_string(), json!(by_severity));
        summary.insert(
            "highest_severity".to_string(),
            json!(findings.iter().map(|f| f.severity).max().map(|s: Severity| s.to_string())),
        );
        summary
    }
}

#[async_trait]
impl Phase for ReportPhase {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Summary of everything gathered so far"
    }

    async fn execute(&self, _target: &str, ctx: &ExecutionContext) -> Result<PhaseResult> {
        let summary = Self::summarize(ctx);
        info!(entries = summary.len(), "Report summary built");
        ctx.insert("report.summary", summary.clone());

        Ok(PhaseResult::new(NAME).with("summary", summary))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_summary_counts() {
        let ctx = ExecutionContext::new("example.com");
        ctx.insert("passive.ips", json!(["192.0.2.1", "192.0.2.2"]));
        ctx.insert("passive.host", "example.com");
        ctx.insert("portscan.open_ports", json!([{"port": 443, "service": "https"}]));
        ctx.insert("params.portscan", json!({"ports": [443]}));
        ctx.insert(
            "vulnscan.findings",
            json!([
                {"title": "a", "severity": "low", "detail": ""},
                {"title": "b", "severity": "high", "detail": ""}
            ]),
        );

        let result = ReportPhase.execute("example.com", &ctx).await.unwrap();
        let summary = result.get("summary").unwrap();

        assert_eq!(summary["addresses"], json!(2));
        assert_eq!(summary["open_ports"], json!(1));
        assert_eq!(summary["subdomains"], json!(0));
        assert_eq!(summary["findings"], json!(2));
        assert_eq!(summary["highest_severity"], json!("high"));
        assert_eq!(
            summary["store_entries"],
            json!({"passive": 2, "portscan": 1, "vulnscan": 1})
        );
        assert!(ctx.contains("report.summary"));
    }
}
