use std::fmt;
use std::sync::LazyLock;

use async_trait::async_trait;
use orchestrator::{Phase, Result};
use recon_core::{ExecutionContext, PhaseResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::portscan::OpenPort;
use crate::target::stored_strings;

pub const NAME: &str = "vulnscan";

static VERSION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/\d+(\.\d+)*").expect("valid version pattern"));

/// Services that should rarely be reachable from outside.
const RISKY_SERVICES: [(u16, Severity, &str); 9] = [
    (23, Severity::High, "Telnet transmits credentials in cleartext"),
    (21, Severity::Medium, "FTP may allow cleartext or anonymous logins"),
    (445, Severity::High, "SMB exposed to the network"),
    (3389, Severity::Medium, "Remote desktop exposed to the network"),
    (6379, Severity::High, "Redis is often deployed without authentication"),
    (27017, Severity::High, "MongoDB is often deployed without authentication"),
    (9200, Severity::High, "Elasticsearch HTTP API exposed"),
    (3306, Severity::Medium, "MySQL exposed to the network"),
    (5432, Severity::Medium, "PostgreSQL exposed to the network"),
];

const SENSITIVE_PATHS: [&str; 4] = ["/.git/HEAD", "/.env", "/server-status", "/phpinfo.php"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub title: String,
    pub severity: Severity,
    pub detail: String,
}

impl Finding {
    fn new(title: impl Into<String>, severity: Severity, detail: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            severity,
            detail: detail.into(),
        }
    }
}

/// Heuristic checks over what earlier phases left in the context.
#[derive(Debug, Default, Clone)]
pub struct VulnScanPhase;

impl VulnScanPhase {
    pub fn assess(ctx: &ExecutionContext) -> Vec<Finding> {
        let mut findings = Vec::new();

        let open_ports: Vec<OpenPort> = ctx
            .get("portscan.open_ports")
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or_default();
        for port in &open_ports {
            if let Some((_, severity, detail)) =
                RISKY_SERVICES.iter().find(|(p, _, _)| *p == port.port)
            {
                findings.push(Finding::new(
                    format!("Exposed {} service on port {}", port.service, port.port),
                    *severity,
                    *detail,
                ));
            }
            if let Some(banner) = port.banner.as_deref().filter(|b| VERSION_REGEX.is_match(b)) {
                findings.push(Finding::new(
                    format!("Version disclosed in banner on port {}", port.port),
                    Severity::Low,
                    banner,
                ));
            }
        }

        if let Some(server) = ctx
            .get("webenum.server")
            .and_then(|v| v.as_str().map(str::to_string))
            .filter(|s| VERSION_REGEX.is_match(s))
        {
            findings.push(Finding::new(
                "Server version disclosure",
                Severity::Low,
                format!("Server header reveals {server}"),
            ));
        }

        for header in stored_strings(ctx, "webenum.missing_security_headers") {
            let severity = match header.as_str() {
                "strict-transport-security" | "content-security-policy" => Severity::Medium,
                _ => Severity::Low,
            };
            findings.push(Finding::new(
                format!("Missing {header} header"),
                severity,
                "Response does not set this security header",
            ));
        }

        let paths = ctx.get("webenum.paths").unwrap_or_else(|| json!([]));
        for hit in paths.as_array().into_iter().flatten() {
            let path = hit.get("path").and_then(|p| p.as_str()).unwrap_or_default();
            let status = hit.get("status").and_then(|s| s.as_u64()).unwrap_or_default();
            if status == 200 && SENSITIVE_PATHS.contains(&path) {
                findings.push(Finding::new(
                    format!("Sensitive path reachable: {path}"),
                    Severity::High,
                    "Path returned 200 without authentication",
                ));
            }
        }

        findings.sort_by(|a, b| b.severity.cmp(&a.severity));
        findings
    }
}

#[async_trait]
impl Phase for VulnScanPhase {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Vulnerability heuristics over discovered services and web responses"
    }

    async fn execute(&self, _target: &str, ctx: &ExecutionContext) -> Result<PhaseResult> {
        let findings = Self::assess(ctx);
        info!(findings = findings.len(), "Vulnerability heuristics finished");

        let findings_json = serde_json::to_value(&findings)?;
        ctx.insert("vulnscan.findings", findings_json.clone());

        Ok(PhaseResult::new(NAME)
            .with("findings", findings_json)
            .with("count", findings.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_findings_from_earlier_phases() {
        let ctx = ExecutionContext::new("example.com");
        ctx.insert(
            "portscan.open_ports",
            json!([
                {"port": 22, "service": "ssh", "banner": "SSH-2.0-OpenSSH_9.6"},
                {"port": 6379, "service": "redis"}
            ]),
        );
        ctx.insert("webenum.server", "Apache/2.4.41 (Ubuntu)");
        ctx.insert(
            "webenum.missing_security_headers",
            json!(["content-security-policy", "referrer-policy"]),
        );
        ctx.insert(
            "webenum.paths",
            json!([{"path": "/.env", "status": 200}, {"path": "/admin", "status": 200}]),
        );

        let result = VulnScanPhase.execute("example.com", &ctx).await.unwrap();
        let findings: Vec<Finding> =
            serde_json::from_value(ctx.get("vulnscan.findings").unwrap()).unwrap();

        assert_eq!(result.number("count"), Some(findings.len() as f64));
        assert_eq!(findings[0].severity, Severity::High);
        let titles: Vec<&str> = findings.iter().map(|f| f.title.as_str()).collect();
        assert!(titles.contains(&"Exposed redis service on port 6379"));
        assert!(titles.contains(&"Sensitive path reachable: /.env"));
        assert!(titles.contains(&"Server version disclosure"));
        assert!(titles.contains(&"Missing referrer-policy header"));
        assert!(!titles.iter().any(|t| t.contains("/admin")));
        assert!(!result.mentions_failure());
    }

    #[test]
    fn test_empty_context_has_no_findings() {
        assert!(VulnScanPhase::assess(&ExecutionContext::new("example.com")).is_empty());
    }
}
