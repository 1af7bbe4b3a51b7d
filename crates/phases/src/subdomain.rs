//! Subdomain harvesting from certificate transparency logs and a short list of
//! common prefixes.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use orchestrator::{params_key, Phase, Result};
use recon_core::{ExecutionContext, PhaseResult};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::PhaseError;
use crate::target::{resolve, target_host};

pub const NAME: &str = "subdomain";

const CRT_SH_URL: &str = "https://crt.sh";
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(3);
const LOOKUP_CONCURRENCY: usize = 10;

pub const DEFAULT_PREFIXES: [&str; 12] = [
    "www", "mail", "ftp", "dev", "staging", "api", "admin", "vpn", "portal", "test", "beta", "m",
];

#[derive(Debug, Deserialize)]
struct CertificateEntry {
    #[serde(default)]
    name_value: String,
}

pub struct SubdomainPhase {
    client: Client,
    crt_sh_url: String,
    prefixes: Vec<String>,
}

impl SubdomainPhase {
    pub fn new() -> std::result::Result<Self, PhaseError> {
        Ok(Self {
            client: Client::builder().timeout(HTTP_TIMEOUT).build()?,
            crt_sh_url: CRT_SH_URL.to_string(),
            prefixes: DEFAULT_PREFIXES.iter().map(|p| p.to_string()).collect(),
        })
    }

    pub fn with_crt_sh_url(mut self, url: impl Into<String>) -> Self {
        self.crt_sh_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.prefixes = prefixes;
        self
    }

    async fn certificate_names(&self, domain: &str) -> std::result::Result<Vec<String>, PhaseError> {
        let url = format!("{}/", self.crt_sh_url);
        let entries: Vec<CertificateEntry> = self
            .client
            .get(&url)
            .query(&[("q", format!("%.{domain}")), ("output", "json".to_string())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let names = entries
            .iter()
            .flat_map(|entry| entry.name_value.lines())
            .filter_map(|name| normalize(name, domain))
            .collect();
        Ok(names)
    }

    async fn probe_prefixes(&self, domain: &str, prefixes: &[String]) -> Vec<String> {
        let names: Vec<String> = prefixes.iter().map(|prefix| format!("{prefix}.{domain}")).collect();
        stream::iter(names)
            .map(|name| async move {
                match tokio::time::timeout(LOOKUP_TIMEOUT, resolve(&name)).await {
                    Ok(Ok(_)) => Some(name),
                    _ => None,
                }
            })
            .buffer_unordered(LOOKUP_CONCURRENCY)
            .filter_map(|found| async move { found })
            .collect()
            .await
    }
}

/// Lowercased name if it belongs to `domain`, with any wildcard label removed.
fn normalize(name: &str, domain: &str) -> Option<String> {
    let name = name.trim().trim_start_matches("*.").to_ascii_lowercase();
    let suffix = format!(".{domain}");
    (name == domain || name.ends_with(&suffix)).then_some(name)
}

#[async_trait]
impl Phase for SubdomainPhase {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Subdomain enumeration via certificate transparency and DNS probing"
    }

    async fn execute(&self, target: &str, ctx: &ExecutionContext) -> Result<PhaseResult> {
        let domain = target_host(target).to_ascii_lowercase();
        if domain.parse::<std::net::IpAddr>().is_ok() {
            info!(target = %domain, "Target is an address, skipping subdomain harvesting");
            return Ok(PhaseResult::new(NAME)
                .with("subdomains", json!([]))
                .with("count", 0));
        }

        let mut found = BTreeSet::new();
        let mut sources = Vec::new();

        match self.certificate_names(&domain).await {
            Ok(names) => {
                debug!(names = names.len(), "Certificate transparency names");
                found.extend(names);
                sources.push("crt.sh");
            }
            Err(e) => warn!(error = %e, "Certificate transparency lookup unavailable"),
        }

        let prefixes = ctx
            .get(&params_key(NAME))
            .and_then(|params| params.get("prefixes").cloned())
            .and_then(|value| serde_json::from_value::<Vec<String>>(value).ok())
            .unwrap_or_else(|| self.prefixes.clone());
        if !prefixes.is_empty() {
            found.extend(self.probe_prefixes(&domain, &prefixes).await);
            sources.push("dns");
        }
        found.remove(&domain);

        let subdomains: Vec<String> = found.into_iter().collect();
        info!(domain = %domain, count = subdomains.len(), "Subdomains harvested");
        ctx.insert("subdomain.names", json!(subdomains));

        Ok(PhaseResult::new(NAME)
            .with("subdomains", json!(subdomains))
            .with("sources", json!(sources))
            .with("count", subdomains.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn phase(server: &MockServer) -> SubdomainPhase {
        SubdomainPhase::new()
            .unwrap()
            .with_crt_sh_url(server.uri())
            .with_prefixes(Vec::new())
    }

    #[test]
    fn test_normalize() {
        assert_eq!(
            normalize("*.Api.Example.com", "example.com"),
            Some("api.example.com".to_string())
        );
        assert_eq!(normalize("example.com", "example.com"), Some("example.com".to_string()));
        assert_eq!(normalize("notexample.com", "example.com"), None);
    }

    #[tokio::test]
    async fn test_certificate_names_are_collected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("q", "%.example.com"))
            .and(query_param("output", "json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"name_value": "www.example.com\n*.dev.example.com"},
                {"name_value": "example.com"},
                {"name_value": "www.example.com"},
                {"name_value": "other.org"}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let ctx = ExecutionContext::new("example.com");
        let result = phase(&server).execute("example.com", &ctx).await.unwrap();

        assert_eq!(
            result.get("subdomains"),
            Some(&json!(["dev.example.com", "www.example.com"]))
        );
        assert_eq!(result.number("count"), Some(2.0));
        assert_eq!(
            ctx.get("subdomain.names"),
            Some(json!(["dev.example.com", "www.example.com"]))
        );
    }

    #[tokio::test]
    async fn test_unavailable_log_yields_zero_count() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let ctx = ExecutionContext::new("example.com");
        let result = phase(&server).execute("example.com", &ctx).await.unwrap();

        assert!(result.is_zero_count());
        assert_eq!(result.get("sources"), Some(&json!([])));
    }

    #[tokio::test]
    async fn test_address_target_is_skipped() {
        let server = MockServer::start().await;
        let ctx = ExecutionContext::new("10.0.0.1");
        let result = phase(&server).execute("10.0.0.1", &ctx).await.unwrap();
        assert!(result.is_zero_count());
    }
}
