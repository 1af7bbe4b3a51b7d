//! Web fingerprinting: status, server, title, technologies and a handful of
//! well-known paths.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use orchestrator::{params_key, Phase, Result};
use recon_core::{ExecutionContext, PhaseResult};
use regex::Regex;
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};

use crate::error::PhaseError;
use crate::target::target_host;

pub const NAME: &str = "webenum";

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

pub const DEFAULT_PATHS: [&str; 8] = [
    "/robots.txt",
    "/sitemap.xml",
    "/.git/HEAD",
    "/.env",
    "/admin",
    "/login",
    "/server-status",
    "/phpinfo.php",
];

pub const SECURITY_HEADERS: [&str; 6] = [
    "strict-transport-security",
    "content-security-policy",
    "x-frame-options",
    "x-content-type-options",
    "referrer-policy",
    "permissions-policy",
];

/// Session cookie names that give away the server-side stack.
const COOKIE_TECHNOLOGIES: [(&str, &str); 5] = [
    ("phpsessid", "PHP"),
    ("jsessionid", "Java"),
    ("asp.net_sessionid", "ASP.NET"),
    ("laravel_session", "Laravel"),
    ("csrftoken", "Django"),
];

static TITLE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("valid title pattern"));

#[derive(Debug, Clone, Serialize)]
struct PathHit {
    path: String,
    status: u16,
}

pub struct WebEnumPhase {
    client: Client,
    paths: Vec<String>,
}

impl WebEnumPhase {
    pub fn new() -> std::result::Result<Self, PhaseError> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .danger_accept_invalid_certs(true)
            .build()?;
        Ok(Self {
            client,
            paths: DEFAULT_PATHS.iter().map(|p| p.to_string()).collect(),
        })
    }

    pub fn with_paths(mut self, paths: Vec<String>) -> Self {
        self.paths = paths;
        self
    }

    /// Base URLs to try, in order.
    fn candidates(target: &str) -> Vec<String> {
        let target = target.trim().trim_end_matches('/');
        if target.starts_with("http://") || target.starts_with("https://") {
            return vec![target.to_string()];
        }
        let host = target_host(target);
        vec![format!("https://{host}"), format!("http://{host}")]
    }

    async fn first_reachable(
        &self,
        target: &str,
    ) -> std::result::Result<(String, reqwest::Response), PhaseError> {
        for base in Self::candidates(target) {
            match self.client.get(&base).send().await {
                Ok(response) => return Ok((base, response)),
                Err(e) => debug!(url = %base, error = %e, "Base URL unreachable"),
            }
        }
        Err(PhaseError::Unreachable(target.to_string()))
    }

    async fn probe_paths(&self, base: &str, paths: &[String]) -> Vec<PathHit> {
        let mut hits = Vec::new();
        for path in paths {
            let url = format!("{base}{path}");
            match self.client.get(&url).send().await {
                Ok(response) if response.status() != StatusCode::NOT_FOUND => hits.push(PathHit {
                    path: path.clone(),
                    status: response.status().as_u16(),
                }),
                Ok(_) => {}
                Err(e) => debug!(url = %url, error = %e, "Path probe unanswered"),
            }
        }
        hits
    }
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn technologies(headers: &HeaderMap) -> Vec<String> {
    let mut found = Vec::new();
    for name in ["server", "x-powered-by", "x-aspnet-version", "x-generator"] {
        if let Some(value) = header(headers, name) {
            found.push(value);
        }
    }
    for cookie in headers.get_all("set-cookie") {
        let Ok(cookie) = cookie.to_str() else {
            continue;
        };
        let cookie = cookie.to_ascii_lowercase();
        for (marker, tech) in COOKIE_TECHNOLOGIES {
            if cookie.starts_with(marker) && !found.iter().any(|t| t == tech) {
                found.push(tech.to_string());
            }
        }
    }
    found
}

fn title(body: &str) -> Option<String> {
    TITLE_REGEX
        .captures(body)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|t| !t.is_empty())
}

#[async_trait]
impl Phase for WebEnumPhase {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Web enumeration: server fingerprinting, titles, technologies and common paths"
    }

    async fn execute(&self, target: &str, ctx: &ExecutionContext) -> Result<PhaseResult> {
        let (base, response) = self
            .first_reachable(target)
            .await
            .map_err(|e| e.into_failure(NAME))?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .text()
            .await
            .map_err(|e| PhaseError::from(e).into_failure(NAME))?;

        let server = header(&headers, "server");
        let page_title = title(&body);
        let tech = technologies(&headers);
        let missing: Vec<&str> = SECURITY_HEADERS
            .iter()
            .copied()
            .filter(|name| !headers.contains_key(*name))
            .collect();

        let paths = ctx
            .get(&params_key(NAME))
            .and_then(|params| params.get("paths").cloned())
            .and_then(|value| serde_json::from_value::<Vec<String>>(value).ok())
            .unwrap_or_else(|| self.paths.clone());
        let hits = self.probe_paths(&base, &paths).await;

        info!(
            url = %base,
            status,
            technologies = tech.len(),
            paths = hits.len(),
            "Web enumeration finished"
        );

        let hits_json = serde_json::to_value(&hits)?;
        ctx.insert("webenum.url", base.as_str());
        ctx.insert("webenum.status", status);
        ctx.insert("webenum.server", json!(server));
        ctx.insert("webenum.technologies", json!(tech));
        ctx.insert("webenum.missing_security_headers", json!(missing));
        ctx.insert("webenum.paths", hits_json.clone());

        Ok(PhaseResult::new(NAME)
            .with("url", base)
            .with("status", status)
            .with("server", json!(server))
            .with("title", json!(page_title))
            .with("technologies", json!(tech))
            .with("missing_security_headers", json!(missing))
            .with("paths", hits_json)
            .with("count", hits.len()))
    }
}
