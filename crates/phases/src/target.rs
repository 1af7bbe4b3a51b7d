use std::collections::BTreeSet;
use std::net::IpAddr;

use recon_core::ExecutionContext;
use serde_json::Value;

use crate::error::{PhaseError, Result};

/// Bare host of a target given as a host, `host:port` or URL.
pub fn target_host(target: &str) -> &str {
    let rest = target
        .trim()
        .strip_prefix("https://")
        .or_else(|| target.trim().strip_prefix("http://"))
        .unwrap_or_else(|| target.trim());
    let authority = rest.split(['/', '?', '#']).next().unwrap_or(rest);

    if let Some(inner) = authority.strip_prefix('[') {
        return inner.split(']').next().unwrap_or(inner);
    }
    if authority.parse::<IpAddr>().is_ok() {
        return authority;
    }
    authority.split(':').next().unwrap_or(authority)
}

/// Resolve `host` to its distinct addresses.
pub async fn resolve(host: &str) -> Result<Vec<IpAddr>> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(vec![ip]);
    }

    let addrs = tokio::net::lookup_host((host, 0))
        .await
        .map_err(|source| PhaseError::Resolve {
            host: host.to_string(),
            source,
        })?;
    let unique: BTreeSet<IpAddr> = addrs.map(|addr| addr.ip()).collect();
    if unique.is_empty() {
        return Err(PhaseError::NoAddress(host.to_string()));
    }
    Ok(unique.into_iter().collect())
}

/// String list stored under `key`, if any.
pub fn stored_strings(ctx: &ExecutionContext, key: &str) -> Vec<String> {
    match ctx.get(key) {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}
