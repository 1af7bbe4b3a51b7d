use async_trait::async_trait;
use orchestrator::{Phase, Result};
use recon_core::{ExecutionContext, PhaseResult};
use serde_json::json;
use tracing::info;

use crate::target::{resolve, target_host};

pub const NAME: &str = "passive";

/// Resolves the target's addresses. Later phases read `passive.ips`.
#[derive(Debug, Default, Clone)]
pub struct PassivePhase;

#[async_trait]
impl Phase for PassivePhase {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Passive reconnaissance: DNS resolution of the target"
    }

    async fn execute(&self, target: &str, ctx: &ExecutionContext) -> Result<PhaseResult> {
        let host = target_host(target);
        let ips: Vec<String> = resolve(host)
            .await
            .map_err(|e| e.into_failure(NAME))?
            .iter()
            .map(ToString::to_string)
            .collect();

        info!(host = %host, addresses = ips.len(), "Target resolved");
        ctx.insert("passive.host", host);
        ctx.insert("passive.ips", json!(ips));

        Ok(PhaseResult::new(NAME)
            .with("host", host)
            .with("ips", json!(ips))
            .with("count", ips.len()))
    }
}
