use std::path::Path;

use anyhow::{Context, Result};
use recon_core::Budget;
use serde::{Deserialize, Serialize};

pub const DEFAULT_OPENAI_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_OLLAMA_MODEL: &str = "gemma:2b";
pub const DEFAULT_MAX_ITERATIONS: u32 = 50;

pub fn default_independent() -> Vec<String> {
    ["passive", "subdomain", "portscan"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Openai,
    Ollama,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconConfig {
    pub run: RunConfig,
    pub budget: Option<Budget>,
    pub llm: LlmConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub target: Option<String>,
    pub modules: Vec<String>,
    pub concurrent: bool,
    pub independent: Vec<String>,
    pub max_iterations: u32,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            target: None,
            modules: Vec::new(),
            concurrent: false,
            independent: default_independent(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: Option<Provider>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub timeout_secs: Option<u64>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl ReconConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.budget()?;
        Ok(config)
    }

    /// Built-in budget table overlaid with the configured one.
    pub fn budget(&self) -> Result<Budget> {
        let budget = match &self.budget {
            Some(configured) => Budget::recon_defaults().merge(configured),
            None => Budget::recon_defaults(),
        };
        budget.validate()?;
        Ok(budget)
    }
}
