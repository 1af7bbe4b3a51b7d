mod config;
mod output;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use llm::{ChatClient, DecisionSource, OllamaClient, DEFAULT_DECISION_TIMEOUT};
use orchestrator::{
    DecisionPolicy, DeterministicPolicy, ExternalPolicy, Orchestrator, Runner, RunnerConfig,
};
use recon_core::{Budget, ExecutionContext};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{LlmConfig, Provider, ReconConfig, DEFAULT_OLLAMA_MODEL, DEFAULT_OPENAI_MODEL};

#[derive(Parser)]
#[command(name = "reconflow")]
#[command(about = "Multi-phase reconnaissance with pluggable decision policies", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Target domain, address or URL
    #[arg(short, long)]
    target: Option<String>,

    /// TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run only these phases, in order
    #[arg(short, long, value_delimiter = ',')]
    modules: Vec<String>,

    /// Let a language model pick the next phase
    #[arg(long)]
    ai: bool,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_key: Option<String>,

    #[arg(long)]
    openai_model: Option<String>,

    /// OpenAI-compatible base URL (OpenRouter, local gateways)
    #[arg(long)]
    base_url: Option<String>,

    #[arg(long)]
    ollama_url: Option<String>,

    #[arg(long)]
    ollama_model: Option<String>,

    /// Run independent phases in parallel first
    #[arg(long)]
    concurrent: bool,

    /// Write the run report as JSON
    #[arg(long)]
    json: Option<PathBuf>,

    #[arg(long)]
    max_iterations: Option<u32>,

    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List the registered phases
    Modules,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let registry = phases::default_phases().context("Failed to build phase registry")?;

    match cli.command {
        Some(Commands::Modules) => {
            list_modules(&registry);
            Ok(())
        }
        None => run(cli, registry).await,
    }
}

fn list_modules(registry: &Orchestrator) {
    println!("Available modules:");
    for (name, description) in registry.catalogue() {
        println!("  {:<10} {}", name, description);
    }
}

async fn run(cli: Cli, registry: Orchestrator) -> Result<()> {
    let config = match &cli.config {
        Some(path) => ReconConfig::load(path)?,
        None => ReconConfig::default(),
    };

    let Some(target) = cli.target.clone().or_else(|| config.run.target.clone()) else {
        bail!("A target is required (--target or [run].target in the config file)");
    };
    let ctx = ExecutionContext::try_new(target).context("Invalid target")?;

    let modules: Vec<String> = if cli.modules.is_empty() {
        config.run.modules.clone()
    } else {
        cli.modules.clone()
    };
    let modules: Vec<String> = modules
        .iter()
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
        .collect();
    let concurrent = cli.concurrent || config.run.concurrent;
    let max_iterations = cli.max_iterations.unwrap_or(config.run.max_iterations);

    let budget = config.budget()?;
    let policy = build_policy(&cli, &config.llm, &registry, budget)?;
    info!(target = %ctx.target(), policy = policy.name(), "Starting reconnaissance");

    let mut runner = Runner::new(registry, policy)
        .with_config(RunnerConfig::default().with_max_iterations(max_iterations));

    let cancel = runner.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current phase");
            cancel.cancel();
        }
    });

    let report = if !modules.is_empty() {
        info!(modules = ?modules, "Running requested modules");
        runner.run_sequence(&ctx, &modules).await?
    } else if concurrent {
        runner.run_concurrent(&ctx, &config.run.independent).await?
    } else {
        runner.run(&ctx).await?
    };

    output::print_summary(&report);

    if let Some(path) = &cli.json {
        output::write_json(&report, path)?;
        println!("JSON report written to {}", path.display());
    }

    Ok(())
}

fn build_policy(
    cli: &Cli,
    llm_config: &LlmConfig,
    registry: &Orchestrator,
    budget: Budget,
) -> Result<Box<dyn DecisionPolicy>> {
    let priority = registry.names().to_vec();

    if !cli.ai {
        info!("Using deterministic policy");
        return Ok(Box::new(DeterministicPolicy::new(priority)));
    }

    let Some(source) = decision_source(cli, llm_config)? else {
        warn!("AI mode requested without an OpenAI key or Ollama URL, using deterministic policy");
        return Ok(Box::new(DeterministicPolicy::new(priority)));
    };

    let catalogue = registry
        .catalogue()
        .into_iter()
        .map(|(name, description)| (name.to_string(), description.to_string()))
        .collect();
    let timeout = llm_config
        .timeout_secs
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_DECISION_TIMEOUT);

    Ok(Box::new(
        ExternalPolicy::new(source, priority, budget)
            .with_catalogue(catalogue)
            .with_timeout(timeout),
    ))
}

/// OpenAI-compatible client when a key is available, otherwise Ollama when a
/// URL is, otherwise nothing.
fn decision_source(cli: &Cli, llm_config: &LlmConfig) -> Result<Option<Arc<dyn DecisionSource>>> {
    let configured = |provider: Provider| llm_config.provider.map_or(true, |p| p == provider);

    let api_key = cli
        .openai_key
        .clone()
        .or_else(|| llm_config.api_key.clone().filter(|_| configured(Provider::Openai)));
    if let Some(api_key) = api_key {
        let model = cli
            .openai_model
            .clone()
            .or_else(|| llm_config.model.clone().filter(|_| configured(Provider::Openai)))
            .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string());
        let base_url = cli
            .base_url
            .clone()
            .or_else(|| llm_config.base_url.clone().filter(|_| configured(Provider::Openai)))
            .unwrap_or_else(|| llm::client::OPENAI_BASE_URL.to_string());
        info!(model = %model, base_url = %base_url, "Using OpenAI-compatible decision source");

        let mut client = ChatClient::new(api_key, base_url, model);
        if llm_config.temperature.is_some() {
            client = client.with_temperature(llm_config.temperature);
        }
        if llm_config.max_tokens.is_some() {
            client = client.with_max_tokens(llm_config.max_tokens);
        }
        return Ok(Some(Arc::new(client)));
    }

    let is_ollama = llm_config.provider == Some(Provider::Ollama);
    let ollama_url = cli
        .ollama_url
        .clone()
        .or_else(|| llm_config.base_url.clone().filter(|_| is_ollama));
    if let Some(url) = ollama_url {
        let model = cli
            .ollama_model
            .clone()
            .or_else(|| llm_config.model.clone().filter(|_| is_ollama))
            .unwrap_or_else(|| DEFAULT_OLLAMA_MODEL.to_string());
        info!(model = %model, url = %url, "Using Ollama decision source");
        let client = OllamaClient::new(url, model).context("Failed to build Ollama client")?;
        return Ok(Some(Arc::new(client)));
    }

    Ok(None)
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "reconflow=debug,orchestrator=debug,phases=debug,llm=debug"
    } else {
        "reconflow=info,orchestrator=info,phases=info,llm=info"
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();
}
