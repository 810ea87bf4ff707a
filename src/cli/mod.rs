//! Command-line interface for clctl.
//!
//! Provides commands for replaying recorded events against operational
//! policies, validating policy files and showing the resolved configuration.

use std::collections::HashSet;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use crate::adapters::{
    ActorService, JsonLinesSink, SimulatedOperator, AAI_ACTOR, AAI_CUSTOM_QUERY, AAI_PNF, AAI_TENANT,
    GUARD_ACTOR, GUARD_DECISION,
};
use crate::config;
use crate::core::{ControlLoopProcessor, Controller};
use crate::domain::{ControlLoopEvent, ControlLoopParams, FinalResult, ToscaPolicy};

/// clctl - closed-loop event correlation and remediation engine
#[derive(Parser, Debug)]
#[command(name = "clctl")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file to use instead of the discovered one
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Replay control-loop events (JSON lines) against operational policies
    Replay {
        /// Operational policy file (JSON or YAML); may be repeated
        #[arg(short, long = "policy", required = true)]
        policies: Vec<PathBuf>,

        /// Events file, one JSON event per line ("-" for stdin)
        #[arg(short, long)]
        events: PathBuf,

        /// Seconds to wait for every transaction to finish
        #[arg(short, long, default_value = "30")]
        wait_secs: u64,

        /// Answer operations without a configured operator with a simulated success
        #[arg(long)]
        simulate: bool,
    },

    /// Validate an operational policy file
    Validate {
        /// Policy file (JSON or YAML)
        policy_file: PathBuf,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Replay {
                policies,
                events,
                wait_secs,
                simulate,
            } => {
                let cfg = resolve_config(self.config.as_deref())?;
                replay(&cfg, &policies, &events, wait_secs, simulate).await
            }
            Commands::Validate { policy_file } => validate_policy(&policy_file).await,
            Commands::Config => {
                let cfg = resolve_config(self.config.as_deref())?;
                show_config(&cfg).await
            }
        }
    }
}

/// Explicit `--config` file, or the discovered one
fn resolve_config(path: Option<&Path>) -> Result<config::ResolvedConfig> {
    match path {
        Some(path) => config::load_from(path),
        None => Ok(config::config()?.clone()),
    }
}

/// Load a policy file; YAML parsing also accepts JSON
fn load_policy(path: &Path) -> Result<ToscaPolicy> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read policy file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse policy file: {}", path.display()))
}

fn read_events(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read events from stdin")?;
        return Ok(buffer);
    }

    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read events file: {}", path.display()))
}

/// Configured operators, plus simulated ones for anything the policies use
/// that has no operator yet
fn build_actors(
    configured: &[config::OperatorConfig],
    policies: &[ToscaPolicy],
    simulate: bool,
) -> Result<ActorService> {
    let mut actors = ActorService::from_config(configured)?;
    if !simulate {
        return Ok(actors);
    }

    let mut needed: HashSet<(String, String)> = [
        (AAI_ACTOR, AAI_CUSTOM_QUERY),
        (AAI_ACTOR, AAI_TENANT),
        (AAI_ACTOR, AAI_PNF),
        (GUARD_ACTOR, GUARD_DECISION),
    ]
    .iter()
    .map(|(a, o)| (a.to_string(), o.to_string()))
    .collect();

    for policy in policies {
        let operational = policy.operational()?;
        for op in operational.operations {
            needed.insert((op.operation.actor, op.operation.operation));
        }
    }

    for (actor, operation) in needed {
        if !actors.contains(&actor, &operation) {
            actors.register(Arc::new(SimulatedOperator::new(&actor, &operation)));
        }
    }

    Ok(actors)
}

/// Feed events through a controller and print every outbound message
async fn replay(
    cfg: &config::ResolvedConfig,
    policy_files: &[PathBuf],
    events_file: &Path,
    wait_secs: u64,
    simulate: bool,
) -> Result<()> {
    let policies = policy_files
        .iter()
        .map(|p| load_policy(p))
        .collect::<Result<Vec<_>>>()?;

    let actors = build_actors(&cfg.operators, &policies, simulate)?;
    let controller = Controller::new(
        cfg.controller_name.clone(),
        cfg.settings.clone(),
        actors,
        Arc::new(JsonLinesSink),
    )?
    .with_decoders(&cfg.decoders);

    for policy in policies {
        let params = controller.add_tosca_policy(policy)?;
        info!(closed_loop = %params.closed_loop_control_name, "policy loaded");
    }

    controller.start();

    let content = read_events(events_file)?;
    for (idx, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let event: ControlLoopEvent = serde_json::from_str(line)
            .with_context(|| format!("Invalid event on line {}", idx + 1))?;
        let dispatch = controller.process_event(event);
        info!(line = idx + 1, ?dispatch, "event dispatched");
    }

    if !controller.wait_idle(Duration::from_secs(wait_secs)).await {
        warn!(remaining = controller.manager_count(), "transactions still active");
    }

    controller.stop();
    Ok(())
}

/// Parse a policy, derive its params and walk its operations
async fn validate_policy(path: &Path) -> Result<()> {
    let policy = load_policy(path)?;
    let params = ControlLoopParams::from_policy(&Arc::new(policy.clone()))?;
    let processor = ControlLoopProcessor::new(&policy)?;
    let operational = processor.policy();

    println!("Policy:        {}:{}", policy.name, policy.version);
    println!("Scope:         {}", params.policy_scope);
    println!("Control loop:  {}", params.closed_loop_control_name);
    println!("Trigger:       {}", operational.trigger);
    println!("Timeout:       {}s", operational.timeout);
    println!();

    let ids: HashSet<&str> = operational.operations.iter().map(|op| op.id.as_str()).collect();
    let mut unknown = Vec::new();

    if FinalResult::from_policy_id(&operational.trigger).is_none() && !ids.contains(operational.trigger.as_str()) {
        unknown.push(format!("trigger -> {}", operational.trigger));
    }

    for op in &operational.operations {
        println!(
            "  {} : {} {} (timeout {}s, retries {})",
            op.id, op.operation.actor, op.operation.operation, op.timeout, op.retries
        );

        let edges = [
            ("success", &op.success),
            ("failure", &op.failure),
            ("failure_timeout", &op.failure_timeout),
            ("failure_retries", &op.failure_retries),
            ("failure_exception", &op.failure_exception),
            ("failure_guard", &op.failure_guard),
        ];

        for (result, next) in edges {
            println!("      {:<18} -> {}", result, next);
            if FinalResult::from_policy_id(next).is_none() && !ids.contains(next.as_str()) {
                unknown.push(format!("{}.{} -> {}", op.id, result, next));
            }
        }
    }

    if !unknown.is_empty() {
        anyhow::bail!("Policy refers to unknown operations: {}", unknown.join(", "));
    }

    println!();
    println!("Policy is valid");
    Ok(())
}

/// Show resolved configuration
async fn show_config(cfg: &config::ResolvedConfig) -> Result<()> {
    println!("Config file: {}", cfg.config_file.as_ref().map(|p| p.display().to_string()).unwrap_or_else(|| "(none - using defaults)".to_string()));
    println!();
    println!("Controller:   {}", cfg.controller_name);
    println!("Channels:");
    println!("  Notifications: {}", cfg.settings.notification_channel);
    println!("  Responses:     {}", cfg.settings.response_channel);
    println!();
    println!("Limits:");
    println!("  Default timeout: {}s", cfg.settings.default_timeout_seconds);
    println!("  Max steps:       {}", cfg.settings.max_steps);
    println!("  Guard disabled:  {}", cfg.settings.guard_disabled);
    println!();
    println!("Decoders:");
    if cfg.decoders.is_empty() {
        println!("  (none)");
    }
    for decoder in &cfg.decoders {
        println!("  {}: {}", decoder.topic, decoder.events.join(", "));
    }
    println!();
    println!("Operators:");
    if cfg.operators.is_empty() {
        println!("  (none)");
    }
    for op in &cfg.operators {
        println!(
            "  {}.{} ({:?}{})",
            op.actor,
            op.operation,
            op.kind,
            op.url.as_deref().map(|u| format!(" {}", u)).unwrap_or_default()
        );
    }

    Ok(())
}
