// Replays a JSON file of request mutations through an in-memory pipeline and
// prints every group notification it produces.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use clap::Parser;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gamefinder_core::common::{OwnerId, RequestId};
use gamefinder_core::domains::matching::NotificationPolicy;
use gamefinder_core::domains::requests::{Address, GameSystem, NewRequest, RequestChanges, Role};
use gamefinder_core::kernel::{BaseNotifier, MatchDeps, OutboundMessage};
use gamefinder_core::{Config, GeocoderStrategy};

#[derive(Parser)]
#[command(name = "simulate")]
#[command(about = "Replay request mutations through the matching pipeline")]
struct Cli {
    /// JSON file containing a list of operations
    #[arg(long)]
    input: PathBuf,

    /// Geocoder strategy: synthetic, disabled or live
    #[arg(long, default_value = "synthetic")]
    geocoder: String,

    /// Suppress repeat notifications for an unchanged group
    #[arg(long)]
    dedup: bool,
}

/// One mutation. Requests and owners are named by labels local to the file.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Operation {
    Create {
        label: String,
        owner: String,
        name: String,
        system: GameSystem,
        role: Role,
        #[serde(default)]
        travel_range: Option<u32>,
        address: Address,
    },
    Update {
        label: String,
        #[serde(flatten)]
        changes: RequestChanges,
    },
    Delete {
        label: String,
    },
}

struct StdoutNotifier;

#[async_trait]
impl BaseNotifier for StdoutNotifier {
    async fn send(&self, message: &OutboundMessage) -> Result<()> {
        println!("To {}: {}", message.recipient, message.subject);
        for line in &message.body {
            println!("  {}", line);
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,gamefinder_core=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env().context("Failed to load configuration")?;
    config.geocoder.strategy = cli
        .geocoder
        .parse::<GeocoderStrategy>()
        .context("--geocoder must be synthetic, disabled or live")?;
    if cli.dedup {
        config.notification_policy = NotificationPolicy::OnPoolChange;
    }
    // Simulations never touch a real database
    config.database_url = None;

    let raw = std::fs::read_to_string(&cli.input)
        .with_context(|| format!("Failed to read {}", cli.input.display()))?;
    let operations: Vec<Operation> =
        serde_json::from_str(&raw).context("Failed to parse operations")?;

    let coordinator = MatchDeps::from_config(&config, Arc::new(StdoutNotifier))
        .await?
        .into_coordinator();
    tracing::info!(
        operations = operations.len(),
        geocoder = coordinator.resolver().strategy(),
        "Starting simulation"
    );

    let mut owners: HashMap<String, OwnerId> = HashMap::new();
    let mut requests: HashMap<String, RequestId> = HashMap::new();
    let lookup = |requests: &HashMap<String, RequestId>, label: &str| {
        requests
            .get(label)
            .copied()
            .ok_or_else(|| anyhow!("unknown request label: {}", label))
    };

    for (step, operation) in operations.into_iter().enumerate() {
        match operation {
            Operation::Create {
                label,
                owner,
                name,
                system,
                role,
                travel_range,
                address,
            } => {
                let owner = *owners.entry(owner).or_insert_with(OwnerId::new);
                let mut new = NewRequest::new(owner, name, system, role, address);
                if let Some(range) = travel_range {
                    new = new.with_travel_range(range);
                }
                match coordinator.create(new).await {
                    Ok(report) => {
                        println!(
                            "[{}] created {} ({}, resolved: {}, candidates: {})",
                            step,
                            label,
                            report.request.id,
                            report.resolved,
                            report.request.candidate_dms.len()
                        );
                        requests.insert(label, report.request.id);
                    }
                    Err(e) => println!("[{}] create {} rejected: {}", step, label, e),
                }
            }
            Operation::Update { label, changes } => {
                let id = lookup(&requests, &label)?;
                match coordinator.update(id, changes).await {
                    Ok(report) => println!(
                        "[{}] updated {} (location changed: {}, cascaded: {}, notified: {})",
                        step,
                        label,
                        report.location_changed,
                        report.cascaded.len(),
                        report.notified()
                    ),
                    Err(e) => println!("[{}] update {} rejected: {}", step, label, e),
                }
            }
            Operation::Delete { label } => {
                let id = lookup(&requests, &label)?;
                match coordinator.delete(id).await {
                    Ok(_) => {
                        println!("[{}] deleted {}", step, label);
                        requests.remove(&label);
                    }
                    Err(e) => println!("[{}] delete {} rejected: {}", step, label, e),
                }
            }
        }
    }

    if let Some(stats) = coordinator.resolver().cache_stats() {
        tracing::info!(hits = stats.hits, misses = stats.misses, "Geocode cache");
    }
    Ok(())
}
