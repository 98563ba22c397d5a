use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use log::{info, warn};
use tokio::sync::watch;
use tracing_log::LogTracer;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use quest_sync::actions::{Action, HealthSnapshot, ProfilePatch};
use quest_sync::network::{
    connectivity_channel, ConnectivityProbe, DispatchTable, HttpApiClient, NetworkMonitor,
    NetworkStatus, ReachabilityProbe,
};
use quest_sync::storage::{KeyValueStore, QueueStore, SledStore};
use quest_sync::{Config, SyncCoordinator};

fn init_logging() {
    if let Ok(path) = std::env::var("QUEST_SYNC_LOG_FILE") {
        // Plain logs to a file through env_logger; tracing stays off so the
        // terminal is left to command output.
        let mut builder =
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
        match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(e) => eprintln!("Cannot open log file {path}: {e}, logging to stderr"),
        }
        builder.init();
        return;
    }

    let _ = LogTracer::init();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr)
        .with_timer(fmt::time::UtcTime::rfc_3339());

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init();
}

#[derive(Parser)]
#[command(name = "quest-sync")]
#[command(about = "Offline action queue and sync for the habit tracker client")]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the local store (overrides the config file)
    #[arg(short, long, global = true)]
    data_dir: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Record an action for later delivery
    Enqueue {
        #[command(subcommand)]
        action: EnqueueCmd,
    },
    /// Print queued actions as JSON lines, oldest first
    List,
    /// Probe connectivity and print the sync indicator state
    Status,
    /// Probe connectivity and run a sync now
    Sync,
    /// Drop every queued action
    Clear {
        /// Confirm the reset
        #[arg(long)]
        yes: bool,
    },
    /// Monitor connectivity and sync automatically until interrupted
    Watch,
}

#[derive(Subcommand)]
enum EnqueueCmd {
    /// Quest completion
    Quest {
        #[arg(long)]
        quest_id: String,
        #[arg(long, default_value_t = 1.0)]
        value: f64,
    },
    /// Daily health snapshot
    Health {
        /// Day the data belongs to (YYYY-MM-DD)
        #[arg(long)]
        date: NaiveDate,
        #[arg(long, default_value_t = 0)]
        steps: u64,
        #[arg(long, default_value_t = 0)]
        active_minutes: u32,
        #[arg(long)]
        sleep_hours: Option<f64>,
        #[arg(long)]
        water_ml: Option<u32>,
        #[arg(long)]
        calories: Option<u32>,
    },
    /// Partial profile update
    Profile {
        #[arg(long)]
        display_name: Option<String>,
        #[arg(long)]
        timezone: Option<String>,
        #[arg(long)]
        daily_goal: Option<u32>,
        #[arg(long)]
        avatar_url: Option<String>,
    },
}

impl EnqueueCmd {
    fn into_action(self) -> Result<Action> {
        let action = match self {
            EnqueueCmd::Quest { quest_id, value } => Action::complete_quest(quest_id, value),
            EnqueueCmd::Health {
                date,
                steps,
                active_minutes,
                sleep_hours,
                water_ml,
                calories,
            } => Action::HealthSync(HealthSnapshot {
                date,
                steps,
                active_minutes,
                sleep_hours,
                water_ml,
                calories,
            }),
            EnqueueCmd::Profile {
                display_name,
                timezone,
                daily_goal,
                avatar_url,
            } => {
                let patch = ProfilePatch {
                    display_name,
                    timezone,
                    daily_goal,
                    avatar_url,
                };
                if patch.is_empty() {
                    bail!("profile update needs at least one field");
                }
                Action::ProfileUpdate(patch)
            }
        };
        Ok(action)
    }
}

/// Everything wired together once per process.
struct Client {
    config: Config,
    coordinator: Arc<SyncCoordinator>,
    probe: Arc<dyn ConnectivityProbe>,
    status_tx: watch::Sender<NetworkStatus>,
}

impl Client {
    fn build(config: Config) -> Result<Self> {
        let kv: Arc<dyn KeyValueStore> = Arc::new(
            SledStore::open(&config.data_dir)
                .with_context(|| format!("opening store in {}", config.data_dir))?,
        );
        let queue = Arc::new(QueueStore::open(Arc::clone(&kv)).context("loading offline queue")?);

        let mut api = HttpApiClient::new(&config.api.base_url, config.api.timeout())?;
        if let Some(token) = &config.api.auth_token {
            api = api.with_auth_token(token.clone());
        }
        let dispatcher = Arc::new(DispatchTable::with_client(Arc::new(api)));

        let (status_tx, connectivity) = connectivity_channel();
        let coordinator = Arc::new(SyncCoordinator::new(
            queue,
            kv,
            dispatcher,
            connectivity,
            &config.sync,
        ));

        let probe: Arc<dyn ConnectivityProbe> = Arc::new(ReachabilityProbe::new(
            config.route_probe_addr()?,
            config.probe_url(),
            config.monitor.probe_timeout(),
        )?);

        Ok(Self {
            config,
            coordinator,
            probe,
            status_tx,
        })
    }

    /// Single probe for one-shot commands; no sync is triggered from here.
    async fn refresh_connectivity(&self) -> NetworkStatus {
        let status = self.probe.probe().await.status();
        self.status_tx.send_replace(status);
        status
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }

    let client = Client::build(config)?;
    let coordinator = Arc::clone(&client.coordinator);

    match cli.command {
        Command::Enqueue { action } => {
            let queued = coordinator.enqueue(action.into_action()?)?;
            println!("{}", serde_json::to_string(&queued)?);
        }
        Command::List => {
            for action in coordinator.queue().read_all() {
                println!("{}", serde_json::to_string(&action)?);
            }
        }
        Command::Status => {
            client.refresh_connectivity().await;
            let status = coordinator.status();
            println!("{}", serde_json::to_string_pretty(&status)?);
            eprintln!("{}", status.summary());
        }
        Command::Sync => {
            let network = client.refresh_connectivity().await;
            info!("Manual sync requested (network {:?})", network);
            let result = coordinator.sync().await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.success {
                bail!("sync did not complete: {}", result.errors.join("; "));
            }
        }
        Command::Clear { yes } => {
            if !yes {
                bail!(
                    "refusing to drop {} queued actions without --yes",
                    coordinator.queued_count()
                );
            }
            coordinator.queue().clear()?;
        }
        Command::Watch => {
            let Client {
                config,
                probe,
                status_tx,
                ..
            } = client;

            let monitor = NetworkMonitor::new(probe, status_tx, Arc::clone(&coordinator));
            let mut changes = monitor.subscribe();
            tokio::spawn(monitor.run(config.monitor.interval()));
            tokio::spawn(Arc::clone(&coordinator).run_periodic(
                std::time::Duration::from_secs(config.sync.periodic_interval_secs),
            ));

            info!(
                "Watching connectivity, {} actions queued",
                coordinator.queued_count()
            );
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("Interrupted, stopping");
                        break;
                    }
                    change = changes.changed() => match change {
                        Some(status) => {
                            info!("Network {:?}: {}", status, coordinator.status().summary());
                        }
                        None => {
                            warn!("Connectivity monitor stopped");
                            break;
                        }
                    },
                }
            }
        }
    }

    Ok(())
}
