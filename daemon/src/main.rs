mod args;
mod cli;
mod command;
mod config;
mod event;
mod launcher;
mod liveness;
mod paths;
mod resolver;
mod scheduler;
mod status;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cli::{Cli, Command, LogLevel};
use crate::command::PlayerChoice;
use crate::config::{Config, StreamRecord};
use crate::event::{DaemonEvent, StreamEvent};
use crate::launcher::{DetachedLauncher, OpenOutcome};
use crate::liveness::{CheckArgs, CheckError, LivenessChecker};
use crate::resolver::{StreamResolver, StreamlinkCli};
use crate::scheduler::{RunState, Scheduler};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level, cli.denoise_logging)?;

    let config_path = paths::absolute(&cli.config.unwrap_or_else(paths::config_file_path));
    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_daemon(config_path).await,
        Command::Check { url } => check(&config_path, &url).await,
        Command::Command { url, alternate, preview } => print_command(&config_path, &url, alternate, preview),
        Command::Launch { url, alternate } => launch(&config_path, &url, alternate).await,
        Command::Add {
            url,
            name,
            quality,
            player,
            sl_args,
            mp_args,
            notify,
            always_on,
        } => {
            let record = StreamRecord {
                name,
                quality,
                player,
                sl_args,
                mp_args,
                notify,
                always_on: always_on.then_some(true),
                ..StreamRecord::new(url.trim())
            };
            add(&config_path, record).await
        }
        Command::Remove { url } => remove(&config_path, &url),
        Command::List => list(&config_path),
    }
}

fn init_logging(level: LogLevel, denoise: bool) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => {
            let mut filter = EnvFilter::new(level.as_str())
                .add_directive(format!("condor_daemon={}", level.as_str()).parse()?);
            if denoise {
                for directive in ["notify=warn", "mio=warn"] {
                    filter = filter.add_directive(directive.parse()?);
                }
            }
            filter
        }
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
    Ok(())
}

fn player_choice(alternate: bool) -> PlayerChoice {
    if alternate {
        PlayerChoice::Alternate
    } else {
        PlayerChoice::Default
    }
}

// ── Daemon ────────────────────────────────────────────────────────────────────

async fn run_daemon(config_path: PathBuf) -> Result<()> {
    // ── Configuration ─────────────────────────────────────────────────────────
    let initial_config = config::load_or_default(&config_path).unwrap_or_else(|e| {
        tracing::error!("Config error (using defaults): {e:#}");
        Config::default()
    });
    let initial_state = if initial_config.autostart_monitoring {
        RunState::Running
    } else {
        RunState::Paused
    };
    tracing::info!(
        "Loaded {} stream(s) from {}",
        initial_config.streams.len(),
        config_path.display()
    );
    let shared_config = Arc::new(RwLock::new(initial_config));

    // ── Initial status ────────────────────────────────────────────────────────
    let status_path = paths::status_file_path();
    let mut current_status = status::DaemonStatus::new(initial_state);
    status::write_status(&status_path, &current_status);

    let (event_tx, mut event_rx) = mpsc::channel::<DaemonEvent>(32);

    // ── Background tasks ──────────────────────────────────────────────────────
    tokio::spawn(config::watch_config(config_path, event_tx.clone()));

    let checker = Arc::new(LivenessChecker::new(Arc::new(StreamlinkCli::from_env())));
    let (monitor, monitor_task) = scheduler::spawn(
        Scheduler::new(Arc::clone(&shared_config), checker),
        initial_state,
        event_tx.clone(),
    );
    let mut snapshots = monitor.subscribe();

    // Graceful shutdown on Ctrl+C.
    {
        let tx = event_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = tx.send(DaemonEvent::Shutdown).await;
            }
        });
    }

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::user_defined1()) {
            Ok(mut toggles) => {
                let tx = event_tx.clone();
                tokio::spawn(async move {
                    while toggles.recv().await.is_some() {
                        if tx.send(DaemonEvent::ToggleMonitoring).await.is_err() {
                            break;
                        }
                    }
                });
            }
            Err(e) => tracing::warn!("SIGUSR1 pause toggle unavailable: {e}"),
        }
    }

    tracing::info!(
        "condor-daemon v{} started ({:?})",
        env!("CARGO_PKG_VERSION"),
        initial_state
    );

    // ── Event loop ────────────────────────────────────────────────────────────
    loop {
        tokio::select! {
            evt = event_rx.recv() => match evt {
                Some(DaemonEvent::Stream(event)) => {
                    if let StreamEvent::Online(record) = &event {
                        let notify = record.effective_notify(&*shared_config.read().await);
                        if notify {
                            tracing::info!(
                                "Stream online: {} is now live on {}",
                                record.display_name(),
                                record.kind()
                            );
                        }
                    }
                    current_status.record_event(&event);
                    status::write_status(&status_path, &current_status);
                }

                Some(DaemonEvent::ConfigReloaded(new_config)) => {
                    tracing::info!("Config reloaded ({} stream(s))", new_config.streams.len());
                    *shared_config.write().await = new_config;
                }

                Some(DaemonEvent::ToggleMonitoring) => {
                    monitor.toggle();
                    tracing::info!("Monitoring {:?}", monitor.run_state());
                }

                Some(DaemonEvent::Shutdown) | None => {
                    tracing::info!("Shutting down");
                    break;
                }
            },

            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                current_status.apply_snapshot(&snapshot);
                status::write_status(&status_path, &current_status);
            }
        }
    }

    monitor.stop();
    if let Err(e) = monitor_task.await {
        tracing::warn!("Scheduler task ended abnormally: {e}");
    }
    current_status.apply_snapshot(&monitor.snapshot());
    current_status.state = RunState::Stopped;
    status::write_status(&status_path, &current_status);
    Ok(())
}

// ── One-shot subcommands ──────────────────────────────────────────────────────

fn load(config_path: &Path) -> Result<Config> {
    config::load_or_default(config_path)
        .with_context(|| format!("Failed to load config {}", config_path.display()))
}

async fn check(config_path: &Path, url: &str) -> Result<()> {
    let config = load(config_path)?;
    let url = url.trim();
    let checker = LivenessChecker::new(Arc::new(StreamlinkCli::from_env()));
    let args = CheckArgs {
        global_args: config.default_streamlink_args.as_deref(),
        stream_args: config.stream(url).and_then(|r| r.sl_args.as_deref()),
        auth_fragments: &config.plugin_auth_args,
    };

    match checker.check_within(url, args, config.check_timeout()).await {
        Ok(liveness) if liveness.is_live => println!("{url} is live ({})", liveness.plugin),
        Ok(liveness) => println!("{url} is offline ({})", liveness.plugin),
        Err(CheckError::NoPluginFound(_)) => bail!("No plugin can handle {url}"),
        Err(e) => return Err(e).with_context(|| format!("Failed to check {url}")),
    }
    Ok(())
}

fn print_command(config_path: &Path, url: &str, alternate: bool, preview: bool) -> Result<()> {
    let config = load(config_path)?;
    let record = config
        .stream(url.trim())
        .cloned()
        .unwrap_or_else(|| StreamRecord::new(url.trim()));
    let command = command::build(&record, &config, player_choice(alternate))?;
    if preview {
        println!("{}", command.preview());
    } else {
        println!("{}", command.command_line());
    }
    Ok(())
}

async fn launch(config_path: &Path, url: &str, alternate: bool) -> Result<()> {
    let config = load(config_path)?;
    let checker = LivenessChecker::new(Arc::new(StreamlinkCli::from_env()));
    let outcome = launcher::open_url(
        url,
        &config,
        &checker,
        &DetachedLauncher,
        player_choice(alternate),
        config.check_timeout(),
    )
    .await
    .with_context(|| format!("Failed to open {}", url.trim()))?;

    match outcome {
        OpenOutcome::Launched { record, spawned: true } => {
            println!("Launched {}", record.display_name());
            Ok(())
        }
        OpenOutcome::Launched { record, spawned: false } => {
            bail!("Failed to launch {}", record.display_name())
        }
        OpenOutcome::Offline { plugin } => {
            println!("{} is offline ({plugin})", url.trim());
            Ok(())
        }
    }
}

async fn add(config_path: &Path, mut record: StreamRecord) -> Result<()> {
    let mut config = load(config_path)?;
    if let Some(existing) = config.stream(&record.url) {
        bail!("{} is already configured as {}", record.url, existing.display_name());
    }

    let resolver = StreamlinkCli::from_env();
    match resolver.resolve_url(&record.url).await {
        Ok(plugin) => record.kind = Some(plugin),
        Err(resolver::ResolveError::NoPlugin(_)) => bail!("No plugin can handle {}", record.url),
        Err(e) => tracing::warn!("Could not detect the stream type of {}: {e}", record.url),
    }

    let summary = format!("{} ({})", record.display_name(), record.kind());
    config.add_stream(record)?;
    config::save(config_path, &config)?;
    println!("Added {summary}");
    Ok(())
}

fn remove(config_path: &Path, url: &str) -> Result<()> {
    let mut config = load(config_path)?;
    let removed = config.remove_stream(url.trim())?;
    config::save(config_path, &config)?;
    println!("Removed {}", removed.display_name());
    Ok(())
}

fn list(config_path: &Path) -> Result<()> {
    let config = load(config_path)?;
    if config.streams.is_empty() {
        println!("No streams configured in {}", config_path.display());
        return Ok(());
    }
    for record in config.streams.values() {
        let mut flags = Vec::new();
        if record.is_always_on() {
            flags.push("always-on");
        }
        if record.effective_notify(&config) {
            flags.push("notify");
        }
        println!(
            "{:<12} {:<24} {} {}",
            record.kind(),
            record.display_name(),
            record.url,
            flags.join(",")
        );
    }
    Ok(())
}
