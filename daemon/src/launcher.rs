/// Fire-and-forget player launches.
///
/// A launched child is never supervised: no output capture, no exit status.
/// Only the outcome of the spawn call itself is reported.
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;

use crate::command::{self, CommandError, PlayerChoice};
use crate::config::{Config, StreamRecord};
use crate::liveness::{CheckArgs, CheckError, LivenessChecker};
use crate::resolver::StreamResolver;

/// Name given to a stream opened from a URL that is not in the configuration.
pub const UNKNOWN_NAME: &str = "Unknown";

#[derive(Error, Debug)]
pub enum LaunchError {
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error(transparent)]
    Check(#[from] CheckError),
}

/// Spawns a process without waiting for it.
pub trait ProcessLauncher: Send + Sync {
    /// Returns whether the spawn call succeeded.
    fn spawn_detached(&self, argv: &[String]) -> bool;
}

/// Spawns into its own process group with null stdio so the child outlives
/// the daemon and never writes to its terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedLauncher;

impl ProcessLauncher for DetachedLauncher {
    fn spawn_detached(&self, argv: &[String]) -> bool {
        let Some((program, args)) = argv.split_first() else {
            tracing::warn!("Refusing to launch an empty command");
            return false;
        };

        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        #[cfg(unix)]
        cmd.process_group(0);
        #[cfg(windows)]
        {
            const DETACHED_PROCESS: u32 = 0x0000_0008;
            const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
            cmd.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
        }

        match cmd.spawn() {
            Ok(child) => {
                tracing::info!("Launched {program} (pid {:?})", child.id());
                true
            }
            Err(e) => {
                tracing::error!("Failed to launch {program}: {e}");
                false
            }
        }
    }
}

/// Builds the command for `record` and spawns it.
pub fn launch<L: ProcessLauncher + ?Sized>(
    launcher: &L,
    record: &StreamRecord,
    config: &Config,
    choice: PlayerChoice,
) -> Result<bool, CommandError> {
    let command = command::build(record, config, choice)?;
    tracing::debug!("Launch command: {}", command.command_line());
    Ok(launcher.spawn_detached(command.argv()))
}

/// Result of [`open_url`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenOutcome {
    /// A command was built and handed to the launcher.
    Launched { record: StreamRecord, spawned: bool },
    /// The URL is recognized but not live; nothing was launched.
    Offline { plugin: String },
}

/// Opens `url`. A configured stream is launched as is. Any other URL is
/// checked first and only launched when live, as a transient record typed
/// after the plugin that recognized it.
pub async fn open_url<R, L>(
    url: &str,
    config: &Config,
    checker: &LivenessChecker<R>,
    launcher: &L,
    choice: PlayerChoice,
    limit: Duration,
) -> Result<OpenOutcome, LaunchError>
where
    R: StreamResolver + ?Sized,
    L: ProcessLauncher + ?Sized,
{
    let url = url.trim();
    if url.is_empty() {
        return Err(CommandError::MissingUrl.into());
    }

    if let Some(record) = config.stream(url) {
        let spawned = launch(launcher, record, config, choice)?;
        return Ok(OpenOutcome::Launched {
            record: record.clone(),
            spawned,
        });
    }

    let args = CheckArgs {
        global_args: config.default_streamlink_args.as_deref(),
        stream_args: None,
        auth_fragments: &config.plugin_auth_args,
    };
    let liveness = checker.check_within(url, args, limit).await?;
    if !liveness.is_live {
        tracing::info!("{url} is offline; not launching");
        return Ok(OpenOutcome::Offline {
            plugin: liveness.plugin,
        });
    }

    let record = StreamRecord {
        name: Some(UNKNOWN_NAME.to_string()),
        kind: Some(liveness.plugin),
        ..StreamRecord::new(url)
    };
    let spawned = launch(launcher, &record, config, choice)?;
    Ok(OpenOutcome::Launched { record, spawned })
}
