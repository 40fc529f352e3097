use anyhow::{bail, Context, Result};
use notify::{Config as NotifyConfig, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::event::DaemonEvent;
use crate::paths;

pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 60;
pub const MIN_CHECK_INTERVAL_SECS: u64 = 1;
pub const DEFAULT_CHECK_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_QUALITY: &str = "best";
/// Substrings that mark a plugin argument as credential-like.
pub const DEFAULT_PLUGIN_AUTH_ARGS: &[&str] =
    &["username", "password", "email", "token", "cookie", "api-header"];

/// Root configuration, persisted as JSON. Written by the UI, read by the daemon.
///
/// Keys the daemon does not know about (tray icon settings and the like) are
/// kept in `extra` so that a load/save cycle never drops them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Start polling immediately instead of in the paused state.
    #[serde(default)]
    pub autostart_monitoring: bool,
    /// Minimum staleness, in seconds, before a stream is checked again.
    #[serde(default = "default_check_interval")]
    pub check_interval: u64,
    /// Upper bound, in seconds, for a single liveness check.
    #[serde(default = "default_check_timeout")]
    pub check_timeout: u64,
    /// Notification default for streams whose own `notify` is unset.
    #[serde(default)]
    pub default_notify: bool,
    #[serde(default, deserialize_with = "empty_as_none", skip_serializing_if = "Option::is_none")]
    pub default_streamlink_args: Option<String>,
    /// Written as `null` when cleared; only an absent key means `best`.
    #[serde(default = "default_quality", deserialize_with = "empty_as_none")]
    pub default_quality: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none", skip_serializing_if = "Option::is_none")]
    pub default_media_player: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none", skip_serializing_if = "Option::is_none")]
    pub default_media_player_args: Option<String>,
    /// Player used instead of everything else when the alternate launch is requested.
    #[serde(default, deserialize_with = "empty_as_none", skip_serializing_if = "Option::is_none")]
    pub alternate_player: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none", skip_serializing_if = "Option::is_none")]
    pub alternate_player_args: Option<String>,
    #[serde(default = "default_plugin_auth_args")]
    pub plugin_auth_args: Vec<String>,
    /// Monitored streams keyed (and ordered) by URL.
    #[serde(default)]
    pub streams: BTreeMap<String, StreamRecord>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub windows: BTreeMap<String, Geometry>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            autostart_monitoring: false,
            check_interval: DEFAULT_CHECK_INTERVAL_SECS,
            check_timeout: DEFAULT_CHECK_TIMEOUT_SECS,
            default_notify: false,
            default_streamlink_args: None,
            default_quality: default_quality(),
            default_media_player: None,
            default_media_player_args: None,
            alternate_player: None,
            alternate_player_args: None,
            plugin_auth_args: default_plugin_auth_args(),
            streams: BTreeMap::new(),
            windows: BTreeMap::new(),
            extra: serde_json::Map::new(),
        }
    }
}

impl Config {
    /// Effective re-check interval, never below [`MIN_CHECK_INTERVAL_SECS`].
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval.max(MIN_CHECK_INTERVAL_SECS))
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.check_timeout.max(1))
    }

    pub fn stream(&self, url: &str) -> Option<&StreamRecord> {
        self.streams.get(url)
    }

    /// Inserts or replaces `record` wholesale, keyed by its URL.
    pub fn upsert_stream(&mut self, record: StreamRecord) {
        self.streams.insert(record.url.clone(), record);
    }

    /// Adds a new stream; fails if the URL is already monitored.
    pub fn add_stream(&mut self, record: StreamRecord) -> Result<()> {
        if record.url.trim().is_empty() {
            bail!("Stream URL is required");
        }
        if let Some(existing) = self.streams.get(&record.url) {
            bail!("Duplicate URL of '{}'; cannot add", existing.display_name());
        }
        self.upsert_stream(record);
        Ok(())
    }

    pub fn remove_stream(&mut self, url: &str) -> Result<StreamRecord> {
        self.streams
            .remove(url)
            .with_context(|| format!("No existing stream with URL '{url}'"))
    }
}

/// A single monitored stream. Identity is the URL; edits replace the whole record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRecord {
    pub url: String,
    #[serde(default, deserialize_with = "empty_as_none", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Platform identifier, normally the resolver's plugin id.
    #[serde(
        rename = "type",
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub kind: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none", skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none", skip_serializing_if = "Option::is_none")]
    pub player: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none", skip_serializing_if = "Option::is_none")]
    pub sl_args: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none", skip_serializing_if = "Option::is_none")]
    pub mp_args: Option<String>,
    /// `None` defers to [`Config::default_notify`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify: Option<bool>,
    /// Always-live streams are never polled and never notify.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub always_on: Option<bool>,
}

impl StreamRecord {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            name: None,
            kind: None,
            quality: None,
            player: None,
            sl_args: None,
            mp_args: None,
            notify: None,
            always_on: None,
        }
    }

    /// The display label: `name`, or the URL when the name is blank.
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(&self.url)
    }

    pub fn kind(&self) -> &str {
        self.kind.as_deref().unwrap_or("")
    }

    /// Returns the effective notification flag, falling back to the global default.
    pub fn effective_notify(&self, config: &Config) -> bool {
        self.notify.unwrap_or(config.default_notify)
    }

    pub fn is_always_on(&self) -> bool {
        self.always_on.unwrap_or(false)
    }
}

/// Saved window placement. Owned by the UI; carried through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Loads the config file at `path`, returning `Config::default()` if the file does not exist.
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Writes `config` to `path` as pretty JSON via a sibling temp file and a
/// rename, so the watcher never sees a half-written file.
pub fn save(path: &Path, config: &Config) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    let content = serde_json::to_string_pretty(config).context("Failed to serialize config")?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, content)
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to replace config file: {}", path.display()))?;
    tracing::info!("Configuration saved to {}", path.display());
    Ok(())
}

/// Spawns a file watcher on the parent directory of `path`.  Whenever the config
/// file is created or modified, reloads it and sends a `ConfigReloaded` event.
pub async fn watch_config(path: PathBuf, tx: mpsc::Sender<DaemonEvent>) {
    let path = paths::absolute(&path);
    let (watch_tx, mut watch_rx) = mpsc::channel::<notify::Event>(16);

    let mut watcher = match RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                let _ = watch_tx.blocking_send(event);
            }
        },
        NotifyConfig::default(),
    ) {
        Ok(w) => w,
        Err(e) => {
            tracing::error!("Failed to create config watcher: {e}");
            return;
        }
    };

    // Watch the parent directory rather than the file directly so we catch
    // atomic saves (write-new + rename), including our own.
    let watch_dir = match path.parent() {
        Some(d) => d.to_path_buf(),
        None => {
            tracing::error!("Config path has no parent directory");
            return;
        }
    };
    if let Err(e) = std::fs::create_dir_all(&watch_dir) {
        tracing::error!("Failed to create config directory {}: {e}", watch_dir.display());
        return;
    }

    if let Err(e) = watcher.watch(&watch_dir, RecursiveMode::NonRecursive) {
        tracing::error!("Failed to watch config directory: {e}");
        return;
    }
    let targets = watch_targets(&path);
    tracing::debug!("Watching {} for config changes", path.display());

    while let Some(event) = watch_rx.recv().await {
        let affects_config = event.paths.iter().any(|p| targets.contains(p));
        let is_write = matches!(
            event.kind,
            notify::EventKind::Create(_) | notify::EventKind::Modify(_)
        );

        if affects_config && is_write {
            match load_or_default(&path) {
                Ok(config) => {
                    if tx.send(DaemonEvent::ConfigReloaded(config)).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::warn!("Failed to reload config: {e:#}"),
            }
        }
    }
}

/// Paths under which the watcher may report the config file: the absolute
/// path as given and, if different, the one with its directory's symlinks
/// resolved. The directory must exist.
fn watch_targets(path: &Path) -> Vec<PathBuf> {
    let mut targets = vec![path.to_path_buf()];
    if let (Some(dir), Some(name)) = (path.parent(), path.file_name()) {
        if let Ok(dir) = dir.canonicalize() {
            let resolved = dir.join(name);
            if resolved != targets[0] {
                targets.push(resolved);
            }
        }
    }
    targets
}

/// Treats `""` (and whitespace-only strings) as an absent value.
fn empty_as_none<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}

fn default_check_interval() -> u64 {
    DEFAULT_CHECK_INTERVAL_SECS
}

fn default_check_timeout() -> u64 {
    DEFAULT_CHECK_TIMEOUT_SECS
}

fn default_quality() -> Option<String> {
    Some(DEFAULT_QUALITY.to_string())
}

fn default_plugin_auth_args() -> Vec<String> {
    DEFAULT_PLUGIN_AUTH_ARGS.iter().map(|s| s.to_string()).collect()
}
