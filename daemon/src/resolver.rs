/// The stream-resolution capability the liveness checker calls into, and the
/// adapter that provides it by driving the `streamlink` executable.
///
/// `StreamlinkCli` runs `streamlink --json --loglevel info [plugin options] <url> <name>`
/// where `<name>` is a stream name no plugin offers. Under `--json`
/// streamlink prints instead of playing, and an unmatched name makes it
/// report the plugin and the available streams and exit:
///
/// ```text
/// {
///   "plugin": "twitch",
///   "metadata": { ... },
///   "streams": { "160p": { ... }, "1080p60": { ... }, "best": { ... } },
///   "error": "The specified stream(s) 'streamcondor-list-only' could not be found"
/// }
/// ```
///
/// An explicit stream name also keeps a `default-stream` from the user's
/// streamlink config out of play. Failures print only `{"error": ...}`; the
/// plugin is then taken from the `Found matching plugin` log line.
///
/// Declared plugin options are read once from `streamlink --help`.
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::OnceCell;

/// Overrides the streamlink executable (default: `streamlink` on PATH).
pub const STREAMLINK_ENV: &str = "STREAMCONDOR_STREAMLINK";
const DEFAULT_PROGRAM: &str = "streamlink";
/// Stream requested on every listing run; never a real stream name.
pub const LIST_ONLY_STREAM: &str = "streamcondor-list-only";
/// How long a listing may answer both `resolve_url` and `list_streams`.
const LISTING_REUSE_WINDOW: Duration = Duration::from_secs(5);
/// Plugin reported when the output names none.
const UNNAMED_PLUGIN: &str = "unknown";

const NO_PLUGIN_MARKER: &str = "No plugin can handle URL";
const NO_STREAMS_MARKER: &str = "No playable streams found";
const PLUGIN_MARKER: &str = "Found matching plugin ";

/// Flat session-level option map; `None` marks an option set without a value.
pub type SessionOptions = HashMap<String, Option<String>>;

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("no plugin can handle URL: {0}")]
    NoPlugin(String),
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("streamlink failed: {0}")]
    Output(String),
}

/// Contract of the stream resolver.
#[async_trait]
pub trait StreamResolver: Send + Sync {
    /// Identifies the plugin handling `url`. Fails with
    /// [`ResolveError::NoPlugin`] for unrecognized URLs.
    async fn resolve_url(&self, url: &str) -> Result<String, ResolveError>;

    /// Session-level settings, keyed without leading dashes.
    fn session_options(&self) -> SessionOptions;

    /// Names of the streams currently available; empty when offline.
    async fn list_streams(&self, url: &str) -> Result<Vec<String>, ResolveError>;

    /// Option names the plugin declares, without the `<plugin>-` prefix.
    async fn declared_arguments(&self, plugin: &str) -> Result<Vec<String>, ResolveError>;

    /// Re-queries the listing with the plugin bound to `args` (names without
    /// the `<plugin>-` prefix).
    async fn list_streams_with(
        &self,
        plugin: &str,
        url: &str,
        args: &[(String, Option<String>)],
    ) -> Result<Vec<String>, ResolveError>;
}

/// Parsed result of one streamlink run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    pub plugin: String,
    pub streams: Vec<String>,
}

/// [`StreamResolver`] backed by the streamlink command line.
pub struct StreamlinkCli {
    program: String,
    session: SessionOptions,
    help: OnceCell<String>,
    recent: Mutex<Option<(String, Instant, Listing)>>,
}

impl StreamlinkCli {
    pub fn new(program: impl Into<String>, session: SessionOptions) -> Self {
        Self {
            program: program.into(),
            session,
            help: OnceCell::new(),
            recent: Mutex::new(None),
        }
    }

    /// Uses `$STREAMCONDOR_STREAMLINK` (or `streamlink`) and the user's
    /// streamlink config file as session options.
    pub fn from_env() -> Self {
        let program = std::env::var(STREAMLINK_ENV).unwrap_or_else(|_| DEFAULT_PROGRAM.to_string());
        let session = match session_config_path() {
            Some(path) => load_session_options(&path),
            None => SessionOptions::new(),
        };
        Self::new(program, session)
    }

    async fn run(&self, args: &[String]) -> Result<RunOutput, ResolveError> {
        tracing::debug!("Running {} {}", self.program, args.join(" "));
        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ResolveError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        Ok(RunOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn query(&self, url: &str, plugin_args: &[String]) -> Result<Listing, ResolveError> {
        let output = self.run(&listing_args(url, plugin_args)).await?;
        parse_listing_output(url, &output.stdout, &output.stderr)
    }

    /// Lists `url`, reusing a result younger than [`LISTING_REUSE_WINDOW`].
    async fn cached_listing(&self, url: &str) -> Result<Listing, ResolveError> {
        if let Ok(recent) = self.recent.lock() {
            if let Some((cached_url, at, listing)) = recent.as_ref() {
                if cached_url == url && at.elapsed() < LISTING_REUSE_WINDOW {
                    return Ok(listing.clone());
                }
            }
        }
        let listing = self.query(url, &[]).await?;
        if let Ok(mut recent) = self.recent.lock() {
            *recent = Some((url.to_string(), Instant::now(), listing.clone()));
        }
        Ok(listing)
    }
}

struct RunOutput {
    stdout: String,
    stderr: String,
}

#[async_trait]
impl StreamResolver for StreamlinkCli {
    async fn resolve_url(&self, url: &str) -> Result<String, ResolveError> {
        Ok(self.cached_listing(url).await?.plugin)
    }

    fn session_options(&self) -> SessionOptions {
        self.session.clone()
    }

    async fn list_streams(&self, url: &str) -> Result<Vec<String>, ResolveError> {
        Ok(self.cached_listing(url).await?.streams)
    }

    async fn declared_arguments(&self, plugin: &str) -> Result<Vec<String>, ResolveError> {
        let help = self
            .help
            .get_or_try_init(|| async {
                let output = self.run(&["--help".to_string()]).await?;
                Ok::<_, ResolveError>(output.stdout + "\n" + &output.stderr)
            })
            .await?;
        Ok(plugin_arguments_from_help(help, plugin))
    }

    async fn list_streams_with(
        &self,
        plugin: &str,
        url: &str,
        args: &[(String, Option<String>)],
    ) -> Result<Vec<String>, ResolveError> {
        let plugin_args = bound_plugin_args(plugin, args);
        Ok(self.query(url, &plugin_args).await?.streams)
    }
}

/// Arguments of a listing run. Always `--json` plus [`LIST_ONLY_STREAM`], so
/// streamlink never starts a player.
fn listing_args(url: &str, plugin_args: &[String]) -> Vec<String> {
    let mut args = vec!["--json".to_string(), "--loglevel".to_string(), "info".to_string()];
    args.extend_from_slice(plugin_args);
    args.push(url.to_string());
    args.push(LIST_ONLY_STREAM.to_string());
    args
}

/// `[("username", Some("me"))]` → `["--bbciplayer-username", "me"]`. A value
/// starting with `-` is attached with `=`.
fn bound_plugin_args(plugin: &str, args: &[(String, Option<String>)]) -> Vec<String> {
    let mut plugin_args = Vec::with_capacity(args.len() * 2);
    for (name, value) in args {
        let flag = format!("--{plugin}-{name}");
        match value {
            Some(v) if v.starts_with('-') => plugin_args.push(format!("{flag}={v}")),
            Some(v) => {
                plugin_args.push(flag);
                plugin_args.push(v.clone());
            }
            None => plugin_args.push(flag),
        }
    }
    plugin_args
}

// ── Output parsing ────────────────────────────────────────────────────────────

/// Interprets the output of a `--json` listing run.
///
/// A document with a `streams` object is a listing even when it also carries
/// an `error` (the unmatched stream name). A document with a stream `type`
/// means streamlink selected a stream after all: the URL is live. Anything
/// else is an error, with the plugin-less and stream-less cases told apart.
pub fn parse_listing_output(url: &str, stdout: &str, stderr: &str) -> Result<Listing, ResolveError> {
    let Some(doc) = first_json_object(stdout) else {
        return Err(text_error(url, stdout, stderr));
    };

    let plugin = doc
        .get("plugin")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| plugin_from_log(stderr))
        .or_else(|| plugin_from_log(stdout));

    if let Some(streams) = doc.get("streams").and_then(Value::as_object) {
        return Ok(Listing {
            plugin: plugin.unwrap_or_else(|| UNNAMED_PLUGIN.to_string()),
            streams: streams.keys().cloned().collect(),
        });
    }

    if doc.contains_key("type") && !doc.contains_key("error") {
        tracing::warn!("streamlink selected a stream for {url} while listing");
        return Ok(Listing {
            plugin: plugin.unwrap_or_else(|| UNNAMED_PLUGIN.to_string()),
            streams: vec![LIST_ONLY_STREAM.to_string()],
        });
    }

    match doc.get("error").and_then(Value::as_str) {
        Some(error) if error.contains(NO_PLUGIN_MARKER) => Err(ResolveError::NoPlugin(url.to_string())),
        Some(error) if error.contains(NO_STREAMS_MARKER) => Ok(Listing {
            plugin: plugin.unwrap_or_else(|| UNNAMED_PLUGIN.to_string()),
            streams: Vec::new(),
        }),
        Some(error) => Err(ResolveError::Output(error.to_string())),
        None => Err(ResolveError::Output("unrecognized output".to_string())),
    }
}

/// First JSON object in `text`; trailing output after it is ignored.
fn first_json_object(text: &str) -> Option<Map<String, Value>> {
    let start = text.find('{')?;
    let mut values = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
    match values.next()? {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// `[cli][info] Found matching plugin twitch for URL ...` → `twitch`.
fn plugin_from_log(log: &str) -> Option<String> {
    log.lines().find_map(|line| {
        let pos = line.find(PLUGIN_MARKER)?;
        line[pos + PLUGIN_MARKER.len()..]
            .split_whitespace()
            .next()
            .map(str::to_string)
    })
}

/// Error for a run that printed no JSON (e.g. a crash or a usage error).
fn text_error(url: &str, stdout: &str, stderr: &str) -> ResolveError {
    let mut lines = stdout.lines().chain(stderr.lines()).map(str::trim);
    if lines.clone().any(|l| l.contains(NO_PLUGIN_MARKER)) {
        return ResolveError::NoPlugin(url.to_string());
    }
    let reason = lines
        .rfind(|l| l.starts_with("error:") || l.contains(": error:") || l.contains("[error]"))
        .unwrap_or("unrecognized output");
    ResolveError::Output(reason.to_string())
}

/// Extracts `<name>` from every `--<plugin>-<name>` option in help text.
pub fn plugin_arguments_from_help(help: &str, plugin: &str) -> Vec<String> {
    let prefix = format!("--{plugin}-");
    let mut names: Vec<String> = Vec::new();
    for word in help.split_whitespace() {
        let Some(rest) = word.strip_prefix(&prefix) else {
            continue;
        };
        let name: String = rest
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        let name = name.trim_end_matches('-').to_string();
        if !name.is_empty() && !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

// ── Session options ───────────────────────────────────────────────────────────

/// Location of the user's streamlink config file, e.g. `~/.config/streamlink/config`.
pub fn session_config_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("streamlink").join("config"))
}

/// Reads a streamlink config file (`key=value`, `key value`, or bare `key`
/// per line; `#` starts a comment). A missing or unreadable file yields an
/// empty map.
pub fn load_session_options(path: &Path) -> SessionOptions {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let options = parse_session_options(&content);
            tracing::debug!("Loaded {} streamlink options from {}", options.len(), path.display());
            options
        }
        Err(e) => {
            if path.exists() {
                tracing::warn!("Failed to read streamlink config {}: {e}", path.display());
            }
            SessionOptions::new()
        }
    }
}

pub fn parse_session_options(content: &str) -> SessionOptions {
    let mut options = SessionOptions::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let split_at = line.find(|c: char| c == '=' || c.is_whitespace());
        let (key, value) = match split_at {
            Some(pos) => (&line[..pos], Some(line[pos + 1..].trim())),
            None => (line, None),
        };
        let key = key.trim_start_matches('-');
        if key.is_empty() {
            continue;
        }
        options.insert(key.to_string(), value.map(str::to_string));
    }
    options
}
