/// Launch-command synthesis.
///
/// The streamlink invocation for a stream is assembled from three layers:
///   1. the global `default_streamlink_args`,
///   2. the stream's own `sl_args` (wins on shared flags),
///   3. the derived `--player` / `--player-args` options.
///
/// `$SC.name` and `$SC.type` are substituted on layers 1 and 2 separately,
/// before merging, so a name containing a placeholder is never re-expanded.
///
/// This module is pure: it never touches the filesystem or spawns anything.
use thiserror::Error;

use crate::args::ArgumentMap;
use crate::config::{Config, StreamRecord};

pub const TOOL_NAME: &str = "streamlink";
/// Appended to every quality selector in case the configured one does not
/// exist for this particular stream.
pub const FALLBACK_QUALITY: &str = "best";
pub const NAME_PLACEHOLDER: &str = "$SC.name";
pub const TYPE_PLACEHOLDER: &str = "$SC.type";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CommandError {
    #[error("stream URL is required")]
    MissingUrl,
}

/// Which player configuration a launch should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayerChoice {
    /// The stream's player, else the default player.
    #[default]
    Default,
    /// The configured alternate player, when set.
    Alternate,
}

/// A fully synthesized command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    tokens: Vec<String>,
    argv: Vec<String>,
}

impl LaunchCommand {
    /// Tool name, one (possibly quoted) element per flag, URL, quality.
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// The same command as a process argument vector; nothing is quoted.
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// Single-line rendering, suitable for a shell.
    pub fn command_line(&self) -> String {
        self.tokens.join(" ")
    }

    /// Multi-line rendering for previews: one argument per line with line
    /// continuation markers (`^` on Windows, `\` elsewhere).
    pub fn preview(&self) -> String {
        let continuation = if cfg!(windows) { '^' } else { '\\' };
        self.render_preview(continuation)
    }

    fn render_preview(&self, continuation: char) -> String {
        let mut lines = Vec::with_capacity(self.tokens.len());
        let mut tokens = self.tokens.iter();
        if let Some(tool) = tokens.next() {
            lines.push(tool.clone());
        }
        lines.extend(tokens.map(|t| format!("  {t}")));
        lines.join(&format!(" {continuation}\n"))
    }
}

/// Builds the launch command for `record` against the global `config`.
pub fn build(
    record: &StreamRecord,
    config: &Config,
    choice: PlayerChoice,
) -> Result<LaunchCommand, CommandError> {
    let url = record.url.trim();
    if url.is_empty() {
        return Err(CommandError::MissingUrl);
    }

    let defaults = substitute(config.default_streamlink_args.as_deref(), record);
    let custom = substitute(record.sl_args.as_deref(), record);
    let mut args = ArgumentMap::parse(&defaults).merged_with(&ArgumentMap::parse(&custom));

    if let Some(player) = resolve_player(record, config, choice) {
        args.insert("--player", Some(player.to_string()));
    }
    // Player arguments are never merged with the defaults: the stream's own
    // string replaces them entirely.
    if let Some(player_args) = resolve_player_args(record, config, choice) {
        args.insert("--player-args", Some(player_args.to_string()));
    }

    let quality = quality_selector(record, config);

    let mut tokens = Vec::with_capacity(args.len() + 3);
    tokens.push(TOOL_NAME.to_string());
    tokens.extend(args.exec_tokens());
    tokens.push(url.to_string());
    tokens.push(quality.clone());

    let mut argv = Vec::with_capacity(args.len() * 2 + 3);
    argv.push(TOOL_NAME.to_string());
    argv.extend(args.to_argv());
    argv.push(url.to_string());
    argv.push(quality);

    Ok(LaunchCommand { tokens, argv })
}

/// Single left-to-right pass, so substituted text is never scanned again.
fn substitute(template: Option<&str>, record: &StreamRecord) -> String {
    const MARKER: &str = "$SC.";
    let name = record.name.as_deref().unwrap_or("");
    let mut rest = template.unwrap_or("");
    let mut out = String::with_capacity(rest.len());

    while let Some(pos) = rest.find(MARKER) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if let Some(after) = tail.strip_prefix(NAME_PLACEHOLDER) {
            out.push_str(name);
            rest = after;
        } else if let Some(after) = tail.strip_prefix(TYPE_PLACEHOLDER) {
            out.push_str(record.kind());
            rest = after;
        } else {
            out.push_str(MARKER);
            rest = &tail[MARKER.len()..];
        }
    }
    out.push_str(rest);
    out
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn resolve_player<'a>(
    record: &'a StreamRecord,
    config: &'a Config,
    choice: PlayerChoice,
) -> Option<&'a str> {
    let alternate = match choice {
        PlayerChoice::Alternate => non_empty(config.alternate_player.as_deref()),
        PlayerChoice::Default => None,
    };
    alternate
        .or_else(|| non_empty(record.player.as_deref()))
        .or_else(|| non_empty(config.default_media_player.as_deref()))
}

fn resolve_player_args<'a>(
    record: &'a StreamRecord,
    config: &'a Config,
    choice: PlayerChoice,
) -> Option<&'a str> {
    let alternate = match choice {
        PlayerChoice::Alternate => non_empty(config.alternate_player_args.as_deref()),
        PlayerChoice::Default => None,
    };
    alternate
        .or_else(|| non_empty(record.mp_args.as_deref()))
        .or_else(|| non_empty(config.default_media_player_args.as_deref()))
}

/// `<preferred>,best`, or just `best` when nothing is configured. A preferred
/// quality of `best` yields `best,best`, which streamlink accepts.
fn quality_selector(record: &StreamRecord, config: &Config) -> String {
    match non_empty(record.quality.as_deref()).or_else(|| non_empty(config.default_quality.as_deref())) {
        Some(preferred) => format!("{preferred},{FALLBACK_QUALITY}"),
        None => FALLBACK_QUALITY.to_string(),
    }
}
