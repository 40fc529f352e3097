/// Online/offline determination for a single URL.
///
/// The fast path asks the resolver for the stream listing and answers `true`
/// as soon as it is non-empty. An empty listing is ambiguous: plugins that
/// need credentials (e.g. `--bbciplayer-username`) report nothing until they
/// get them. When the plugin declares credential-like options, their values
/// are collected from three layers, lowest precedence first:
///   1. the resolver's session options,
///   2. the global streamlink argument string,
///   3. the stream's own streamlink argument string,
///
/// and the listing is queried again with the plugin bound to them.
///
/// Checks are stateless; the scheduler owns all state between checks.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::args::ArgumentMap;
use crate::resolver::{ResolveError, SessionOptions, StreamResolver};

#[derive(Error, Debug)]
pub enum CheckError {
    #[error("no plugin found for {0}")]
    NoPluginFound(String),
    #[error("plugin {plugin} requires --{key}, which is not configured anywhere")]
    MissingAuthArgument { plugin: String, key: String },
    #[error("check timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Transient(ResolveError),
}

impl From<ResolveError> for CheckError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::NoPlugin(url) => CheckError::NoPluginFound(url),
            other => CheckError::Transient(other),
        }
    }
}

impl CheckError {
    /// Errors that retrying cannot fix: the URL or the configuration is wrong.
    pub fn is_configuration_problem(&self) -> bool {
        matches!(self, CheckError::NoPluginFound(_) | CheckError::MissingAuthArgument { .. })
    }
}

/// Answer of a successful check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Liveness {
    pub plugin: String,
    pub is_live: bool,
}

/// Per-check inputs that come from configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct CheckArgs<'a> {
    pub global_args: Option<&'a str>,
    pub stream_args: Option<&'a str>,
    /// Fragments that mark a plugin option as authentication-related.
    pub auth_fragments: &'a [String],
}

pub struct LivenessChecker<R: ?Sized> {
    resolver: Arc<R>,
}

impl<R: StreamResolver + ?Sized> LivenessChecker<R> {
    pub fn new(resolver: Arc<R>) -> Self {
        Self { resolver }
    }

    /// Determines whether `url` is live. Resolver failures propagate; an
    /// unrecognized URL is [`CheckError::NoPluginFound`], never "offline".
    pub async fn check(&self, url: &str, args: CheckArgs<'_>) -> Result<Liveness, CheckError> {
        let plugin = self.resolver.resolve_url(url).await?;

        if !self.resolver.list_streams(url).await?.is_empty() {
            return Ok(Liveness { plugin, is_live: true });
        }

        let declared = self.resolver.declared_arguments(&plugin).await?;
        let required = auth_arguments(&declared, args.auth_fragments);
        if required.is_empty() {
            return Ok(Liveness { plugin, is_live: false });
        }

        let options = merged_options(
            &self.resolver.session_options(),
            args.global_args,
            args.stream_args,
        );
        let mut plugin_args = Vec::with_capacity(required.len());
        for name in required {
            let key = format!("{plugin}-{name}");
            match options.get(&key) {
                Some(value) => plugin_args.push((name, value.clone())),
                None => return Err(CheckError::MissingAuthArgument { plugin, key }),
            }
        }

        tracing::debug!(
            "Checking {url} with plugin {plugin} and {} authentication argument(s)",
            plugin_args.len()
        );
        let streams = self
            .resolver
            .list_streams_with(&plugin, url, &plugin_args)
            .await?;
        tracing::debug!("{url} has {} available stream(s)", streams.len());
        Ok(Liveness {
            plugin,
            is_live: !streams.is_empty(),
        })
    }

    /// [`check`](Self::check) bounded by `limit`.
    pub async fn check_within(
        &self,
        url: &str,
        args: CheckArgs<'_>,
        limit: Duration,
    ) -> Result<Liveness, CheckError> {
        tokio::time::timeout(limit, self.check(url, args))
            .await
            .map_err(|_| CheckError::Timeout(limit))?
    }
}

/// Declared option names containing any of `fragments`, in declaration order.
pub fn auth_arguments(declared: &[String], fragments: &[String]) -> Vec<String> {
    declared
        .iter()
        .filter(|name| fragments.iter().any(|f| !f.is_empty() && name.contains(f.as_str())))
        .cloned()
        .collect()
}

/// Session options overlaid with the parsed global and stream argument
/// strings. Flags are keyed without their leading dashes so that all three
/// layers name options the same way.
pub fn merged_options(
    session: &SessionOptions,
    global_args: Option<&str>,
    stream_args: Option<&str>,
) -> HashMap<String, Option<String>> {
    let mut merged: HashMap<String, Option<String>> = session
        .iter()
        .map(|(k, v)| (k.trim_start_matches('-').to_string(), v.clone()))
        .collect();
    for layer in [global_args, stream_args].into_iter().flatten() {
        for (flag, value) in ArgumentMap::parse(layer).iter() {
            merged.insert(
                flag.trim_start_matches('-').to_string(),
                value.map(str::to_string),
            );
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::testing::{Outcome, ScriptedResolver};

    const URL: &str = "https://www.bbc.co.uk/iplayer/live/bbcone";

    fn fragments() -> Vec<String> {
        vec!["username".to_string(), "password".to_string()]
    }

    fn checker(resolver: ScriptedResolver) -> (LivenessChecker<ScriptedResolver>, Arc<ScriptedResolver>) {
        let resolver = Arc::new(resolver);
        (LivenessChecker::new(Arc::clone(&resolver)), resolver)
    }

    // ── fast path ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn live_listing_returns_immediately() {
        let (checker, resolver) = checker(
            ScriptedResolver::new()
                .stream(URL, "bbciplayer", &[Outcome::Live])
                .declares("bbciplayer", &["username", "password"]),
        );
        let fragments = fragments();
        let args = CheckArgs {
            auth_fragments: &fragments,
            ..CheckArgs::default()
        };
        let result = checker.check(URL, args).await.unwrap();
        assert_eq!(result, Liveness { plugin: "bbciplayer".to_string(), is_live: true });
        assert!(resolver.reconstructions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_url_propagates_no_plugin_found() {
        let (checker, _) = checker(ScriptedResolver::new());
        let err = checker.check("https://nowhere.example/", CheckArgs::default()).await.unwrap_err();
        assert!(matches!(err, CheckError::NoPluginFound(u) if u == "https://nowhere.example/"));
    }

    #[tokio::test]
    async fn resolver_failure_is_transient() {
        let (checker, _) = checker(ScriptedResolver::new().stream(URL, "bbciplayer", &[Outcome::Fail]));
        let err = checker.check(URL, CheckArgs::default()).await.unwrap_err();
        assert!(matches!(err, CheckError::Transient(_)));
        assert!(!err.is_configuration_problem());
    }

    // ── authentication fallback ───────────────────────────────────────────────

    #[tokio::test]
    async fn empty_listing_without_auth_arguments_is_offline() {
        let (checker, resolver) = checker(
            ScriptedResolver::new()
                .stream(URL, "bbciplayer", &[Outcome::Offline])
                .declares("bbciplayer", &["hd", "low-latency"]),
        );
        let fragments = fragments();
        let args = CheckArgs {
            auth_fragments: &fragments,
            ..CheckArgs::default()
        };
        let result = checker.check(URL, args).await.unwrap();
        assert!(!result.is_live);
        assert!(resolver.reconstructions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn auth_arguments_are_collected_from_all_layers() {
        let (checker, resolver) = checker(
            ScriptedResolver::new()
                .stream(URL, "bbciplayer", &[Outcome::Offline])
                .declares("bbciplayer", &["username", "password", "hd"])
                .session_option("bbciplayer-username", Some("session-user"))
                .session_option("bbciplayer-password", Some("session-pass"))
                .live_when_authenticated(true),
        );
        let fragments = fragments();
        let args = CheckArgs {
            global_args: Some("--bbciplayer-username global-user"),
            stream_args: Some("--bbciplayer-username \"stream user\""),
            auth_fragments: &fragments,
        };
        let result = checker.check(URL, args).await.unwrap();
        assert!(result.is_live);

        let calls = resolver.reconstructions.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].1,
            vec![
                ("username".to_string(), Some("stream user".to_string())),
                ("password".to_string(), Some("session-pass".to_string())),
            ]
        );
    }

    #[tokio::test]
    async fn authenticated_but_still_empty_is_offline() {
        let (checker, _) = checker(
            ScriptedResolver::new()
                .stream(URL, "bbciplayer", &[Outcome::Offline])
                .declares("bbciplayer", &["password"])
                .live_when_authenticated(false),
        );
        let fragments = fragments();
        let args = CheckArgs {
            global_args: Some("--bbciplayer-password secret"),
            auth_fragments: &fragments,
            ..CheckArgs::default()
        };
        assert!(!checker.check(URL, args).await.unwrap().is_live);
    }

    #[tokio::test]
    async fn missing_auth_argument_is_reported() {
        let (checker, resolver) = checker(
            ScriptedResolver::new()
                .stream(URL, "bbciplayer", &[Outcome::Offline])
                .declares("bbciplayer", &["username", "password"]),
        );
        let fragments = fragments();
        let args = CheckArgs {
            global_args: Some("--bbciplayer-username me"),
            auth_fragments: &fragments,
            ..CheckArgs::default()
        };
        let err = checker.check(URL, args).await.unwrap_err();
        match &err {
            CheckError::MissingAuthArgument { plugin, key } => {
                assert_eq!(plugin, "bbciplayer");
                assert_eq!(key, "bbciplayer-password");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.is_configuration_problem());
        assert!(resolver.reconstructions.lock().unwrap().is_empty());
    }

    // ── timeout ───────────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn slow_check_times_out() {
        let (checker, _) = checker(
            ScriptedResolver::new()
                .stream(URL, "bbciplayer", &[Outcome::Live])
                .slow(Duration::from_secs(60)),
        );
        let err = checker
            .check_within(URL, CheckArgs::default(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, CheckError::Timeout(d) if d == Duration::from_secs(5)));
    }

    // ── helpers ───────────────────────────────────────────────────────────────

    #[test]
    fn auth_arguments_match_fragments_by_substring() {
        let declared: Vec<String> = ["username", "purge-credentials", "api-header", "hd"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let fragments: Vec<String> = ["user", "header"].iter().map(|s| s.to_string()).collect();
        assert_eq!(auth_arguments(&declared, &fragments), vec!["username", "api-header"]);
        assert!(auth_arguments(&declared, &[]).is_empty());
    }

    #[test]
    fn merged_options_precedence_and_key_normalization() {
        let mut session = SessionOptions::new();
        session.insert("x-token".to_string(), Some("session".to_string()));
        session.insert("x-user".to_string(), Some("session".to_string()));
        session.insert("x-flag".to_string(), Some("on".to_string()));

        let merged = merged_options(&session, Some("--x-token global --x-flag"), Some("--x-token stream"));
        assert_eq!(merged["x-token"], Some("stream".to_string()));
        assert_eq!(merged["x-user"], Some("session".to_string()));
        assert_eq!(merged["x-flag"], None);
    }
}
