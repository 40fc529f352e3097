use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::StreamRecord;
use crate::event::StreamEvent;
use crate::scheduler::{MonitorSnapshot, RunState};

/// One live stream as shown in the status file.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct OnlineEntry {
    pub url: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl From<&StreamRecord> for OnlineEntry {
    fn from(record: &StreamRecord) -> Self {
        Self {
            url: record.url.clone(),
            name: record.display_name().to_string(),
            kind: record.kind().to_string(),
        }
    }
}

/// Runtime status written by the daemon to `status.toml` in the data
/// directory. External tools (status bars, tray widgets) read it.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DaemonStatus {
    /// Daemon binary version (set from Cargo.toml at compile time).
    pub version: String,
    pub state: RunState,
    pub live_count: usize,
    pub notify_count: usize,
    /// Human-readable description of the most recent transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_event: Option<String>,
    /// RFC 3339 timestamp of `last_event`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_event_timestamp: Option<String>,
    /// Human-readable error message if the daemon encountered a non-fatal error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Live streams, sorted by type then name. Kept last: TOML tables
    /// must follow plain values.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub online: Vec<OnlineEntry>,
}

impl DaemonStatus {
    pub fn new(state: RunState) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            state,
            live_count: 0,
            notify_count: 0,
            online: Vec::new(),
            last_event: None,
            last_event_timestamp: None,
            error: None,
        }
    }

    /// Replaces the monitor-derived fields with `snapshot`.
    pub fn apply_snapshot(&mut self, snapshot: &MonitorSnapshot) {
        self.state = snapshot.run_state;
        self.live_count = snapshot.live_count();
        self.notify_count = snapshot.notify_count;
        self.online = snapshot.online.iter().map(OnlineEntry::from).collect();
    }

    pub fn record_event(&mut self, event: &StreamEvent) {
        let record = event.record();
        let description = match event {
            StreamEvent::Online(_) => format!("{} is live on {}", record.display_name(), record.kind()),
            StreamEvent::Offline(_) => format!("{} went offline", record.display_name()),
        };
        self.last_event = Some(description);
        self.last_event_timestamp = Some(chrono::Local::now().to_rfc3339());
    }
}

/// Serializes `status` to TOML and writes it to `path`.
/// Creates the parent directory if it does not exist. Failures are logged,
/// never returned.
pub fn write_status(path: &Path, status: &DaemonStatus) {
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            tracing::warn!("Failed to create directory {}: {e}", parent.display());
            return;
        }
    }
    match toml::to_string_pretty(status) {
        Ok(content) => {
            if let Err(e) = std::fs::write(path, content) {
                tracing::warn!("Failed to write status file: {e}");
            }
        }
        Err(e) => tracing::warn!("Failed to serialize status: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_record(url: &str, name: &str, kind: &str) -> StreamRecord {
        StreamRecord {
            name: Some(name.to_string()),
            kind: Some(kind.to_string()),
            ..StreamRecord::new(url)
        }
    }

    // ── DaemonStatus::new ─────────────────────────────────────────────────────

    #[test]
    fn new_has_no_optional_fields() {
        let s = DaemonStatus::new(RunState::Running);
        assert_eq!(s.state, RunState::Running);
        assert_eq!(s.live_count, 0);
        assert!(s.online.is_empty());
        assert!(s.last_event.is_none());
        assert!(s.last_event_timestamp.is_none());
        assert!(s.error.is_none());
        assert_eq!(s.version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn state_serializes_to_lowercase() {
        let mut s = DaemonStatus::new(RunState::Running);
        assert!(toml::to_string_pretty(&s).unwrap().contains("state = \"running\""));
        s.state = RunState::Paused;
        assert!(toml::to_string_pretty(&s).unwrap().contains("state = \"paused\""));
        s.state = RunState::Stopped;
        assert!(toml::to_string_pretty(&s).unwrap().contains("state = \"stopped\""));
    }

    // ── apply_snapshot / record_event ─────────────────────────────────────────

    #[test]
    fn apply_snapshot_copies_counts_and_entries() {
        let snapshot = MonitorSnapshot {
            run_state: RunState::Paused,
            online: vec![make_record("https://a.example/", "Alpha", "twitch")],
            always_on: Vec::new(),
            notify_count: 1,
        };
        let mut s = DaemonStatus::new(RunState::Running);
        s.apply_snapshot(&snapshot);
        assert_eq!(s.state, RunState::Paused);
        assert_eq!(s.live_count, 1);
        assert_eq!(s.notify_count, 1);
        assert_eq!(
            s.online,
            vec![OnlineEntry {
                url: "https://a.example/".to_string(),
                name: "Alpha".to_string(),
                kind: "twitch".to_string(),
            }]
        );
    }

    #[test]
    fn record_event_describes_transition() {
        let mut s = DaemonStatus::new(RunState::Running);
        s.record_event(&StreamEvent::Online(make_record("https://a.example/", "Alpha", "twitch")));
        assert_eq!(s.last_event.as_deref(), Some("Alpha is live on twitch"));
        assert!(s.last_event_timestamp.is_some());

        s.record_event(&StreamEvent::Offline(StreamRecord::new("https://b.example/")));
        assert_eq!(s.last_event.as_deref(), Some("https://b.example/ went offline"));
    }

    // ── write_status ──────────────────────────────────────────────────────────

    #[test]
    fn write_status_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("dir").join("status.toml");
        write_status(&path, &DaemonStatus::new(RunState::Running));
        assert!(path.exists());
    }

    #[test]
    fn write_status_content_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.toml");

        let mut original = DaemonStatus::new(RunState::Running);
        original.live_count = 1;
        original.online = vec![OnlineEntry::from(&make_record("https://a.example/", "Alpha", "twitch"))];
        write_status(&path, &original);

        let content = std::fs::read_to_string(&path).unwrap();
        let parsed: DaemonStatus = toml::from_str(&content).unwrap();
        assert_eq!(parsed.state, RunState::Running);
        assert_eq!(parsed.live_count, 1);
        assert_eq!(parsed.online, original.online);
        assert!(content.contains("type = \"twitch\""));
    }

    #[test]
    fn write_status_omits_none_optional_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.toml");
        write_status(&path, &DaemonStatus::new(RunState::Paused));

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(!content.contains("online"));
        assert!(!content.contains("last_event"));
        assert!(!content.contains("error"));
    }
}
