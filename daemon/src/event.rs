use crate::config::{Config, StreamRecord};

/// Edge-triggered liveness transition produced by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// The stream went from offline (or never seen) to live.
    Online(StreamRecord),
    /// The stream was live and no longer is.
    Offline(StreamRecord),
}

impl StreamEvent {
    pub fn record(&self) -> &StreamRecord {
        match self {
            StreamEvent::Online(r) | StreamEvent::Offline(r) => r,
        }
    }
}

pub enum DaemonEvent {
    /// A monitored stream changed state.
    Stream(StreamEvent),
    /// The config file changed on disk and was successfully re-parsed.
    ConfigReloaded(Config),
    /// Pause monitoring if running, resume it if paused.
    ToggleMonitoring,
    /// Ctrl+C received; the daemon should stop the scheduler and exit.
    Shutdown,
}
