/// Canonical file paths for StreamCondor data files.
///
///   - config.json  Stream list and settings. Edited by the user and by the
///                  `add`/`remove` subcommands, watched by the daemon.
///   - status.toml  Written by the daemon, read by external tools.
///
/// Locations follow the platform conventions reported by `directories`
/// (e.g. `~/.config/streamcondor` and `~/.local/share/streamcondor` on Linux).
/// When no home directory can be determined, both fall back to the current
/// directory.
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

const APP_NAME: &str = "streamcondor";
pub const CONFIG_FILE_NAME: &str = "config.json";
pub const STATUS_FILE_NAME: &str = "status.toml";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", APP_NAME)
}

pub fn config_dir() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.config_dir().to_path_buf())
        .unwrap_or_default()
}

pub fn data_dir() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_default()
}

pub fn config_file_path() -> PathBuf {
    config_dir().join(CONFIG_FILE_NAME)
}

pub fn status_file_path() -> PathBuf {
    data_dir().join(STATUS_FILE_NAME)
}

/// `path` made absolute against the current directory, without resolving
/// symlinks. Returned unchanged when that fails (e.g. for an empty path).
pub fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
