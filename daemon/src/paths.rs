/// Canonical file paths for pollwatch data files.
///
/// All files live under `<config dir>/pollwatch/` (e.g. `~/.config/pollwatch`):
///   - config.toml  Written by the user, read once at startup.
///   - state.json   Per-watch state shared by every watch.
///   - status.toml  Written by the daemon for anything that wants a snapshot.
use std::path::PathBuf;

const APP_DIR_NAME: &str = "pollwatch";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const STATE_FILE_NAME: &str = "state.json";
pub const STATUS_FILE_NAME: &str = "status.toml";

/// Returns the pollwatch data directory, falling back to the working directory
/// when the platform has no config directory.
pub fn app_data_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

pub fn config_file_path() -> PathBuf {
    app_data_dir().join(CONFIG_FILE_NAME)
}

pub fn state_file_path() -> PathBuf {
    app_data_dir().join(STATE_FILE_NAME)
}

pub fn status_file_path() -> PathBuf {
    app_data_dir().join(STATUS_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_data_dir_ends_with_pollwatch() {
        let dir = app_data_dir();
        assert_eq!(dir.file_name().unwrap(), "pollwatch");
    }

    #[test]
    fn file_paths_have_correct_names() {
        assert_eq!(config_file_path().file_name().unwrap(), CONFIG_FILE_NAME);
        assert_eq!(state_file_path().file_name().unwrap(), STATE_FILE_NAME);
        assert_eq!(status_file_path().file_name().unwrap(), STATUS_FILE_NAME);
    }

    #[test]
    fn all_files_share_same_parent_dir() {
        let config = config_file_path();
        assert_eq!(config.parent(), state_file_path().parent());
        assert_eq!(config.parent(), status_file_path().parent());
    }
}
