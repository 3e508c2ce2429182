use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding `conversations.json`.
    #[serde(default = "d_state_path")]
    pub state_path: PathBuf,
    /// Write the snapshot after every committed transaction instead of
    /// only on shutdown.
    #[serde(default)]
    pub snapshot_on_commit: bool,
    /// Root of the file-group directories (`<files_dir>/<fileGroupId>/`).
    #[serde(default = "d_files_dir")]
    pub files_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            state_path: d_state_path(),
            snapshot_on_commit: false,
            files_dir: d_files_dir(),
        }
    }
}

fn d_state_path() -> PathBuf {
    PathBuf::from("./data")
}
fn d_files_dir() -> PathBuf {
    PathBuf::from("./data/files")
}
