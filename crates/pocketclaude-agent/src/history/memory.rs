//! Per-user memory file (`<home>/.pocketclaude/memory.json`).
//!
//! Version-tagged JSON holding user preferences and a recent-project cache.
//! Loaded leniently: a missing or corrupt file yields defaults, and saves
//! are best-effort.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

const MEMORY_VERSION: u32 = 1;

/// How many recently used projects are remembered.
const RECENT_PROJECTS_CAP: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub version: u32,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub preferences: serde_json::Map<String, serde_json::Value>,
    #[serde(rename = "recentProjects", default)]
    pub recent_projects: Vec<String>,
}

impl Default for Memory {
    fn default() -> Self {
        Self {
            version: MEMORY_VERSION,
            preferences: serde_json::Map::new(),
            recent_projects: Vec::new(),
        }
    }
}

impl Memory {
    /// Default location under the user's home directory.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(".pocketclaude")
            .join("memory.json")
    }

    /// Load from disk; any failure yields defaults.
    pub async fn load(path: &Path) -> Self {
        match tokio::fs::read_to_string(path).await {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "Corrupt memory file, starting fresh");
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Best-effort save.
    pub async fn save(&self, path: &Path) {
        if let Some(parent) = path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        match serde_json::to_vec_pretty(self) {
            Ok(json) => {
                if let Err(e) = tokio::fs::write(path, json).await {
                    warn!(path = %path.display(), error = %e, "Cannot save memory file");
                }
            }
            Err(e) => warn!(error = %e, "Cannot serialize memory file"),
        }
    }

    /// Record a project as most recently used.
    pub fn touch_project(&mut self, project_id: &str) {
        self.recent_projects.retain(|p| p != project_id);
        self.recent_projects.insert(0, project_id.to_string());
        self.recent_projects.truncate(RECENT_PROJECTS_CAP);
    }
}
