//! Projects configuration (`projects.json`).
//!
//! Loaded once at agent startup and immutable for the agent's lifetime.
//! The file sits next to the agent binary by default:
//!
//! ```json
//! { "projects": [ { "id": "demo", "name": "Demo", "path": "/home/u/demo" } ] }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Reserved project id for sessions not bound to a configured project.
pub const QUICK_SESSION_ID: &str = "__quick__";

/// One configured project: a named working directory plus matching hints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(rename = "techStack", default, skip_serializing_if = "Vec::is_empty")]
    pub tech_stack: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// On-disk shape of `projects.json`. Only the wrapped form is accepted;
/// a bare top-level array is rejected.
#[derive(Debug, Deserialize)]
struct ProjectsFile {
    projects: Vec<Project>,
}

/// Immutable registry of configured projects.
#[derive(Debug, Clone)]
pub struct ProjectRegistry {
    projects: Vec<Project>,
    quick_session_path: PathBuf,
}

impl ProjectRegistry {
    /// Load from a `projects.json` file. A missing file yields an empty
    /// registry (quick sessions still work).
    pub fn load(path: &Path, quick_session_path: Option<PathBuf>) -> Result<Self> {
        let projects = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            let file: ProjectsFile = serde_json::from_str(&raw)
                .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
            file.projects
        } else {
            tracing::warn!(path = %path.display(), "projects.json not found, no projects configured");
            Vec::new()
        };

        Ok(Self::from_projects(projects, quick_session_path))
    }

    /// Build a registry from already-parsed projects.
    pub fn from_projects(projects: Vec<Project>, quick_session_path: Option<PathBuf>) -> Self {
        let quick_session_path = quick_session_path
            .or_else(dirs::home_dir)
            .unwrap_or_else(std::env::temp_dir);
        Self {
            projects,
            quick_session_path,
        }
    }

    /// Look up a project by id. The reserved quick-session id resolves to a
    /// synthesized project rooted at the quick-session path.
    pub fn get(&self, id: &str) -> Option<Project> {
        if id == QUICK_SESSION_ID {
            return Some(self.quick_session_project());
        }
        self.projects.iter().find(|p| p.id == id).cloned()
    }

    /// The synthesized project behind [`QUICK_SESSION_ID`].
    pub fn quick_session_project(&self) -> Project {
        Project {
            id: QUICK_SESSION_ID.to_string(),
            name: "Quick session".to_string(),
            path: self.quick_session_path.clone(),
            keywords: Vec::new(),
            tech_stack: Vec::new(),
            description: None,
        }
    }

    /// All configured projects (excludes the quick-session sentinel).
    pub fn all(&self) -> &[Project] {
        &self.projects
    }
}
