//! On-disk session history.
//!
//! Per project, under `<home>/.pocketclaude/history/<projectId>/`, each
//! session leaves a pair of files: `<epochMs>-<sessionId>.log` with the raw
//! PTY output, and `<epochMs>-<sessionId>.summary.json` with start/end
//! timestamps and a trailing preview. All writes are best-effort: history
//! I/O failures are logged and never surface to the session.

mod memory;

pub use memory::Memory;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use pocketclaude_proto::now_ms;

/// Bytes of log tail kept as the summary preview.
const PREVIEW_BYTES: usize = 500;

/// Summaries folded into the context injection at session start.
const CONTEXT_SUMMARIES: usize = 3;

/// Markers framing the injected context block.
const CONTEXT_HEADER: &str = "=== Previous Session Context ===";
const CONTEXT_FOOTER: &str = "=== End of Previous Context ===";

/// One session's summary file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "projectId")]
    pub project_id: String,
    #[serde(rename = "startedAt")]
    pub started_at: i64,
    #[serde(rename = "endedAt", skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<i64>,
    pub preview: String,
}

/// Paths of one session's history pair.
#[derive(Debug, Clone)]
pub struct HistoryPaths {
    pub log_path: PathBuf,
    pub summary_path: PathBuf,
}

/// Append handle owned by a session's output pump. Write errors are logged
/// once and further appends become no-ops.
#[derive(Debug)]
pub struct HistoryWriter {
    file: Option<tokio::fs::File>,
    log_path: PathBuf,
}

impl HistoryWriter {
    fn disabled() -> Self {
        Self {
            file: None,
            log_path: PathBuf::new(),
        }
    }

    pub async fn append(&mut self, bytes: &[u8]) {
        if let Some(file) = self.file.as_mut() {
            if let Err(e) = file.write_all(bytes).await {
                warn!(path = %self.log_path.display(), error = %e, "History append failed, disabling log");
                self.file = None;
            }
        }
    }
}

/// Store rooted at `<home>/.pocketclaude/history`.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    root: PathBuf,
}

impl HistoryStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Default root under the user's home directory.
    pub fn default_root() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(".pocketclaude")
            .join("history")
    }

    fn project_dir(&self, project_id: &str) -> PathBuf {
        self.root.join(project_id)
    }

    /// Open the log/summary pair for a starting session. On any I/O failure
    /// the session proceeds with history disabled.
    pub async fn begin(&self, project_id: &str, session_id: &str) -> (HistoryPaths, HistoryWriter) {
        let started_at = now_ms();
        let dir = self.project_dir(project_id);
        let stem = format!("{started_at}-{session_id}");
        let paths = HistoryPaths {
            log_path: dir.join(format!("{stem}.log")),
            summary_path: dir.join(format!("{stem}.summary.json")),
        };

        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            warn!(dir = %dir.display(), error = %e, "Cannot create history directory, proceeding without history");
            return (paths, HistoryWriter::disabled());
        }

        let summary = SessionSummary {
            session_id: session_id.to_string(),
            project_id: project_id.to_string(),
            started_at,
            ended_at: None,
            preview: String::new(),
        };
        write_summary(&paths.summary_path, &summary).await;

        match tokio::fs::File::create(&paths.log_path).await {
            Ok(file) => (
                paths.clone(),
                HistoryWriter {
                    file: Some(file),
                    log_path: paths.log_path,
                },
            ),
            Err(e) => {
                warn!(path = %paths.log_path.display(), error = %e, "Cannot create history log, proceeding without history");
                (paths, HistoryWriter::disabled())
            }
        }
    }

    /// Stamp the end time and refresh the preview from the log tail.
    pub async fn finalize(&self, paths: &HistoryPaths) {
        let mut summary = match read_summary(&paths.summary_path).await {
            Some(summary) => summary,
            None => return,
        };
        summary.ended_at = Some(now_ms());
        summary.preview = log_preview(&paths.log_path).await;
        write_summary(&paths.summary_path, &summary).await;
        debug!(path = %paths.summary_path.display(), "History finalized");
    }

    /// Newest `limit` summaries for a project, newest first (filenames are
    /// timestamp-prefixed, so name order is time order).
    pub async fn summaries(&self, project_id: &str, limit: usize) -> Vec<SessionSummary> {
        let mut names = self.sorted_entries(project_id, ".summary.json").await;
        names.truncate(limit);

        let dir = self.project_dir(project_id);
        let mut summaries = Vec::with_capacity(names.len());
        for name in names {
            if let Some(summary) = read_summary(&dir.join(name)).await {
                summaries.push(summary);
            }
        }
        summaries
    }

    /// Full content of the newest log for a project.
    pub async fn last_output(&self, project_id: &str) -> Option<String> {
        let names = self.sorted_entries(project_id, ".log").await;
        let name = names.first()?;
        let bytes = tokio::fs::read(self.project_dir(project_id).join(name))
            .await
            .ok()?;
        Some(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Context block injected at session start: the previews of the newest
    /// three finished sessions, oldest first, framed by fixed markers.
    /// Empty when no previous session left a preview.
    pub async fn context_summary(&self, project_id: &str) -> String {
        let mut previews: Vec<String> = self
            .summaries(project_id, CONTEXT_SUMMARIES)
            .await
            .into_iter()
            .map(|s| s.preview)
            .filter(|p| !p.is_empty())
            .collect();
        if previews.is_empty() {
            return String::new();
        }
        previews.reverse();
        format!(
            "{CONTEXT_HEADER}\n{}\n{CONTEXT_FOOTER}",
            previews.join("\n---\n")
        )
    }

    /// Directory entries with the given suffix, sorted descending by name.
    async fn sorted_entries(&self, project_id: &str, suffix: &str) -> Vec<String> {
        let dir = self.project_dir(project_id);
        let mut names = Vec::new();
        let Ok(mut entries) = tokio::fs::read_dir(&dir).await else {
            return names;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(suffix) {
                names.push(name);
            }
        }
        names.sort_unstable_by(|a, b| b.cmp(a));
        names
    }
}

async fn write_summary(path: &Path, summary: &SessionSummary) {
    let json = match serde_json::to_vec_pretty(summary) {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "Cannot serialize session summary");
            return;
        }
    };
    if let Err(e) = tokio::fs::write(path, json).await {
        warn!(path = %path.display(), error = %e, "Cannot write session summary");
    }
}

async fn read_summary(path: &Path) -> Option<SessionSummary> {
    let raw = tokio::fs::read_to_string(path).await.ok()?;
    match serde_json::from_str(&raw) {
        Ok(summary) => Some(summary),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Skipping unreadable summary");
            None
        }
    }
}

/// Last [`PREVIEW_BYTES`] of the log, decoded lossily.
async fn log_preview(path: &Path) -> String {
    let Ok(bytes) = tokio::fs::read(path).await else {
        return String::new();
    };
    let start = bytes.len().saturating_sub(PREVIEW_BYTES);
    String::from_utf8_lossy(&bytes[start..]).into_owned()
}
