use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Suffix of every staged export; also how the loader recognises artifacts.
pub const ARTIFACT_SUFFIX: &str = ".csv";

/// Identifies the relational source for one run.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionProfile {
    pub server: String,
    pub database: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for ConnectionProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionProfile")
            .field("server", &self.server)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"********")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub name: String,
    pub columns: Vec<String>,
}

impl TableDescriptor {
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }

    /// Staging key of this table's artifact, `<prefix>/<name>.csv`. The table
    /// name is the artifact base name and, later, the destination table name.
    pub fn artifact_key(&self, prefix: &str) -> String {
        format!("{}{}{}", normalize_prefix(prefix), self.name, ARTIFACT_SUFFIX)
    }
}

/// A staging prefix is a folder: empty, or ending in exactly one `/`.
pub fn normalize_prefix(prefix: &str) -> String {
    let folder = prefix.trim_end_matches('/');
    if folder.is_empty() {
        String::new()
    } else {
        format!("{}/", folder)
    }
}

/// Inverse of [`TableDescriptor::artifact_key`] for the same `prefix`, or
/// `None` when `key` is not an export staged directly under it.
pub fn table_name_from_key<'k>(key: &'k str, prefix: &str) -> Option<&'k str> {
    key.strip_prefix(normalize_prefix(prefix).as_str())?
        .strip_suffix(ARTIFACT_SUFFIX)
        .filter(|name| !name.is_empty() && !name.contains('/'))
}

/// One source row; `None` is SQL NULL.
pub type Row = Vec<Option<String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExportResult {
    pub rows_written: u64,
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadTarget {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl LoadTarget {
    pub fn from_key(key: &str, prefix: &str, project: &str, dataset: &str) -> Option<Self> {
        table_name_from_key(key, prefix).map(|table| Self {
            project: project.to_string(),
            dataset: dataset.to_string(),
            table: table.to_string(),
        })
    }
}

impl fmt::Display for LoadTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceFormat {
    #[serde(rename = "CSV")]
    Csv,
}

impl SourceFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceFormat::Csv => "CSV",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOptions {
    pub format: SourceFormat,
    pub skip_leading_rows: u32,
    pub autodetect: bool,
    pub max_bad_records: u32,
}

impl LoadOptions {
    /// Header row skipped, schema detected from it.
    pub fn csv(max_bad_records: u32) -> Self {
        Self {
            format: SourceFormat::Csv,
            skip_leading_rows: 1,
            autodetect: true,
            max_bad_records,
        }
    }
}

/// Handle of a submitted bulk-load job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadJob {
    pub project: String,
    pub job_id: String,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub loaded: BTreeSet<String>,
    pub skipped_existing: BTreeSet<String>,
    pub failed: BTreeMap<String, String>,
}

impl LoadSummary {
    pub fn attempted(&self) -> usize {
        self.loaded.len() + self.failed.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunStatus {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Cancelled | RunStatus::Failed
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStatus::Idle => "idle",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TableStatus {
    Exported { rows: u64 },
    ExportCancelled { rows: u64 },
    ExportFailed { cause: String },
    Loaded,
    SkippedExisting,
    LoadFailed { cause: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableLogEntry {
    pub table: String,
    pub status: TableStatus,
}

/// Ephemeral per-invocation state, owned and mutated by the controller only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunState {
    pub status: RunStatus,
    pub cancel_requested: bool,
    pub rows_transferred: u64,
    pub table_log: Vec<TableLogEntry>,
    pub error: Option<String>,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            status: RunStatus::Idle,
            cancel_requested: false,
            rows_transferred: 0,
            table_log: Vec::new(),
            error: None,
        }
    }
}

impl RunState {
    pub fn log(&mut self, table: &str, status: TableStatus) {
        self.table_log.push(TableLogEntry {
            table: table.to_string(),
            status,
        });
    }

    pub fn statuses_for<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a TableStatus> {
        self.table_log
            .iter()
            .filter(move |entry| entry.table == table)
            .map(|entry| &entry.status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunOutcome {
    pub state: RunState,
    pub summary: LoadSummary,
}

impl RunOutcome {
    pub fn status(&self) -> RunStatus {
        self.state.status
    }
}

/// Human-readable progress, the only coupling to a presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    RunStarted,
    TablesDiscovered { count: usize },
    TableStarted { table: String },
    TableExported { table: String, rows: u64 },
    ArtifactUploaded { table: String, uri: String },
    ExportCancelled { table: String, rows: u64 },
    ExportFailed { table: String, cause: String },
    CancelObserved,
    TableLoaded { table: String, target: String },
    TableSkipped { table: String },
    LoadFailed { table: String, cause: String },
    /// Staged artifacts could not be listed after tables were exported.
    StagingListFailed { cause: String },
    RunAborted { cause: String },
    RunRecordSaved { path: String },
    RunRecordFailed { cause: String },
    RunFinished { status: RunStatus },
}

impl ProgressEvent {
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            ProgressEvent::ExportFailed { .. }
                | ProgressEvent::LoadFailed { .. }
                | ProgressEvent::StagingListFailed { .. }
                | ProgressEvent::RunAborted { .. }
                | ProgressEvent::RunRecordFailed { .. }
        )
    }
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressEvent::RunStarted => write!(f, "Transfer started"),
            ProgressEvent::TablesDiscovered { count } => {
                write!(f, "Found {} table(s) to export", count)
            }
            ProgressEvent::TableStarted { table } => {
                write!(f, "Exporting data from table: {}", table)
            }
            ProgressEvent::TableExported { table, rows } => {
                write!(f, "Exported {} row(s) from table '{}'", rows, table)
            }
            ProgressEvent::ArtifactUploaded { table, uri } => {
                write!(f, "Data from table '{}' has been uploaded to {}", table, uri)
            }
            ProgressEvent::ExportCancelled { table, rows } => write!(
                f,
                "Transfer stopped by user while exporting '{}' ({} row(s) written)",
                table, rows
            ),
            ProgressEvent::ExportFailed { table, cause } => {
                write!(f, "Error exporting table '{}': {}", table, cause)
            }
            ProgressEvent::CancelObserved => write!(f, "Transfer stopped by user."),
            ProgressEvent::TableLoaded { table, target } => {
                write!(f, "Data for '{}' has been loaded into {}", table, target)
            }
            ProgressEvent::TableSkipped { table } => {
                write!(f, "Table {} already exists. Skipping load", table)
            }
            ProgressEvent::LoadFailed { table, cause } => {
                write!(f, "Error loading data for '{}': {}", table, cause)
            }
            ProgressEvent::StagingListFailed { cause } => {
                write!(f, "Could not list staged files, nothing was loaded: {}", cause)
            }
            ProgressEvent::RunAborted { cause } => write!(f, "An error occurred: {}", cause),
            ProgressEvent::RunRecordSaved { path } => {
                write!(f, "Run parameters saved to {}", path)
            }
            ProgressEvent::RunRecordFailed { cause } => {
                write!(f, "Could not save run parameters: {}", cause)
            }
            ProgressEvent::RunFinished { status } => write!(f, "Transfer {}", status),
        }
    }
}

/// Audit snapshot of one run's input parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunRecord {
    pub profile: ConnectionProfile,
    pub credential_ref: String,
    pub bucket_name: String,
    pub dataset_name: String,
    pub project_id: String,
}
