use crate::domain::model::RunRecord;
use crate::domain::ports::RunRecorder;
use crate::utils::error::Result;
use chrono::Local;
use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;

const REDACTED: &str = "********";

/// Writes one text file per run, named `<username>_<timestamp>.txt`.
#[derive(Debug, Clone)]
pub struct FileRunRecorder {
    dir: PathBuf,
    include_password: bool,
}

impl FileRunRecorder {
    pub fn new(dir: impl Into<PathBuf>, include_password: bool) -> Self {
        Self {
            dir: dir.into(),
            include_password,
        }
    }

    fn file_name(username: &str) -> String {
        // 使用者名稱可能含路徑字元
        let safe: String = username
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
            .collect();
        format!("{}_{}.txt", safe, Local::now().format("%Y-%m-%d_%H-%M-%S"))
    }
}

impl RunRecorder for FileRunRecorder {
    fn record(&self, record: &RunRecord) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(Self::file_name(&record.profile.username));
        fs::write(&path, render_record(record, self.include_password))?;

        tracing::debug!("Run record written to {}", path.display());
        Ok(path)
    }
}

pub fn render_record(record: &RunRecord, include_password: bool) -> String {
    let password = if include_password {
        record.profile.password.as_str()
    } else {
        REDACTED
    };

    let mut out = String::new();
    let _ = writeln!(out, "Source Details:");
    let _ = writeln!(out, "Server: {}", record.profile.server);
    let _ = writeln!(out, "Database: {}", record.profile.database);
    let _ = writeln!(out, "Username: {}", record.profile.username);
    let _ = writeln!(out, "Password: {}", password);
    let _ = writeln!(out, "JSON File Path: {}", record.credential_ref);
    let _ = writeln!(out, "Bucket Name: {}", record.bucket_name);
    let _ = writeln!(out, "Dataset Name: {}", record.dataset_name);
    let _ = writeln!(out, "Project ID: {}", record.project_id);
    out
}
