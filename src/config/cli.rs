use crate::config::{SourceKind, TransferConfig};
use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "sql-warehouse-transfer")]
#[command(about = "Export every table of a SQL database to Cloud Storage and load it into BigQuery")]
pub struct CliArgs {
    #[arg(long, help = "TOML file with transfer parameters; flags override it")]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub server: Option<String>,

    #[arg(long)]
    pub database: Option<String>,

    #[arg(long)]
    pub username: Option<String>,

    #[arg(long)]
    pub password: Option<String>,

    #[arg(long = "credential", help = "Service-account JSON key file")]
    pub credential_ref: Option<String>,

    #[arg(long = "bucket")]
    pub bucket_name: Option<String>,

    #[arg(long = "dataset")]
    pub dataset_name: Option<String>,

    #[arg(long = "project")]
    pub project_id: Option<String>,

    #[arg(long, value_enum)]
    pub source_kind: Option<SourceKind>,

    #[arg(long)]
    pub staging_prefix: Option<String>,

    #[arg(long)]
    pub max_bad_records: Option<u32>,

    #[arg(long)]
    pub batch_rows: Option<usize>,

    #[arg(long, help = "Write the password to the run record in cleartext")]
    pub record_password: bool,

    #[arg(long, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, help = "Emit logs as JSON lines")]
    pub json_logs: bool,

    #[arg(long, help = "Log CPU and memory usage per table")]
    pub monitor: bool,
}

impl CliArgs {
    /// Layers the flags that were given over `base`.
    pub fn apply(self, mut base: TransferConfig) -> TransferConfig {
        fn set(target: &mut String, value: Option<String>) {
            if let Some(value) = value {
                *target = value;
            }
        }

        set(&mut base.server, self.server);
        set(&mut base.database, self.database);
        set(&mut base.username, self.username);
        set(&mut base.password, self.password);
        set(&mut base.credential_ref, self.credential_ref);
        set(&mut base.bucket_name, self.bucket_name);
        set(&mut base.dataset_name, self.dataset_name);
        set(&mut base.project_id, self.project_id);
        set(&mut base.staging_prefix, self.staging_prefix);

        if let Some(kind) = self.source_kind {
            base.source_kind = kind;
        }
        if let Some(max_bad_records) = self.max_bad_records {
            base.max_bad_records = max_bad_records;
        }
        if let Some(batch_rows) = self.batch_rows {
            base.batch_rows = batch_rows;
        }
        base.record_password |= self.record_password;
        base
    }
}
