#[cfg(feature = "cli")]
pub mod cli;
pub mod toml_config;

use crate::domain::model::{normalize_prefix, ConnectionProfile, RunRecord};
use crate::utils::error::Result;
use crate::utils::validation::{
    validate_bucket_name, validate_range, validate_required_field, validate_url, Validate,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_STORAGE_ENDPOINT: &str = "https://storage.googleapis.com";
pub const DEFAULT_BIGQUERY_ENDPOINT: &str = "https://bigquery.googleapis.com";
pub const DEFAULT_MAX_BAD_RECORDS: u32 = 1000;
pub const DEFAULT_RECORD_DIR: &str = "UI_Data";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum SourceKind {
    #[default]
    Postgres,
    Sqlite,
    #[cfg_attr(feature = "cli", value(name = "sqlserver"))]
    SqlServer,
}

/// Parameters of one transfer run. Built once per invocation and validated
/// before anything touches the network.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub server: String,
    pub database: String,
    pub username: String,
    pub password: String,
    /// Path of the service-account key used for the cloud side.
    pub credential_ref: String,
    pub bucket_name: String,
    pub dataset_name: String,
    pub project_id: String,

    pub source_kind: SourceKind,
    pub staging_prefix: String,
    pub max_bad_records: u32,
    pub batch_rows: usize,
    pub poll_interval_ms: u64,
    pub record_dir: String,
    pub record_password: bool,
    pub storage_endpoint: String,
    pub bigquery_endpoint: String,
    pub access_token: Option<String>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            server: String::new(),
            database: String::new(),
            username: String::new(),
            password: String::new(),
            credential_ref: String::new(),
            bucket_name: String::new(),
            dataset_name: String::new(),
            project_id: String::new(),
            source_kind: SourceKind::default(),
            staging_prefix: String::new(),
            max_bad_records: DEFAULT_MAX_BAD_RECORDS,
            batch_rows: 1000,
            poll_interval_ms: 1000,
            record_dir: DEFAULT_RECORD_DIR.to_string(),
            record_password: false,
            storage_endpoint: DEFAULT_STORAGE_ENDPOINT.to_string(),
            bigquery_endpoint: DEFAULT_BIGQUERY_ENDPOINT.to_string(),
            access_token: None,
        }
    }
}

impl std::fmt::Debug for TransferConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferConfig")
            .field("server", &self.server)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("credential_ref", &self.credential_ref)
            .field("bucket_name", &self.bucket_name)
            .field("dataset_name", &self.dataset_name)
            .field("project_id", &self.project_id)
            .field("source_kind", &self.source_kind)
            .field("staging_prefix", &self.staging_prefix)
            .field("max_bad_records", &self.max_bad_records)
            .field("batch_rows", &self.batch_rows)
            .finish_non_exhaustive()
    }
}

impl TransferConfig {
    pub fn profile(&self) -> ConnectionProfile {
        ConnectionProfile {
            server: self.server.clone(),
            database: self.database.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }

    /// `staging_prefix` as a folder, shared by the exporter and the loader.
    pub fn artifact_prefix(&self) -> String {
        normalize_prefix(&self.staging_prefix)
    }

    pub fn run_record(&self) -> RunRecord {
        RunRecord {
            profile: self.profile(),
            credential_ref: self.credential_ref.clone(),
            bucket_name: self.bucket_name.clone(),
            dataset_name: self.dataset_name.clone(),
            project_id: self.project_id.clone(),
        }
    }

    pub fn required_fields(&self) -> [(&'static str, &str); 8] {
        [
            ("server", &self.server),
            ("database", &self.database),
            ("username", &self.username),
            ("password", &self.password),
            ("credential_ref", &self.credential_ref),
            ("bucket_name", &self.bucket_name),
            ("dataset_name", &self.dataset_name),
            ("project_id", &self.project_id),
        ]
    }
}

impl Validate for TransferConfig {
    fn validate(&self) -> Result<()> {
        for (field, value) in self.required_fields() {
            validate_required_field(field, value)?;
        }

        validate_bucket_name("bucket_name", &self.bucket_name)?;
        validate_range("batch_rows", self.batch_rows, 1, 1_000_000)?;
        validate_range("poll_interval_ms", self.poll_interval_ms, 1, 600_000)?;
        validate_url("storage_endpoint", &self.storage_endpoint)?;
        validate_url("bigquery_endpoint", &self.bigquery_endpoint)?;
        validate_required_field("record_dir", &self.record_dir)?;

        tracing::debug!("✅ Transfer configuration validation passed");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::utils::error::TransferError;

    pub(crate) fn complete_config() -> TransferConfig {
        TransferConfig {
            server: "db.internal".to_string(),
            database: "sales".to_string(),
            username: "etl".to_string(),
            password: "secret".to_string(),
            credential_ref: "/keys/sa.json".to_string(),
            bucket_name: "sales-staging".to_string(),
            dataset_name: "raw".to_string(),
            project_id: "acme".to_string(),
            ..TransferConfig::default()
        }
    }

    #[test]
    fn test_complete_config_is_valid() {
        assert!(complete_config().validate().is_ok());
    }

    #[test]
    fn test_each_missing_field_is_reported() {
        let fields = [
            "server",
            "database",
            "username",
            "password",
            "credential_ref",
            "bucket_name",
            "dataset_name",
            "project_id",
        ];
        for field in fields {
            let mut config = complete_config();
            match field {
                "server" => config.server.clear(),
                "database" => config.database.clear(),
                "username" => config.username.clear(),
                "password" => config.password.clear(),
                "credential_ref" => config.credential_ref.clear(),
                "bucket_name" => config.bucket_name.clear(),
                "dataset_name" => config.dataset_name.clear(),
                _ => config.project_id = "  ".to_string(),
            }
            match config.validate() {
                Err(TransferError::MissingConfigError { field: reported }) => {
                    assert_eq!(reported, field)
                }
                other => panic!("expected missing {}, got {:?}", field, other),
            }
        }
    }

    #[test]
    fn test_debug_omits_password() {
        let rendered = format!("{:?}", complete_config());
        assert!(!rendered.contains("secret"));
    }

    #[test]
    fn test_invalid_endpoint_rejected() {
        let mut config = complete_config();
        config.bigquery_endpoint = "ftp://bq".to_string();
        assert!(matches!(
            config.validate(),
            Err(TransferError::InvalidConfigValueError { .. })
        ));
    }

    #[test]
    fn test_artifact_prefix_is_a_folder() {
        let mut config = complete_config();
        assert_eq!(config.artifact_prefix(), "");
        config.staging_prefix = "exports".to_string();
        assert_eq!(config.artifact_prefix(), "exports/");
        config.staging_prefix = "exports/".to_string();
        assert_eq!(config.artifact_prefix(), "exports/");
    }
}
