use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Configuration error: missing required field `{field}`")]
    MissingConfigError { field: String },

    #[error("Configuration error: invalid value `{value}` for `{field}`: {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Connection error: {message}")]
    ConnectionError { message: String },

    #[error("Schema query error: {message}")]
    SchemaQueryError { message: String },

    #[error("Export of table `{table}` failed: {cause}")]
    ExportError { table: String, cause: String },

    #[error("Load into table `{table}` failed: {cause}")]
    LoadError { table: String, cause: String },

    #[error("Staging store error: {message}")]
    StagingError { message: String },

    #[error("Warehouse error: {message}")]
    WarehouseError { message: String },

    #[error("Authentication error: {message}")]
    AuthError { message: String },

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Connection,
    Export,
    Load,
    Staging,
    Internal,
}

impl TransferError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::MissingConfigError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::TomlError(_) => ErrorCategory::Configuration,
            Self::ConnectionError { .. } | Self::AuthError { .. } | Self::HttpError(_) => {
                ErrorCategory::Connection
            }
            Self::SchemaQueryError { .. } | Self::ExportError { .. } | Self::DatabaseError(_) => {
                ErrorCategory::Export
            }
            Self::LoadError { .. } | Self::WarehouseError { .. } => ErrorCategory::Load,
            Self::StagingError { .. } => ErrorCategory::Staging,
            Self::CsvError(_) | Self::IoError(_) | Self::SerializationError(_) => {
                ErrorCategory::Internal
            }
        }
    }

    pub fn is_configuration(&self) -> bool {
        self.category() == ErrorCategory::Configuration
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Configuration => {
                "Fill in every required field (server, database, username, password, credential, bucket, dataset, project)"
            }
            ErrorCategory::Connection => {
                "Check the server address, credentials and network access, then retry"
            }
            ErrorCategory::Export => "Check that the table is readable by the configured user",
            ErrorCategory::Load => {
                "Inspect the load job errors in the warehouse console; the artifact is kept in staging"
            }
            ErrorCategory::Staging => "Check that the bucket exists and the credential can write to it",
            ErrorCategory::Internal => "Re-run with --verbose and inspect the log",
        }
    }

    pub(crate) fn export(table: &str, cause: impl std::fmt::Display) -> Self {
        Self::ExportError {
            table: table.to_string(),
            cause: cause.to_string(),
        }
    }

    pub(crate) fn load(table: &str, cause: impl std::fmt::Display) -> Self {
        Self::LoadError {
            table: table.to_string(),
            cause: cause.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TransferError>;
