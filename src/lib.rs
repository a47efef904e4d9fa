pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use crate::config::cli::CliArgs;
pub use crate::config::{SourceKind, TransferConfig};

pub use crate::adapters::connector::CloudConnector;
pub use crate::core::{PipelineController, TracingSink};
pub use crate::domain::model::{LoadSummary, ProgressEvent, RunOutcome, RunState, RunStatus};
pub use crate::utils::error::{Result, TransferError};
