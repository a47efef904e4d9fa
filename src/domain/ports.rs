use crate::config::TransferConfig;
use crate::domain::model::{
    LoadJob, LoadOptions, LoadTarget, ProgressEvent, Row, RunRecord, TableDescriptor,
};
use crate::utils::error::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Rows of one table in source order. Dropping the receiver stops the reader.
pub type RowStream = mpsc::Receiver<Result<Row>>;

/// Staged keys in store order; each call re-lists from current store state.
pub type KeyStream<'a> = BoxStream<'a, Result<String>>;

#[async_trait]
pub trait SourceDatabase: Send + Sync {
    /// Exportable base tables with their ordered column names.
    async fn list_tables(&self) -> Result<Vec<TableDescriptor>>;

    async fn stream_rows(&self, table: &TableDescriptor) -> Result<RowStream>;
}

/// Exclusively owned write handle for one artifact.
#[async_trait]
pub trait ArtifactWriter: Send {
    async fn write(&mut self, chunk: &[u8]) -> Result<()>;

    /// Flushes and closes the artifact. Calling it again is a no-op.
    async fn finish(&mut self) -> Result<()>;
}

#[async_trait]
pub trait StagingStore: Send + Sync {
    async fn open_write(&self, key: &str) -> Result<Box<dyn ArtifactWriter>>;

    fn list<'a>(&'a self, prefix: &'a str) -> KeyStream<'a>;

    /// Location of `key` as the warehouse addresses it.
    fn uri(&self, key: &str) -> String;
}

#[async_trait]
pub trait Warehouse: Send + Sync {
    async fn table_exists(&self, target: &LoadTarget) -> Result<bool>;

    async fn submit_load(
        &self,
        target: &LoadTarget,
        source_uri: &str,
        options: &LoadOptions,
    ) -> Result<LoadJob>;

    /// Blocks until the job is terminal; a failed job is an `Err`.
    async fn await_completion(&self, job: &LoadJob) -> Result<()>;
}

/// Builds the external collaborators for one run from a validated config.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect_source(&self, config: &TransferConfig) -> Result<Box<dyn SourceDatabase>>;

    async fn connect_staging(&self, config: &TransferConfig) -> Result<Box<dyn StagingStore>>;

    async fn connect_warehouse(&self, config: &TransferConfig) -> Result<Box<dyn Warehouse>>;
}

pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn emit(&self, event: ProgressEvent) {
        self(event)
    }
}

pub trait RunRecorder: Send + Sync {
    fn record(&self, record: &RunRecord) -> Result<PathBuf>;
}
