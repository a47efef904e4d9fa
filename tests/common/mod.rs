#![allow(dead_code)]

use async_trait::async_trait;
use sql_warehouse_transfer::adapters::memory::MemoryStagingStore;
use sql_warehouse_transfer::domain::model::{
    LoadJob, LoadOptions, LoadTarget, Row, TableDescriptor,
};
use sql_warehouse_transfer::domain::ports::{
    ArtifactWriter, Connector, KeyStream, RowStream, SourceDatabase, StagingStore, Warehouse,
};
use sql_warehouse_transfer::{Result, TransferConfig, TransferError};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::mpsc;

#[derive(Clone)]
pub struct FakeTable {
    pub descriptor: TableDescriptor,
    pub rows: Vec<Row>,
    /// Index of the row at which reading fails with an I/O error.
    pub fail_at: Option<usize>,
}

impl FakeTable {
    pub fn new(name: &str, columns: &[&str], rows: Vec<Row>) -> Self {
        Self {
            descriptor: TableDescriptor::new(
                name,
                columns.iter().map(|c| c.to_string()).collect(),
            ),
            rows,
            fail_at: None,
        }
    }

    pub fn failing_at(mut self, index: usize) -> Self {
        self.fail_at = Some(index);
        self
    }
}

pub fn row(values: &[&str]) -> Row {
    values.iter().map(|v| Some(v.to_string())).collect()
}

pub fn numbered_rows(count: usize) -> Vec<Row> {
    (1..=count).map(|i| vec![Some(i.to_string())]).collect()
}

#[derive(Clone, Default)]
pub struct FakeSource {
    tables: Arc<Vec<FakeTable>>,
    exports: Arc<AtomicUsize>,
}

impl FakeSource {
    pub fn new(tables: Vec<FakeTable>) -> Self {
        Self {
            tables: Arc::new(tables),
            exports: Arc::default(),
        }
    }

    pub fn export_attempts(&self) -> usize {
        self.exports.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceDatabase for FakeSource {
    async fn list_tables(&self) -> Result<Vec<TableDescriptor>> {
        Ok(self.tables.iter().map(|t| t.descriptor.clone()).collect())
    }

    async fn stream_rows(&self, table: &TableDescriptor) -> Result<RowStream> {
        self.exports.fetch_add(1, Ordering::SeqCst);
        let fake = self
            .tables
            .iter()
            .find(|t| t.descriptor.name == table.name)
            .cloned()
            .ok_or_else(|| TransferError::SchemaQueryError {
                message: format!("no table {}", table.name),
            })?;

        let (tx, rx) = mpsc::channel(fake.rows.len() + 1);
        for (index, row) in fake.rows.into_iter().enumerate() {
            if fake.fail_at == Some(index) {
                let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "disk read failed");
                let _ = tx.send(Err(TransferError::from(io))).await;
                return Ok(rx);
            }
            let _ = tx.send(Ok(row)).await;
        }
        Ok(rx)
    }
}

#[derive(Default)]
struct WarehouseState {
    tables: Mutex<HashSet<String>>,
    submitted: Mutex<Vec<String>>,
}

/// Creates the destination table when a load job completes.
#[derive(Clone, Default)]
pub struct FakeWarehouse {
    state: Arc<WarehouseState>,
}

impl FakeWarehouse {
    pub fn with_tables(tables: &[&str]) -> Self {
        let warehouse = Self::default();
        warehouse
            .state
            .tables
            .lock()
            .unwrap()
            .extend(tables.iter().map(|t| t.to_string()));
        warehouse
    }

    pub fn submitted(&self) -> Vec<String> {
        self.state.submitted.lock().unwrap().clone()
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.state.tables.lock().unwrap().contains(table)
    }
}

#[async_trait]
impl Warehouse for FakeWarehouse {
    async fn table_exists(&self, target: &LoadTarget) -> Result<bool> {
        Ok(self.has_table(&target.table))
    }

    async fn submit_load(
        &self,
        target: &LoadTarget,
        _source_uri: &str,
        options: &LoadOptions,
    ) -> Result<LoadJob> {
        assert_eq!(options.skip_leading_rows, 1);
        self.state
            .submitted
            .lock()
            .unwrap()
            .push(target.table.clone());
        Ok(LoadJob {
            project: target.project.clone(),
            job_id: target.table.clone(),
            location: None,
        })
    }

    async fn await_completion(&self, job: &LoadJob) -> Result<()> {
        self.state.tables.lock().unwrap().insert(job.job_id.clone());
        Ok(())
    }
}

pub type Trip = Arc<dyn Fn() + Send + Sync>;

/// Counts chunks written across all artifacts of one run and calls `trip`
/// when the count reaches `after`.
pub struct TrippingStore {
    inner: MemoryStagingStore,
    writes: Arc<AtomicUsize>,
    after: usize,
    trip: Trip,
}

struct TrippingWriter {
    inner: Box<dyn ArtifactWriter>,
    writes: Arc<AtomicUsize>,
    after: usize,
    trip: Trip,
}

#[async_trait]
impl ArtifactWriter for TrippingWriter {
    async fn write(&mut self, chunk: &[u8]) -> Result<()> {
        self.inner.write(chunk).await?;
        if self.writes.fetch_add(1, Ordering::SeqCst) + 1 == self.after {
            (self.trip)();
        }
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        self.inner.finish().await
    }
}

#[async_trait]
impl StagingStore for TrippingStore {
    async fn open_write(&self, key: &str) -> Result<Box<dyn ArtifactWriter>> {
        Ok(Box::new(TrippingWriter {
            inner: self.inner.open_write(key).await?,
            writes: Arc::clone(&self.writes),
            after: self.after,
            trip: Arc::clone(&self.trip),
        }))
    }

    fn list<'a>(&'a self, prefix: &'a str) -> KeyStream<'a> {
        self.inner.list(prefix)
    }

    fn uri(&self, key: &str) -> String {
        self.inner.uri(key)
    }
}

#[derive(Clone)]
pub struct FakeConnector {
    pub source: FakeSource,
    pub staging: MemoryStagingStore,
    pub warehouse: FakeWarehouse,
    calls: Arc<AtomicUsize>,
    write_trip: Option<(usize, Trip)>,
}

impl FakeConnector {
    pub fn new(source: FakeSource, warehouse: FakeWarehouse) -> Self {
        Self {
            source,
            staging: MemoryStagingStore::new(),
            warehouse,
            calls: Arc::default(),
            write_trip: None,
        }
    }

    /// Staging calls `trip` after `after` chunks have been written in a run.
    pub fn with_write_trip(mut self, after: usize, trip: Trip) -> Self {
        self.write_trip = Some((after, trip));
        self
    }

    /// Number of adapters built so far; each one stands for network access.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect_source(&self, _config: &TransferConfig) -> Result<Box<dyn SourceDatabase>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(self.source.clone()))
    }

    async fn connect_staging(&self, _config: &TransferConfig) -> Result<Box<dyn StagingStore>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some((after, trip)) = &self.write_trip {
            return Ok(Box::new(TrippingStore {
                inner: self.staging.clone(),
                writes: Arc::default(),
                after: *after,
                trip: Arc::clone(trip),
            }));
        }
        Ok(Box::new(self.staging.clone()))
    }

    async fn connect_warehouse(&self, _config: &TransferConfig) -> Result<Box<dyn Warehouse>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(self.warehouse.clone()))
    }
}

/// A complete configuration whose run records land in `records`.
pub fn test_config(records: &TempDir) -> TransferConfig {
    TransferConfig {
        server: "db.internal".to_string(),
        database: "sales".to_string(),
        username: "etl".to_string(),
        password: "secret".to_string(),
        credential_ref: "/keys/sa.json".to_string(),
        bucket_name: "sales-staging".to_string(),
        dataset_name: "raw".to_string(),
        project_id: "acme".to_string(),
        record_dir: records.path().join("UI_Data").to_string_lossy().into_owned(),
        ..TransferConfig::default()
    }
}
