use crate::domain::model::{
    normalize_prefix, LoadOptions, LoadSummary, LoadTarget, ProgressEvent, TableLogEntry,
    TableStatus,
};
use crate::domain::ports::{KeyStream, ProgressSink, StagingStore, Warehouse};
use crate::utils::error::{Result, TransferError};
use futures::TryStreamExt;
use std::ops::ControlFlow;
use tokio_util::sync::CancellationToken;

/// Outcome of one staged artifact.
#[derive(Debug)]
pub enum LoadOutcome {
    Loaded,
    SkippedExisting,
    Failed(TransferError),
}

/// Loads every staged artifact into `<project>.<dataset>.<table>`, at most
/// once per table: an existing destination table is never written again.
pub struct WarehouseLoader {
    project: String,
    dataset: String,
    prefix: String,
    options: LoadOptions,
}

impl WarehouseLoader {
    pub fn new(project: impl Into<String>, dataset: impl Into<String>, max_bad_records: u32) -> Self {
        Self {
            project: project.into(),
            dataset: dataset.into(),
            prefix: String::new(),
            options: LoadOptions::csv(max_bad_records),
        }
    }

    /// Only keys directly under `prefix` are loaded.
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = normalize_prefix(prefix);
        self
    }

    pub async fn load_one(
        &self,
        warehouse: &dyn Warehouse,
        target: &LoadTarget,
        source_uri: &str,
    ) -> LoadOutcome {
        match warehouse.table_exists(target).await {
            Ok(true) => return LoadOutcome::SkippedExisting,
            Ok(false) => {}
            Err(e) => return LoadOutcome::Failed(TransferError::load(&target.table, e)),
        }

        let loaded = async {
            let job = warehouse.submit_load(target, source_uri, &self.options).await?;
            warehouse.await_completion(&job).await
        };
        match loaded.await {
            Ok(()) => LoadOutcome::Loaded,
            Err(e) => LoadOutcome::Failed(TransferError::load(&target.table, e)),
        }
    }

    /// Walks `keys` in listing order. Tables already in `summary.failed`
    /// (their export failed in this run) are not loaded. Returns
    /// `ControlFlow::Break` when cancellation stopped the walk; only a
    /// listing failure is an `Err`.
    #[allow(clippy::too_many_arguments)]
    pub async fn load_all(
        &self,
        warehouse: &dyn Warehouse,
        staging: &dyn StagingStore,
        mut keys: KeyStream<'_>,
        cancel: &CancellationToken,
        sink: &dyn ProgressSink,
        summary: &mut LoadSummary,
        log: &mut Vec<TableLogEntry>,
    ) -> Result<ControlFlow<()>> {
        while let Some(key) = keys.try_next().await? {
            let target = LoadTarget::from_key(&key, &self.prefix, &self.project, &self.dataset);
            let Some(target) = target else {
                tracing::debug!("Ignoring {}: not a staged export", key);
                continue;
            };
            if summary.failed.contains_key(&target.table) {
                tracing::debug!("Not loading {}: its export failed in this run", key);
                continue;
            }
            if cancel.is_cancelled() {
                return Ok(ControlFlow::Break(()));
            }

            let table = target.table.clone();
            let status = match self.load_one(warehouse, &target, &staging.uri(&key)).await {
                LoadOutcome::Loaded => {
                    sink.emit(ProgressEvent::TableLoaded {
                        table: table.clone(),
                        target: target.to_string(),
                    });
                    summary.loaded.insert(table.clone());
                    TableStatus::Loaded
                }
                LoadOutcome::SkippedExisting => {
                    sink.emit(ProgressEvent::TableSkipped {
                        table: table.clone(),
                    });
                    summary.skipped_existing.insert(table.clone());
                    TableStatus::SkippedExisting
                }
                LoadOutcome::Failed(e) => {
                    let cause = e.to_string();
                    sink.emit(ProgressEvent::LoadFailed {
                        table: table.clone(),
                        cause: cause.clone(),
                    });
                    summary.failed.insert(table.clone(), cause.clone());
                    TableStatus::LoadFailed { cause }
                }
            };
            log.push(TableLogEntry { table, status });
        }

        Ok(ControlFlow::Continue(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::MemoryStagingStore;
    use crate::domain::model::LoadJob;
    use async_trait::async_trait;
    use std::collections::{BTreeSet, HashSet};
    use std::sync::Mutex;

    #[derive(Default)]
    struct ScriptedWarehouse {
        existing: HashSet<String>,
        failing: HashSet<String>,
        submitted: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl Warehouse for ScriptedWarehouse {
        async fn table_exists(&self, target: &LoadTarget) -> Result<bool> {
            Ok(self.existing.contains(&target.table))
        }

        async fn submit_load(
            &self,
            target: &LoadTarget,
            source_uri: &str,
            options: &LoadOptions,
        ) -> Result<LoadJob> {
            assert_eq!(options.skip_leading_rows, 1);
            assert!(options.autodetect);
            self.submitted
                .lock()
                .unwrap()
                .push((target.table.clone(), source_uri.to_string()));
            Ok(LoadJob {
                project: target.project.clone(),
                job_id: format!("job_{}", target.table),
                location: None,
            })
        }

        async fn await_completion(&self, job: &LoadJob) -> Result<()> {
            let table = job.job_id.trim_start_matches("job_");
            if self.failing.contains(table) {
                return Err(TransferError::WarehouseError {
                    message: "Too many errors encountered".to_string(),
                });
            }
            Ok(())
        }
    }

    async fn staging_with(keys: &[&str]) -> MemoryStagingStore {
        let staging = MemoryStagingStore::new();
        for key in keys {
            staging.insert(key, b"id\n1\n").await;
        }
        staging
    }

    #[tokio::test]
    async fn test_policy_per_artifact() {
        let staging =
            staging_with(&["Customers.csv", "Orders.csv", "Returns.csv", "notes.txt"]).await;
        let warehouse = ScriptedWarehouse {
            existing: ["Orders".to_string()].into(),
            failing: ["Returns".to_string()].into(),
            ..Default::default()
        };
        let events = Mutex::new(Vec::new());
        let sink = |event: ProgressEvent| events.lock().unwrap().push(event);
        let mut summary = LoadSummary::default();
        let mut log = Vec::new();

        let flow = WarehouseLoader::new("acme", "raw", 1000)
            .load_all(
                &warehouse,
                &staging,
                staging.list(""),
                &CancellationToken::new(),
                &sink,
                &mut summary,
                &mut log,
            )
            .await
            .unwrap();

        assert_eq!(flow, ControlFlow::Continue(()));
        assert_eq!(summary.loaded, BTreeSet::from(["Customers".to_string()]));
        assert_eq!(summary.skipped_existing, BTreeSet::from(["Orders".to_string()]));
        assert!(summary.failed["Returns"].contains("Too many errors encountered"));

        let submitted = warehouse.submitted.lock().unwrap().clone();
        assert_eq!(
            submitted,
            vec![
                ("Customers".to_string(), "memory://Customers.csv".to_string()),
                ("Returns".to_string(), "memory://Returns.csv".to_string()),
            ]
        );
        assert_eq!(log.len(), 3);
        assert_eq!(events.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_tables_failed_earlier_are_not_loaded() {
        let staging = staging_with(&["Orders.csv"]).await;
        let warehouse = ScriptedWarehouse::default();
        let mut summary = LoadSummary::default();
        summary
            .failed
            .insert("Orders".to_string(), "export failed".to_string());

        WarehouseLoader::new("acme", "raw", 10)
            .load_all(
                &warehouse,
                &staging,
                staging.list(""),
                &CancellationToken::new(),
                &|_: ProgressEvent| {},
                &mut summary,
                &mut Vec::new(),
            )
            .await
            .unwrap();

        assert!(warehouse.submitted.lock().unwrap().is_empty());
        assert_eq!(summary.failed["Orders"], "export failed");
    }

    #[tokio::test]
    async fn test_cancel_stops_before_next_submission() {
        let staging = staging_with(&["A.csv", "B.csv"]).await;
        let warehouse = ScriptedWarehouse::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut summary = LoadSummary::default();

        let flow = WarehouseLoader::new("acme", "raw", 10)
            .load_all(
                &warehouse,
                &staging,
                staging.list(""),
                &cancel,
                &|_: ProgressEvent| {},
                &mut summary,
                &mut Vec::new(),
            )
            .await
            .unwrap();

        assert_eq!(flow, ControlFlow::Break(()));
        assert_eq!(summary, LoadSummary::default());
        assert!(warehouse.submitted.lock().unwrap().is_empty());
    }
}
