use crate::config::TransferConfig;
use crate::core::exporter::RowExporter;
use crate::core::loader::WarehouseLoader;
use crate::core::recorder::FileRunRecorder;
use crate::domain::model::{
    LoadSummary, ProgressEvent, RunOutcome, RunState, RunStatus, TableStatus,
};
use crate::domain::ports::{Connector, ProgressSink, RunRecorder};
use crate::utils::error::Result;
use crate::utils::validation::Validate;
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;

/// Single entry point for every presentation layer.
///
/// `start` drives one run from `Idle` to a terminal state: it connects,
/// exports every table the source lists, then loads whatever is staged under
/// the configured prefix. Per-table failures are recorded in the outcome and
/// never end the run; only a configuration error is returned as `Err`.
pub struct PipelineController<C: Connector> {
    connector: C,
    recorder: Option<Arc<dyn RunRecorder>>,
    cancel: Mutex<CancellationToken>,
}

impl<C: Connector> PipelineController<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            recorder: None,
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// Replaces the default file recorder built from `record_dir`.
    pub fn with_recorder(mut self, recorder: Arc<dyn RunRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Asks the current run to stop at its next checkpoint. Safe to call at
    /// any time and any number of times; a run started later gets a fresh
    /// token.
    pub fn request_cancel(&self) {
        self.current_token().cancel();
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.current_token().is_cancelled()
    }

    fn current_token(&self) -> CancellationToken {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn begin_run(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.cancel.lock().unwrap_or_else(PoisonError::into_inner) = token.clone();
        token
    }

    pub async fn start(&self, config: &TransferConfig, sink: &dyn ProgressSink) -> Result<RunOutcome> {
        // 設定錯誤時不做任何連線
        config.validate()?;

        let cancel = self.begin_run();
        let mut state = RunState {
            status: RunStatus::Running,
            ..RunState::default()
        };
        let mut summary = LoadSummary::default();
        sink.emit(ProgressEvent::RunStarted);
        tracing::info!(
            "🚀 Transferring '{}' on {} into {}.{}",
            config.database,
            config.server,
            config.project_id,
            config.dataset_name
        );

        let status = match self
            .run(config, &cancel, sink, &mut state, &mut summary)
            .await
        {
            Ok(status) => status,
            Err(e) => {
                tracing::error!("Run aborted: {} ({:?})", e, e.category());
                tracing::error!("💡 {}", e.recovery_suggestion());
                sink.emit(ProgressEvent::RunAborted {
                    cause: e.to_string(),
                });
                state.error = Some(e.to_string());
                RunStatus::Failed
            }
        };
        state.status = status;
        state.cancel_requested = cancel.is_cancelled();

        self.save_record(config, sink);
        sink.emit(ProgressEvent::RunFinished {
            status: state.status,
        });
        tracing::info!(
            "Run {}: {} row(s), {} loaded, {} skipped, {} failed",
            state.status,
            state.rows_transferred,
            summary.loaded.len(),
            summary.skipped_existing.len(),
            summary.failed.len()
        );

        Ok(RunOutcome { state, summary })
    }

    async fn run(
        &self,
        config: &TransferConfig,
        cancel: &CancellationToken,
        sink: &dyn ProgressSink,
        state: &mut RunState,
        summary: &mut LoadSummary,
    ) -> Result<RunStatus> {
        let source = self.connector.connect_source(config).await?;
        let staging = self.connector.connect_staging(config).await?;
        let warehouse = self.connector.connect_warehouse(config).await?;

        let tables = source.list_tables().await?;
        sink.emit(ProgressEvent::TablesDiscovered {
            count: tables.len(),
        });

        let prefix = config.artifact_prefix();
        let exporter = RowExporter::new(config.batch_rows, prefix.clone());
        for table in &tables {
            if cancel.is_cancelled() {
                sink.emit(ProgressEvent::CancelObserved);
                return Ok(RunStatus::Cancelled);
            }
            sink.emit(ProgressEvent::TableStarted {
                table: table.name.clone(),
            });

            match exporter
                .export(source.as_ref(), table, staging.as_ref(), cancel)
                .await
            {
                Ok(result) if result.completed => {
                    state.rows_transferred += result.rows_written;
                    state.log(
                        &table.name,
                        TableStatus::Exported {
                            rows: result.rows_written,
                        },
                    );
                    sink.emit(ProgressEvent::TableExported {
                        table: table.name.clone(),
                        rows: result.rows_written,
                    });
                    sink.emit(ProgressEvent::ArtifactUploaded {
                        table: table.name.clone(),
                        uri: staging.uri(&exporter.artifact_key(table)),
                    });
                }
                Ok(result) => {
                    state.rows_transferred += result.rows_written;
                    state.log(
                        &table.name,
                        TableStatus::ExportCancelled {
                            rows: result.rows_written,
                        },
                    );
                    sink.emit(ProgressEvent::ExportCancelled {
                        table: table.name.clone(),
                        rows: result.rows_written,
                    });
                    sink.emit(ProgressEvent::CancelObserved);
                    return Ok(RunStatus::Cancelled);
                }
                Err(e) => {
                    let cause = e.to_string();
                    state.log(
                        &table.name,
                        TableStatus::ExportFailed {
                            cause: cause.clone(),
                        },
                    );
                    sink.emit(ProgressEvent::ExportFailed {
                        table: table.name.clone(),
                        cause: cause.clone(),
                    });
                    summary.failed.insert(table.name.clone(), cause);
                }
            }
        }

        // A cancelled run never loads; partial artifacts stay in staging.
        if cancel.is_cancelled() {
            sink.emit(ProgressEvent::CancelObserved);
            return Ok(RunStatus::Cancelled);
        }

        let loader = WarehouseLoader::new(
            config.project_id.clone(),
            config.dataset_name.clone(),
            config.max_bad_records,
        )
        .with_prefix(&prefix);
        let loaded = loader
            .load_all(
                warehouse.as_ref(),
                staging.as_ref(),
                staging.list(&prefix),
                cancel,
                sink,
                summary,
                &mut state.table_log,
            )
            .await;

        let flow = match loaded {
            Ok(flow) => flow,
            Err(e) if exported_any(state) => {
                // 已匯出的表不算整批失敗
                tracing::warn!("Listing staged artifacts failed after export: {}", e);
                let cause = e.to_string();
                sink.emit(ProgressEvent::StagingListFailed {
                    cause: cause.clone(),
                });
                mark_unloaded(state, summary, &cause);
                state.error = Some(cause);
                return Ok(RunStatus::Completed);
            }
            Err(e) => return Err(e),
        };

        if flow.is_break() {
            sink.emit(ProgressEvent::CancelObserved);
            return Ok(RunStatus::Cancelled);
        }
        Ok(RunStatus::Completed)
    }

    fn save_record(&self, config: &TransferConfig, sink: &dyn ProgressSink) {
        let recorder: Arc<dyn RunRecorder> = match &self.recorder {
            Some(recorder) => Arc::clone(recorder),
            None => Arc::new(FileRunRecorder::new(
                &config.record_dir,
                config.record_password,
            )),
        };

        match recorder.record(&config.run_record()) {
            Ok(path) => sink.emit(ProgressEvent::RunRecordSaved {
                path: path.display().to_string(),
            }),
            Err(e) => sink.emit(ProgressEvent::RunRecordFailed {
                cause: e.to_string(),
            }),
        }
    }
}

fn exported_any(state: &RunState) -> bool {
    state
        .table_log
        .iter()
        .any(|entry| matches!(entry.status, TableStatus::Exported { .. }))
}

/// Every table exported in this run that the load phase did not reach is
/// reported as a load failure with `cause`.
fn mark_unloaded(state: &mut RunState, summary: &mut LoadSummary, cause: &str) {
    let pending: Vec<String> = state
        .table_log
        .iter()
        .filter(|entry| matches!(entry.status, TableStatus::Exported { .. }))
        .map(|entry| entry.table.clone())
        .filter(|table| {
            !summary.loaded.contains(table)
                && !summary.skipped_existing.contains(table)
                && !summary.failed.contains_key(table)
        })
        .collect();

    for table in pending {
        summary.failed.insert(table.clone(), cause.to_string());
        state.log(
            &table,
            TableStatus::LoadFailed {
                cause: cause.to_string(),
            },
        );
    }
}
