use crate::adapters::auth::{GcloudTokenProvider, StaticToken, TokenProvider};
use crate::adapters::bigquery::BigQueryWarehouse;
use crate::adapters::gcs::GcsStagingStore;
use crate::adapters::sql_source::SqlSource;
use crate::config::TransferConfig;
use crate::domain::ports::{Connector, SourceDatabase, StagingStore, Warehouse};
use crate::utils::error::Result;
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

/// Production wiring: a `sqlx` source, Cloud Storage staging and BigQuery.
#[derive(Debug, Clone, Default)]
pub struct CloudConnector {
    client: Client,
}

impl CloudConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn tokens(config: &TransferConfig) -> Arc<dyn TokenProvider> {
        match &config.access_token {
            Some(token) => Arc::new(StaticToken::new(token.clone())),
            None => Arc::new(GcloudTokenProvider::new(config.credential_ref.clone())),
        }
    }
}

#[async_trait]
impl Connector for CloudConnector {
    async fn connect_source(&self, config: &TransferConfig) -> Result<Box<dyn SourceDatabase>> {
        let source = SqlSource::connect(config.source_kind, &config.profile()).await?;
        Ok(Box::new(source))
    }

    async fn connect_staging(&self, config: &TransferConfig) -> Result<Box<dyn StagingStore>> {
        let store = GcsStagingStore::new(
            config.storage_endpoint.clone(),
            config.bucket_name.clone(),
            Self::tokens(config),
        )?;
        Ok(Box::new(store))
    }

    async fn connect_warehouse(&self, config: &TransferConfig) -> Result<Box<dyn Warehouse>> {
        Ok(Box::new(BigQueryWarehouse::new(
            self.client.clone(),
            config.bigquery_endpoint.clone(),
            Self::tokens(config),
            Duration::from_millis(config.poll_interval_ms),
        )))
    }
}
