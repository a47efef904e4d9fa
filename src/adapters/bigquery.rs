//! BigQuery REST adapter: table existence, load-job submission and polling.

use crate::adapters::auth::TokenProvider;
use crate::adapters::{api_url, describe_failure};
use crate::domain::model::{LoadJob, LoadOptions, LoadTarget};
use crate::domain::ports::Warehouse;
use crate::utils::error::{Result, TransferError};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JobRequest<'a> {
    configuration: JobConfiguration<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JobConfiguration<'a> {
    load: LoadConfiguration<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LoadConfiguration<'a> {
    source_uris: Vec<&'a str>,
    destination_table: TableReference<'a>,
    source_format: &'static str,
    skip_leading_rows: u32,
    autodetect: bool,
    max_bad_records: u32,
    create_disposition: &'static str,
    /// Refuse to write into a table that already has rows.
    write_disposition: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TableReference<'a> {
    project_id: &'a str,
    dataset_id: &'a str,
    table_id: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobResource {
    job_reference: JobReference,
    #[serde(default)]
    status: Option<JobStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    project_id: String,
    job_id: String,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatus {
    state: String,
    #[serde(default)]
    error_result: Option<ErrorProto>,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl std::fmt::Display for ErrorProto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let message = self.message.as_deref().unwrap_or("load job failed");
        match &self.reason {
            Some(reason) => write!(f, "{} ({})", message, reason),
            None => f.write_str(message),
        }
    }
}

pub struct BigQueryWarehouse {
    client: Client,
    endpoint: String,
    tokens: Arc<dyn TokenProvider>,
    poll_interval: Duration,
}

impl BigQueryWarehouse {
    pub fn new(
        client: Client,
        endpoint: impl Into<String>,
        tokens: Arc<dyn TokenProvider>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            tokens,
            poll_interval,
        }
    }

    async fn get_job(&self, job: &LoadJob) -> Result<JobResource> {
        let url = api_url(
            &self.endpoint,
            &["bigquery", "v2", "projects", job.project.as_str(), "jobs", job.job_id.as_str()],
        )?;
        let mut request = self.client.get(url).bearer_auth(self.tokens.token().await?);
        if let Some(location) = &job.location {
            request = request.query(&[("location", location)]);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(TransferError::WarehouseError {
                message: format!(
                    "polling job {} failed: {}",
                    job.job_id,
                    describe_failure(response).await
                ),
            });
        }
        Ok(response.json().await?)
    }
}

/// `Ok(true)` once the job is done, `Err` if it finished with an error.
fn job_done(resource: &JobResource) -> Result<bool> {
    match &resource.status {
        Some(status) if status.state == "DONE" => match &status.error_result {
            Some(error) => Err(TransferError::WarehouseError {
                message: error.to_string(),
            }),
            None => Ok(true),
        },
        _ => Ok(false),
    }
}

#[async_trait]
impl Warehouse for BigQueryWarehouse {
    async fn table_exists(&self, target: &LoadTarget) -> Result<bool> {
        let url = api_url(
            &self.endpoint,
            &[
                "bigquery",
                "v2",
                "projects",
                target.project.as_str(),
                "datasets",
                target.dataset.as_str(),
                "tables",
                target.table.as_str(),
            ],
        )?;
        let response = self
            .client
            .get(url)
            .bearer_auth(self.tokens.token().await?)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(TransferError::WarehouseError {
                message: format!(
                    "looking up {} failed: {}",
                    target,
                    describe_failure(response).await
                ),
            }),
        }
    }

    async fn submit_load(
        &self,
        target: &LoadTarget,
        source_uri: &str,
        options: &LoadOptions,
    ) -> Result<LoadJob> {
        let url = api_url(
            &self.endpoint,
            &["bigquery", "v2", "projects", target.project.as_str(), "jobs"],
        )?;
        let body = JobRequest {
            configuration: JobConfiguration {
                load: LoadConfiguration {
                    source_uris: vec![source_uri],
                    destination_table: TableReference {
                        project_id: &target.project,
                        dataset_id: &target.dataset,
                        table_id: &target.table,
                    },
                    source_format: options.format.as_str(),
                    skip_leading_rows: options.skip_leading_rows,
                    autodetect: options.autodetect,
                    max_bad_records: options.max_bad_records,
                    create_disposition: "CREATE_IF_NEEDED",
                    write_disposition: "WRITE_EMPTY",
                },
            },
        };

        let response = self
            .client
            .post(url)
            .bearer_auth(self.tokens.token().await?)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(TransferError::WarehouseError {
                message: format!(
                    "submitting load of {} into {} failed: {}",
                    source_uri,
                    target,
                    describe_failure(response).await
                ),
            });
        }

        let resource: JobResource = response.json().await?;
        // A job can already have failed validation by the time it is returned.
        job_done(&resource)?;

        tracing::debug!(
            "Submitted load job {} for {}",
            resource.job_reference.job_id,
            target
        );
        Ok(LoadJob {
            project: resource.job_reference.project_id,
            job_id: resource.job_reference.job_id,
            location: resource.job_reference.location,
        })
    }

    async fn await_completion(&self, job: &LoadJob) -> Result<()> {
        loop {
            let resource = self.get_job(job).await?;
            if job_done(&resource)? {
                return Ok(());
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
