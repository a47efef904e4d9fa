// Adapters layer: concrete implementations of the domain ports for external
// systems (relational source, Cloud Storage, BigQuery) plus local and
// in-memory staging stores.

pub mod auth;
pub mod bigquery;
pub mod connector;
pub mod gcs;
pub mod local_storage;
pub mod memory;
pub mod sql_server;
pub mod sql_source;

use crate::utils::error::{Result, TransferError};
use url::Url;

/// Joins `segments` onto `endpoint` as percent-encoded path segments.
pub(crate) fn api_url(endpoint: &str, segments: &[&str]) -> Result<Url> {
    let invalid = |reason: String| TransferError::InvalidConfigValueError {
        field: "endpoint".to_string(),
        value: endpoint.to_string(),
        reason,
    };

    let mut url = Url::parse(endpoint).map_err(|e| invalid(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|_| invalid("URL cannot be a base".to_string()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Reads an error response body for inclusion in a message.
pub(crate) async fn describe_failure(response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if body.is_empty() {
        status.to_string()
    } else {
        format!("{}: {}", status, body.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_url_encodes_segments() {
        let url = api_url("https://bigquery.googleapis.com", &["projects", "acme", "jobs"]).unwrap();
        assert_eq!(url.as_str(), "https://bigquery.googleapis.com/projects/acme/jobs");

        let url = api_url("http://127.0.0.1:9000/", &["b", "my bucket", "o"]).unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:9000/b/my%20bucket/o");
    }
}
