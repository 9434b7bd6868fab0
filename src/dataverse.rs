use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, error, warn};

use crate::error::IndexError;

/// Everything known about a lookup that did not yield a dataset document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchFailure {
    pub url: String,
    /// HTTP status, or `0` when no response was received.
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub raw_body: String,
}

impl FetchFailure {
    pub fn transport(url: &str, message: String) -> Self {
        Self {
            url: url.to_string(),
            status: 0,
            headers: BTreeMap::new(),
            raw_body: message,
        }
    }
}

pub trait DataverseClient {
    fn fetch_dataset(&self, lookup_url: &str) -> Result<Value, FetchFailure>;
}

#[derive(Clone)]
pub struct DataverseHttpClient {
    client: Client,
    error_log: Option<Utf8PathBuf>,
}

impl DataverseHttpClient {
    pub fn new(timeout: Duration, error_log: Option<Utf8PathBuf>) -> Result<Self, IndexError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("agrovoc-index/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| IndexError::DataverseHttp(err.to_string()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| IndexError::DataverseHttp(err.to_string()))?;
        Ok(Self { client, error_log })
    }

    fn request(&self, lookup_url: &str) -> Result<Value, FetchFailure> {
        let response = self
            .client
            .get(lookup_url)
            .send()
            .map_err(|err| FetchFailure::transport(lookup_url, err.to_string()))?;

        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect::<BTreeMap<_, _>>();
        let raw_body = response
            .text()
            .map_err(|err| FetchFailure::transport(lookup_url, err.to_string()))?;

        if !status.is_success() {
            return Err(FetchFailure {
                url: lookup_url.to_string(),
                status: status.as_u16(),
                headers,
                raw_body,
            });
        }

        serde_json::from_str(&raw_body).map_err(|err| {
            warn!(url = lookup_url, "response is not JSON: {err}");
            FetchFailure {
                url: lookup_url.to_string(),
                status: status.as_u16(),
                headers,
                raw_body,
            }
        })
    }
}

impl DataverseClient for DataverseHttpClient {
    fn fetch_dataset(&self, lookup_url: &str) -> Result<Value, FetchFailure> {
        debug!(url = lookup_url, "dataverse.request");
        let start = std::time::Instant::now();
        let result = self.request(lookup_url);
        let latency = start.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => debug!(url = lookup_url, latency_ms = latency, "dataverse.response"),
            Err(failure) => {
                error!(
                    url = lookup_url,
                    status = failure.status,
                    latency_ms = latency,
                    "dataverse lookup failed"
                );
                if let Some(path) = &self.error_log {
                    if let Err(err) = append_failure(path, failure) {
                        warn!("unable to write error log {path}: {err}");
                    }
                }
            }
        }
        result
    }
}

/// Appends one JSON line describing the failure.
pub fn append_failure(path: &Utf8Path, failure: &FetchFailure) -> Result<(), IndexError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_str().is_empty()) {
        std::fs::create_dir_all(parent.as_std_path())
            .map_err(|err| IndexError::Filesystem(err.to_string()))?;
    }
    let record = json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "level": "ERROR",
        "failure": failure,
    });
    let line =
        serde_json::to_string(&record).map_err(|err| IndexError::Serialization(err.to_string()))?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path.as_std_path())
        .map_err(|err| IndexError::Filesystem(err.to_string()))?;
    writeln!(file, "{line}").map_err(|err| IndexError::Filesystem(err.to_string()))?;
    Ok(())
}

/// `data.latestVersion.metadataBlocks.citation.fields` of a dataset document.
pub fn citation_fields(document: &Value) -> Option<&Vec<Value>> {
    document
        .pointer("/data/latestVersion/metadataBlocks/citation/fields")
        .and_then(Value::as_array)
}

pub fn citation_fields_mut(document: &mut Value) -> Option<&mut Vec<Value>> {
    document
        .pointer_mut("/data/latestVersion/metadataBlocks/citation/fields")
        .and_then(Value::as_array_mut)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn citation_fields_path() {
        let mut document = json!({
            "status": "OK",
            "data": {"latestVersion": {"metadataBlocks": {"citation": {"fields": [
                {"typeName": "title", "multiple": false, "typeClass": "primitive", "value": "T"}
            ]}}}}
        });
        assert_eq!(citation_fields(&document).map(Vec::len), Some(1));
        citation_fields_mut(&mut document).unwrap().clear();
        assert_eq!(citation_fields(&document).map(Vec::len), Some(0));
        assert!(citation_fields(&json!({"status": "ERROR"})).is_none());
    }

    #[test]
    fn failures_append_as_json_lines() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("logs/curl.log")).unwrap();
        let failure = FetchFailure {
            url: "https://example.org/api".to_string(),
            status: 404,
            headers: BTreeMap::new(),
            raw_body: "{\"status\":\"ERROR\"}".to_string(),
        };
        append_failure(&path, &failure).unwrap();
        append_failure(&path, &failure).unwrap();

        let content = std::fs::read_to_string(path.as_std_path()).unwrap();
        let lines = content.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 2);
        let record: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(record["failure"]["status"], 404);
    }

    #[test]
    fn transport_error_is_status_zero_and_logged() {
        let temp = tempfile::tempdir().unwrap();
        let log = Utf8PathBuf::from_path_buf(temp.path().join("curl.log")).unwrap();
        let client = DataverseHttpClient::new(Duration::from_secs(5), Some(log.clone())).unwrap();

        let url = "http://127.0.0.1:1/api/datasets/:persistentId?persistentId=doi:10.1/x";
        let failure = client.fetch_dataset(url).unwrap_err();
        assert_matches!(failure, FetchFailure { status: 0, .. });
        assert_eq!(failure.url, url);
        assert!(!failure.raw_body.is_empty());

        let content = std::fs::read_to_string(log.as_std_path()).unwrap();
        let lines = content.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 1);
        let record: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(record["level"], "ERROR");
        assert_eq!(record["failure"]["status"], 0);
        assert_eq!(record["failure"]["url"], url);
    }

    #[test]
    #[ignore]
    fn fetch_real_dataset() {
        let client = DataverseHttpClient::new(Duration::from_secs(30), None).unwrap();
        let document = client
            .fetch_dataset(
                "https://dataverse.harvard.edu/api/datasets/:persistentId?persistentId=doi:10.7910/DVN/TJCLKP",
            )
            .unwrap();
        assert!(citation_fields(&document).is_some());
    }
}
