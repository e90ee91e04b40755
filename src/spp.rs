use std::time::Duration;

use chrono::NaiveDate;
use reqwest::Url;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::{Deserializer, Value};
use tracing::debug;

use crate::config::UpstreamSettings;
use crate::domain::{Doi, Row};
use crate::error::SppError;

/// The upstream requires `addedsince` even when asking for a single DOI.
const DEFAULT_ADDED_SINCE: &str = "20100101";

/// Disables the upstream's default 0.05 p-value filter.
const SIGNIFICANCE_ALL: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowQuery {
    Dataset(Doi),
    AddedSince(NaiveDate),
    DataPoints(Doi),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// Inclusive row id watermark.
    pub start_id: i64,
    pub page_size: usize,
}

/// One bounded upstream call. Retrying is left to the caller.
pub trait SppClient: Send + Sync {
    fn fetch_rows(&self, query: &RowQuery, page: Option<PageRequest>)
    -> Result<Vec<Row>, SppError>;
}

#[derive(Clone)]
pub struct SppHttpClient {
    client: Client,
    settings: UpstreamSettings,
}

impl SppHttpClient {
    pub fn new(settings: &UpstreamSettings) -> Result<Self, SppError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("spp-mirror/{}", env!("CARGO_PKG_VERSION"))).map_err(
                |err| SppError::Transport {
                    url: settings.host.clone(),
                    message: err.to_string(),
                },
            )?,
        );
        let timeout = if settings.timeout.is_zero() {
            Duration::from_secs(60)
        } else {
            settings.timeout
        };
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| SppError::Transport {
                url: settings.host.clone(),
                message: err.to_string(),
            })?;
        Ok(Self {
            client,
            settings: settings.clone(),
        })
    }

    fn endpoint_url(&self, query: &RowQuery) -> String {
        let endpoint = match query {
            RowQuery::Dataset(_) | RowQuery::AddedSince(_) => &self.settings.datasets_endpoint,
            RowQuery::DataPoints(_) => &self.settings.datapoints_endpoint,
        };
        format!(
            "https://{}{}{}",
            self.settings.host, self.settings.service_path, endpoint
        )
    }

    fn handle_status(
        url: &Url,
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, SppError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "SPP request failed".to_string());
        Err(SppError::UpstreamStatus {
            url: url.to_string(),
            status,
            message,
        })
    }
}

impl SppClient for SppHttpClient {
    fn fetch_rows(
        &self,
        query: &RowQuery,
        page: Option<PageRequest>,
    ) -> Result<Vec<Row>, SppError> {
        let base = self.endpoint_url(query);
        let params = query_params(&self.settings, query, page);
        // The api key is appended on the request only, so errors and logs never carry it.
        let url = Url::parse_with_params(&base, &params).map_err(|err| SppError::Transport {
            url: base.clone(),
            message: format!("malformed URL: {err}"),
        })?;

        debug!(url = %url, "spp.request");
        let response = self
            .client
            .get(url.clone())
            .query(&[("apiKey", self.settings.api_key.as_str())])
            .send()
            .map_err(|err| SppError::Transport {
                url: url.to_string(),
                message: err.to_string(),
            })?;
        let response = Self::handle_status(&url, response)?;
        let body = response.bytes().map_err(|err| SppError::Transport {
            url: url.to_string(),
            message: err.to_string(),
        })?;
        let rows = decode_rows(&body).map_err(|message| SppError::Decode {
            url: url.to_string(),
            message,
        })?;
        debug!(url = %url, rows = rows.len(), "spp.response");
        Ok(rows)
    }
}

pub fn query_params(
    settings: &UpstreamSettings,
    query: &RowQuery,
    page: Option<PageRequest>,
) -> Vec<(String, String)> {
    let mut params = Vec::new();
    match query {
        RowQuery::Dataset(doi) => {
            params.push(("doi".to_string(), doi.to_string()));
            params.push(("addedsince".to_string(), DEFAULT_ADDED_SINCE.to_string()));
        }
        RowQuery::AddedSince(date) => {
            params.push(("addedsince".to_string(), date.format("%Y%m%d").to_string()));
        }
        RowQuery::DataPoints(doi) => {
            params.push(("queryValue".to_string(), doi.to_string()));
            params.push(("omicsType".to_string(), settings.omics_type.clone()));
            params.push(("queryType".to_string(), settings.query_type.clone()));
            params.push(("significance".to_string(), SIGNIFICANCE_ALL.to_string()));
        }
    }
    if let Some(page) = page {
        params.push(("countMax".to_string(), page.page_size.to_string()));
        params.push(("startId".to_string(), page.start_id.to_string()));
    }
    params
}

/// Decodes a body holding either a JSON array of objects or a stream of JSON objects.
pub fn decode_rows(body: &[u8]) -> Result<Vec<Row>, String> {
    let mut rows = Vec::new();
    for value in Deserializer::from_slice(body).into_iter::<Value>() {
        match value.map_err(|err| err.to_string())? {
            Value::Object(row) => rows.push(row),
            Value::Array(items) => {
                for item in items {
                    match item {
                        Value::Object(row) => rows.push(row),
                        other => return Err(unexpected(&other)),
                    }
                }
            }
            other => return Err(unexpected(&other)),
        }
    }
    Ok(rows)
}

fn unexpected(value: &Value) -> String {
    let kind = match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    format!("expected a JSON object row, found {kind}")
}
