use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;
use serde_json::Value;

use crate::config::SearchSettings;
use crate::error::SppError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub term: String,
    pub start: Option<usize>,
    pub size: Option<usize>,
}

impl SearchQuery {
    /// Matches the term against the `doi` field or the catch-all name/description text.
    pub fn query_string(&self) -> String {
        let term = escape_term(self.term.trim());
        format!("doi:{term} OR {term}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub num_found: u64,
    pub datasets: Vec<DatasetSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetSummary {
    pub doi: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
}

pub trait SearchClient: Send + Sync {
    fn search(&self, query: &SearchQuery) -> Result<SearchResult, SppError>;
}

impl<S: SearchClient> SearchClient for Option<S> {
    fn search(&self, query: &SearchQuery) -> Result<SearchResult, SppError> {
        match self {
            Some(client) => client.search(query),
            None => Err(SppError::SearchNotConfigured),
        }
    }
}

#[derive(Clone)]
pub struct SolrHttpClient {
    client: Client,
    settings: SearchSettings,
}

impl SolrHttpClient {
    pub fn new(settings: &SearchSettings) -> Result<Self, SppError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("spp-mirror/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| SppError::SearchHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| SppError::SearchHttp(err.to_string()))?;
        Ok(Self {
            client,
            settings: settings.clone(),
        })
    }
}

impl SearchClient for SolrHttpClient {
    fn search(&self, query: &SearchQuery) -> Result<SearchResult, SppError> {
        let mut params = vec![
            ("q".to_string(), query.query_string()),
            ("fl".to_string(), "doi,name,description".to_string()),
            ("wt".to_string(), "json".to_string()),
        ];
        if let Some(start) = query.start {
            params.push(("start".to_string(), start.to_string()));
        }
        if let Some(size) = query.size {
            params.push(("rows".to_string(), size.to_string()));
        }

        let mut request = self
            .client
            .get(format!("{}/select", self.settings.url))
            .query(&params);
        if let Some((user, password)) = &self.settings.credentials {
            request = request.basic_auth(user, Some(password));
        }
        let response = request
            .send()
            .map_err(|err| SppError::SearchHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "search request failed".to_string());
            return Err(SppError::SearchStatus { status, message });
        }
        let body: Value = response
            .json()
            .map_err(|err| SppError::SearchHttp(err.to_string()))?;
        parse_search_response(&body).map_err(SppError::SearchHttp)
    }
}

pub fn parse_search_response(body: &Value) -> Result<SearchResult, String> {
    let response = body
        .get("response")
        .ok_or_else(|| "search response has no `response` section".to_string())?;
    let num_found = response
        .get("numFound")
        .and_then(Value::as_u64)
        .ok_or_else(|| "search response has no numFound".to_string())?;
    let datasets = response
        .get("docs")
        .and_then(Value::as_array)
        .map(|docs| {
            docs.iter()
                .map(|doc| DatasetSummary {
                    doi: document_field(doc, "doi"),
                    name: document_field(doc, "name"),
                    description: document_field(doc, "description"),
                })
                .collect()
        })
        .unwrap_or_default();
    Ok(SearchResult {
        num_found,
        datasets,
    })
}

// Solr may index a text field as multi-valued; the first value wins.
fn document_field(doc: &Value, name: &str) -> Option<String> {
    match doc.get(name)? {
        Value::String(text) => Some(text.clone()),
        Value::Array(values) => values.first().and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

// A bare `/` opens a regular expression in the standard query parser, which breaks DOI terms.
fn escape_term(term: &str) -> String {
    term.replace('/', "\\/")
}
