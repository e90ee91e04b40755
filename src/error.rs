use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum SppError {
    #[error("invalid DOI: {0}")]
    InvalidDoi(String),

    #[error("invalid date: {0} (expected YYYYMMDD or YYYY-MM-DD)")]
    InvalidDate(String),

    #[error("invalid experiment id: {0}")]
    InvalidExperimentId(String),

    #[error("missing config file spp-mirror.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("SPP request failed for {url}: {message}")]
    Transport { url: String, message: String },

    #[error("SPP returned status {status} for {url}: {message}")]
    UpstreamStatus {
        url: String,
        status: u16,
        message: String,
    },

    #[error("SPP response for {url} is not well-formed JSON rows: {message}")]
    Decode { url: String, message: String },

    #[error("malformed {context} row: {message}")]
    MalformedRow { context: String, message: String },

    #[error("no data points in the dataset: {doi}")]
    EmptyPage { doi: String },

    #[error("fetching data points halted for dataset: {doi}")]
    FetchHalted { doi: String },

    #[error("pagination cursor did not advance past startId {start_id} for dataset: {doi}")]
    StalledCursor { doi: String, start_id: i64 },

    #[error("page size must be at least 2, got {0}")]
    InvalidPageSize(usize),

    #[error("data point internal experiment id not found in dataset {doi}: {internal_id}")]
    UnresolvedExperimentId { doi: String, internal_id: String },

    #[error("dataset not found upstream: {0}")]
    DatasetNotFound(String),

    #[error("could not create cache directory {path}: {message}")]
    CacheDirectory { path: String, message: String },

    #[error("could not read cache file {path}: {message}")]
    CacheRead { path: String, message: String },

    #[error("could not write cache file {path}: {message}")]
    CacheWrite { path: String, message: String },

    #[error("cache file not found: {0}")]
    CacheFileNotFound(String),

    #[error("could not start refresh workers: {0}")]
    WorkerPool(String),

    #[error("search index is not configured")]
    SearchNotConfigured,

    #[error("search request failed: {0}")]
    SearchHttp(String),

    #[error("search index returned status {status}: {message}")]
    SearchStatus { status: u16, message: String },

    #[error("could not load gene symbols from {path}: {message}")]
    GeneSetRead { path: String, message: String },
}
