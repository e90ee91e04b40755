use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::error::SppError;

pub const DEFAULT_CONFIG_FILE: &str = "spp-mirror.json";
pub const API_KEY_ENV: &str = "SPP_API_KEY";

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    pub upstream: UpstreamEntry,
    #[serde(default)]
    pub search: Option<SearchEntry>,
    #[serde(default)]
    pub cache_dir: Option<String>,
    #[serde(default)]
    pub gmt_path: Option<String>,
    #[serde(default)]
    pub refresh_workers: Option<usize>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct UpstreamEntry {
    pub host: String,
    pub service_path: String,
    pub datasets_endpoint: String,
    pub datapoints_endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub omics_type: Option<String>,
    #[serde(default)]
    pub query_type: Option<String>,
    #[serde(default)]
    pub page_size: Option<usize>,
    #[serde(default)]
    pub page_delay_ms: Option<u64>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SearchEntry {
    pub url: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    pub host: String,
    pub service_path: String,
    pub datasets_endpoint: String,
    pub datapoints_endpoint: String,
    pub api_key: String,
    pub omics_type: String,
    pub query_type: String,
    pub page_size: usize,
    pub page_delay: Duration,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub url: String,
    pub credentials: Option<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub upstream: UpstreamSettings,
    pub search: Option<SearchSettings>,
    pub cache_root: Utf8PathBuf,
    pub gmt_path: Option<Utf8PathBuf>,
    pub refresh_workers: usize,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, SppError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Err(SppError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| SppError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| SppError::ConfigParse(err.to_string()))?;

        let env_key = std::env::var(API_KEY_ENV).ok();
        Self::resolve_config(config, env_key.as_deref())
    }

    pub fn resolve_config(
        config: Config,
        env_api_key: Option<&str>,
    ) -> Result<ResolvedConfig, SppError> {
        let schema_version = config.schema_version.unwrap_or(1);
        let upstream = config.upstream;

        let page_size = upstream.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        if page_size < 2 {
            return Err(SppError::InvalidPageSize(page_size));
        }
        let refresh_workers = config.refresh_workers.unwrap_or(DEFAULT_REFRESH_WORKERS);
        if refresh_workers == 0 {
            return Err(SppError::ConfigParse(
                "refresh_workers must be at least 1".to_string(),
            ));
        }

        let api_key = env_api_key
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(str::to_string)
            .or(upstream.api_key)
            .unwrap_or_default();

        let search = config.search.map(|entry| SearchSettings {
            url: entry.url.trim_end_matches('/').to_string(),
            credentials: match (entry.user, entry.password) {
                (Some(user), Some(password)) if !user.is_empty() && !password.is_empty() => {
                    Some((user, password))
                }
                _ => None,
            },
        });

        let cache_root = match config.cache_dir {
            Some(dir) => Utf8PathBuf::from(dir),
            None => default_cache_root()?,
        };

        Ok(ResolvedConfig {
            schema_version,
            upstream: UpstreamSettings {
                host: upstream.host,
                service_path: upstream.service_path,
                datasets_endpoint: upstream.datasets_endpoint,
                datapoints_endpoint: upstream.datapoints_endpoint,
                api_key,
                omics_type: upstream
                    .omics_type
                    .unwrap_or_else(|| DEFAULT_OMICS_TYPE.to_string()),
                query_type: upstream
                    .query_type
                    .unwrap_or_else(|| DEFAULT_QUERY_TYPE.to_string()),
                page_size,
                page_delay: Duration::from_millis(
                    upstream.page_delay_ms.unwrap_or(DEFAULT_PAGE_DELAY_MS),
                ),
                timeout: Duration::from_secs(upstream.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
            },
            search,
            cache_root,
            gmt_path: config.gmt_path.map(Utf8PathBuf::from),
            refresh_workers,
        })
    }
}

const DEFAULT_OMICS_TYPE: &str = "Transcriptomics";
const DEFAULT_QUERY_TYPE: &str = "doi";
const DEFAULT_PAGE_SIZE: usize = 5000;
const DEFAULT_PAGE_DELAY_MS: u64 = 2000;
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_REFRESH_WORKERS: usize = 4;

pub fn default_cache_root() -> Result<Utf8PathBuf, SppError> {
    BaseDirs::new()
        .and_then(|dirs| {
            Utf8PathBuf::from_path_buf(dirs.home_dir().join(".cache").join("spp-mirror")).ok()
        })
        .ok_or_else(|| SppError::CacheDirectory {
            path: "~/.cache/spp-mirror".to_string(),
            message: "unable to resolve home directory".to_string(),
        })
}
