use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::SppError;

/// One upstream record: field name to value, in the order the upstream sent them.
pub type Row = Map<String, Value>;

/// Public experiment identifier, as exposed in dataset metadata.
pub type ExperimentId = i64;

static DOI_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._\-;()+:]*$").expect("valid regex"));

/// Two-part dataset key `{authority}/{object}`. Doubles as the cache directory path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Doi {
    authority: String,
    object: String,
}

impl Doi {
    pub fn new(authority: &str, object: &str) -> Result<Self, SppError> {
        if !is_doi_segment(authority) || !is_doi_segment(object) {
            return Err(SppError::InvalidDoi(format!("{authority}/{object}")));
        }
        Ok(Self {
            authority: authority.to_string(),
            object: object.to_string(),
        })
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    pub fn object(&self) -> &str {
        &self.object
    }
}

/// True when `value` can serve as one DOI segment and as a single directory name.
pub fn is_doi_segment(value: &str) -> bool {
    DOI_SEGMENT.is_match(value)
}

impl fmt::Display for Doi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.authority, self.object)
    }
}

impl FromStr for Doi {
    type Err = SppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let (authority, object) = trimmed
            .split_once('/')
            .ok_or_else(|| SppError::InvalidDoi(value.to_string()))?;
        Self::new(authority, object).map_err(|_| SppError::InvalidDoi(value.to_string()))
    }
}

impl TryFrom<String> for Doi {
    type Error = SppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Doi> for String {
    fn from(value: Doi) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub doi: Doi,
    pub name: String,
    pub description: Option<String>,
    pub experiments: Vec<Experiment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    pub id: ExperimentId,
    pub name: Option<String>,
    pub description: Option<String>,
    pub species: Option<String>,
    /// Upstream-only id carried by data point rows. Never written to the cache.
    #[serde(skip)]
    pub internal_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub symbol: String,
    pub pvalue: f64,
    #[serde(rename = "foldChange")]
    pub fold_change: f64,
}
