use std::fmt;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use chrono::NaiveDate;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::domain::{Dataset, Doi, ExperimentId};
use crate::error::SppError;
use crate::genes::{DisplayableDataPoint, GeneSymbolSet, annotate};
use crate::group::group_datapoints;
use crate::paginate::Paginator;
use crate::reconcile::{ExperimentIdMap, parse_dataset_row, reconcile_datapoints};
use crate::search::{SearchClient, SearchQuery, SearchResult};
use crate::spp::{RowQuery, SppClient};
use crate::store::CacheStore;

/// Species accepted when mirroring datasets by date.
pub const SUPPORTED_SPECIES: &[&str] = &["Human"];

#[derive(Debug, Clone)]
pub struct AppOptions {
    pub refresh_workers: usize,
    pub gmt_path: Option<Utf8PathBuf>,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            refresh_workers: 4,
            gmt_path: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    CacheHit,
    CacheMiss,
    ForcedRefresh,
}

impl CacheState {
    pub fn decide(store: &CacheStore, doi: &Doi, refresh: bool) -> Self {
        if refresh {
            CacheState::ForcedRefresh
        } else if store.exists(doi) {
            CacheState::CacheHit
        } else {
            CacheState::CacheMiss
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchAction {
    Cache,
    Fetch,
    Refresh,
}

impl fmt::Display for FetchAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchAction::Cache => write!(f, "cache"),
            FetchAction::Fetch => write!(f, "fetch"),
            FetchAction::Refresh => write!(f, "refresh"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetResult {
    pub action: FetchAction,
    pub dataset: Dataset,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetsResult {
    pub datasets: Vec<Dataset>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DataPointsResult {
    pub doi: String,
    pub experiment_id: ExperimentId,
    pub reactome_count: usize,
    pub datapoints: Vec<DisplayableDataPoint>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RefreshReport {
    pub refreshed: Vec<String>,
    pub failed: Vec<RefreshFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshFailure {
    pub doi: String,
    pub error: String,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink: Send + Sync {
    fn event(&self, event: ProgressEvent);
}

pub struct App<C: SppClient, S: SearchClient> {
    store: CacheStore,
    spp: C,
    search: S,
    paginator: Paginator,
    options: AppOptions,
    genes: OnceLock<GeneSymbolSet>,
}

impl<C: SppClient, S: SearchClient> App<C, S> {
    pub fn new(
        store: CacheStore,
        spp: C,
        search: S,
        paginator: Paginator,
        options: AppOptions,
    ) -> Self {
        Self {
            store,
            spp,
            search,
            paginator,
            options,
            genes: OnceLock::new(),
        }
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn spp(&self) -> &C {
        &self.spp
    }

    pub fn search(&self, query: &SearchQuery) -> Result<SearchResult, SppError> {
        let result = self.search.search(query)?;
        info!(
            term = %query.term,
            num_found = result.num_found,
            "search matched datasets"
        );
        Ok(result)
    }

    /// Serves a dataset from the cache, or fetches and caches it.
    pub fn dataset(
        &self,
        doi: &Doi,
        refresh: bool,
        sink: &dyn ProgressSink,
    ) -> Result<DatasetResult, SppError> {
        let state = CacheState::decide(&self.store, doi, refresh);
        debug!(%doi, ?state, "cache.decide");
        match state {
            CacheState::CacheHit => {
                sink.event(ProgressEvent {
                    message: format!("phase=Store; using cached dataset {doi}"),
                    elapsed: None,
                });
                let dataset = self.store.read(doi)?;
                Ok(DatasetResult {
                    action: FetchAction::Cache,
                    dataset,
                })
            }
            CacheState::CacheMiss | CacheState::ForcedRefresh => {
                let dataset = self.fetch_dataset(doi, sink)?;
                let action = if state == CacheState::ForcedRefresh {
                    FetchAction::Refresh
                } else {
                    FetchAction::Fetch
                };
                Ok(DatasetResult { action, dataset })
            }
        }
    }

    /// Mirrors every supported-species dataset the upstream added since `date`.
    pub fn datasets_added_since(
        &self,
        date: NaiveDate,
        sink: &dyn ProgressSink,
    ) -> Result<DatasetsResult, SppError> {
        sink.event(ProgressEvent {
            message: format!("phase=Resolve; datasets added since {date}"),
            elapsed: None,
        });
        let rows = self.spp.fetch_rows(&RowQuery::AddedSince(date), None)?;
        let mut datasets = Vec::new();
        for row in &rows {
            let mut ids = ExperimentIdMap::new();
            let dataset = parse_dataset_row(row, &mut ids)?;
            if !is_supported_species(&dataset) {
                debug!(doi = %dataset.doi, "skipping dataset with unsupported species");
                continue;
            }
            datasets.push(self.fetch_datapoints_and_cache(dataset, &ids, sink)?);
        }
        info!(%date, rows = rows.len(), cached = datasets.len(), "datasets added since");
        Ok(DatasetsResult { datasets })
    }

    /// Loads one experiment's cached data points, flagged by Reactome membership.
    pub fn datapoints(
        &self,
        doi: &Doi,
        experiment_id: ExperimentId,
    ) -> Result<DataPointsResult, SppError> {
        // Experiment files are written together with the dataset; a missing one is fatal.
        let points = self.store.read_datapoints(doi, experiment_id)?;
        let total = points.len();
        let datapoints = annotate(points, self.genes()?);
        let reactome_count = datapoints.iter().filter(|point| point.reactome).count();
        info!(
            %doi,
            experiment_id,
            datapoints = total,
            reactome = reactome_count,
            "experiment data points loaded"
        );
        Ok(DataPointsResult {
            doi: doi.to_string(),
            experiment_id,
            reactome_count,
            datapoints,
        })
    }

    /// Force-refreshes every cached dataset. Failures are reported per key.
    pub fn refresh_all(&self, sink: &dyn ProgressSink) -> Result<RefreshReport, SppError> {
        let keys = self.store.enumerate_keys()?;
        sink.event(ProgressEvent {
            message: format!("phase=Resolve; refreshing {} cached datasets", keys.len()),
            elapsed: None,
        });
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.refresh_workers.max(1))
            .thread_name(|index| format!("spp-refresh-{index}"))
            .build()
            .map_err(|err| SppError::WorkerPool(err.to_string()))?;

        let outcomes: Vec<(Doi, Result<DatasetResult, SppError>)> = pool.install(|| {
            keys.par_iter()
                .map(|doi| {
                    if self.paginator.stop_signal().is_stopped() {
                        return (
                            doi.clone(),
                            Err(SppError::FetchHalted {
                                doi: doi.to_string(),
                            }),
                        );
                    }
                    (doi.clone(), self.dataset(doi, true, sink))
                })
                .collect()
        });

        let mut report = RefreshReport::default();
        for (doi, outcome) in outcomes {
            match outcome {
                Ok(_) => report.refreshed.push(doi.to_string()),
                Err(err) => {
                    warn!(%doi, error = %err, "refresh unsuccessful for dataset");
                    report.failed.push(RefreshFailure {
                        doi: doi.to_string(),
                        error: err.to_string(),
                    });
                }
            }
        }
        info!(
            refreshed = report.refreshed.len(),
            failed = report.failed.len(),
            "bulk refresh finished"
        );
        Ok(report)
    }

    fn fetch_dataset(&self, doi: &Doi, sink: &dyn ProgressSink) -> Result<Dataset, SppError> {
        sink.event(ProgressEvent {
            message: format!("phase=Resolve; dataset {doi}"),
            elapsed: None,
        });
        let rows = self.spp.fetch_rows(&RowQuery::Dataset(doi.clone()), None)?;
        let row = rows
            .first()
            .ok_or_else(|| SppError::DatasetNotFound(doi.to_string()))?;

        // The map lives for this one dataset fetch only.
        let mut ids = ExperimentIdMap::new();
        let dataset = parse_dataset_row(row, &mut ids)?;
        if &dataset.doi != doi {
            return Err(SppError::MalformedRow {
                context: "dataset".to_string(),
                message: format!("row doi {} does not match requested {doi}", dataset.doi),
            });
        }
        self.fetch_datapoints_and_cache(dataset, &ids, sink)
    }

    fn fetch_datapoints_and_cache(
        &self,
        dataset: Dataset,
        ids: &ExperimentIdMap,
        sink: &dyn ProgressSink,
    ) -> Result<Dataset, SppError> {
        let doi = dataset.doi.clone();
        sink.event(ProgressEvent {
            message: format!("phase=Fetch; data points for {doi}"),
            elapsed: None,
        });
        let start = Instant::now();
        let query = RowQuery::DataPoints(doi.clone());
        let rows = self
            .paginator
            .collect(&doi, |page| self.spp.fetch_rows(&query, Some(page)))?;
        sink.event(ProgressEvent {
            message: format!("spp.datapoints rows={}", rows.len()),
            elapsed: Some(start.elapsed()),
        });

        let points = reconcile_datapoints(&doi, &rows, ids)?;
        let groups = group_datapoints(points);

        sink.event(ProgressEvent {
            message: "phase=Store; writing cache".to_string(),
            elapsed: None,
        });
        self.store.write(&dataset, &groups)?;
        info!(
            %doi,
            experiments = dataset.experiments.len(),
            datapoints = groups.point_count(),
            "dataset cached"
        );
        Ok(dataset)
    }

    fn genes(&self) -> Result<&GeneSymbolSet, SppError> {
        if let Some(genes) = self.genes.get() {
            return Ok(genes);
        }
        let loaded = match &self.options.gmt_path {
            Some(path) => {
                let genes = GeneSymbolSet::load(path)?;
                info!(path = %path, symbols = genes.len(), "loaded gene symbols");
                genes
            }
            None => GeneSymbolSet::default(),
        };
        Ok(self.genes.get_or_init(|| loaded))
    }
}

pub fn is_supported_species(dataset: &Dataset) -> bool {
    dataset.experiments.iter().all(|experiment| {
        experiment
            .species
            .as_deref()
            .is_some_and(|species| SUPPORTED_SPECIES.contains(&species))
    })
}
