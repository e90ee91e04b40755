use std::collections::HashSet;
use std::fs;
use std::io::{BufWriter, Write};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::Builder;
use tracing::{debug, warn};

use crate::domain::{DataPoint, Dataset, Doi, ExperimentId, is_doi_segment};
use crate::error::SppError;
use crate::group::ExperimentGroups;

pub const DATASETS_DIR: &str = "datasets";
pub const EXPERIMENTS_DIR: &str = "experiments";

/// Directory-keyed dataset cache:
///
/// ```text
/// {root}/datasets/{authority}/{object}/{object}.json
/// {root}/datasets/{authority}/{object}/experiments/{experimentId}.json
/// ```
///
/// The dataset file is the only cache-hit signal. Every file is replaced
/// atomically, but the sequence of files is not: a crash between them leaves
/// a dataset file whose experiment files are stale or missing. Concurrent
/// writes to the same key are not serialized here.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: Utf8PathBuf,
}

impl CacheStore {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn datasets_root(&self) -> Utf8PathBuf {
        self.root.join(DATASETS_DIR)
    }

    pub fn dataset_dir(&self, doi: &Doi) -> Utf8PathBuf {
        self.datasets_root().join(doi.authority()).join(doi.object())
    }

    pub fn dataset_path(&self, doi: &Doi) -> Utf8PathBuf {
        self.dataset_dir(doi).join(format!("{}.json", doi.object()))
    }

    pub fn experiments_dir(&self, doi: &Doi) -> Utf8PathBuf {
        self.dataset_dir(doi).join(EXPERIMENTS_DIR)
    }

    pub fn experiment_path(&self, doi: &Doi, experiment_id: ExperimentId) -> Utf8PathBuf {
        self.experiments_dir(doi).join(format!("{experiment_id}.json"))
    }

    pub fn exists(&self, doi: &Doi) -> bool {
        fs::metadata(self.dataset_path(doi).as_std_path())
            .map(|meta| meta.is_file() && meta.len() > 0)
            .unwrap_or(false)
    }

    pub fn read(&self, doi: &Doi) -> Result<Dataset, SppError> {
        read_json(&self.dataset_path(doi))
    }

    pub fn read_datapoints(
        &self,
        doi: &Doi,
        experiment_id: ExperimentId,
    ) -> Result<Vec<DataPoint>, SppError> {
        read_json(&self.experiment_path(doi, experiment_id))
    }

    /// Writes the dataset file, then one file per experiment.
    ///
    /// Experiments of `dataset` without data points get an empty list, and
    /// experiment files from an earlier version of the dataset are removed.
    pub fn write(&self, dataset: &Dataset, groups: &ExperimentGroups) -> Result<(), SppError> {
        let doi = &dataset.doi;
        let experiments_dir = self.experiments_dir(doi);
        fs::create_dir_all(experiments_dir.as_std_path()).map_err(|err| {
            SppError::CacheDirectory {
                path: experiments_dir.to_string(),
                message: err.to_string(),
            }
        })?;

        write_json_atomic(&self.dataset_path(doi), dataset)?;

        let mut written = HashSet::new();
        for (experiment_id, points) in groups.iter() {
            write_json_atomic(&self.experiment_path(doi, experiment_id), points)?;
            written.insert(experiment_id);
        }
        for experiment in &dataset.experiments {
            if written.insert(experiment.id) {
                write_json_atomic(
                    &self.experiment_path(doi, experiment.id),
                    &Vec::<DataPoint>::new(),
                )?;
            }
        }

        self.prune_experiments(&experiments_dir, &written)?;
        debug!(
            %doi,
            experiments = written.len(),
            points = groups.point_count(),
            "cache.write"
        );
        Ok(())
    }

    /// Lists `{authority}/{object}` keys found under the datasets root.
    ///
    /// Directories without a dataset file are included so that partially
    /// written entries can be refreshed.
    pub fn enumerate_keys(&self) -> Result<Vec<Doi>, SppError> {
        let root = self.datasets_root();
        if !root.as_std_path().is_dir() {
            return Ok(Vec::new());
        }
        let mut keys = Vec::new();
        for (authority, authority_dir) in child_dirs(&root)? {
            if !is_doi_segment(&authority) {
                continue;
            }
            for (object, _) in child_dirs(&authority_dir)? {
                if let Ok(doi) = Doi::new(&authority, &object) {
                    keys.push(doi);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn prune_experiments(
        &self,
        experiments_dir: &Utf8Path,
        keep: &HashSet<ExperimentId>,
    ) -> Result<(), SppError> {
        let entries = experiments_dir
            .read_dir_utf8()
            .map_err(|err| SppError::CacheRead {
                path: experiments_dir.to_string(),
                message: err.to_string(),
            })?;
        // Entries that cannot be read or are not UTF-8 were never written here.
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension() != Some("json") {
                continue;
            }
            let stale = path
                .file_stem()
                .and_then(|stem| stem.parse::<ExperimentId>().ok())
                .is_some_and(|id| !keep.contains(&id));
            if stale {
                fs::remove_file(path.as_std_path()).map_err(|err| SppError::CacheWrite {
                    path: path.to_string(),
                    message: err.to_string(),
                })?;
            }
        }
        Ok(())
    }
}

fn read_json<T: DeserializeOwned>(path: &Utf8Path) -> Result<T, SppError> {
    if !path.as_std_path().is_file() {
        return Err(SppError::CacheFileNotFound(path.to_string()));
    }
    let content = fs::read(path.as_std_path()).map_err(|err| SppError::CacheRead {
        path: path.to_string(),
        message: err.to_string(),
    })?;
    serde_json::from_slice(&content).map_err(|err| SppError::CacheRead {
        path: path.to_string(),
        message: err.to_string(),
    })
}

fn write_json_atomic<T: Serialize + ?Sized>(path: &Utf8Path, value: &T) -> Result<(), SppError> {
    let write_error = |message: String| SppError::CacheWrite {
        path: path.to_string(),
        message,
    };
    let parent = path
        .parent()
        .ok_or_else(|| write_error("invalid cache path".to_string()))?;
    let mut temp = Builder::new()
        .prefix(".spp-mirror")
        .suffix(".tmp")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| write_error(err.to_string()))?;
    {
        let mut writer = BufWriter::new(temp.as_file_mut());
        serde_json::to_writer(&mut writer, value).map_err(|err| write_error(err.to_string()))?;
        writer.flush().map_err(|err| write_error(err.to_string()))?;
    }
    temp.persist(path.as_std_path())
        .map_err(|err| write_error(err.error.to_string()))?;
    Ok(())
}

fn child_dirs(dir: &Utf8Path) -> Result<Vec<(String, Utf8PathBuf)>, SppError> {
    let entries = dir.read_dir_utf8().map_err(|err| SppError::CacheRead {
        path: dir.to_string(),
        message: err.to_string(),
    })?;
    let mut children = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(dir = %dir, error = %err, "skipping unreadable cache entry");
                continue;
            }
        };
        match entry.file_type() {
            Ok(file_type) if file_type.is_dir() => {
                children.push((entry.file_name().to_string(), entry.path().to_path_buf()));
            }
            Ok(_) => {}
            Err(err) => {
                warn!(path = %entry.path(), error = %err, "skipping unreadable cache entry");
            }
        }
    }
    Ok(children)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths() {
        let store = CacheStore::new(Utf8PathBuf::from("/cache"));
        let doi: Doi = "10.1621/yAyJGMai3I".parse().unwrap();

        assert_eq!(
            store.dataset_path(&doi),
            Utf8PathBuf::from("/cache/datasets/10.1621/yAyJGMai3I/yAyJGMai3I.json")
        );
        assert_eq!(
            store.experiment_path(&doi, 42),
            Utf8PathBuf::from("/cache/datasets/10.1621/yAyJGMai3I/experiments/42.json")
        );
    }

    #[test]
    fn missing_root_enumerates_nothing() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().join("absent")).unwrap();
        let store = CacheStore::new(root);
        assert!(store.enumerate_keys().unwrap().is_empty());
    }
}
