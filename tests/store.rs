use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use spp_mirror::domain::{DataPoint, Dataset, Doi, Experiment};
use spp_mirror::error::SppError;
use spp_mirror::group::group_datapoints;
use spp_mirror::store::CacheStore;

fn temp_store() -> (tempfile::TempDir, CacheStore) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().join("cache")).unwrap();
    (temp, CacheStore::new(root))
}

fn experiment(id: i64) -> Experiment {
    Experiment {
        id,
        name: Some(format!("experiment {id}")),
        description: None,
        species: Some("Human".to_string()),
        internal_id: Some(format!("x{id}")),
    }
}

fn dataset(doi: &str, experiment_ids: &[i64]) -> Dataset {
    Dataset {
        doi: doi.parse().unwrap(),
        name: "Estrogen receptor alpha knockdown".to_string(),
        description: Some("MCF-7 cells".to_string()),
        experiments: experiment_ids.iter().copied().map(experiment).collect(),
    }
}

fn point(symbol: &str, pvalue: f64) -> DataPoint {
    DataPoint {
        symbol: symbol.to_string(),
        pvalue,
        fold_change: 1.5,
    }
}

#[test]
fn write_then_read_round_trips() {
    let (_temp, store) = temp_store();
    let dataset = dataset("10.1621/abc", &[10, 20]);
    let groups = group_datapoints(vec![
        (10, point("ESR1", 0.01)),
        (20, point("GREB1", 0.0)),
        (10, point("PGR", 0.2)),
    ]);

    store.write(&dataset, &groups).unwrap();

    assert!(store.exists(&dataset.doi));
    let cached = store.read(&dataset.doi).unwrap();
    assert_eq!(cached.name, dataset.name);
    assert_eq!(cached.experiments.len(), 2);
    assert_eq!(cached.experiments[0].internal_id, None);

    let first = store.read_datapoints(&dataset.doi, 10).unwrap();
    assert_eq!(first, vec![point("ESR1", 0.01), point("PGR", 0.2)]);
    let second = store.read_datapoints(&dataset.doi, 20).unwrap();
    assert_eq!(second, vec![point("GREB1", 0.0)]);
}

#[test]
fn cached_files_use_public_field_names() {
    let (_temp, store) = temp_store();
    let dataset = dataset("10.1621/abc", &[10]);
    store
        .write(&dataset, &group_datapoints(vec![(10, point("ESR1", 0.5))]))
        .unwrap();

    let raw = std::fs::read_to_string(store.dataset_path(&dataset.doi).as_std_path()).unwrap();
    assert!(raw.contains("\"doi\":\"10.1621/abc\""));
    assert!(!raw.contains("internal"));

    let raw =
        std::fs::read_to_string(store.experiment_path(&dataset.doi, 10).as_std_path()).unwrap();
    assert!(raw.contains("\"foldChange\""));
}

#[test]
fn experiment_without_points_gets_empty_file() {
    let (_temp, store) = temp_store();
    let dataset = dataset("10.1621/abc", &[10, 30]);
    store
        .write(&dataset, &group_datapoints(vec![(10, point("ESR1", 0.5))]))
        .unwrap();

    assert!(store.read_datapoints(&dataset.doi, 30).unwrap().is_empty());
}

#[test]
fn rewrite_prunes_stale_experiment_files() {
    let (_temp, store) = temp_store();
    let old = dataset("10.1621/abc", &[10, 20]);
    store
        .write(
            &old,
            &group_datapoints(vec![(10, point("A", 0.1)), (20, point("B", 0.1))]),
        )
        .unwrap();

    let new = dataset("10.1621/abc", &[10]);
    store
        .write(&new, &group_datapoints(vec![(10, point("C", 0.1))]))
        .unwrap();

    assert_eq!(store.read_datapoints(&new.doi, 10).unwrap(), vec![point("C", 0.1)]);
    let err = store.read_datapoints(&new.doi, 20).unwrap_err();
    assert_matches!(err, SppError::CacheFileNotFound(_));
}

#[test]
fn missing_experiment_file_is_not_found() {
    let (_temp, store) = temp_store();
    let dataset = dataset("10.1621/abc", &[10]);
    store
        .write(&dataset, &group_datapoints(vec![(10, point("A", 0.1))]))
        .unwrap();

    let err = store.read_datapoints(&dataset.doi, 99).unwrap_err();
    assert_matches!(err, SppError::CacheFileNotFound(ref path) if path.ends_with("experiments/99.json"));
}

#[test]
fn missing_dataset_is_not_found() {
    let (_temp, store) = temp_store();
    let doi: Doi = "10.1621/absent".parse().unwrap();
    assert!(!store.exists(&doi));
    assert_matches!(store.read(&doi), Err(SppError::CacheFileNotFound(_)));
}

#[test]
fn corrupt_dataset_file_is_a_read_error() {
    let (_temp, store) = temp_store();
    let doi: Doi = "10.1621/broken".parse().unwrap();
    let path = store.dataset_path(&doi);
    std::fs::create_dir_all(path.parent().unwrap().as_std_path()).unwrap();
    std::fs::write(path.as_std_path(), b"{not json").unwrap();

    assert!(store.exists(&doi));
    assert_matches!(store.read(&doi), Err(SppError::CacheRead { .. }));
}

#[test]
fn enumerate_keys_lists_every_cached_dataset() {
    let (_temp, store) = temp_store();
    for doi in ["10.1621/b", "10.1621/a", "10.1919/z"] {
        store
            .write(&dataset(doi, &[1]), &group_datapoints(Vec::new()))
            .unwrap();
    }
    // A directory left behind by an interrupted write is still a key.
    std::fs::create_dir_all(
        store
            .datasets_root()
            .join("10.2000")
            .join("partial")
            .as_std_path(),
    )
    .unwrap();
    std::fs::write(store.datasets_root().join("stray.txt").as_std_path(), b"x").unwrap();

    let keys = store
        .enumerate_keys()
        .unwrap()
        .iter()
        .map(Doi::to_string)
        .collect::<Vec<_>>();
    assert_eq!(keys, vec!["10.1621/a", "10.1621/b", "10.1919/z", "10.2000/partial"]);
}

#[test]
fn layout_follows_authority_and_object() {
    let (_temp, store) = temp_store();
    let doi: Doi = "10.1621/yAyJGMai3I".parse().unwrap();
    assert!(
        store
            .dataset_path(&doi)
            .ends_with("datasets/10.1621/yAyJGMai3I/yAyJGMai3I.json")
    );
    assert!(
        store
            .experiment_path(&doi, 7)
            .ends_with("datasets/10.1621/yAyJGMai3I/experiments/7.json")
    );
    assert!(store.dataset_path(&doi).starts_with(store.root()));
}

#[cfg(unix)]
#[test]
fn enumerate_keys_skips_non_utf8_directories() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let (_temp, store) = temp_store();
    store
        .write(&dataset("10.1621/a", &[1]), &group_datapoints(Vec::new()))
        .unwrap();
    let authority_dir = store.datasets_root().join("10.1621");
    let junk = authority_dir
        .as_std_path()
        .join(OsStr::from_bytes(b"junk\xff"));
    std::fs::create_dir_all(&junk).unwrap();

    let keys = store.enumerate_keys().unwrap();
    assert_eq!(keys, vec!["10.1621/a".parse::<Doi>().unwrap()]);
}

#[cfg(unix)]
#[test]
fn rewrite_ignores_non_utf8_experiment_entries() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let (_temp, store) = temp_store();
    let dataset = dataset("10.1621/abc", &[10]);
    store
        .write(&dataset, &group_datapoints(vec![(10, point("A", 0.1))]))
        .unwrap();
    let junk = store
        .experiments_dir(&dataset.doi)
        .as_std_path()
        .join(OsStr::from_bytes(b"stray\xff.json"));
    std::fs::write(&junk, b"[]").unwrap();

    store
        .write(&dataset, &group_datapoints(vec![(10, point("B", 0.1))]))
        .unwrap();
    assert_eq!(
        store.read_datapoints(&dataset.doi, 10).unwrap(),
        vec![point("B", 0.1)]
    );
}

#[test]
fn write_under_a_file_root_is_a_directory_error() {
    let temp = tempfile::tempdir().unwrap();
    let root_file = temp.path().join("rootfile");
    std::fs::write(&root_file, b"not a directory").unwrap();
    let store = CacheStore::new(Utf8PathBuf::from_path_buf(root_file).unwrap());

    let err = store
        .write(&dataset("10.1621/a", &[1]), &group_datapoints(Vec::new()))
        .unwrap_err();
    assert_matches!(err, SppError::CacheDirectory { ref path, .. } if path.ends_with("experiments"));
    assert!(!store.exists(&"10.1621/a".parse().unwrap()));
}
