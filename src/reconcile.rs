//! Row parsing plus the request-scoped `internal id -> public id` experiment map.
//!
//! Data point rows name their experiment by the upstream's internal id only.
//! Dataset rows carry both ids, so the map is filled while the dataset row is
//! parsed and consulted when the data point rows arrive. A miss is fatal for
//! the dataset; no fallback id is ever guessed. An internal id naming two
//! different experiments is rejected while the dataset row is parsed.

use std::collections::HashMap;

use serde_json::Value;
use tracing::warn;

use crate::domain::{DataPoint, Dataset, Doi, Experiment, ExperimentId, Row};
use crate::error::SppError;

#[derive(Debug, Default)]
pub struct ExperimentIdMap {
    ids: HashMap<String, ExperimentId>,
}

impl ExperimentIdMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `internal_id -> public_id`, returning the public id it previously mapped to.
    pub fn register(
        &mut self,
        internal_id: impl Into<String>,
        public_id: ExperimentId,
    ) -> Option<ExperimentId> {
        self.ids.insert(internal_id.into(), public_id)
    }

    pub fn resolve(&self, doi: &Doi, internal_id: &str) -> Result<ExperimentId, SppError> {
        self.ids
            .get(internal_id)
            .copied()
            .ok_or_else(|| SppError::UnresolvedExperimentId {
                doi: doi.to_string(),
                internal_id: internal_id.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Parses one dataset metadata row, registering every experiment's internal id.
pub fn parse_dataset_row(row: &Row, ids: &mut ExperimentIdMap) -> Result<Dataset, SppError> {
    let doi_value = string_field(row, "doi").ok_or_else(|| malformed("dataset", "missing doi"))?;
    let doi: Doi = doi_value.parse()?;
    let name = string_field(row, "name")
        .ok_or_else(|| malformed("dataset", &format!("missing name for {doi}")))?;
    // Upstream omits the description on some records.
    let description = string_field(row, "description");

    let experiment_rows = row
        .get("experiments")
        .and_then(Value::as_array)
        .ok_or_else(|| malformed("dataset", &format!("missing experiments for {doi}")))?;
    let experiments = experiment_rows
        .iter()
        .map(|value| {
            value
                .as_object()
                .ok_or_else(|| malformed("experiment", &format!("non-object entry in {doi}")))
                .and_then(|row| parse_experiment_row(row, ids))
        })
        .collect::<Result<Vec<_>, SppError>>()?;

    Ok(Dataset {
        doi,
        name,
        description,
        experiments,
    })
}

fn parse_experiment_row(row: &Row, ids: &mut ExperimentIdMap) -> Result<Experiment, SppError> {
    let id = row
        .get("experimentId")
        .and_then(Value::as_i64)
        .ok_or_else(|| malformed("experiment", "missing integer experimentId"))?;
    let internal_id = row.get("internalExperimentId").and_then(id_string);
    match &internal_id {
        Some(internal) => {
            if let Some(previous) = ids.register(internal.clone(), id)
                && previous != id
            {
                return Err(malformed(
                    "experiment",
                    &format!("internal id {internal} names experiments {previous} and {id}"),
                ));
            }
        }
        None => warn!(experiment_id = id, "experiment row has no internalExperimentId"),
    }
    Ok(Experiment {
        id,
        name: string_field(row, "name"),
        description: string_field(row, "description"),
        species: string_field(row, "species"),
        internal_id,
    })
}

/// Parses one data point row into its internal experiment id and the point itself.
pub fn parse_datapoint_row(row: &Row) -> Result<(String, DataPoint), SppError> {
    let internal_id = row
        .get("experimentId")
        .and_then(id_string)
        .ok_or_else(|| malformed("data point", "missing experimentId"))?;
    let symbol =
        string_field(row, "symbol").ok_or_else(|| malformed("data point", "missing symbol"))?;
    // Integer zero is a legitimate p-value, so any JSON number is accepted.
    let pvalue = row
        .get("pvalue")
        .or_else(|| row.get("pValue"))
        .and_then(Value::as_f64)
        .ok_or_else(|| malformed("data point", &format!("missing pvalue for {symbol}")))?;
    let fold_change = row
        .get("foldChange")
        .and_then(Value::as_f64)
        .ok_or_else(|| malformed("data point", &format!("missing foldChange for {symbol}")))?;

    Ok((
        internal_id,
        DataPoint {
            symbol,
            pvalue,
            fold_change,
        },
    ))
}

/// Resolves every data point row to its public experiment id, keeping row order.
pub fn reconcile_datapoints(
    doi: &Doi,
    rows: &[Row],
    ids: &ExperimentIdMap,
) -> Result<Vec<(ExperimentId, DataPoint)>, SppError> {
    rows.iter()
        .map(|row| {
            let (internal_id, point) = parse_datapoint_row(row)?;
            let experiment_id = ids.resolve(doi, &internal_id)?;
            Ok((experiment_id, point))
        })
        .collect()
}

fn string_field(row: &Row, name: &str) -> Option<String> {
    row.get(name).and_then(Value::as_str).map(str::to_string)
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn malformed(context: &str, message: &str) -> SppError {
    SppError::MalformedRow {
        context: context.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn dataset_row_registers_internal_ids() {
        let mut ids = ExperimentIdMap::new();
        let dataset = parse_dataset_row(
            &row(json!({
                "doi": "10.1621/abc",
                "name": "Estrogen response",
                "experiments": [
                    {"experimentId": 10, "internalExperimentId": "x1", "name": "E1", "species": "Human"},
                    {"experimentId": 20, "internalExperimentId": 77, "name": "E2", "species": "Human"}
                ]
            })),
            &mut ids,
        )
        .unwrap();

        assert_eq!(dataset.description, None);
        assert_eq!(dataset.experiments.len(), 2);
        assert_eq!(dataset.experiments[1].internal_id.as_deref(), Some("77"));
        let doi = dataset.doi.clone();
        assert_eq!(ids.resolve(&doi, "x1").unwrap(), 10);
        assert_eq!(ids.resolve(&doi, "77").unwrap(), 20);
    }

    #[test]
    fn dataset_row_requires_doi_and_name() {
        let mut ids = ExperimentIdMap::new();
        let err = parse_dataset_row(&row(json!({"name": "n", "experiments": []})), &mut ids)
            .unwrap_err();
        assert_matches!(err, SppError::MalformedRow { .. });

        let err = parse_dataset_row(
            &row(json!({"doi": "10.1621/abc", "experiments": []})),
            &mut ids,
        )
        .unwrap_err();
        assert_matches!(err, SppError::MalformedRow { .. });
    }

    #[test]
    fn shared_internal_id_is_rejected() {
        let mut ids = ExperimentIdMap::new();
        let err = parse_dataset_row(
            &row(json!({
                "doi": "10.1621/abc",
                "name": "Estrogen response",
                "experiments": [
                    {"experimentId": 10, "internalExperimentId": "x1"},
                    {"experimentId": 20, "internalExperimentId": "x1"}
                ]
            })),
            &mut ids,
        )
        .unwrap_err();
        assert_matches!(
            err,
            SppError::MalformedRow { ref message, .. } if message.contains("x1")
        );
    }

    #[test]
    fn experiment_without_internal_id_is_kept_unregistered() {
        let mut ids = ExperimentIdMap::new();
        let dataset = parse_dataset_row(
            &row(json!({
                "doi": "10.1621/abc",
                "name": "Estrogen response",
                "experiments": [
                    {"experimentId": 10, "internalExperimentId": "x1"},
                    {"experimentId": 30}
                ]
            })),
            &mut ids,
        )
        .unwrap();
        assert_eq!(dataset.experiments.len(), 2);
        assert_eq!(dataset.experiments[1].internal_id, None);
        assert_eq!(ids.len(), 1);
    }

    #[test]
    fn zero_pvalue_is_kept() {
        let (internal, point) = parse_datapoint_row(&row(json!({
            "id": 1, "experimentId": "x1", "symbol": "ESR1", "pvalue": 0, "foldChange": 2
        })))
        .unwrap();
        assert_eq!(internal, "x1");
        assert_eq!(point.pvalue, 0.0);
        assert_eq!(point.fold_change, 2.0);
    }

    #[test]
    fn camel_case_pvalue_is_accepted() {
        let (_, point) = parse_datapoint_row(&row(json!({
            "experimentId": "x1", "symbol": "GREB1", "pValue": 0.01, "foldChange": -1.2
        })))
        .unwrap();
        assert_eq!(point.pvalue, 0.01);
    }

    #[test]
    fn unresolved_internal_id_names_the_id() {
        let doi: Doi = "A/B".parse().unwrap();
        let mut ids = ExperimentIdMap::new();
        ids.register("x1", 10);
        let rows = vec![
            row(json!({"experimentId": "x1", "symbol": "A", "pvalue": 0.1, "foldChange": 1.0})),
            row(json!({"experimentId": "x9", "symbol": "B", "pvalue": 0.1, "foldChange": 1.0})),
        ];
        let err = reconcile_datapoints(&doi, &rows, &ids).unwrap_err();
        assert_matches!(
            err,
            SppError::UnresolvedExperimentId { ref doi, ref internal_id }
                if doi == "A/B" && internal_id == "x9"
        );
    }
}
