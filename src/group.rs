use std::collections::HashMap;

use crate::domain::{DataPoint, ExperimentId};

/// Data points partitioned by public experiment id.
///
/// Experiments keep first-seen order and points keep their input order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExperimentGroups {
    groups: Vec<(ExperimentId, Vec<DataPoint>)>,
    index: HashMap<ExperimentId, usize>,
}

impl ExperimentGroups {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, experiment_id: ExperimentId, point: DataPoint) {
        let slot = match self.index.get(&experiment_id) {
            Some(slot) => *slot,
            None => {
                self.groups.push((experiment_id, Vec::new()));
                let slot = self.groups.len() - 1;
                self.index.insert(experiment_id, slot);
                slot
            }
        };
        self.groups[slot].1.push(point);
    }

    pub fn get(&self, experiment_id: ExperimentId) -> Option<&[DataPoint]> {
        self.index
            .get(&experiment_id)
            .map(|slot| self.groups[*slot].1.as_slice())
    }

    pub fn experiment_ids(&self) -> impl Iterator<Item = ExperimentId> + '_ {
        self.groups.iter().map(|(id, _)| *id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ExperimentId, &[DataPoint])> + '_ {
        self.groups.iter().map(|(id, points)| (*id, points.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn point_count(&self) -> usize {
        self.groups.iter().map(|(_, points)| points.len()).sum()
    }
}

impl FromIterator<(ExperimentId, DataPoint)> for ExperimentGroups {
    fn from_iter<I: IntoIterator<Item = (ExperimentId, DataPoint)>>(iter: I) -> Self {
        let mut groups = Self::new();
        for (experiment_id, point) in iter {
            groups.push(experiment_id, point);
        }
        groups
    }
}

pub fn group_datapoints(points: Vec<(ExperimentId, DataPoint)>) -> ExperimentGroups {
    points.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(symbol: &str) -> DataPoint {
        DataPoint {
            symbol: symbol.to_string(),
            pvalue: 0.5,
            fold_change: 1.0,
        }
    }

    #[test]
    fn keeps_first_seen_experiment_order() {
        let groups = group_datapoints(vec![
            (20, point("A")),
            (10, point("B")),
            (20, point("C")),
            (30, point("D")),
            (10, point("E")),
        ]);
        assert_eq!(groups.experiment_ids().collect::<Vec<_>>(), vec![20, 10, 30]);
        let symbols = |id| {
            groups
                .get(id)
                .unwrap()
                .iter()
                .map(|p| p.symbol.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(symbols(20), vec!["A", "C"]);
        assert_eq!(symbols(10), vec!["B", "E"]);
        assert_eq!(symbols(30), vec!["D"]);
        assert_eq!(groups.point_count(), 5);
    }

    #[test]
    fn empty_input_gives_empty_groups() {
        let groups = group_datapoints(Vec::new());
        assert!(groups.is_empty());
        assert!(groups.get(1).is_none());
    }
}
