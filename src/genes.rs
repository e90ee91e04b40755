use std::collections::HashSet;
use std::fs;

use camino::Utf8Path;
use serde::Serialize;

use crate::domain::DataPoint;
use crate::error::SppError;

/// Gene symbols covered by Reactome pathways, read from a GMT gene set file.
#[derive(Debug, Clone, Default)]
pub struct GeneSymbolSet {
    symbols: HashSet<String>,
}

impl GeneSymbolSet {
    pub fn load(path: &Utf8Path) -> Result<Self, SppError> {
        let content = fs::read_to_string(path.as_std_path()).map_err(|err| {
            SppError::GeneSetRead {
                path: path.to_string(),
                message: err.to_string(),
            }
        })?;
        Ok(Self::parse_gmt(&content))
    }

    /// GMT lines are `name<TAB>description<TAB>symbol<TAB>symbol...`.
    pub fn parse_gmt(content: &str) -> Self {
        let symbols = content
            .lines()
            .flat_map(|line| line.split('\t').skip(2))
            .map(str::trim)
            .filter(|symbol| !symbol.is_empty())
            .map(str::to_string)
            .collect();
        Self { symbols }
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.symbols.contains(symbol)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayableDataPoint {
    #[serde(flatten)]
    pub point: DataPoint,
    pub reactome: bool,
}

pub fn annotate(points: Vec<DataPoint>, genes: &GeneSymbolSet) -> Vec<DisplayableDataPoint> {
    points
        .into_iter()
        .map(|point| {
            let reactome = genes.contains(&point.symbol);
            DisplayableDataPoint { point, reactome }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_gmt_skips_name_and_description() {
        let genes = GeneSymbolSet::parse_gmt(
            "Signaling by ESR\tR-HSA-8939211\tESR1\tGREB1\n\
             Cell cycle\tR-HSA-1640170\tCDK1\tESR1\t\n",
        );
        assert_eq!(genes.len(), 3);
        assert!(genes.contains("GREB1"));
        assert!(!genes.contains("R-HSA-8939211"));
        assert!(!genes.contains("Cell cycle"));
    }

    #[test]
    fn annotate_flags_known_symbols() {
        let genes = GeneSymbolSet::parse_gmt("p\td\tESR1\n");
        let points = vec![
            DataPoint {
                symbol: "ESR1".to_string(),
                pvalue: 0.0,
                fold_change: 1.0,
            },
            DataPoint {
                symbol: "XYZ".to_string(),
                pvalue: 0.5,
                fold_change: -1.0,
            },
        ];
        let annotated = annotate(points, &genes);
        assert!(annotated[0].reactome);
        assert!(!annotated[1].reactome);

        let json = serde_json::to_value(&annotated[0]).unwrap();
        assert_eq!(json["symbol"], "ESR1");
        assert_eq!(json["foldChange"], 1.0);
        assert_eq!(json["reactome"], true);
    }
}
