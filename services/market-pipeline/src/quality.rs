//! Data quality report across (symbol, timeframe) pairs

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use types::ids::Symbol;
use types::timeframe::Timeframe;

use crate::source::QualityAssessment;

/// Quality of one pair: either the source's assessment or the reason it
/// could not be produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PairQuality {
    Assessed(QualityAssessment),
    Failed { error: String, overall: f64 },
}

impl PairQuality {
    pub fn failed(error: impl ToString) -> Self {
        PairQuality::Failed {
            error: error.to_string(),
            overall: 0.0,
        }
    }

    pub fn overall(&self) -> f64 {
        match self {
            PairQuality::Assessed(assessment) => assessment.overall,
            PairQuality::Failed { overall, .. } => *overall,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, PairQuality::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataQualityReport {
    pub generated_at: DateTime<Utc>,
    pub pairs: BTreeMap<Symbol, BTreeMap<Timeframe, PairQuality>>,
}

impl DataQualityReport {
    pub fn new() -> Self {
        Self {
            generated_at: Utc::now(),
            pairs: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, symbol: Symbol, timeframe: Timeframe, quality: PairQuality) {
        self.pairs.entry(symbol).or_default().insert(timeframe, quality);
    }

    pub fn get(&self, symbol: &Symbol, timeframe: Timeframe) -> Option<&PairQuality> {
        self.pairs.get(symbol).and_then(|by_tf| by_tf.get(&timeframe))
    }

    /// Number of (symbol, timeframe) entries.
    pub fn pair_count(&self) -> usize {
        self.pairs.values().map(BTreeMap::len).sum()
    }

    /// Number of entries whose assessment failed.
    pub fn failed_count(&self) -> usize {
        self.pairs
            .values()
            .flat_map(BTreeMap::values)
            .filter(|quality| quality.is_failed())
            .count()
    }

    /// Mean overall score across pairs; failed pairs count as 0.
    pub fn average_overall(&self) -> f64 {
        let n = self.pair_count();
        if n == 0 {
            return 0.0;
        }
        let sum: f64 = self
            .pairs
            .values()
            .flat_map(BTreeMap::values)
            .map(PairQuality::overall)
            .sum();
        sum / n as f64
    }
}

impl Default for DataQualityReport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assessed(overall: f64) -> PairQuality {
        PairQuality::Assessed(QualityAssessment {
            completeness: overall,
            consistency: overall,
            freshness: overall,
            overall,
            issues: vec![],
        })
    }

    #[test]
    fn test_average_counts_failures_as_zero() {
        let mut report = DataQualityReport::new();
        report.insert(Symbol::new("BTCUSDT"), Timeframe::M1, assessed(90.0));
        report.insert(Symbol::new("ETHUSDT"), Timeframe::M1, PairQuality::failed("boom"));

        assert_eq!(report.pair_count(), 2);
        assert_eq!(report.failed_count(), 1);
        assert!((report.average_overall() - 45.0).abs() < 1e-9);
        assert!(report
            .get(&Symbol::new("ETHUSDT"), Timeframe::M1)
            .unwrap()
            .is_failed());
    }

    #[test]
    fn test_failed_pair_wire_shape() {
        let value = serde_json::to_value(PairQuality::failed("timeout")).unwrap();
        assert_eq!(value["error"], "timeout");
        assert_eq!(value["overall"], 0.0);
    }
}
