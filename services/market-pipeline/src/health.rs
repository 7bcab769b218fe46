//! Pipeline health report
//!
//! Five independent checks. Status is `healthy` when all pass,
//! `degraded` when at least 70% pass, otherwise `unhealthy`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::metrics::{Alert, MetricsSnapshot};

/// Fraction of passing checks at or above which the pipeline is degraded
/// rather than unhealthy.
pub const DEGRADED_RATIO: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn from_checks(passed: usize, total: usize) -> Self {
        if total == 0 || passed == total {
            return HealthStatus::Healthy;
        }
        if passed as f64 / total as f64 >= DEGRADED_RATIO {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        }
    }
}

/// Individual check outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthChecks {
    pub data_source: bool,
    pub exchange_connectivity: bool,
    pub data_quality: bool,
    pub running: bool,
    pub error_rate: bool,
}

impl HealthChecks {
    pub fn as_array(&self) -> [bool; 5] {
        [
            self.data_source,
            self.exchange_connectivity,
            self.data_quality,
            self.running,
            self.error_rate,
        ]
    }

    pub fn passed(&self) -> usize {
        self.as_array().iter().filter(|ok| **ok).count()
    }

    pub fn status(&self) -> HealthStatus {
        HealthStatus::from_checks(self.passed(), self.as_array().len())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub checks: HealthChecks,
    /// Per-exchange connectivity as reported by the data source.
    pub exchanges: BTreeMap<String, bool>,
    pub metrics: MetricsSnapshot,
    pub alerts: Vec<Alert>,
}
