//! Append-only record of every solved period.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::models::Instance;

/// Ledger misuse. Entries must arrive in period order with matching sizes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Ledger expects period {expected}, got {got}")]
    OutOfOrder { expected: usize, got: usize },
    #[error("Ledger entry for period {period} has {got} {what}, expected {expected}")]
    ShapeMismatch {
        period: usize,
        what: &'static str,
        got: usize,
        expected: usize,
    },
}

/// Delay bucket of a routing decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Lag {
    /// Processed `τ` periods after arrival, `1 <= τ <= tau_max`
    Within(usize),
    /// At or beyond the edge of the lookahead window; feeds backlog
    BeyondWindow,
}

impl Lag {
    /// Bucket index `τ` in `1..=tau_max+1`.
    #[inline]
    pub fn bucket(self, tau_max: usize) -> usize {
        match self {
            Lag::Within(tau) => tau,
            Lag::BeyondWindow => tau_max + 1,
        }
    }

    #[inline]
    pub fn from_bucket(bucket: usize, tau_max: usize) -> Self {
        if bucket > tau_max {
            Lag::BeyondWindow
        } else {
            Lag::Within(bucket)
        }
    }
}

/// Where one test center's demand went in one period.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Routing {
    pub laboratory: usize,
    pub lag: Lag,
}

/// Objective value and its additive components.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ObjectiveBreakdown {
    pub total: f64,
    pub delay: f64,
    pub reassignment: f64,
    pub backlog: f64,
}

/// One solved period. Immutable once appended.
#[derive(Clone, Debug, PartialEq)]
pub struct LedgerEntry {
    pub period: usize,
    pub objective: ObjectiveBreakdown,
    pub solve_time: Duration,
    /// One routing per test center (`y`)
    pub routings: Vec<Routing>,
    /// Backlog per laboratory (`L`)
    pub backlog: Vec<f64>,
    /// Reassignment flag per test center (`s`)
    pub reassigned: Vec<bool>,
    pub u_max: f64,
    pub source_critical: Vec<bool>,
    pub laboratory_critical: Vec<bool>,
    /// Window capacity left after this period's routing, `[lab][τ-1]`
    pub unused_capacity: Vec<Vec<f64>>,
}

impl LedgerEntry {
    /// Demand of `instance` routed to `laboratory` in bucket `lag` this period.
    pub fn routed_demand(&self, instance: &Instance, laboratory: usize, lag: Lag) -> f64 {
        self.routings
            .iter()
            .zip(&instance.test_centers)
            .filter(|(r, _)| r.laboratory == laboratory && r.lag == lag)
            .map(|(_, tc)| tc.demand_at(self.period))
            .sum()
    }
}

/// The full solution history of a run.
#[derive(Clone, Debug)]
pub struct Ledger {
    tau_max: usize,
    test_centers: Vec<String>,
    laboratories: Vec<String>,
    entries: Vec<LedgerEntry>,
}

impl Ledger {
    pub fn new(instance: &Instance, tau_max: usize) -> Self {
        Self {
            tau_max,
            test_centers: instance.test_centers.iter().map(|tc| tc.id.clone()).collect(),
            laboratories: instance.laboratories.iter().map(|l| l.id.clone()).collect(),
            entries: Vec::with_capacity(instance.pandemic_duration),
        }
    }

    pub fn tau_max(&self) -> usize {
        self.tau_max
    }

    /// Append the next period's entry.
    pub fn append(&mut self, entry: LedgerEntry) -> Result<&LedgerEntry, LedgerError> {
        let expected = self.entries.len();
        if entry.period != expected {
            return Err(LedgerError::OutOfOrder {
                expected,
                got: entry.period,
            });
        }

        let shapes = [
            ("routings", entry.routings.len(), self.test_centers.len()),
            ("reassignment flags", entry.reassigned.len(), self.test_centers.len()),
            ("source flags", entry.source_critical.len(), self.test_centers.len()),
            ("backlog values", entry.backlog.len(), self.laboratories.len()),
            ("laboratory flags", entry.laboratory_critical.len(), self.laboratories.len()),
            ("capacity rows", entry.unused_capacity.len(), self.laboratories.len()),
        ];
        for (what, got, expected) in shapes {
            if got != expected {
                return Err(LedgerError::ShapeMismatch {
                    period: entry.period,
                    what,
                    got,
                    expected,
                });
            }
        }

        self.entries.push(entry);
        Ok(&self.entries[expected])
    }

    pub fn entry(&self, period: usize) -> Option<&LedgerEntry> {
        self.entries.get(period)
    }

    pub fn last(&self) -> Option<&LedgerEntry> {
        self.entries.last()
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Value of `y[i, j, τ]` in `period`, `τ` in `1..=tau_max+1`.
    pub fn y(&self, period: usize, test_center: usize, laboratory: usize, bucket: usize) -> f64 {
        match self.entries.get(period).and_then(|e| e.routings.get(test_center)) {
            Some(r) if r.laboratory == laboratory && r.lag.bucket(self.tau_max) == bucket => 1.0,
            _ => 0.0,
        }
    }

    /// Nested-map view keyed by period, test center, laboratory and lag.
    pub fn report(&self) -> LedgerReport {
        let flag = |b: bool| u8::from(b);
        let buckets = self.tau_max + 1;

        let mut report = LedgerReport::default();
        for entry in &self.entries {
            report.objective.push(entry.objective.total);
            report.delay.push(entry.objective.delay);
            report.reassignment.push(entry.objective.reassignment);
            report.backlog_term.push(entry.objective.backlog);
            report.time.push(entry.solve_time.as_secs_f64());
            report.u_max.push(entry.u_max);

            let mut y = BTreeMap::new();
            for (tc, routing) in self.test_centers.iter().zip(&entry.routings) {
                let per_lab: BTreeMap<String, Vec<u8>> = self
                    .laboratories
                    .iter()
                    .enumerate()
                    .map(|(j, lab)| {
                        let row = (1..=buckets)
                            .map(|b| {
                                flag(
                                    routing.laboratory == j
                                        && routing.lag.bucket(self.tau_max) == b,
                                )
                            })
                            .collect();
                        (lab.clone(), row)
                    })
                    .collect();
                y.insert(tc.clone(), per_lab);
            }
            report.y.push(y);

            report.backlog.push(
                self.laboratories
                    .iter()
                    .cloned()
                    .zip(entry.backlog.iter().copied())
                    .collect(),
            );
            report.s.push(
                self.test_centers
                    .iter()
                    .cloned()
                    .zip(entry.reassigned.iter().map(|s| flag(*s)))
                    .collect(),
            );
            report.unused_cap.push(
                self.laboratories
                    .iter()
                    .cloned()
                    .zip(entry.unused_capacity.iter().cloned())
                    .collect(),
            );

            for (tc, crit) in self.test_centers.iter().zip(&entry.source_critical) {
                report.crit_i.entry(tc.clone()).or_default().push(flag(*crit));
            }
            for (lab, crit) in self.laboratories.iter().zip(&entry.laboratory_critical) {
                report.crit_j.entry(lab.clone()).or_default().push(flag(*crit));
            }
        }
        report
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.report())
    }
}

/// Serializable ledger, laid out for reporting and analysis tooling.
///
/// Per-period lists are indexed by period. `y[t][i][j]` is the 0/1 vector
/// over lag buckets `1..=tau_max+1`.
#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct LedgerReport {
    #[serde(rename = "obj")]
    pub objective: Vec<f64>,
    pub delay: Vec<f64>,
    pub reassignment: Vec<f64>,
    #[serde(rename = "backlog")]
    pub backlog_term: Vec<f64>,
    pub time: Vec<f64>,
    pub y: Vec<BTreeMap<String, BTreeMap<String, Vec<u8>>>>,
    #[serde(rename = "L")]
    pub backlog: Vec<BTreeMap<String, f64>>,
    pub s: Vec<BTreeMap<String, u8>>,
    #[serde(rename = "U_max")]
    pub u_max: Vec<f64>,
    pub crit_i: BTreeMap<String, Vec<u8>>,
    pub crit_j: BTreeMap<String, Vec<u8>>,
    pub unused_cap: Vec<BTreeMap<String, Vec<f64>>>,
}
