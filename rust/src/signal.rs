//! Time-indexed epidemiological indicators keyed by test center and date.

use std::fmt;

use chrono::NaiveDate;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Lookup of an external indicator (e.g. a reproduction number).
pub trait IndicatorSource: Send + Sync + fmt::Debug {
    /// Raw indicator value for a test center on a date, `None` when unknown.
    fn lookup(&self, test_center: &str, date: NaiveDate) -> Option<f64>;
}

/// Classified indicator value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SignalReading {
    Plausible(f64),
    /// Non-finite or above the plausible maximum
    Implausible(f64),
    Missing,
}

impl SignalReading {
    pub fn classify(value: Option<f64>, plausible_max: f64) -> Self {
        match value {
            None => SignalReading::Missing,
            Some(v) if !v.is_finite() || v > plausible_max => SignalReading::Implausible(v),
            Some(v) => SignalReading::Plausible(v),
        }
    }
}

/// In-memory indicator table.
///
/// Serializes as `{test_center: {"YYYY-MM-DD": value}}`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IndicatorTable {
    values: FxHashMap<String, FxHashMap<NaiveDate, f64>>,
}

impl IndicatorTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, test_center: impl Into<String>, date: NaiveDate, value: f64) {
        self.values
            .entry(test_center.into())
            .or_default()
            .insert(date, value);
    }

    /// Insert one value per consecutive day starting at `start`.
    pub fn insert_series(&mut self, test_center: &str, start: NaiveDate, values: &[f64]) {
        let series = self.values.entry(test_center.to_string()).or_default();
        for (date, value) in start.iter_days().zip(values) {
            series.insert(date, *value);
        }
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn len(&self) -> usize {
        self.values.values().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl IndicatorSource for IndicatorTable {
    fn lookup(&self, test_center: &str, date: NaiveDate) -> Option<f64> {
        self.values.get(test_center)?.get(&date).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 11, day).unwrap()
    }

    #[test]
    fn test_series_lookup() {
        let mut table = IndicatorTable::new();
        table.insert_series("Berlin", d(2), &[1.1, 1.4, 0.9]);
        table.insert("Bremen", d(3), 2.0);

        assert_eq!(table.len(), 4);
        assert_eq!(table.lookup("Berlin", d(3)), Some(1.4));
        assert_eq!(table.lookup("Berlin", d(5)), None);
        assert_eq!(table.lookup("Hamburg", d(2)), None);
        assert_eq!(table.lookup("Bremen", d(3)), Some(2.0));
    }

    #[test]
    fn test_classify() {
        assert_eq!(SignalReading::classify(Some(1.2), 5.0), SignalReading::Plausible(1.2));
        assert_eq!(SignalReading::classify(Some(7.0), 5.0), SignalReading::Implausible(7.0));
        assert!(matches!(
            SignalReading::classify(Some(f64::NAN), 5.0),
            SignalReading::Implausible(v) if v.is_nan()
        ));
        assert_eq!(SignalReading::classify(None, 5.0), SignalReading::Missing);
    }

    #[test]
    fn test_from_json() {
        let table =
            IndicatorTable::from_json(r#"{"Berlin": {"2020-11-02": 1.3, "2020-11-03": 0.7}}"#)
                .unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.lookup("Berlin", d(3)), Some(0.7));
    }
}
