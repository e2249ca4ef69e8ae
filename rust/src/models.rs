//! Core data types for an allocation instance.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Problems found when checking an instance against a run configuration.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InstanceError {
    #[error("Instance has no {0}")]
    Empty(&'static str),
    #[error("Test center {center}: {series} has {len} entries, need {needed}")]
    ShortSeries {
        center: String,
        series: &'static str,
        len: usize,
        needed: usize,
    },
    #[error("Test center {center}: {len} distances for {laboratories} laboratories")]
    DistanceMismatch {
        center: String,
        len: usize,
        laboratories: usize,
    },
    #[error("Test center {center}: default laboratory index {index} out of range")]
    DefaultOutOfRange { center: String, index: usize },
    #[error("Test center {center}: negative or non-finite value in {series}")]
    InvalidValue { center: String, series: &'static str },
    #[error("Laboratory {laboratory}: capacity has {len} entries, need {needed}")]
    ShortCapacity {
        laboratory: String,
        len: usize,
        needed: usize,
    },
    #[error("Laboratory {laboratory}: capacity at index {index} must be positive, got {value}")]
    NonPositiveCapacity {
        laboratory: String,
        index: usize,
        value: f64,
    },
}

/// A test center producing daily demand for diagnostic tests.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestCenter {
    pub id: String,
    /// Tests arriving per period (`d_i[t]`)
    pub demand: Vec<f64>,
    /// Weekly incidence per period
    pub incidence: Vec<f64>,
    /// Routing distance to each laboratory, indexed like `Instance::laboratories`
    pub distance: Vec<f64>,
    /// Index of the default laboratory (closest, fixed for the run)
    pub default_laboratory: usize,
}

impl TestCenter {
    #[inline]
    pub fn demand_at(&self, period: usize) -> f64 {
        self.demand[period]
    }

    /// Default-routing indicator `default_i[j]`.
    #[inline]
    pub fn is_default(&self, laboratory: usize) -> bool {
        self.default_laboratory == laboratory
    }
}

/// A laboratory processing tests with time-varying capacity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Laboratory {
    pub id: String,
    /// Absolute capacity per period (`Cap_t`), covering the run plus the lookahead margin
    pub capacity: Vec<f64>,
    /// Nominal daily capacity, used by the resource workload criticality strategy
    pub nominal_capacity: f64,
}

/// A complete problem instance, already filtered to a time window and region.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub name: String,
    /// Calendar date of period 0
    pub start_date: NaiveDate,
    /// Number of periods to plan
    pub pandemic_duration: usize,
    pub test_centers: Vec<TestCenter>,
    pub laboratories: Vec<Laboratory>,
}

impl Instance {
    /// Capacity entries each laboratory needs for a run with this lookahead.
    ///
    /// The last period reads `Cap_t[t + tau_max + 1]`.
    pub fn required_capacity_len(&self, tau_max: usize) -> usize {
        self.pandemic_duration + tau_max + 1
    }

    /// Calendar date of a period.
    pub fn date_of(&self, period: usize) -> NaiveDate {
        self.start_date
            .checked_add_days(chrono::Days::new(period as u64))
            .unwrap_or(NaiveDate::MAX)
    }

    /// Check that every series is long enough and well-formed for `tau_max`.
    pub fn validate(&self, tau_max: usize) -> Result<(), InstanceError> {
        if self.test_centers.is_empty() {
            return Err(InstanceError::Empty("test centers"));
        }
        if self.laboratories.is_empty() {
            return Err(InstanceError::Empty("laboratories"));
        }

        let labs = self.laboratories.len();
        for tc in &self.test_centers {
            for (series, values) in [("demand", &tc.demand), ("incidence", &tc.incidence)] {
                if values.len() < self.pandemic_duration {
                    return Err(InstanceError::ShortSeries {
                        center: tc.id.clone(),
                        series,
                        len: values.len(),
                        needed: self.pandemic_duration,
                    });
                }
            }
            if tc.demand.iter().any(|d| !d.is_finite() || *d < 0.0) {
                return Err(InstanceError::InvalidValue {
                    center: tc.id.clone(),
                    series: "demand",
                });
            }
            if tc.distance.len() != labs {
                return Err(InstanceError::DistanceMismatch {
                    center: tc.id.clone(),
                    len: tc.distance.len(),
                    laboratories: labs,
                });
            }
            if tc.distance.iter().any(|c| !c.is_finite() || *c < 0.0) {
                return Err(InstanceError::InvalidValue {
                    center: tc.id.clone(),
                    series: "distance",
                });
            }
            if tc.default_laboratory >= labs {
                return Err(InstanceError::DefaultOutOfRange {
                    center: tc.id.clone(),
                    index: tc.default_laboratory,
                });
            }
        }

        let needed = self.required_capacity_len(tau_max);
        for lab in &self.laboratories {
            if lab.capacity.len() < needed {
                return Err(InstanceError::ShortCapacity {
                    laboratory: lab.id.clone(),
                    len: lab.capacity.len(),
                    needed,
                });
            }
            // These entries divide the backlog in the overload bound.
            for index in (tau_max + 1)..needed {
                let value = lab.capacity[index];
                if !(value > 0.0) {
                    return Err(InstanceError::NonPositiveCapacity {
                        laboratory: lab.id.clone(),
                        index,
                        value,
                    });
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(capacity: Vec<f64>) -> Instance {
        Instance {
            name: "tiny".to_string(),
            start_date: NaiveDate::from_ymd_opt(2020, 3, 9).unwrap(),
            pandemic_duration: 2,
            test_centers: vec![TestCenter {
                id: "tc".to_string(),
                demand: vec![10.0, 10.0],
                incidence: vec![0.0, 0.0],
                distance: vec![5.0],
                default_laboratory: 0,
            }],
            laboratories: vec![Laboratory {
                id: "lab".to_string(),
                capacity,
                nominal_capacity: 100.0,
            }],
        }
    }

    #[test]
    fn test_validate_accepts_full_horizon() {
        let inst = instance(vec![100.0; 5]);
        assert_eq!(inst.required_capacity_len(2), 5);
        assert!(inst.validate(2).is_ok());
    }

    #[test]
    fn test_validate_rejects_short_capacity() {
        let inst = instance(vec![100.0; 4]);
        assert_eq!(
            inst.validate(2),
            Err(InstanceError::ShortCapacity {
                laboratory: "lab".to_string(),
                len: 4,
                needed: 5,
            })
        );
    }

    #[test]
    fn test_validate_rejects_zero_capacity_in_overload_bound() {
        // index 2 is read as Cap_t[t + tau_max + 1] for t = 0, tau_max = 1
        let inst = instance(vec![0.0, 100.0, 0.0, 100.0]);
        assert!(matches!(
            inst.validate(1),
            Err(InstanceError::NonPositiveCapacity { index: 2, .. })
        ));
    }

    #[test]
    fn test_validate_rejects_bad_default() {
        let mut inst = instance(vec![100.0; 5]);
        inst.test_centers[0].default_laboratory = 3;
        assert!(matches!(
            inst.validate(2),
            Err(InstanceError::DefaultOutOfRange { index: 3, .. })
        ));
    }

    #[test]
    fn test_date_of_period() {
        let inst = instance(vec![100.0; 5]);
        assert_eq!(inst.date_of(3), NaiveDate::from_ymd_opt(2020, 3, 12).unwrap());
    }
}
