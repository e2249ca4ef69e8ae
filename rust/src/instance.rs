//! Instance assembly from raw test center and laboratory records.
//!
//! Reading the raw files is left to callers. This module does the two
//! derived computations an instance needs before a run: the default
//! (closest) laboratory of every test center, and the rescaling of the
//! national capacity curve onto laboratories in proportion to how many test
//! centers default to them.

use chrono::NaiveDate;
use rand::Rng;

use crate::models::{Instance, InstanceError, Laboratory, TestCenter};

/// A test center before its default laboratory is known.
#[derive(Clone, Debug)]
pub struct RawTestCenter {
    pub id: String,
    pub demand: Vec<f64>,
    pub incidence: Vec<f64>,
    pub distance: Vec<f64>,
}

/// A laboratory with its unscaled capacity curve.
#[derive(Clone, Debug)]
pub struct RawLaboratory {
    pub id: String,
    pub capacity: Vec<f64>,
    pub nominal_capacity: f64,
}

/// Builder for an [`Instance`].
#[derive(Clone, Debug)]
pub struct InstanceBuilder {
    name: String,
    start_date: NaiveDate,
    pandemic_duration: usize,
    test_centers: Vec<RawTestCenter>,
    laboratories: Vec<RawLaboratory>,
}

impl InstanceBuilder {
    pub fn new(name: impl Into<String>, start_date: NaiveDate, pandemic_duration: usize) -> Self {
        Self {
            name: name.into(),
            start_date,
            pandemic_duration,
            test_centers: Vec::new(),
            laboratories: Vec::new(),
        }
    }

    pub fn test_center(mut self, center: RawTestCenter) -> Self {
        self.test_centers.push(center);
        self
    }

    pub fn laboratory(mut self, laboratory: RawLaboratory) -> Self {
        self.laboratories.push(laboratory);
        self
    }

    /// Assign default laboratories, rescale capacity and validate for `tau_max`.
    ///
    /// The RNG only breaks ties between equally close laboratories, so a
    /// fixed seed gives a reproducible instance.
    pub fn build<R: Rng>(self, rng: &mut R, tau_max: usize) -> Result<Instance, InstanceError> {
        if self.laboratories.is_empty() {
            return Err(InstanceError::Empty("laboratories"));
        }

        let mut test_centers = Vec::with_capacity(self.test_centers.len());
        for raw in self.test_centers {
            if raw.distance.len() != self.laboratories.len() {
                return Err(InstanceError::DistanceMismatch {
                    center: raw.id,
                    len: raw.distance.len(),
                    laboratories: self.laboratories.len(),
                });
            }
            let default_laboratory = closest_laboratory(&raw.distance, rng);
            test_centers.push(TestCenter {
                id: raw.id,
                demand: raw.demand,
                incidence: raw.incidence,
                distance: raw.distance,
                default_laboratory,
            });
        }

        let capacities = scale_capacity(
            &self.laboratories,
            &test_centers,
            self.pandemic_duration,
            tau_max,
        )?;
        let laboratories = self
            .laboratories
            .into_iter()
            .zip(capacities)
            .map(|(raw, capacity)| Laboratory {
                id: raw.id,
                capacity,
                nominal_capacity: raw.nominal_capacity,
            })
            .collect();

        let instance = Instance {
            name: self.name,
            start_date: self.start_date,
            pandemic_duration: self.pandemic_duration,
            test_centers,
            laboratories,
        };
        instance.validate(tau_max)?;
        Ok(instance)
    }
}

/// Index of the minimum-distance laboratory, ties broken uniformly at random.
pub fn closest_laboratory<R: Rng>(distance: &[f64], rng: &mut R) -> usize {
    let min = distance.iter().copied().fold(f64::INFINITY, f64::min);
    let tied: Vec<usize> = distance
        .iter()
        .enumerate()
        .filter(|(_, c)| **c == min)
        .map(|(j, _)| j)
        .collect();

    match tied.len() {
        0 => 0,
        1 => tied[0],
        n => tied[rng.random_range(0..n)],
    }
}

/// Rescale laboratory capacity so each period's total is shared in
/// proportion to `1 + #test centers defaulting to the laboratory`.
///
/// Returned series have `pandemic_duration + tau_max + 1` entries; periods
/// past the run repeat the last in-run value.
pub fn scale_capacity(
    laboratories: &[RawLaboratory],
    test_centers: &[TestCenter],
    pandemic_duration: usize,
    tau_max: usize,
) -> Result<Vec<Vec<f64>>, InstanceError> {
    for lab in laboratories {
        if lab.capacity.len() < pandemic_duration {
            return Err(InstanceError::ShortCapacity {
                laboratory: lab.id.clone(),
                len: lab.capacity.len(),
                needed: pandemic_duration,
            });
        }
    }

    let shares: Vec<f64> = (0..laboratories.len())
        .map(|j| 1.0 + test_centers.iter().filter(|tc| tc.is_default(j)).count() as f64)
        .collect();
    let total_shares: f64 = shares.iter().sum();

    let horizon = pandemic_duration + tau_max + 1;
    let mut scaled = vec![Vec::with_capacity(horizon); laboratories.len()];
    for t in 0..pandemic_duration {
        let total: f64 = laboratories.iter().map(|lab| lab.capacity[t]).sum();
        let unit = total / total_shares;
        for (j, series) in scaled.iter_mut().enumerate() {
            series.push((unit * shares[j]).floor());
        }
    }
    for series in &mut scaled {
        let last = series.last().copied().unwrap_or(0.0);
        series.resize(horizon, last);
    }

    Ok(scaled)
}
