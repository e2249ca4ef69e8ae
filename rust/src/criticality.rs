//! Criticality policies that relax default routing and the distance cap.
//!
//! One policy per axis is chosen at startup:
//! - test centers: `all-zeroes`, `incidences`, `workload`, `R_values`, `R7_values`
//! - laboratories: `all-zeroes`, `incidences`, `workload`
//!
//! Every policy is a pure function of the entity, the instance, the current
//! capacity state, the ledger and the period.

use std::sync::Arc;

use rayon::prelude::*;

use crate::config::{ConfigError, ResourceStrategy, RunConfig, SourceStrategy};
use crate::horizon::{CapacityState, Lag, Ledger};
use crate::models::Instance;
use crate::signal::{IndicatorSource, SignalReading};

/// Everything a policy may read when evaluating one period.
#[derive(Clone, Copy, Debug)]
pub struct CriticalityContext<'a> {
    pub instance: &'a Instance,
    pub capacity: &'a CapacityState,
    pub ledger: &'a Ledger,
    pub period: usize,
}

/// Single evaluation interface shared by both axes.
pub trait Criticality: Sync {
    /// Name the policy was selected by.
    fn name(&self) -> &'static str;

    /// Whether `entity` is critical in `ctx.period`.
    fn is_critical(&self, entity: usize, ctx: &CriticalityContext<'_>) -> bool;
}

/// Test center criticality.
#[derive(Clone, Debug)]
pub enum SourcePolicy {
    AllZeroes,
    /// Weekly incidence strictly above the threshold.
    Incidences { threshold: f64 },
    /// Demand growth versus the previous period strictly above the threshold.
    Workload { threshold: f64 },
    /// External indicator strictly above the threshold; implausible or
    /// missing values count as not critical.
    Indicator {
        strategy: SourceStrategy,
        source: Arc<dyn IndicatorSource>,
        threshold: f64,
        plausible_max: f64,
    },
}

impl SourcePolicy {
    pub fn from_config(
        config: &RunConfig,
        indicator: Option<Arc<dyn IndicatorSource>>,
    ) -> Result<Self, ConfigError> {
        let t = &config.thresholds;
        Ok(match config.source_strategy {
            SourceStrategy::AllZeroes => Self::AllZeroes,
            SourceStrategy::Incidences => Self::Incidences {
                threshold: t.source_incidence,
            },
            SourceStrategy::Workload => Self::Workload {
                threshold: t.source_workload,
            },
            strategy @ (SourceStrategy::RValues | SourceStrategy::R7Values) => {
                let source = indicator
                    .ok_or_else(|| ConfigError::MissingIndicator(strategy.name().to_string()))?;
                Self::Indicator {
                    strategy,
                    source,
                    threshold: t.indicator,
                    plausible_max: t.indicator_plausible_max,
                }
            }
        })
    }
}

impl Criticality for SourcePolicy {
    fn name(&self) -> &'static str {
        match self {
            Self::AllZeroes => SourceStrategy::AllZeroes.name(),
            Self::Incidences { .. } => SourceStrategy::Incidences.name(),
            Self::Workload { .. } => SourceStrategy::Workload.name(),
            Self::Indicator { strategy, .. } => strategy.name(),
        }
    }

    fn is_critical(&self, entity: usize, ctx: &CriticalityContext<'_>) -> bool {
        let tc = &ctx.instance.test_centers[entity];
        let t = ctx.period;
        match self {
            Self::AllZeroes => false,
            Self::Incidences { threshold } => tc.incidence[t] > *threshold,
            Self::Workload { threshold } => {
                if t == 0 || tc.demand[t - 1] <= 0.0 {
                    return false;
                }
                tc.demand[t] / tc.demand[t - 1] > *threshold
            }
            Self::Indicator {
                strategy,
                source,
                threshold,
                plausible_max,
            } => {
                let date = ctx.instance.date_of(t);
                match SignalReading::classify(source.lookup(&tc.id, date), *plausible_max) {
                    SignalReading::Plausible(value) => value > *threshold,
                    SignalReading::Implausible(value) => {
                        tracing::warn!(
                            test_center = %tc.id,
                            %date,
                            value,
                            plausible_max = *plausible_max,
                            "Criticality set to 0: {} value is dubious",
                            strategy.name()
                        );
                        false
                    }
                    SignalReading::Missing => {
                        tracing::warn!(
                            test_center = %tc.id,
                            %date,
                            "Criticality set to 0: no {} value",
                            strategy.name()
                        );
                        false
                    }
                }
            }
        }
    }
}

/// Laboratory criticality. Always 0 in period 0.
#[derive(Clone, Debug, PartialEq)]
pub enum ResourcePolicy {
    AllZeroes,
    /// Demand-weighted incidence of the test centers routed to the
    /// laboratory at lag 1 last period, strictly above the threshold.
    Incidences { threshold: f64 },
    /// Next-period residual window capacity over nominal capacity, strictly
    /// above the threshold.
    Workload { threshold: f64 },
}

impl ResourcePolicy {
    pub fn from_config(config: &RunConfig) -> Self {
        let t = &config.thresholds;
        match config.resource_strategy {
            ResourceStrategy::AllZeroes => Self::AllZeroes,
            ResourceStrategy::Incidences => Self::Incidences {
                threshold: t.resource_incidence,
            },
            ResourceStrategy::Workload => Self::Workload {
                threshold: t.resource_workload,
            },
        }
    }
}

impl Criticality for ResourcePolicy {
    fn name(&self) -> &'static str {
        match self {
            Self::AllZeroes => ResourceStrategy::AllZeroes.name(),
            Self::Incidences { .. } => ResourceStrategy::Incidences.name(),
            Self::Workload { .. } => ResourceStrategy::Workload.name(),
        }
    }

    fn is_critical(&self, entity: usize, ctx: &CriticalityContext<'_>) -> bool {
        if ctx.period == 0 {
            return false;
        }
        match self {
            Self::AllZeroes => false,
            Self::Incidences { threshold } => {
                let Some(previous) = ctx.ledger.entry(ctx.period - 1) else {
                    return false;
                };
                let prev = previous.period;
                let (weighted, demand) = previous
                    .routings
                    .iter()
                    .zip(&ctx.instance.test_centers)
                    .filter(|(r, _)| r.laboratory == entity && r.lag == Lag::Within(1))
                    .fold((0.0, 0.0), |(w, d), (_, tc)| {
                        (
                            w + tc.incidence[prev] * tc.demand[prev],
                            d + tc.demand[prev],
                        )
                    });
                demand > 0.0 && weighted / demand > *threshold
            }
            Self::Workload { threshold } => {
                let nominal = ctx.instance.laboratories[entity].nominal_capacity;
                if nominal <= 0.0 {
                    return false;
                }
                let next = ctx.capacity.window(entity).first().copied().unwrap_or(0.0);
                next / nominal > *threshold
            }
        }
    }
}

/// Flags used by one snapshot.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CriticalityFlags {
    pub sources: Vec<bool>,
    pub laboratories: Vec<bool>,
}

impl CriticalityFlags {
    /// All flags off.
    pub fn none(test_centers: usize, laboratories: usize) -> Self {
        Self {
            sources: vec![false; test_centers],
            laboratories: vec![false; laboratories],
        }
    }

    /// Evaluate both policies for every entity of the period.
    pub fn evaluate<S: Criticality, R: Criticality>(
        source_policy: &S,
        resource_policy: &R,
        ctx: &CriticalityContext<'_>,
    ) -> Self {
        let sources = (0..ctx.instance.test_centers.len())
            .into_par_iter()
            .map(|i| source_policy.is_critical(i, ctx))
            .collect();
        let laboratories = (0..ctx.instance.laboratories.len())
            .into_par_iter()
            .map(|j| resource_policy.is_critical(j, ctx))
            .collect();
        Self {
            sources,
            laboratories,
        }
    }

    /// `crit_I[i]` as a coefficient.
    #[inline]
    pub fn source(&self, i: usize) -> f64 {
        f64::from(u8::from(self.sources[i]))
    }

    /// `crit_J[j]` as a coefficient.
    #[inline]
    pub fn laboratory(&self, j: usize) -> f64 {
        f64::from(u8::from(self.laboratories[j]))
    }
}
