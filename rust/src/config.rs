//! Configuration types for the rolling horizon run.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while validating or loading a run configuration.
///
/// All of these are fatal before the first period is processed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("tau_max must be at least 1, got {0}")]
    InvalidLookahead(usize),
    #[error("{name} must be finite and non-negative, got {value}")]
    InvalidParameter { name: &'static str, value: f64 },
    #[error("mip_gap must lie in [0, 1), got {0}")]
    InvalidGap(f64),
    #[error("criticality strategy '{0}' requires an indicator source, none was supplied")]
    MissingIndicator(String),
    #[error("Unknown criticality strategy: {0}")]
    UnknownStrategy(String),
    #[error("Malformed configuration: {0}")]
    Malformed(String),
}

/// Source-axis criticality strategy, selected once for the whole run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SourceStrategy {
    #[default]
    #[serde(rename = "all-zeroes")]
    AllZeroes,
    #[serde(rename = "incidences")]
    Incidences,
    #[serde(rename = "workload")]
    Workload,
    /// Daily reproduction number from the indicator source.
    #[serde(rename = "R_values")]
    RValues,
    /// Seven-day reproduction number from the indicator source.
    #[serde(rename = "R7_values")]
    R7Values,
}

impl SourceStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AllZeroes => "all-zeroes",
            Self::Incidences => "incidences",
            Self::Workload => "workload",
            Self::RValues => "R_values",
            Self::R7Values => "R7_values",
        }
    }
}

impl std::str::FromStr for SourceStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all-zeroes" => Ok(Self::AllZeroes),
            "incidences" => Ok(Self::Incidences),
            "workload" => Ok(Self::Workload),
            "R_values" => Ok(Self::RValues),
            "R7_values" => Ok(Self::R7Values),
            other => Err(ConfigError::UnknownStrategy(other.to_string())),
        }
    }
}

/// Resource-axis criticality strategy, selected once for the whole run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ResourceStrategy {
    #[default]
    #[serde(rename = "all-zeroes")]
    AllZeroes,
    #[serde(rename = "incidences")]
    Incidences,
    #[serde(rename = "workload")]
    Workload,
}

impl ResourceStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AllZeroes => "all-zeroes",
            Self::Incidences => "incidences",
            Self::Workload => "workload",
        }
    }
}

impl std::str::FromStr for ResourceStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all-zeroes" => Ok(Self::AllZeroes),
            "incidences" => Ok(Self::Incidences),
            "workload" => Ok(Self::Workload),
            other => Err(ConfigError::UnknownStrategy(other.to_string())),
        }
    }
}

/// Thresholds used by the criticality strategies. A flag is set when the
/// observed signal is strictly greater than its threshold.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CriticalityThresholds {
    /// Weekly incidence above which a test center is critical
    pub source_incidence: f64,
    /// Demand growth ratio (today / yesterday) above which a test center is critical
    pub source_workload: f64,
    /// Reproduction number above which a test center is critical
    pub indicator: f64,
    /// Indicator values above this are treated as implausible and ignored
    pub indicator_plausible_max: f64,
    /// Demand-weighted incidence of routed sources above which a laboratory is critical
    pub resource_incidence: f64,
    /// Residual next-day capacity over nominal capacity above which a laboratory is critical
    pub resource_workload: f64,
}

impl Default for CriticalityThresholds {
    fn default() -> Self {
        Self {
            source_incidence: 100.0,
            source_workload: 1.5,
            indicator: 1.5,
            indicator_plausible_max: 5.0,
            resource_incidence: 100.0,
            resource_workload: 0.8,
        }
    }
}

/// Tunable parameters of one rolling horizon run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Lookahead length in periods (target processing time in days)
    pub tau_max: usize,
    /// Maximum regular assignment distance `C`
    pub max_distance: f64,
    /// Maximum extension of the assignment distance for critical sources `Mc`
    pub distance_relaxation: f64,
    /// Penalty weight `theta` for demand routed away from its default laboratory
    pub reassignment_weight: f64,
    /// Penalty weight `eta` for the maximum relative backlog
    pub backlog_weight: f64,
    /// Relative optimality gap handed to the optimizer
    pub mip_gap: f64,
    pub source_strategy: SourceStrategy,
    pub resource_strategy: ResourceStrategy,
    pub thresholds: CriticalityThresholds,
    /// Verbosity level: 0=silent, 1=changes, 2=checks, 3=debug.
    pub verbosity: u8,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            tau_max: 2,
            max_distance: 150.0,
            distance_relaxation: 150.0,
            reassignment_weight: 0.001,
            backlog_weight: 1.0,
            mip_gap: 0.01,
            source_strategy: SourceStrategy::AllZeroes,
            resource_strategy: ResourceStrategy::AllZeroes,
            thresholds: CriticalityThresholds::default(),
            verbosity: 0,
        }
    }
}

impl RunConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Malformed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every parameter before any period is processed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tau_max < 1 {
            return Err(ConfigError::InvalidLookahead(self.tau_max));
        }

        let params = [
            ("max_distance", self.max_distance),
            ("distance_relaxation", self.distance_relaxation),
            ("reassignment_weight", self.reassignment_weight),
            ("backlog_weight", self.backlog_weight),
        ];
        for (name, value) in params {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidParameter { name, value });
            }
        }

        if !(0.0..1.0).contains(&self.mip_gap) {
            return Err(ConfigError::InvalidGap(self.mip_gap));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RunConfig::default();
        assert_eq!(config.tau_max, 2);
        assert_eq!(config.max_distance, 150.0);
        assert_eq!(config.source_strategy, SourceStrategy::AllZeroes);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_lookahead_rejected() {
        let config = RunConfig {
            tau_max: 0,
            ..RunConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::InvalidLookahead(0)));
    }

    #[test]
    fn test_negative_weight_rejected() {
        let config = RunConfig {
            backlog_weight: -1.0,
            ..RunConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidParameter {
                name: "backlog_weight",
                ..
            })
        ));
    }

    #[test]
    fn test_gap_out_of_range_rejected() {
        let config = RunConfig {
            mip_gap: 1.0,
            ..RunConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::InvalidGap(1.0)));
    }

    #[test]
    fn test_from_json_parses_strategy_names() {
        let config = RunConfig::from_json(
            r#"{"tau_max": 3, "source_strategy": "R7_values", "resource_strategy": "workload"}"#,
        )
        .unwrap();
        assert_eq!(config.tau_max, 3);
        assert_eq!(config.source_strategy, SourceStrategy::R7Values);
        assert_eq!(config.resource_strategy, ResourceStrategy::Workload);
        assert_eq!(config.backlog_weight, 1.0);
    }

    #[test]
    fn test_from_json_rejects_unknown_strategy() {
        let result = RunConfig::from_json(r#"{"source_strategy": "vibes"}"#);
        assert!(matches!(result, Err(ConfigError::Malformed(_))));
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!("workload".parse::<SourceStrategy>(), Ok(SourceStrategy::Workload));
        assert_eq!("R_values".parse::<SourceStrategy>(), Ok(SourceStrategy::RValues));
        assert_eq!(
            "R_values".parse::<ResourceStrategy>(),
            Err(ConfigError::UnknownStrategy("R_values".to_string()))
        );
    }
}
