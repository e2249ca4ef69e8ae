//! Python bindings.

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use std::sync::Arc;

use crate::config::RunConfig;
use crate::horizon;
use crate::models::Instance;
use crate::signal::{IndicatorSource, IndicatorTable};

fn install_subscriber(verbosity: u8) {
    let level = match verbosity {
        0 => return,
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    // A subscriber may already be installed by an earlier call.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(level))
        .try_init();
}

/// Run the rolling horizon allocation and return the ledger report as JSON.
///
/// # Arguments
/// * `instance_json` - Serialized instance with default laboratories and scaled capacity
/// * `config_json` - Run configuration; missing fields take their defaults
/// * `indicator_json` - `{test_center: {date: value}}` for the R_values/R7_values strategies
///
/// # Raises
/// * ValueError on malformed input or when a period is infeasible
#[pyfunction]
#[pyo3(signature = (instance_json, config_json=None, indicator_json=None))]
fn run_online_procedure(
    instance_json: &str,
    config_json: Option<&str>,
    indicator_json: Option<&str>,
) -> PyResult<String> {
    let instance: Instance =
        serde_json::from_str(instance_json).map_err(|e| PyValueError::new_err(e.to_string()))?;
    let config = match config_json {
        Some(json) => RunConfig::from_json(json),
        None => Ok(RunConfig::default()),
    }
    .map_err(|e| PyValueError::new_err(e.to_string()))?;
    let indicator = indicator_json
        .map(IndicatorTable::from_json)
        .transpose()
        .map_err(|e| PyValueError::new_err(e.to_string()))?
        .map(|table| Arc::new(table) as Arc<dyn IndicatorSource>);

    install_subscriber(config.verbosity);

    let ledger = horizon::run_online_procedure(&instance, config, indicator)
        .map_err(|e| PyValueError::new_err(e.to_string()))?;
    ledger
        .to_json()
        .map_err(|e| PyValueError::new_err(e.to_string()))
}

/// The labroute Python module.
#[pymodule]
fn labroute(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(run_online_procedure, m)?)?;
    Ok(())
}
