//! # wdm-hmf: Warm Dark Matter Halo Mass Functions
//!
//! `wdm-hmf` computes halo mass functions for warm dark matter (WDM) cosmologies by
//! suppressing the small-scale power of a cold dark matter (CDM) spectrum with a
//! particle-mass-dependent transfer function, and fits any named model quantity to
//! observational data.
//!
//! ## Core Features
//!
//! - **WDM models**: Viel et al. (2005) and Bode et al. (2001) transfer functions,
//!   free-streaming and half-mode scales, behind an open [`WdmModel`] trait
//! - **Layered frameworks**: [`TransferWdm`] wraps any transfer framework and
//!   [`MassFunctionWdm`] builds the mass function on top of it, with optional
//!   half-mode suppression (`wdm_alter`)
//! - **Lazy caching**: derived quantities are computed on first read and recomputed
//!   only when one of their declared dependencies changes
//! - **Calibration**: CMA-ES and L-BFGS-B minimisation of chi-square against
//!   `x,y,sigma` data, configured from TOML
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::collections::BTreeMap;
//! use wdm_hmf::{wdm_mass_function, ParamValue};
//!
//! let mut params = BTreeMap::new();
//! params.insert("wdm_mass".to_string(), ParamValue::Float(2.0));
//! params.insert("wdm_alter".to_string(), ParamValue::Bool(true));
//!
//! let (m, dndm) = wdm_mass_function(&params)?;
//! println!("{} masses, dn/dM at the first: {:.3e}", m.len(), dndm[0]);
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! ## Fitting
//!
//! ```rust,no_run
//! use wdm_hmf::{load_fit_config, run_fit_config};
//!
//! let (config, data) = load_fit_config("fit.toml")?;
//! let result = run_fit_config(&config, data)?;
//! println!("chi2 = {:.3} at {:?}", result.chi2, result.params);
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! ## Configuration Presets
//!
//! The library provides several optimization configuration presets:
//! - `production()`: High accuracy for final fits
//! - `fast()`: Balanced speed/accuracy for development
//! - `research()`: High-precision settings with IPOP restarts
//! - `minimal()`: Quick validation settings

// ================================================================================================
// MODULES
// ================================================================================================

pub mod cache;
pub mod calibration;
pub mod error;
pub mod model_params;
pub mod models;

// ================================================================================================
// IMPORTS
// ================================================================================================

use anyhow::{anyhow, Context, Result};
use std::collections::BTreeMap;
use std::path::Path;

use crate::calibration::calibrator::HaloModelCalibrator;
use crate::calibration::pipeline::CalibrationProcess;

// ================================================================================================
// PUBLIC RE-EXPORTS
// ================================================================================================

// Parameters, caching and errors
pub use cache::{ParamValue, Quantity, Stamp, VALUE_RTOL};
pub use error::{WdmError, WdmResult};
pub use model_params::ModelParams;

// Calibration types and configuration
pub use calibration::{
    config::{AdaptiveBoundsConfig, CmaEsConfig, FitConfig, OptimizationConfig},
    types::{FitResult, FreeParameter, ModelCalibrator, ObservedData},
};

// Frameworks and WDM models
pub use models::halo_model::HaloModel;
pub use models::hmf::{HmfFit, MassFunction, MassFunctionWdm};
pub use models::traits::{Framework, TransferFramework};
pub use models::transfer::{Transfer, TransferWdm};
pub use models::wdm::{Bode01, Viel05, WdmClass, WdmInputs, WdmModel, WdmRegistry, BODE01, VIEL05};

// ================================================================================================
// DEFAULT CONFIGURATIONS
// ================================================================================================

/// Pre-configured optimization settings for common use cases.
///
/// - [`production()`]: Thorough search for final results
/// - [`fast()`]: Development-optimized settings
/// - [`research()`]: High-precision settings
/// - [`minimal()`]: Quick validation settings
pub mod default_configs {
    use crate::calibration::config::OptimizationConfig;

    /// Thorough configuration for final fits.
    ///
    /// **Characteristics:**
    /// - Maximum iterations: 1,000
    /// - Convergence tolerance: 1e-8
    /// - Silent
    ///
    /// # Example
    ///
    /// ```rust
    /// use wdm_hmf::default_configs;
    ///
    /// let config = default_configs::production();
    /// assert_eq!(config.cmaes.verbosity, 0);
    /// ```
    pub fn production() -> OptimizationConfig {
        OptimizationConfig::production()
    }

    /// Fast configuration for development, with progress printed to stdout.
    ///
    /// **Characteristics:**
    /// - Evaluation budget: 20,000
    /// - Convergence tolerance: 1e-6
    /// - Two BIPOP restarts
    pub fn fast() -> OptimizationConfig {
        OptimizationConfig::fast()
    }

    /// High-precision configuration for research runs.
    ///
    /// **Characteristics:**
    /// - Maximum iterations: 10,000
    /// - Convergence tolerance: 1e-9
    /// - Extensive parameter exploration with IPOP and BIPOP restarts
    pub fn research() -> OptimizationConfig {
        OptimizationConfig::research()
    }

    /// Minimal configuration for quick validation, debugging and unit tests.
    pub fn minimal() -> OptimizationConfig {
        OptimizationConfig::minimal()
    }
}

/// What to fit: framework, fixed parameters, free parameters and quantity.
#[derive(Debug, Clone)]
pub struct FitParams {
    /// Framework name (see [`HaloModel::NAMES`])
    pub framework: String,
    /// Quantity compared against the data
    pub quantity: String,
    /// Fixed framework parameters
    pub model: BTreeMap<String, ParamValue>,
    /// Parameters varied by the optimizer
    pub free: Vec<FreeParameter>,
    /// Extra quantities to report at the best fit
    pub derived: Vec<String>,
    /// Whether model curves may be extrapolated beyond their grid
    pub allow_extrapolation: bool,
}

impl Default for FitParams {
    fn default() -> Self {
        Self {
            framework: "MassFunctionWdm".to_string(),
            quantity: "dndlog10m".to_string(),
            model: BTreeMap::new(),
            free: vec![FreeParameter::new("wdm_mass", (0.5, 10.0))],
            derived: Vec::new(),
            allow_extrapolation: false,
        }
    }
}

impl From<&FitConfig> for FitParams {
    fn from(config: &FitConfig) -> Self {
        Self {
            framework: config.run.framework.clone(),
            quantity: config.run.quantity.clone(),
            model: config.model.clone(),
            free: config.free.clone(),
            derived: config.run.derived.clone(),
            allow_extrapolation: config.run.allow_extrapolation,
        }
    }
}

impl FitParams {
    fn calibrator(&self) -> Result<HaloModelCalibrator> {
        let template = HaloModel::build(&self.framework, &self.model)
            .with_context(|| format!("building {} from the fixed parameters", self.framework))?;
        Ok(HaloModelCalibrator::new(template, &self.quantity, &self.free)?
            .with_extrapolation(self.allow_extrapolation))
    }

    /// Starting point when every free parameter carries a guess.
    pub fn initial_guess(&self) -> Option<Vec<f64>> {
        self.free.iter().map(|p| p.guess).collect()
    }
}

/// Fit `fit.quantity` to `data` by minimising chi-square over the free parameters.
///
/// The search runs CMA-ES inside the free-parameter bounds followed by L-BFGS-B
/// refinement; with `config.adaptive_bounds.enabled` the bounds are widened and the
/// search repeated while the optimum sits near an edge. Without an explicit
/// `initial_guess`, the free parameters' own guesses are used when all are present.
///
/// # Returns
///
/// A [`FitResult`] with the best parameters, chi-square, degrees of freedom, the
/// chi-square p-value, the model at the data abscissae and any requested derived
/// quantities.
///
/// # Errors
///
/// * Unknown framework, parameter or quantity names
/// * Fixed parameters the framework rejects
/// * A best fit that cannot be evaluated (e.g. data outside the model grid)
///
/// # Example
///
/// ```rust,no_run
/// use wdm_hmf::{default_configs, fit_quantity, FitParams, ObservedData};
///
/// let data = ObservedData::from_csv("hmf.csv")?;
/// let result = fit_quantity(data, default_configs::fast(), FitParams::default(), None)?;
/// println!("wdm_mass = {:.3} keV", result.param("wdm_mass").unwrap_or(f64::NAN));
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn fit_quantity(
    data: ObservedData,
    config: OptimizationConfig,
    fit: FitParams,
    initial_guess: Option<Vec<f64>>,
) -> Result<FitResult> {
    let calibrator = fit.calibrator()?;
    let initial_guess = initial_guess.or_else(|| fit.initial_guess());
    if let Some(ref guess) = initial_guess {
        if guess.len() != fit.free.len() {
            return Err(anyhow!(
                "initial guess has {} values for {} free parameters",
                guess.len(),
                fit.free.len()
            ));
        }
    }

    if config.cmaes.verbosity > 0 {
        println!(
            "Fitting {} of {} to {} points over [{}]",
            fit.quantity,
            fit.framework,
            data.len(),
            calibrator.param_names().join(", ")
        );
    }

    let mut process =
        CalibrationProcess::new(Box::new(calibrator.clone()), config.clone(), data.clone());
    if let Some(guess) = initial_guess {
        process = process.with_initial_guess(guess);
    }
    let (best_obj, best_params, bounds) = process.run();
    if best_params.len() != fit.free.len() {
        return Err(anyhow!("optimizer returned no solution"));
    }

    let result = calibrator.summarize(&best_params, bounds, &data, &fit.derived)?;
    if config.cmaes.verbosity > 0 {
        println!("Best chi2 = {:.6} (optimizer reported {:.6})", result.chi2, best_obj);
    }
    Ok(result)
}

/// Evaluate the fit statistics for a fixed parameter vector.
///
/// Produces exactly the chi-square that [`fit_quantity`] minimises, so callers can
/// check the quality of any parameter set without re-running the optimiser.
pub fn evaluate_fit(data: &ObservedData, fit: &FitParams, params: &[f64]) -> Result<FitResult> {
    let calibrator = fit.calibrator()?;
    let bounds = fit.free.iter().map(|p| p.bounds).collect();
    calibrator.summarize(params, bounds, data, &fit.derived)
}

/// Read a TOML fit description and the CSV data it points at.
pub fn load_fit_config<P: AsRef<Path>>(path: P) -> Result<(FitConfig, ObservedData)> {
    let config = FitConfig::from_file(path)?;
    let data = ObservedData::from_csv(&config.data.path)?;
    Ok((config, data))
}

/// Run the fit described by `config` against `data`.
pub fn run_fit_config(config: &FitConfig, data: ObservedData) -> Result<FitResult> {
    config.validate()?;
    fit_quantity(
        data,
        config.optimization(),
        FitParams::from(config),
        config.initial_guess(),
    )
}

/// Mass grid and differential mass function dn/dM of a WDM cosmology.
///
/// `params` may name any parameter of the WDM mass function or the layers below it,
/// e.g. `wdm_mass`, `wdm_alter`, `hmf_model`, `sigma_8` or `dlog10m`.
pub fn wdm_mass_function(params: &BTreeMap<String, ParamValue>) -> Result<(Vec<f64>, Vec<f64>)> {
    let mut mf = MassFunctionWdm::with_params(params)?;
    let m = mf.m()?;
    let dndm = mf.dndm()?;
    Ok((m.to_vec(), dndm.to_vec()))
}
