use crate::cache::ParamValue;
use crate::calibration::types::FreeParameter;
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// CMA-ES specific configuration parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CmaEsConfig {
    /// Random seed for reproducibility
    pub seed: Option<u64>,
    /// Whether to evaluate the population in parallel
    pub parallel_eval: bool,
    /// Verbosity level (0=silent, 1=minimal, 2=normal)
    pub verbosity: u8,
    /// Number of IPOP restarts (0 = no IPOP)
    pub ipop_restarts: usize,
    /// Factor to increase population size in IPOP restarts
    pub ipop_increase_factor: f64,
    /// Max function evaluations per run (0=unlimited)
    pub max_evaluations: usize,
    /// Initial coordinate-wise standard deviation
    pub sigma0: f64,
    /// Number of BIPOP restarts (0 = no BIPOP)
    pub bipop_restarts: usize,
    /// Enable L-BFGS-B refinement after CMA-ES?
    pub lbfgsb_enabled: bool,
    /// Max iterations for L-BFGS-B
    pub lbfgsb_max_iterations: usize,
    /// Total function evaluations budget
    pub total_evals_budget: usize,
    /// Whether to use advanced sub-run budgeting logic
    pub use_subrun_budgeting: bool,
    /// Use mini CMA-ES on refinement
    pub mini_cmaes_on_refinement: bool,
}

impl Default for CmaEsConfig {
    fn default() -> Self {
        Self {
            seed: Some(123456),
            parallel_eval: true,
            verbosity: 0, // Silent by default for library use
            ipop_restarts: 0,
            ipop_increase_factor: 2.0,
            max_evaluations: 100000,
            sigma0: 0.3,
            bipop_restarts: 5,
            lbfgsb_enabled: true,
            lbfgsb_max_iterations: 200,
            total_evals_budget: 200000,
            use_subrun_budgeting: false,
            mini_cmaes_on_refinement: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdaptiveBoundsConfig {
    pub enabled: bool,
    pub max_iterations: usize,
    pub proximity_threshold: f64,
    pub expansion_factor: f64,
}

impl Default for AdaptiveBoundsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_iterations: 3,
            proximity_threshold: 0.1, // 10% from edge
            expansion_factor: 0.25,   // expand by 25%
        }
    }
}

/// Main configuration struct for optimization
#[derive(Debug, Deserialize, Clone)]
pub struct OptimizationConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    #[serde(default = "default_tolerance")]
    pub tolerance: f64,

    /// Population size for genetic algorithms
    #[serde(default = "default_pop_size")]
    pub pop_size: usize,

    /// Maximum generations for evolutionary algorithms
    #[serde(default = "default_max_gen")]
    pub max_gen: usize,

    /// Objective tolerance
    #[serde(default = "default_obj_tol")]
    pub obj_tol: f64,

    /// Covariance matrix adaptation parameter
    #[serde(default = "default_alpha_cov")]
    pub alpha_cov: f64,

    /// Step size adaptation parameter
    #[serde(default = "default_alpha_sigma")]
    pub alpha_sigma: f64,

    /// Target success rate
    #[serde(default = "default_target_sr")]
    pub target_sr: f64,

    /// CMA-ES specific configuration
    #[serde(default)]
    pub cmaes: CmaEsConfig,

    /// Adaptive bounds configuration
    #[serde(default)]
    pub adaptive_bounds: AdaptiveBoundsConfig,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            tolerance: default_tolerance(),
            pop_size: default_pop_size(),
            max_gen: default_max_gen(),
            obj_tol: default_obj_tol(),
            alpha_cov: default_alpha_cov(),
            alpha_sigma: default_alpha_sigma(),
            target_sr: default_target_sr(),
            cmaes: CmaEsConfig::default(),
            adaptive_bounds: AdaptiveBoundsConfig::default(),
        }
    }
}

impl OptimizationConfig {
    /// Default configuration for production calibration with high accuracy
    pub fn production() -> Self {
        Self {
            max_iterations: 1000,
            tolerance: 1e-8,
            pop_size: 25,
            max_gen: 50,
            obj_tol: 1e-8,
            alpha_cov: 0.2,
            alpha_sigma: 0.5,
            target_sr: 0.2,
            cmaes: CmaEsConfig {
                verbosity: 0,
                max_evaluations: 100000,
                total_evals_budget: 200000,
                ..CmaEsConfig::default()
            },
            adaptive_bounds: AdaptiveBoundsConfig::default(),
        }
    }

    /// Fast configuration for development and testing
    pub fn fast() -> Self {
        Self {
            max_iterations: 1000,
            tolerance: 1e-6,
            pop_size: 30,
            max_gen: 50,
            obj_tol: 1e-6,
            alpha_cov: 0.2,
            alpha_sigma: 0.5,
            target_sr: 0.2,
            cmaes: CmaEsConfig {
                verbosity: 2,
                max_evaluations: 10000,
                total_evals_budget: 20000,
                bipop_restarts: 2,
                ..CmaEsConfig::default()
            },
            adaptive_bounds: AdaptiveBoundsConfig::default(),
        }
    }

    /// High-precision configuration for research and backtesting
    pub fn research() -> Self {
        Self {
            max_iterations: 10000,
            tolerance: 1e-9,
            pop_size: 100,
            max_gen: 200,
            obj_tol: 1e-9,
            alpha_cov: 0.15,
            alpha_sigma: 0.3,
            target_sr: 0.15,
            cmaes: CmaEsConfig {
                verbosity: 1,
                max_evaluations: 500000,
                total_evals_budget: 1000000,
                bipop_restarts: 5,
                ipop_restarts: 3,
                ..CmaEsConfig::default()
            },
            adaptive_bounds: AdaptiveBoundsConfig::default(),
        }
    }

    /// Minimal configuration for quick validation and debugging
    pub fn minimal() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-4,
            pop_size: 10,
            max_gen: 20,
            obj_tol: 1e-4,
            alpha_cov: 0.3,
            alpha_sigma: 0.7,
            target_sr: 0.3,
            cmaes: CmaEsConfig {
                verbosity: 0,
                max_evaluations: 1000,
                total_evals_budget: 2000,
                bipop_restarts: 1,
                ..CmaEsConfig::default()
            },
            adaptive_bounds: AdaptiveBoundsConfig::default(),
        }
    }
}

impl OptimizationConfig {
    /// Look up one of the named presets.
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "production" => Some(Self::production()),
            "fast" => Some(Self::fast()),
            "research" => Some(Self::research()),
            "minimal" => Some(Self::minimal()),
            _ => None,
        }
    }
}

fn default_max_iterations() -> usize {
    5000
}

fn default_tolerance() -> f64 {
    1e-6
}

fn default_pop_size() -> usize {
    50
}

fn default_max_gen() -> usize {
    100
}

fn default_obj_tol() -> f64 {
    1e-8
}

fn default_alpha_cov() -> f64 {
    0.2
}

fn default_alpha_sigma() -> f64 {
    0.5
}

fn default_target_sr() -> f64 {
    0.2
}

// ------------------------------------------------------------------------------------------------
// Fit configuration file
// ------------------------------------------------------------------------------------------------

/// What to fit.
#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    /// Framework name (see `HaloModel::NAMES`)
    #[serde(default = "default_framework")]
    pub framework: String,
    /// Quantity compared against the data
    pub quantity: String,
    /// Extra quantities to report at the best fit
    #[serde(default)]
    pub derived: Vec<String>,
    /// Whether model curves may be extrapolated beyond their grid
    #[serde(default)]
    pub allow_extrapolation: bool,
    /// Optimizer preset used when no `[optimizer]` table is given
    #[serde(default = "default_preset")]
    pub preset: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataConfig {
    /// CSV file with `x,y,sigma` columns, relative to the config file
    pub path: PathBuf,
}

/// A complete fit description, usually read from TOML:
///
/// ```toml
/// [run]
/// framework = "MassFunctionWdm"
/// quantity = "dndlog10m"
/// derived = ["m_hm"]
///
/// [data]
/// path = "hmf.csv"
///
/// [model]
/// dlog10m = 0.05
/// wdm_transfer = "Viel05"
///
/// [[free]]
/// name = "wdm_mass"
/// bounds = [0.5, 10.0]
/// guess = 2.0
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct FitConfig {
    pub run: RunConfig,
    pub data: DataConfig,
    /// Fixed framework parameters
    #[serde(default)]
    pub model: BTreeMap<String, ParamValue>,
    pub free: Vec<FreeParameter>,
    #[serde(default)]
    pub optimizer: Option<OptimizationConfig>,
}

impl FitConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: FitConfig = toml::from_str(text).context("parsing fit configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Read a config file; a relative data path is resolved against the file's directory.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let mut config = Self::from_toml_str(&text)
            .with_context(|| format!("loading {}", path.display()))?;
        if config.data.path.is_relative() {
            if let Some(dir) = path.parent() {
                config.data.path = dir.join(&config.data.path);
            }
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.free.is_empty() {
            return Err(anyhow!("at least one [[free]] parameter is required"));
        }
        for p in &self.free {
            let (lo, hi) = p.bounds;
            if !(lo < hi) || !lo.is_finite() || !hi.is_finite() {
                return Err(anyhow!("free parameter `{}` has invalid bounds ({lo}, {hi})", p.name));
            }
            if let Some(g) = p.guess {
                if g < lo || g > hi {
                    return Err(anyhow!(
                        "guess {g} for `{}` lies outside its bounds ({lo}, {hi})",
                        p.name
                    ));
                }
            }
            if self.model.contains_key(&p.name) {
                return Err(anyhow!(
                    "`{}` is both fixed in [model] and listed as free",
                    p.name
                ));
            }
        }
        if self.optimizer.is_none() && OptimizationConfig::preset(&self.run.preset).is_none() {
            return Err(anyhow!("unknown optimizer preset `{}`", self.run.preset));
        }
        Ok(())
    }

    /// Explicit `[optimizer]` table, or the named preset.
    pub fn optimization(&self) -> OptimizationConfig {
        self.optimizer
            .clone()
            .or_else(|| OptimizationConfig::preset(&self.run.preset))
            .unwrap_or_default()
    }

    /// Starting point when every free parameter carries a guess.
    pub fn initial_guess(&self) -> Option<Vec<f64>> {
        self.free.iter().map(|p| p.guess).collect()
    }
}

fn default_framework() -> String {
    "MassFunctionWdm".to_string()
}

fn default_preset() -> String {
    "production".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
[run]
quantity = "dndlog10m"
derived = ["m_hm", "lam_hm"]
preset = "fast"

[data]
path = "hmf.csv"

[model]
dlog10m = 0.05
wdm_transfer = "Viel05"
wdm_alter = true
wdm_params = { mu = 1.2 }
mmin = 8

[[free]]
name = "wdm_mass"
bounds = [0.5, 10.0]
guess = 2.0
"#;

    #[test]
    fn test_parse_fit_config() {
        let config = FitConfig::from_toml_str(CONFIG).unwrap();
        assert_eq!(config.run.framework, "MassFunctionWdm");
        assert_eq!(config.run.derived, vec!["m_hm", "lam_hm"]);
        assert_eq!(config.model["dlog10m"], ParamValue::Float(0.05));
        assert_eq!(config.model["mmin"], ParamValue::Float(8.0));
        assert_eq!(config.model["wdm_alter"], ParamValue::Bool(true));
        assert_eq!(config.model["wdm_transfer"], ParamValue::Text("Viel05".into()));
        assert_eq!(config.model["wdm_params"].as_map().unwrap()["mu"], 1.2);
        assert_eq!(config.free[0].bounds, (0.5, 10.0));
        assert_eq!(config.initial_guess(), Some(vec![2.0]));
        assert_eq!(config.optimization().cmaes.verbosity, 2);
    }

    #[test]
    fn test_partial_optimizer_table_uses_defaults() {
        let text = format!("{CONFIG}
[optimizer]
tolerance = 1e-5
[optimizer.cmaes]
seed = 7
");
        let config = FitConfig::from_toml_str(&text).unwrap();
        let opt = config.optimization();
        assert_eq!(opt.tolerance, 1e-5);
        assert_eq!(opt.cmaes.seed, Some(7));
        assert_eq!(opt.cmaes.bipop_restarts, CmaEsConfig::default().bipop_restarts);
    }

    #[test]
    fn test_rejects_bad_configs() {
        let no_free = CONFIG.split("[[free]]").next().unwrap();
        assert!(FitConfig::from_toml_str(no_free).is_err());

        let bad_bounds = CONFIG.replace("[0.5, 10.0]", "[10.0, 0.5]");
        assert!(FitConfig::from_toml_str(&bad_bounds).is_err());

        let bad_guess = CONFIG.replace("guess = 2.0", "guess = 20.0");
        assert!(FitConfig::from_toml_str(&bad_guess).is_err());

        let bad_preset = CONFIG.replace("preset = \"fast\"", "preset = \"turbo\"");
        assert!(FitConfig::from_toml_str(&bad_preset).is_err());
    }

    #[test]
    fn test_presets() {
        for name in ["production", "fast", "research", "minimal"] {
            assert!(OptimizationConfig::preset(name).is_some());
        }
        let minimal = OptimizationConfig::minimal();
        let production = OptimizationConfig::production();
        assert!(minimal.cmaes.total_evals_budget < production.cmaes.total_evals_budget);
    }
}
