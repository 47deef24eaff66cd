use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;
use std::path::Path;

/// Measurements of one quantity: value `y` with 1-sigma error `sigma` at each `x`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObservedData {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub sigma: Vec<f64>,
}

/// CSV row with `x,y,sigma` columns
#[derive(Debug, Deserialize)]
struct CsvRow {
    x: f64,
    y: f64,
    sigma: f64,
}

impl ObservedData {
    pub fn new(x: Vec<f64>, y: Vec<f64>, sigma: Vec<f64>) -> Result<Self> {
        if x.is_empty() {
            return Err(anyhow!("observed data must contain at least one point"));
        }
        if x.len() != y.len() || x.len() != sigma.len() {
            return Err(anyhow!(
                "observed data columns differ in length: x={}, y={}, sigma={}",
                x.len(),
                y.len(),
                sigma.len()
            ));
        }
        if let Some((i, s)) = sigma
            .iter()
            .enumerate()
            .find(|(_, s)| !(**s > 0.0) || !s.is_finite())
        {
            return Err(anyhow!("sigma must be positive and finite (row {i}: {s})"));
        }
        if let Some(i) = x.iter().chain(&y).position(|v| !v.is_finite()) {
            return Err(anyhow!("observed data contains a non-finite value (entry {i})"));
        }
        Ok(Self { x, y, sigma })
    }

    /// Load `x,y,sigma` rows from a CSV file with a header line.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("opening data file {}", path.display()))?;
        let (mut x, mut y, mut sigma) = (Vec::new(), Vec::new(), Vec::new());
        for result in reader.deserialize() {
            let row: CsvRow = result.with_context(|| format!("reading {}", path.display()))?;
            x.push(row.x);
            y.push(row.y);
            sigma.push(row.sigma);
        }
        Self::new(x, y, sigma).with_context(|| format!("validating {}", path.display()))
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }
}

/// A parameter varied by the optimizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreeParameter {
    /// Framework parameter name (e.g. `wdm_mass`)
    pub name: String,
    /// Search interval
    pub bounds: (f64, f64),
    /// Optional starting point for a local search
    #[serde(default)]
    pub guess: Option<f64>,
}

impl FreeParameter {
    pub fn new(name: &str, bounds: (f64, f64)) -> Self {
        Self {
            name: name.to_string(),
            bounds,
            guess: None,
        }
    }

    pub fn with_guess(mut self, guess: f64) -> Self {
        self.guess = Some(guess);
        self
    }
}

/// Model calibrator trait for parameter optimization
pub trait ModelCalibrator: Send + Sync {
    /// Returns the name of the model (e.g., "MassFunctionWdm")
    fn model_name(&self) -> &str;

    /// How many parameters are in the model's optimization vector
    fn param_count(&self) -> usize;

    /// Returns the vector of (min, max) bounds for each parameter
    fn param_bounds(&self) -> &[(f64, f64)];

    /// Given a parameter vector `x` and data, returns the objective value
    fn evaluate_objective(&self, x: &[f64], data: &ObservedData) -> f64;

    /// Model values at the data abscissae for the given parameters
    fn predict(&self, x: &[f64], data: &ObservedData) -> Result<Vec<f64>>;

    /// Returns parameter names in the order they appear in the optimization vector
    fn param_names(&self) -> Vec<&str>;

    /// Expand internal parameter bounds if parameters are near current bounds.
    /// Returns true if any bound was adjusted.
    fn expand_bounds_if_needed(
        &mut self,
        _params: &[f64],
        _proximity_threshold: f64,
        _expansion_factor: f64,
    ) -> bool {
        false
    }

    /// Support for downcasting
    fn as_any(&self) -> &dyn Any;
}

/// Outcome of a fit, or of evaluating a fixed parameter vector.
#[derive(Debug, Clone, Serialize)]
pub struct FitResult {
    /// Framework the quantity was read from
    pub framework: String,
    /// Fitted quantity
    pub quantity: String,
    /// Chi-square at `params`
    pub chi2: f64,
    pub params: Vec<f64>,
    pub param_names: Vec<String>,
    /// Bounds in force at the end of the fit (after any adaptive expansion)
    pub bounds: Vec<(f64, f64)>,
    /// Data points minus free parameters
    pub dof: usize,
    /// Chi-square survival probability; None without degrees of freedom
    pub p_value: Option<f64>,
    /// Model values at the data abscissae
    pub model: Vec<f64>,
    /// Requested derived quantities at `params`
    pub derived: BTreeMap<String, Vec<f64>>,
}

impl FitResult {
    pub fn param(&self, name: &str) -> Option<f64> {
        self.param_names
            .iter()
            .position(|n| n == name)
            .map(|i| self.params[i])
    }

    pub fn reduced_chi2(&self) -> Option<f64> {
        (self.dof > 0).then(|| self.chi2 / self.dof as f64)
    }
}
