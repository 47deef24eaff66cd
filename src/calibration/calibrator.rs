// src/calibration/calibrator.rs

//! Chi-square calibrator for any named halo-model quantity
//!
//! Each objective evaluation clones a primed [`HaloModel`] template, applies
//! the candidate free parameters and reads the requested quantity. Caches that
//! do not depend on the free parameters were filled while priming, so every
//! clone only recomputes what the free parameters actually touch.
//!
//! Array quantities are interpolated onto the data abscissae (log-log where
//! everything is positive); scalar quantities are compared against every
//! data point.

use anyhow::{anyhow, Context, Result};
use statrs::distribution::{ChiSquared, ContinuousCDF};
use std::collections::BTreeMap;

use crate::cache::{ParamValue, Quantity};
use crate::calibration::types::{FitResult, FreeParameter, ModelCalibrator, ObservedData};
use crate::models::halo_model::HaloModel;
use crate::models::interp::interp_onto;
use crate::models::traits::Framework;

/// Objective value for parameter sets the model rejects.
pub const REJECTED: f64 = 1.0e12;

#[derive(Debug, Clone)]
pub struct HaloModelCalibrator {
    template: HaloModel,
    quantity: String,
    names: Vec<String>,
    param_bounds: Vec<(f64, f64)>,
    allow_extrapolation: bool,
}

fn chi_square(prediction: &[f64], data: &ObservedData) -> f64 {
    prediction
        .iter()
        .zip(&data.y)
        .zip(&data.sigma)
        .map(|((m, y), s)| ((m - y) / s).powi(2))
        .sum()
}

impl HaloModelCalibrator {
    /// Validate the free parameters against `template` and prime its caches.
    pub fn new(mut template: HaloModel, quantity: &str, free: &[FreeParameter]) -> Result<Self> {
        if free.is_empty() {
            return Err(anyhow!("no free parameters to calibrate"));
        }
        if !template.quantity_names().contains(&quantity) {
            return Err(anyhow!(
                "{} has no quantity `{quantity}` (available: {})",
                template.name(),
                template.quantity_names().join(", ")
            ));
        }
        for p in free {
            if template.parameter(&p.name).is_none() {
                return Err(anyhow!(
                    "{} has no parameter `{}`",
                    template.name(),
                    p.name
                ));
            }
            if !(p.bounds.0 < p.bounds.1) {
                return Err(anyhow!(
                    "free parameter `{}` has invalid bounds {:?}",
                    p.name,
                    p.bounds
                ));
            }
        }

        template
            .quantity(quantity)
            .with_context(|| format!("evaluating `{quantity}` at the fixed parameters"))?;

        Ok(Self {
            template,
            quantity: quantity.to_string(),
            names: free.iter().map(|p| p.name.clone()).collect(),
            param_bounds: free.iter().map(|p| p.bounds).collect(),
            allow_extrapolation: false,
        })
    }

    pub fn with_extrapolation(mut self, allow: bool) -> Self {
        self.allow_extrapolation = allow;
        self
    }

    pub fn quantity(&self) -> &str {
        &self.quantity
    }

    /// Fresh copy of the template with `x` applied to the free parameters.
    pub fn instantiate(&self, x: &[f64]) -> Result<HaloModel> {
        if x.len() != self.names.len() {
            return Err(anyhow!(
                "expected {} parameter values, got {}",
                self.names.len(),
                x.len()
            ));
        }
        let mut model = self.template.clone();
        for (name, value) in self.names.iter().zip(x) {
            model.set_parameter(name, ParamValue::Float(*value))?;
        }
        Ok(model)
    }

    fn predict_with(&self, model: &mut HaloModel, data: &ObservedData) -> Result<Vec<f64>> {
        match model.quantity(&self.quantity)? {
            Quantity::Scalar(v) => Ok(vec![v; data.len()]),
            Quantity::Array(values) => {
                let axis = model.axis(&self.quantity)?;
                interp_onto(&axis, &values, &data.x, self.allow_extrapolation).ok_or_else(|| {
                    anyhow!(
                        "`{}` cannot be interpolated onto the data (grid spans {:.3e}..{:.3e})",
                        self.quantity,
                        axis.first().copied().unwrap_or(f64::NAN),
                        axis.last().copied().unwrap_or(f64::NAN)
                    )
                })
            }
        }
    }

    /// Chi-square, failing on any model error.
    pub fn chi2(&self, x: &[f64], data: &ObservedData) -> Result<f64> {
        let prediction = self.predict(x, data)?;
        let chi2 = chi_square(&prediction, data);
        if !chi2.is_finite() {
            return Err(anyhow!("chi-square is not finite"));
        }
        Ok(chi2)
    }

    /// Summarise parameters `x` against `data`, evaluating `derived` quantities too.
    pub fn summarize(
        &self,
        x: &[f64],
        bounds: Vec<(f64, f64)>,
        data: &ObservedData,
        derived: &[String],
    ) -> Result<FitResult> {
        let mut model = self.instantiate(x)?;
        let prediction = self.predict_with(&mut model, data)?;
        let chi2 = chi_square(&prediction, data);

        let mut values = BTreeMap::new();
        for name in derived {
            let q = model
                .quantity(name)
                .with_context(|| format!("evaluating derived quantity `{name}`"))?;
            values.insert(name.clone(), q.to_vec());
        }

        let dof = data.len().saturating_sub(x.len());
        let p_value = if dof > 0 && chi2.is_finite() {
            ChiSquared::new(dof as f64)
                .ok()
                .map(|dist| (1.0 - dist.cdf(chi2)).max(0.0))
        } else {
            None
        };

        Ok(FitResult {
            framework: model.name().to_string(),
            quantity: self.quantity.clone(),
            chi2,
            params: x.to_vec(),
            param_names: self.names.clone(),
            bounds,
            dof,
            p_value,
            model: prediction,
            derived: values,
        })
    }
}

impl ModelCalibrator for HaloModelCalibrator {
    fn model_name(&self) -> &str {
        self.template.name()
    }

    fn param_count(&self) -> usize {
        self.param_bounds.len()
    }

    fn param_bounds(&self) -> &[(f64, f64)] {
        &self.param_bounds
    }

    fn evaluate_objective(&self, x: &[f64], data: &ObservedData) -> f64 {
        match self.chi2(x, data) {
            Ok(chi2) => chi2,
            Err(_) => REJECTED,
        }
    }

    fn predict(&self, x: &[f64], data: &ObservedData) -> Result<Vec<f64>> {
        let mut model = self.instantiate(x)?;
        self.predict_with(&mut model, data)
    }

    fn param_names(&self) -> Vec<&str> {
        self.names.iter().map(String::as_str).collect()
    }

    fn expand_bounds_if_needed(
        &mut self,
        params: &[f64],
        proximity_threshold: f64,
        expansion_factor: f64,
    ) -> bool {
        let mut adjusted = false;
        for (bounds, param) in self.param_bounds.iter_mut().zip(params.iter()) {
            let range = bounds.1 - bounds.0;
            let lower_thresh = bounds.0 + range * proximity_threshold;
            let upper_thresh = bounds.1 - range * proximity_threshold;
            if *param <= lower_thresh {
                bounds.0 -= range * expansion_factor;
                adjusted = true;
            }
            if *param >= upper_thresh {
                bounds.1 += range * expansion_factor;
                adjusted = true;
            }
        }
        adjusted
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
