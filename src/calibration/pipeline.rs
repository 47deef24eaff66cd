use crate::calibration::config::OptimizationConfig;
use crate::calibration::types::{ModelCalibrator, ObservedData};
use cmaes_lbfgsb::cmaes::{canonical_cmaes_optimize, CmaesCanonicalConfig};
use cmaes_lbfgsb::lbfgsb_optimize::lbfgsb_optimize;

/// A calibration run bundling a model, its data and the optimizer settings
pub struct CalibrationProcess {
    model: Box<dyn ModelCalibrator>,
    config: OptimizationConfig,
    data: ObservedData,
    initial_guess: Option<Vec<f64>>,
}

impl CalibrationProcess {
    pub fn new(
        model: Box<dyn ModelCalibrator>,
        config: OptimizationConfig,
        data: ObservedData,
    ) -> Self {
        Self {
            model,
            config,
            data,
            initial_guess: None,
        }
    }

    /// Set initial guess for optimization
    pub fn with_initial_guess(mut self, guess: Vec<f64>) -> Self {
        self.initial_guess = Some(guess);
        self
    }

    /// Run the calibration and return (objective, parameters, final bounds)
    pub fn run(self) -> (f64, Vec<f64>, Vec<(f64, f64)>) {
        calibrate_model_adaptive(self.model, &self.data, &self.config, self.initial_guess)
    }
}

fn cmaes_settings(config: &OptimizationConfig) -> CmaesCanonicalConfig {
    CmaesCanonicalConfig {
        population_size: config.pop_size,
        max_generations: config.max_gen,
        seed: config.cmaes.seed.unwrap_or(123456),
        c1: None,
        c_mu: None,
        c_sigma: None,
        d_sigma: None,
        parallel_eval: config.cmaes.parallel_eval,
        verbosity: config.cmaes.verbosity,
        ipop_restarts: config.cmaes.ipop_restarts,
        ipop_increase_factor: config.cmaes.ipop_increase_factor,
        bipop_restarts: config.cmaes.bipop_restarts,
        total_evals_budget: config.cmaes.total_evals_budget,
        use_subrun_budgeting: config.cmaes.use_subrun_budgeting,
        alpha_mu: None,
        hsig_threshold_factor: None,
        bipop_small_population_factor: None,
        bipop_small_budget_factor: None,
        bipop_large_budget_factor: None,
        bipop_large_pop_increase_factor: None,
        max_bound_iterations: None,
        eig_precision_threshold: None,
        min_eig_value: None,
        matrix_op_threshold: None,
        stagnation_limit: None,
        min_sigma: None,
    }
}

/// CMA-ES for the global search followed by L-BFGS-B for local refinement.
pub fn calibrate_model(
    model: &dyn ModelCalibrator,
    data: &ObservedData,
    config: &OptimizationConfig,
    initial_guess: Option<Vec<f64>>,
) -> (f64, Vec<f64>) {
    let bounds = model.param_bounds();
    let obj_fn = |x: &[f64]| model.evaluate_objective(x, data);

    // 1) CMA-ES: a mini run around the guess, the full search without one,
    //    or nothing at all when the guess goes straight to L-BFGS-B.
    let (best_obj, best_sol) = match initial_guess {
        Some(guess) if config.cmaes.mini_cmaes_on_refinement => {
            if config.cmaes.verbosity > 0 {
                println!(
                    "Using provided initial guess => launching mini CMA-ES around it. \
                     Then local L-BFGS refinement."
                );
                println!("  Initial guess chi2 = {:.6}", obj_fn(&guess));
            }
            let result =
                canonical_cmaes_optimize(obj_fn, bounds, cmaes_settings(config), Some(guess));
            let (_, params) = result.best_solution;
            (obj_fn(&params), params)
        }
        Some(guess) => {
            if config.cmaes.verbosity > 0 {
                println!(
                    "Using provided initial guess => skipping mini CMA-ES and proceeding directly to L-BFGS-B."
                );
            }
            let guess_obj = obj_fn(&guess);
            if config.cmaes.verbosity > 0 {
                println!("  Initial guess chi2 = {:.6}", guess_obj);
            }
            (guess_obj, guess)
        }
        None => {
            if config.cmaes.verbosity > 0 {
                println!("No initial guess provided => running full CMA-ES with BIPOP restarts");
            }
            let result = canonical_cmaes_optimize(obj_fn, bounds, cmaes_settings(config), None);
            let (_, params) = result.best_solution;
            (obj_fn(&params), params)
        }
    };

    // 2) Local refinement of the best solution with L-BFGS-B (if enabled)
    if !config.cmaes.lbfgsb_enabled {
        if config.cmaes.verbosity > 0 {
            println!("L-BFGS-B refinement disabled, using CMA-ES solution directly");
        }
        return (best_obj, best_sol);
    }

    if config.cmaes.verbosity > 0 {
        println!("Running L-BFGS-B refinement on best CMA-ES solution...");
    }

    let mut refined_solution = best_sol.clone();
    let refine_res = lbfgsb_optimize(
        &mut refined_solution,
        bounds,
        &obj_fn,
        config.cmaes.lbfgsb_max_iterations,
        config.tolerance,
        if config.cmaes.verbosity >= 1 {
            Some(|_current_x: &[f64], current_obj: f64| {
                println!("L-BFGS-B iteration => chi2 = {:.6}", current_obj);
            })
        } else {
            None
        },
        None,
    );

    match refine_res {
        Ok((loc_obj, loc_sol)) if loc_obj < best_obj => {
            if config.cmaes.verbosity > 0 {
                println!("L-BFGS-B improved chi2: {:.6} -> {:.6}", best_obj, loc_obj);
            }
            (loc_obj, loc_sol)
        }
        Ok(_) => {
            if config.cmaes.verbosity > 0 {
                println!("L-BFGS-B did not improve chi2, keeping CMA-ES solution");
            }
            (best_obj, best_sol)
        }
        Err(e) => {
            if config.cmaes.verbosity > 0 {
                println!("L-BFGS-B failed: {:?}, keeping CMA-ES solution", e);
            }
            (best_obj, best_sol)
        }
    }
}

/// Repeats [`calibrate_model`] while the best fit keeps landing near a bound,
/// widening that bound each time.
pub fn calibrate_model_adaptive(
    mut model: Box<dyn ModelCalibrator>,
    data: &ObservedData,
    config: &OptimizationConfig,
    initial_guess: Option<Vec<f64>>,
) -> (f64, Vec<f64>, Vec<(f64, f64)>) {
    if !config.adaptive_bounds.enabled {
        let (obj, params) = calibrate_model(&*model, data, config, initial_guess);
        let bounds = model.param_bounds().to_vec();
        return (obj, params, bounds);
    }

    let mut best_obj = f64::MAX;
    let mut best_params = Vec::new();

    for iter in 0..config.adaptive_bounds.max_iterations {
        let (obj, params) = calibrate_model(&*model, data, config, initial_guess.clone());
        if obj < best_obj {
            best_obj = obj;
            best_params = params.clone();
        }
        let adjusted = model.expand_bounds_if_needed(
            &params,
            config.adaptive_bounds.proximity_threshold,
            config.adaptive_bounds.expansion_factor,
        );

        if config.cmaes.verbosity > 0 {
            if adjusted {
                println!(
                    "Adaptive iteration {}: Expanded bounds for next iteration",
                    iter + 1
                );
            } else {
                println!(
                    "Adaptive iteration {}: No expansion needed, stopping early",
                    iter + 1
                );
            }
        }

        if !adjusted {
            break;
        }
    }

    let bounds = model.param_bounds().to_vec();
    (best_obj, best_params, bounds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    /// Straight line y = a x + b, fitted by chi-square.
    #[derive(Clone)]
    struct Line {
        bounds: Vec<(f64, f64)>,
    }

    impl ModelCalibrator for Line {
        fn model_name(&self) -> &str {
            "Line"
        }

        fn param_count(&self) -> usize {
            2
        }

        fn param_bounds(&self) -> &[(f64, f64)] {
            &self.bounds
        }

        fn evaluate_objective(&self, x: &[f64], data: &ObservedData) -> f64 {
            match self.predict(x, data) {
                Ok(pred) => pred
                    .iter()
                    .zip(&data.y)
                    .zip(&data.sigma)
                    .map(|((m, y), s)| ((m - y) / s).powi(2))
                    .sum(),
                Err(_) => 1.0e12,
            }
        }

        fn predict(&self, x: &[f64], data: &ObservedData) -> Result<Vec<f64>> {
            Ok(data.x.iter().map(|xi| x[0] * xi + x[1]).collect())
        }

        fn param_names(&self) -> Vec<&str> {
            vec!["a", "b"]
        }

        fn expand_bounds_if_needed(
            &mut self,
            params: &[f64],
            proximity_threshold: f64,
            expansion_factor: f64,
        ) -> bool {
            let mut adjusted = false;
            for (bounds, p) in self.bounds.iter_mut().zip(params) {
                let range = bounds.1 - bounds.0;
                if *p >= bounds.1 - range * proximity_threshold {
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

    fn line_data() -> ObservedData {
        let x: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let y = x.iter().map(|xi| 2.0 * xi + 1.0).collect();
        ObservedData::new(x, y, vec![0.1; 10]).unwrap()
    }

    #[test]
    fn test_calibration_process_recovers_line() {
        let model = Line {
            bounds: vec![(-5.0, 5.0), (-5.0, 5.0)],
        };
        let (obj, params, bounds) =
            CalibrationProcess::new(Box::new(model), OptimizationConfig::minimal(), line_data())
                .run();
        assert!(obj < 1e-2, "chi2 = {obj}");
        assert!((params[0] - 2.0).abs() < 1e-3);
        assert!((params[1] - 1.0).abs() < 1e-2);
        assert_eq!(bounds, vec![(-5.0, 5.0), (-5.0, 5.0)]);
    }

    #[test]
    fn test_initial_guess_goes_straight_to_lbfgsb() {
        let model = Line {
            bounds: vec![(-5.0, 5.0), (-5.0, 5.0)],
        };
        let mut config = OptimizationConfig::minimal();
        config.cmaes.mini_cmaes_on_refinement = false;
        let (obj, params) = calibrate_model(&model, &line_data(), &config, Some(vec![1.5, 0.5]));
        assert!(obj < 1e-2, "chi2 = {obj}");
        assert!((params[0] - 2.0).abs() < 1e-3);
    }

    #[test]
    fn test_adaptive_bounds_widen_until_optimum_is_inside() {
        // The true slope 2 lies outside the initial bounds
        let model = Line {
            bounds: vec![(-1.0, 1.5), (-5.0, 5.0)],
        };
        let mut config = OptimizationConfig::minimal();
        config.adaptive_bounds.enabled = true;
        config.adaptive_bounds.max_iterations = 10;
        config.adaptive_bounds.proximity_threshold = 0.05;
        config.adaptive_bounds.expansion_factor = 0.5;

        let (obj, params, bounds) = CalibrationProcess::new(Box::new(model), config, line_data())
            .with_initial_guess(vec![1.0, 1.0])
            .run();
        assert!(bounds[0].1 > 2.0);
        assert!((params[0] - 2.0).abs() < 1e-2, "slope = {}", params[0]);
        assert!(obj < 1e-2);
    }
}
