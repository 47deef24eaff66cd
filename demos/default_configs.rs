use std::collections::BTreeMap;

use wdm_hmf::{
    default_configs, evaluate_fit, fit_quantity, FitParams, Framework, FreeParameter, HaloModel,
    ObservedData, ParamValue,
};

fn coarse_model() -> BTreeMap<String, ParamValue> {
    let mut model = BTreeMap::new();
    model.insert("dlog10m".to_string(), ParamValue::Float(0.1));
    model.insert("dlnk".to_string(), ParamValue::Float(0.1));
    model.insert("mmin".to_string(), ParamValue::Float(8.0));
    model.insert("mmax".to_string(), ParamValue::Float(13.0));
    model
}

fn main() -> anyhow::Result<()> {
    println!("wdm-hmf Default Configuration Examples\n");

    // 1. Fast configuration for development
    println!("1. Fast Configuration (good for development):");
    let fast_config = default_configs::fast();
    println!("   Max iterations: {}", fast_config.max_iterations);
    println!("   Tolerance: {:.1e}", fast_config.tolerance);
    println!("   Population size: {}", fast_config.pop_size);
    println!("   Max generations: {}", fast_config.max_gen);
    println!(
        "   CMA-ES max evaluations: {}",
        fast_config.cmaes.max_evaluations
    );
    println!("   Use case: Development, quick prototyping\n");

    // 2. Production configuration
    println!("2. Production Configuration (final fits):");
    let prod_config = default_configs::production();
    println!("   Max iterations: {}", prod_config.max_iterations);
    println!("   Tolerance: {:.1e}", prod_config.tolerance);
    println!("   Population size: {}", prod_config.pop_size);
    println!(
        "   Total evaluations budget: {}",
        prod_config.cmaes.total_evals_budget
    );
    println!("   L-BFGS-B enabled: {}", prod_config.cmaes.lbfgsb_enabled);
    println!("   Use case: Constraints for publication\n");

    // 3. Research configuration
    println!("3. Research Configuration (maximum accuracy):");
    let research_config = default_configs::research();
    println!("   Max iterations: {}", research_config.max_iterations);
    println!("   Tolerance: {:.1e}", research_config.tolerance);
    println!("   BIPOP restarts: {}", research_config.cmaes.bipop_restarts);
    println!(
        "   Total evaluations budget: {}",
        research_config.cmaes.total_evals_budget
    );
    println!("   Use case: Multi-parameter fits with degeneracies\n");

    // 4. Minimal configuration
    println!("4. Minimal Configuration (quick validation):");
    let minimal_config = default_configs::minimal();
    println!("   Max iterations: {}", minimal_config.max_iterations);
    println!("   Tolerance: {:.1e}", minimal_config.tolerance);
    println!("   Use case: Quick checks, debugging\n");

    // Mock data: the WDM mass function at a 3 keV particle with 5% errors
    let mut truth = coarse_model();
    truth.insert("wdm_mass".to_string(), ParamValue::Float(3.0));
    let mut model = HaloModel::build("MassFunctionWdm", &truth)?;
    let m = model.axis("dndlog10m")?;
    let y = model.quantity("dndlog10m")?.to_vec();
    let (x, y): (Vec<f64>, Vec<f64>) = m.iter().zip(&y).step_by(5).map(|(a, b)| (*a, *b)).unzip();
    let sigma = y.iter().map(|v| 0.05 * v).collect();
    let data = ObservedData::new(x, y, sigma)?;

    let fit = FitParams {
        model: coarse_model(),
        free: vec![FreeParameter::new("wdm_mass", (0.5, 10.0))],
        derived: vec!["m_hm".to_string()],
        ..FitParams::default()
    };

    let at_truth = evaluate_fit(&data, &fit, &[3.0])?;
    println!("chi2 at the true mass: {:.3e}\n", at_truth.chi2);

    println!("Running example fit with fast config...");
    match fit_quantity(data, fast_config, fit, None) {
        Ok(result) => {
            println!("✅ Fit successful!");
            println!("   chi2: {:.6}", result.chi2);
            println!("   wdm_mass: {:?}", result.param("wdm_mass"));
            println!("   m_hm: {:?}", result.derived.get("m_hm"));
        }
        Err(e) => {
            println!("❌ Fit failed: {}", e);
        }
    }
    Ok(())
}
