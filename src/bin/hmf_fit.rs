// hmf-fit: fit a halo-model quantity to data as described by a TOML file.
//
// Usage:
//     hmf-fit <config.toml> [--toml]
//
// The config names the framework, the quantity, the fixed and free parameters
// and the CSV data file (columns x,y,sigma). With --toml the result is printed
// as a TOML document instead of a human-readable summary.

use std::env;
use std::process;

use anyhow::{anyhow, Context, Result};
use wdm_hmf::{load_fit_config, run_fit_config, FitResult};

fn print_summary(result: &FitResult) {
    println!("Framework : {}", result.framework);
    println!("Quantity  : {}", result.quantity);
    println!("chi2      : {:.6}", result.chi2);
    match result.reduced_chi2() {
        Some(r) => println!("chi2/dof  : {:.6} (dof = {})", r, result.dof),
        None => println!("chi2/dof  : n/a (dof = 0)"),
    }
    if let Some(p) = result.p_value {
        println!("p-value   : {:.4}", p);
    }
    println!("Parameters:");
    for ((name, value), (lo, hi)) in result
        .param_names
        .iter()
        .zip(&result.params)
        .zip(&result.bounds)
    {
        println!("  {:<14} = {:>12.6}   [{}, {}]", name, value, lo, hi);
    }
    if !result.derived.is_empty() {
        println!("Derived:");
        for (name, values) in &result.derived {
            match values.as_slice() {
                [v] => println!("  {:<14} = {:>12.6e}", name, v),
                vs => println!("  {:<14} = {} values", name, vs.len()),
            }
        }
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let as_toml = args.iter().any(|a| a == "--toml");
    let path = args
        .iter()
        .find(|a| !a.starts_with("--"))
        .ok_or_else(|| anyhow!("usage: hmf-fit <config.toml> [--toml]"))?;

    let (config, data) = load_fit_config(path)?;
    let result = run_fit_config(&config, data)?;

    if as_toml {
        let text = toml::to_string(&result).context("serialising fit result")?;
        print!("{text}");
    } else {
        print_summary(&result);
    }
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {e:#}");
        process::exit(2);
    }
}
