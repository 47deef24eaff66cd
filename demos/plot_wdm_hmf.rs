// Example: plot_wdm_hmf.rs
// Compares the CDM halo mass function with WDM mass functions for a few
// particle masses, with and without the half-mode suppression factor.
//
// Usage:
//     cargo run --example plot_wdm_hmf -- [wdm_mass_keV ...]
//
// Without arguments the masses 1, 2 and 5 keV are drawn. The chart is written
// to wdm_hmf.svg in the working directory.

use std::collections::BTreeMap;
use std::env;
use std::error::Error;

use plotters::prelude::*;
use wdm_hmf::{MassFunction, MassFunctionWdm, ParamValue};

const COLOURS: [RGBColor; 4] = [RED, BLUE, GREEN, MAGENTA];

fn grid() -> BTreeMap<String, ParamValue> {
    let mut params = BTreeMap::new();
    params.insert("mmin".to_string(), ParamValue::Float(7.0));
    params.insert("mmax".to_string(), ParamValue::Float(15.0));
    params.insert("dlog10m".to_string(), ParamValue::Float(0.05));
    params
}

fn wdm_curve(mx: f64, alter: bool) -> Result<Vec<(f64, f64)>, Box<dyn Error>> {
    let mut params = grid();
    params.insert("wdm_mass".to_string(), ParamValue::Float(mx));
    params.insert("wdm_alter".to_string(), ParamValue::Bool(alter));
    let mut mf = MassFunctionWdm::with_params(&params)?;
    let m = mf.m()?;
    let dn = mf.dndlog10m()?;
    Ok(m.iter().copied().zip(dn.iter().copied()).collect())
}

fn main() -> Result<(), Box<dyn Error>> {
    let args: Vec<String> = env::args().skip(1).collect();
    let masses: Vec<f64> = if args.is_empty() {
        vec![1.0, 2.0, 5.0]
    } else {
        args.iter()
            .map(|a| a.parse::<f64>())
            .collect::<Result<_, _>>()?
    };

    let mut cdm: MassFunction = MassFunction::with_params(&grid())?;
    let m = cdm.m()?;
    let dn = cdm.dndlog10m()?;
    let cdm_line: Vec<(f64, f64)> = m
        .iter()
        .copied()
        .zip(dn.iter().copied())
        .filter(|(_, y)| *y > 0.0)
        .collect();

    let mut curves = Vec::new();
    for &mx in &masses {
        println!("Computing WDM mass function for m_x = {mx} keV");
        curves.push((mx, wdm_curve(mx, false)?, wdm_curve(mx, true)?));
    }

    let y_max = cdm_line.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max) * 2.0;
    let y_min = cdm_line.iter().map(|p| p.1).fold(f64::INFINITY, f64::min).max(1e-12);

    let root = SVGBackend::new("wdm_hmf.svg", (1280, 768)).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .margin(20)
        .caption("Halo mass function: CDM vs WDM", ("sans-serif", 30))
        .x_label_area_size(40)
        .y_label_area_size(70)
        .build_cartesian_2d((1e7..1e15).log_scale(), (y_min..y_max).log_scale())?;

    chart
        .configure_mesh()
        .x_desc("M [M_sun/h]")
        .y_desc("dn/dlog10 M [h^3/Mpc^3]")
        .draw()?;

    chart
        .draw_series(LineSeries::new(cdm_line, BLACK.stroke_width(2)))?
        .label("CDM")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLACK));

    for (i, (mx, plain, altered)) in curves.into_iter().enumerate() {
        let colour = COLOURS[i % COLOURS.len()];
        let keep = |p: &(f64, f64)| p.1 > y_min;
        chart
            .draw_series(LineSeries::new(plain.into_iter().filter(keep), colour))?
            .label(format!("{mx} keV"))
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], colour));
        chart.draw_series(
            altered
                .into_iter()
                .filter(keep)
                .map(|p| Circle::new(p, 2, colour.filled())),
        )?;
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;

    println!("Chart saved to wdm_hmf.svg (dots: with half-mode suppression)");
    Ok(())
}
