// src/models/transfer/transfer_model.rs

//! Reference CDM transfer-function framework
//!
//! Produces the wavenumber grid, the CDM transfer function, the
//! sigma_8-normalised linear power spectrum at z = 0 and the linear growth
//! factor. Units follow the usual halo-model conventions: k in h/Mpc,
//! P(k) in (Mpc/h)^3, densities in (M_sun/h) / (Mpc/h)^3.
//!
//! Two fitting functions are available through `transfer_fit`:
//! - `"EH"`: Eisenstein & Hu (1998) zero-baryon ("no-wiggle") form
//! - `"BBKS"`: Bardeen et al. (1986) with the Sugiyama (1995) shape parameter

use std::collections::BTreeMap;
use std::f64::consts::{E, PI};
use std::sync::Arc;

use crate::cache::{self, Cached, ParamValue, ParameterSet, Quantity, Stamp};
use crate::error::{WdmError, WdmResult};
use crate::models::traits::{Framework, TransferFramework};
use crate::models::utils::{arange, top_hat, trapezoid};

/// Critical density today in (M_sun/h) / (Mpc/h)^3.
pub const RHO_CRIT0: f64 = 2.7754e11;

pub const LNK: &str = "lnk";
pub const TRANSFER: &str = "transfer";
pub const LN_P0: &str = "_lnP_0";
pub const GROWTH: &str = "growth";
pub const MEAN_DENS: &str = "mean_dens";

const QUANTITIES: &[&str] = &[
    LNK, "k", TRANSFER, LN_P0, "power", "delta_k", GROWTH, MEAN_DENS, "omegam",
];

fn transfer_fit_name(name: &str, value: ParamValue) -> Result<ParamValue, WdmError> {
    match value.as_str() {
        Some("EH") | Some("BBKS") => Ok(value),
        Some(other) => Err(WdmError::invalid(
            name,
            format!("unknown transfer fit `{other}` (expected EH or BBKS)"),
        )),
        None => Err(WdmError::invalid(
            name,
            format!("must be a string, got {}", value.kind()),
        )),
    }
}

/// Eisenstein & Hu (1998) no-wiggle transfer function, k in h/Mpc.
pub fn eh_no_wiggle(k: f64, omegam: f64, omegab: f64, h: f64) -> f64 {
    let omh2 = omegam * h * h;
    let obh2 = omegab * h * h;
    let fb = omegab / omegam;
    let theta = 2.728 / 2.7;

    // Sound horizon (Mpc)
    let s = 44.5 * (9.83 / omh2).ln() / (1.0 + 10.0 * obh2.powf(0.75)).sqrt();
    let alpha = 1.0 - 0.328 * (431.0 * omh2).ln() * fb + 0.38 * (22.3 * omh2).ln() * fb * fb;

    let k_mpc = k * h;
    let gamma_eff = omegam * h * (alpha + (1.0 - alpha) / (1.0 + (0.43 * k_mpc * s).powi(4)));
    let q = k * theta * theta / gamma_eff;

    let l0 = (2.0 * E + 1.8 * q).ln();
    let c0 = 14.2 + 731.0 / (1.0 + 62.5 * q);
    l0 / (l0 + c0 * q * q)
}

/// BBKS transfer function with Sugiyama's baryon-corrected shape parameter, k in h/Mpc.
pub fn bbks(k: f64, omegam: f64, omegab: f64, h: f64) -> f64 {
    let gamma = omegam * h * (-omegab * (1.0 + (2.0 * h).sqrt() / omegam)).exp();
    let q = k / gamma;
    let x = 2.34 * q;
    let log_term = if x < 1e-8 { 1.0 } else { x.ln_1p() / x };
    log_term
        * (1.0 + 3.89 * q + (16.1 * q).powi(2) + (5.46 * q).powi(3) + (6.71 * q).powi(4))
            .powf(-0.25)
}

/// Carroll, Press & Turner (1992) growth factor for flat ΛCDM, normalised to 1 at z = 0.
pub fn growth_factor(z: f64, omegam: f64) -> f64 {
    let omegal = 1.0 - omegam;
    let g = |z: f64| {
        let a3 = (1.0 + z).powi(3);
        let norm = omegam * a3 + omegal;
        let om = omegam * a3 / norm;
        let ol = omegal / norm;
        2.5 * om / (om.powf(4.0 / 7.0) - ol + (1.0 + om / 2.0) * (1.0 + ol / 70.0))
    };
    g(z) / (g(0.0) * (1.0 + z))
}

/// Top-hat variance of a power spectrum tabulated on a uniform `lnk` grid.
pub fn sigma_squared(lnk: &[f64], ln_power: &[f64], radius: f64) -> f64 {
    if lnk.len() < 2 {
        return 0.0;
    }
    let dlnk = lnk[1] - lnk[0];
    let integrand: Vec<f64> = lnk
        .iter()
        .zip(ln_power)
        .map(|(lk, lp)| {
            let k = lk.exp();
            let w = top_hat(k * radius);
            (3.0 * lk + lp).exp() * w * w
        })
        .collect();
    trapezoid(&integrand, dlnk) / (2.0 * PI * PI)
}

/// `exp(ln_p0) * growth^2`
pub fn power_at(ln_p0: &[f64], growth: f64) -> Arc<[f64]> {
    ln_p0.iter().map(|lp| lp.exp() * growth * growth).collect()
}

/// Dimensionless power `k^3 P / (2 pi^2)`
pub fn delta_k(lnk: &[f64], power: &[f64]) -> Arc<[f64]> {
    lnk.iter()
        .zip(power)
        .map(|(lk, p)| (3.0 * lk).exp() * p / (2.0 * PI * PI))
        .collect()
}

/// Base (CDM) transfer-function framework.
#[derive(Debug, Clone)]
pub struct Transfer {
    params: ParameterSet,
    lnk: Cached<Arc<[f64]>>,
    transfer: Cached<Arc<[f64]>>,
    ln_p0: Cached<Arc<[f64]>>,
    growth: Cached<f64>,
}

impl Default for Transfer {
    fn default() -> Self {
        let params = ParameterSet::new()
            .declare("omegab", 0.05, cache::non_negative)
            .declare("omegac", 0.25, cache::positive)
            .declare("h", 0.7, cache::positive)
            .declare("n", 0.965, cache::finite)
            .declare("sigma_8", 0.8, cache::positive)
            .declare("z", 0.0, cache::non_negative)
            .declare("lnk_min", -18.42, cache::finite)
            .declare("lnk_max", 9.9, cache::finite)
            .declare("dlnk", 0.05, cache::positive)
            .declare("transfer_fit", "EH", transfer_fit_name);
        Self {
            params,
            lnk: Cached::new(),
            transfer: Cached::new(),
            ln_p0: Cached::new(),
            growth: Cached::new(),
        }
    }
}

impl Transfer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `params`; every name must belong to this framework.
    pub fn with_params(params: &BTreeMap<String, ParamValue>) -> WdmResult<Self> {
        let mut t = Self::default();
        t.update(params)?;
        Ok(t)
    }

    pub fn omegam(&self) -> f64 {
        self.params.float("omegab").unwrap_or(0.0) + self.omegac()
    }

    /// CDM transfer function on the `lnk` grid.
    pub fn transfer(&mut self) -> WdmResult<Arc<[f64]>> {
        let lnk = self.lnk()?;
        let mut deps = vec![self.lnk.stamp()];
        deps.extend(self.params.stamps(&["omegab", "omegac", "h", "transfer_fit"])?);
        if let Some(t) = self.transfer.fresh(&deps) {
            return Ok(t);
        }

        let omegab = self.params.float("omegab")?;
        let omegam = self.omegam();
        let h = self.params.float("h")?;
        let fit: fn(f64, f64, f64, f64) -> f64 = match self.params.text("transfer_fit")? {
            "BBKS" => bbks,
            _ => eh_no_wiggle,
        };
        let t: Arc<[f64]> = lnk.iter().map(|lk| fit(lk.exp(), omegam, omegab, h)).collect();
        if t.iter().any(|v| !(*v > 0.0) || !v.is_finite()) {
            return Err(WdmError::numerical(
                "transfer",
                "CDM transfer function is not strictly positive and finite",
            ));
        }
        Ok(self.transfer.store(deps, t))
    }
}

impl TransferFramework for Transfer {
    fn lnk(&mut self) -> WdmResult<Arc<[f64]>> {
        let deps = self.params.stamps(&["lnk_min", "lnk_max", "dlnk"])?;
        if let Some(lnk) = self.lnk.fresh(&deps) {
            return Ok(lnk);
        }
        let grid = arange(
            self.params.float("lnk_min")?,
            self.params.float("lnk_max")?,
            self.params.float("dlnk")?,
        );
        if grid.len() < 2 {
            return Err(WdmError::invalid(
                "lnk_max",
                "wavenumber grid needs at least two points (lnk_min < lnk_max)",
            ));
        }
        Ok(self.lnk.store(deps, Arc::from(grid)))
    }

    fn ln_p0(&mut self) -> WdmResult<Arc<[f64]>> {
        let lnk = self.lnk()?;
        let t = self.transfer()?;
        let mut deps = vec![self.lnk.stamp(), self.transfer.stamp()];
        deps.extend(self.params.stamps(&["n", "sigma_8"])?);
        if let Some(p) = self.ln_p0.fresh(&deps) {
            return Ok(p);
        }

        let n = self.params.float("n")?;
        let sigma_8 = self.params.float("sigma_8")?;
        let unnormed: Vec<f64> = lnk
            .iter()
            .zip(t.iter())
            .map(|(lk, tk)| n * lk + 2.0 * tk.ln())
            .collect();

        let s8_sq = sigma_squared(&lnk, &unnormed, 8.0);
        if !(s8_sq > 0.0) || !s8_sq.is_finite() {
            return Err(WdmError::numerical(
                "_lnP_0",
                format!("unnormalised sigma_8^2 = {s8_sq}"),
            ));
        }
        let shift = 2.0 * (sigma_8 / s8_sq.sqrt()).ln();
        let normed: Arc<[f64]> = unnormed.iter().map(|lp| lp + shift).collect();
        Ok(self.ln_p0.store(deps, normed))
    }

    fn growth(&mut self) -> WdmResult<f64> {
        let deps = self.params.stamps(&["omegab", "omegac", "z"])?;
        if let Some(g) = self.growth.fresh(&deps) {
            return Ok(g);
        }
        let omegam = self.omegam();
        if omegam > 1.0 {
            return Err(WdmError::invalid(
                "omegac",
                format!("flat cosmology requires omegab + omegac <= 1 (got {omegam})"),
            ));
        }
        let g = growth_factor(self.params.float("z")?, omegam);
        Ok(self.growth.store(deps, g))
    }

    fn mean_dens(&self) -> f64 {
        self.omegam() * RHO_CRIT0
    }

    fn omegac(&self) -> f64 {
        self.params.float("omegac").unwrap_or(f64::NAN)
    }

    fn h(&self) -> f64 {
        self.params.float("h").unwrap_or(f64::NAN)
    }
}

impl Framework for Transfer {
    fn set_parameter(&mut self, name: &str, value: ParamValue) -> WdmResult<bool> {
        self.params.set(name, value)
    }

    fn parameter(&self, name: &str) -> Option<ParamValue> {
        self.params.get(name).cloned()
    }

    fn parameter_names(&self) -> Vec<&'static str> {
        self.params.names().collect()
    }

    fn stamp(&self, name: &str) -> Option<Stamp> {
        match name {
            LNK => Some(self.lnk.stamp()),
            TRANSFER => Some(self.transfer.stamp()),
            LN_P0 => Some(self.ln_p0.stamp()),
            GROWTH => Some(self.growth.stamp()),
            MEAN_DENS => Some(Stamp::float(self.mean_dens())),
            _ => self.params.stamp(name),
        }
    }

    fn quantity(&mut self, name: &str) -> WdmResult<Quantity> {
        Ok(match name {
            LNK => self.lnk()?.into(),
            "k" => Quantity::Array(self.lnk()?.iter().map(|lk| lk.exp()).collect()),
            TRANSFER => self.transfer()?.into(),
            LN_P0 => self.ln_p0()?.into(),
            "power" => {
                let g = self.growth()?;
                power_at(&self.ln_p0()?, g).into()
            }
            "delta_k" => {
                let g = self.growth()?;
                let power = power_at(&self.ln_p0()?, g);
                delta_k(&self.lnk()?, &power).into()
            }
            GROWTH => self.growth()?.into(),
            MEAN_DENS => self.mean_dens().into(),
            "omegam" => self.omegam().into(),
            other => return Err(WdmError::UnknownQuantity(other.to_string())),
        })
    }

    fn quantity_names(&self) -> Vec<&'static str> {
        QUANTITIES.to_vec()
    }

    fn computations(&self, name: &str) -> Option<u64> {
        match name {
            LNK => Some(self.lnk.computations()),
            TRANSFER => Some(self.transfer.computations()),
            LN_P0 => Some(self.ln_p0.computations()),
            GROWTH => Some(self.growth.computations()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_functions_tend_to_one_on_large_scales() {
        for fit in [eh_no_wiggle, bbks] {
            let t = fit(1e-6, 0.3, 0.05, 0.7);
            assert!((t - 1.0).abs() < 1e-3, "T(k->0) = {t}");
            let t_small = fit(10.0, 0.3, 0.05, 0.7);
            assert!(t_small > 0.0 && t_small < 1e-2);
        }
    }

    #[test]
    fn test_power_spectrum_normalised_to_sigma_8() {
        let mut t = Transfer::new();
        let lnk = t.lnk().unwrap();
        let lnp = t.ln_p0().unwrap();
        let s8 = sigma_squared(&lnk, &lnp, 8.0).sqrt();
        assert!((s8 - 0.8).abs() < 1e-10);
    }

    #[test]
    fn test_growth_factor_decreases_with_redshift() {
        assert!((growth_factor(0.0, 0.3) - 1.0).abs() < 1e-14);
        let d1 = growth_factor(1.0, 0.3);
        let d2 = growth_factor(2.0, 0.3);
        assert!(d1 < 1.0 && d2 < d1);
        // Einstein-de Sitter limit: D = a
        assert!((growth_factor(1.0, 1.0) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_redshift_does_not_touch_z0_power() {
        let mut t = Transfer::new();
        let before = t.ln_p0().unwrap();
        t.set_parameter("z", 1.0.into()).unwrap();
        let after = t.ln_p0().unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(t.computations(LN_P0), Some(1));
        assert!(t.growth().unwrap() < 1.0);
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        let mut t = Transfer::new();
        assert!(t.set_parameter("h", (-0.7).into()).is_err());
        assert!(t.set_parameter("transfer_fit", "CAMB".into()).is_err());
        assert!(t.set_parameter("wdm_mass", 3.0.into()).is_err());
        t.set_parameter("lnk_max", (-19.0).into()).unwrap();
        assert!(t.lnk().is_err());
    }

    #[test]
    fn test_bbks_and_eh_differ() {
        let mut eh = Transfer::new();
        let mut bb = Transfer::new();
        bb.set_parameter("transfer_fit", "BBKS".into()).unwrap();
        let a = eh.transfer().unwrap();
        let b = bb.transfer().unwrap();
        assert_eq!(a.len(), b.len());
        assert!(a.iter().zip(b.iter()).any(|(x, y)| (x - y).abs() > 1e-3));
    }
}
