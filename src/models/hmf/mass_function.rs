// src/models/hmf/mass_function.rs

//! Reference halo mass function over any transfer framework
//!
//! Masses are in M_sun/h and number densities in h^3 Mpc^-3. The mass
//! variance uses a real-space top-hat window on the transfer framework's
//! `lnk` grid:
//!
//! σ²(R) = 1/(2π²) ∫ k³ P(k) W²(kR) d ln k,   R = (3M / 4πρ̄)^(1/3)
//!
//! and the differential mass function is
//!
//! dn/dM = f(σ) ρ̄ |d ln σ / d ln M| / M²

use std::collections::BTreeMap;
use std::f64::consts::{LN_10, PI};
use std::sync::Arc;

use super::fits::HmfFit;
use crate::cache::{self, Cached, ParamValue, ParameterSet, Quantity, Stamp};
use crate::error::{WdmError, WdmResult};
use crate::models::traits::{Framework, TransferFramework};
use crate::models::transfer::transfer_wdm::required_stamp;
use crate::models::transfer::{Transfer, LNK, LN_P0};
use crate::models::utils::{arange, top_hat, top_hat_deriv, trapezoid};

pub const M: &str = "m";
pub const SIGMA_0: &str = "sigma_0";
pub const DLNSDLNM: &str = "dlnsdlnm";
pub const SIGMA: &str = "sigma";
pub const FSIGMA: &str = "fsigma";
pub const DNDM: &str = "dndm";
pub const NGTM: &str = "ngtm";

/// Quantities tabulated on the mass grid.
pub const MASS_QUANTITIES: &[&str] = &[
    M, "radii", SIGMA_0, SIGMA, "lnsigma", "nu", DLNSDLNM, FSIGMA, DNDM, "dndlnm", "dndlog10m",
    NGTM,
];

fn hmf_model_name(name: &str, value: ParamValue) -> Result<ParamValue, WdmError> {
    match value.as_str() {
        Some(s) if HmfFit::from_name(s).is_some() => Ok(value),
        Some(s) => Err(WdmError::invalid(
            name,
            format!(
                "unknown fitting function `{s}` (expected one of {})",
                HmfFit::NAMES.join(", ")
            ),
        )),
        None => Err(WdmError::invalid(
            name,
            format!("must be a string, got {}", value.kind()),
        )),
    }
}

/// Lagrangian radius (Mpc/h) enclosing mass `m` at density `rho`.
pub fn lagrangian_radius(m: f64, rho: f64) -> f64 {
    (3.0 * m / (4.0 * PI * rho)).cbrt()
}

/// Cumulative number density above each mass, integrating `m * dndm` in ln M.
///
/// With `tail`, the mass function beyond the last grid point is extrapolated
/// as a power law through the last two points and integrated analytically.
pub fn cumulative_counts(m: &[f64], dndm: &[f64], tail: bool) -> Arc<[f64]> {
    let n = m.len();
    let mut out = vec![0.0; n];
    if n == 0 {
        return out.into();
    }

    let lnm: Vec<f64> = m.iter().map(|v| v.ln()).collect();
    let dndlnm: Vec<f64> = m.iter().zip(dndm).map(|(mi, d)| mi * d).collect();

    let mut running = 0.0;
    if tail && n >= 2 {
        let (y1, y2) = (dndlnm[n - 2], dndlnm[n - 1]);
        if y1 > 0.0 && y2 > 0.0 {
            let slope = (y2 / y1).ln() / (lnm[n - 1] - lnm[n - 2]);
            if slope < 0.0 && slope.is_finite() {
                running = y2 / -slope;
            }
        }
    }
    out[n - 1] = running;
    for i in (0..n - 1).rev() {
        running += 0.5 * (lnm[i + 1] - lnm[i]) * (dndlnm[i] + dndlnm[i + 1]);
        out[i] = running;
    }
    out.into()
}

/// Halo mass function built on a transfer framework.
#[derive(Debug, Clone)]
pub struct MassFunction<T: TransferFramework = Transfer> {
    transfer: T,
    params: ParameterSet,
    m: Cached<Arc<[f64]>>,
    sigma_0: Cached<Arc<[f64]>>,
    dlnsdlnm: Cached<Arc<[f64]>>,
    sigma: Cached<Arc<[f64]>>,
    fsigma: Cached<Arc<[f64]>>,
    dndm: Cached<Arc<[f64]>>,
    ngtm: Cached<Arc<[f64]>>,
}

impl Default for MassFunction<Transfer> {
    fn default() -> Self {
        Self::new(Transfer::default())
    }
}

impl MassFunction<Transfer> {
    pub fn with_params(params: &BTreeMap<String, ParamValue>) -> WdmResult<Self> {
        let mut mf = Self::default();
        mf.update(params)?;
        Ok(mf)
    }
}

impl<T: TransferFramework> MassFunction<T> {
    pub fn new(transfer: T) -> Self {
        let params = ParameterSet::new()
            .declare("mmin", 10.0, cache::finite)
            .declare("mmax", 15.0, cache::finite)
            .declare("dlog10m", 0.01, cache::positive)
            .declare("hmf_model", "ST", hmf_model_name)
            .declare("delta_c", 1.686, cache::positive)
            .declare("ngtm_tail", true, cache::flag);
        Self {
            transfer,
            params,
            m: Cached::new(),
            sigma_0: Cached::new(),
            dlnsdlnm: Cached::new(),
            sigma: Cached::new(),
            fsigma: Cached::new(),
            dndm: Cached::new(),
            ngtm: Cached::new(),
        }
    }

    pub fn transfer(&self) -> &T {
        &self.transfer
    }

    pub fn transfer_mut(&mut self) -> &mut T {
        &mut self.transfer
    }

    pub fn mean_dens(&self) -> f64 {
        self.transfer.mean_dens()
    }

    pub fn ngtm_tail(&self) -> WdmResult<bool> {
        self.params.flag("ngtm_tail")
    }

    /// Mass grid (M_sun/h).
    pub fn m(&mut self) -> WdmResult<Arc<[f64]>> {
        let deps = self.params.stamps(&["mmin", "mmax", "dlog10m"])?;
        if let Some(m) = self.m.fresh(&deps) {
            return Ok(m);
        }
        let log10m = arange(
            self.params.float("mmin")?,
            self.params.float("mmax")?,
            self.params.float("dlog10m")?,
        );
        if log10m.is_empty() {
            return Err(WdmError::invalid(
                "mmax",
                "mass grid is empty (mmin must be below mmax)",
            ));
        }
        let m: Arc<[f64]> = log10m.iter().map(|x| 10f64.powf(*x)).collect();
        Ok(self.m.store(deps, m))
    }

    /// Refresh `sigma_0` and `dlnsdlnm`, which share one pass over the k grid.
    fn refresh_variance(&mut self) -> WdmResult<()> {
        let m = self.m()?;
        let lnk = self.transfer.lnk()?;
        let ln_p0 = self.transfer.ln_p0()?;
        let deps = vec![
            self.m.stamp(),
            Stamp::float(self.mean_dens()),
            required_stamp(&self.transfer, LNK)?,
            required_stamp(&self.transfer, LN_P0)?,
        ];
        if self.sigma_0.fresh(&deps).is_some() && self.dlnsdlnm.fresh(&deps).is_some() {
            return Ok(());
        }

        if lnk.len() < 2 || lnk.len() != ln_p0.len() {
            return Err(WdmError::numerical(
                SIGMA_0,
                format!("k grid has {} points, spectrum {}", lnk.len(), ln_p0.len()),
            ));
        }
        let dlnk = lnk[1] - lnk[0];
        let rho = self.mean_dens();
        let k3p: Vec<f64> = lnk
            .iter()
            .zip(ln_p0.iter())
            .map(|(lk, lp)| (3.0 * lk + lp).exp() / (2.0 * PI * PI))
            .collect();

        let mut sigma = Vec::with_capacity(m.len());
        let mut slope = Vec::with_capacity(m.len());
        let mut w2 = vec![0.0; lnk.len()];
        let mut dw2 = vec![0.0; lnk.len()];
        for mi in m.iter() {
            let r = lagrangian_radius(*mi, rho);
            for (j, lk) in lnk.iter().enumerate() {
                let x = lk.exp() * r;
                let w = top_hat(x);
                w2[j] = k3p[j] * w * w;
                dw2[j] = k3p[j] * 2.0 * w * top_hat_deriv(x) * x;
            }
            let s2 = trapezoid(&w2, dlnk);
            if !(s2 > 0.0) || !s2.is_finite() {
                return Err(WdmError::numerical(
                    SIGMA_0,
                    format!("sigma^2 = {s2} at M = {mi:.3e}"),
                ));
            }
            sigma.push(s2.sqrt());
            slope.push(trapezoid(&dw2, dlnk) / (6.0 * s2));
        }

        self.sigma_0.store(deps.clone(), sigma.into());
        self.dlnsdlnm.store(deps, slope.into());
        Ok(())
    }

    /// Mass variance at z = 0.
    pub fn sigma_0(&mut self) -> WdmResult<Arc<[f64]>> {
        self.refresh_variance()?;
        self.sigma_0
            .peek()
            .cloned()
            .ok_or_else(|| WdmError::numerical(SIGMA_0, "variance not computed"))
    }

    /// d ln σ / d ln M.
    pub fn dlnsdlnm(&mut self) -> WdmResult<Arc<[f64]>> {
        self.refresh_variance()?;
        self.dlnsdlnm
            .peek()
            .cloned()
            .ok_or_else(|| WdmError::numerical(DLNSDLNM, "variance not computed"))
    }

    /// Mass variance at the current redshift.
    pub fn sigma(&mut self) -> WdmResult<Arc<[f64]>> {
        let sigma_0 = self.sigma_0()?;
        let growth = self.transfer.growth()?;
        let deps = vec![self.sigma_0.stamp(), Stamp::float(growth)];
        if let Some(s) = self.sigma.fresh(&deps) {
            return Ok(s);
        }
        let s: Arc<[f64]> = sigma_0.iter().map(|s| s * growth).collect();
        Ok(self.sigma.store(deps, s))
    }

    pub fn fsigma(&mut self) -> WdmResult<Arc<[f64]>> {
        let sigma = self.sigma()?;
        let mut deps = vec![self.sigma.stamp()];
        deps.extend(self.params.stamps(&["hmf_model", "delta_c"])?);
        if let Some(f) = self.fsigma.fresh(&deps) {
            return Ok(f);
        }
        let name = self.params.text("hmf_model")?;
        let fit = HmfFit::from_name(name)
            .ok_or_else(|| WdmError::invalid("hmf_model", format!("unknown fit `{name}`")))?;
        let delta_c = self.params.float("delta_c")?;
        let f: Arc<[f64]> = sigma.iter().map(|s| fit.fsigma(*s, delta_c)).collect();
        Ok(self.fsigma.store(deps, f))
    }

    /// Differential mass function dn/dM.
    pub fn dndm(&mut self) -> WdmResult<Arc<[f64]>> {
        let m = self.m()?;
        let fsigma = self.fsigma()?;
        let slope = self.dlnsdlnm()?;
        let deps = vec![
            self.m.stamp(),
            self.fsigma.stamp(),
            self.dlnsdlnm.stamp(),
            Stamp::float(self.mean_dens()),
        ];
        if let Some(d) = self.dndm.fresh(&deps) {
            return Ok(d);
        }
        let rho = self.mean_dens();
        let dndm: Arc<[f64]> = m
            .iter()
            .zip(fsigma.iter())
            .zip(slope.iter())
            .map(|((mi, f), s)| f * rho * s.abs() / (mi * mi))
            .collect();
        Ok(self.dndm.store(deps, dndm))
    }

    pub fn dndlnm(&mut self) -> WdmResult<Arc<[f64]>> {
        let m = self.m()?;
        let dndm = self.dndm()?;
        Ok(m.iter().zip(dndm.iter()).map(|(mi, d)| mi * d).collect())
    }

    pub fn dndlog10m(&mut self) -> WdmResult<Arc<[f64]>> {
        let m = self.m()?;
        let dndm = self.dndm()?;
        Ok(m.iter().zip(dndm.iter()).map(|(mi, d)| mi * LN_10 * d).collect())
    }

    /// Number density of haloes above each mass.
    pub fn ngtm(&mut self) -> WdmResult<Arc<[f64]>> {
        let m = self.m()?;
        let dndm = self.dndm()?;
        let mut deps = vec![self.m.stamp(), self.dndm.stamp()];
        deps.extend(self.params.stamps(&["ngtm_tail"])?);
        if let Some(n) = self.ngtm.fresh(&deps) {
            return Ok(n);
        }
        let counts = cumulative_counts(&m, &dndm, self.ngtm_tail()?);
        Ok(self.ngtm.store(deps, counts))
    }

    fn cached(&self, name: &str) -> Option<&Cached<Arc<[f64]>>> {
        match name {
            M => Some(&self.m),
            SIGMA_0 => Some(&self.sigma_0),
            DLNSDLNM => Some(&self.dlnsdlnm),
            SIGMA => Some(&self.sigma),
            FSIGMA => Some(&self.fsigma),
            DNDM => Some(&self.dndm),
            NGTM => Some(&self.ngtm),
            _ => None,
        }
    }
}

impl<T: TransferFramework> Framework for MassFunction<T> {
    fn set_parameter(&mut self, name: &str, value: ParamValue) -> WdmResult<bool> {
        if self.params.contains(name) {
            self.params.set(name, value)
        } else {
            self.transfer.set_parameter(name, value)
        }
    }

    fn parameter(&self, name: &str) -> Option<ParamValue> {
        match self.params.get(name) {
            Some(v) => Some(v.clone()),
            None => self.transfer.parameter(name),
        }
    }

    fn parameter_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.params.names().collect();
        names.extend(self.transfer.parameter_names());
        names
    }

    fn stamp(&self, name: &str) -> Option<Stamp> {
        if let Some(entry) = self.cached(name) {
            return Some(entry.stamp());
        }
        if self.params.contains(name) {
            return self.params.stamp(name);
        }
        self.transfer.stamp(name)
    }

    fn quantity(&mut self, name: &str) -> WdmResult<Quantity> {
        Ok(match name {
            M => self.m()?.into(),
            "radii" => {
                let rho = self.mean_dens();
                Quantity::Array(self.m()?.iter().map(|m| lagrangian_radius(*m, rho)).collect())
            }
            SIGMA_0 => self.sigma_0()?.into(),
            SIGMA => self.sigma()?.into(),
            "lnsigma" => Quantity::Array(self.sigma()?.iter().map(|s| s.ln()).collect()),
            "nu" => {
                let dc = self.params.float("delta_c")?;
                Quantity::Array(self.sigma()?.iter().map(|s| (dc / s).powi(2)).collect())
            }
            DLNSDLNM => self.dlnsdlnm()?.into(),
            FSIGMA => self.fsigma()?.into(),
            DNDM => self.dndm()?.into(),
            "dndlnm" => self.dndlnm()?.into(),
            "dndlog10m" => self.dndlog10m()?.into(),
            NGTM => self.ngtm()?.into(),
            other => return self.transfer.quantity(other),
        })
    }

    fn quantity_names(&self) -> Vec<&'static str> {
        let mut names = MASS_QUANTITIES.to_vec();
        names.extend(self.transfer.quantity_names());
        names
    }

    fn computations(&self, name: &str) -> Option<u64> {
        match self.cached(name) {
            Some(entry) => Some(entry.computations()),
            None => self.transfer.computations(name),
        }
    }
}
