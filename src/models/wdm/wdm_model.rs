// src/models/wdm/wdm_model.rs

//! Warm dark matter transfer-function models
//!
//! A WDM model suppresses small-scale power relative to CDM because the
//! particles free-stream out of small overdensities. Every model here is a
//! pure function of its inputs:
//!
//! - `mx`: particle mass in keV
//! - `omegac`: dark matter density in units of the critical density
//! - `h`: dimensionless Hubble parameter
//! - `rho_mean`: mean matter density in (M_sun/h) / (Mpc/h)^3
//!
//! plus a variant-specific table of model parameters. Lengths are in Mpc/h,
//! wavenumbers in h/Mpc and masses in M_sun/h.
//!
//! Both concrete variants share the Bode et al. (2001) functional form
//!
//! T(k) = (1 + (λ_fs k)^(2μ))^(-5/μ)
//!
//! and differ only in the fitted free-streaming length λ_fs.

use roots::{find_root_brent, SimpleConvergency};
use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::fmt;
use std::sync::Arc;

use crate::cache::{approx_eq, CacheValue};
use crate::error::{WdmError, WdmResult};
use crate::model_params::ModelParams;

/// Cosmological inputs shared by every WDM model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WdmInputs {
    /// Particle mass (keV)
    pub mx: f64,
    /// Dark matter density parameter
    pub omegac: f64,
    /// Hubble parameter
    pub h: f64,
    /// Mean matter density
    pub rho_mean: f64,
}

impl WdmInputs {
    pub fn new(mx: f64, omegac: f64, h: f64, rho_mean: f64) -> Self {
        Self {
            mx,
            omegac,
            h,
            rho_mean,
        }
    }

    fn validate(&self) -> WdmResult<()> {
        let checks = [
            ("mx", self.mx),
            ("omegac", self.omegac),
            ("h", self.h),
            ("rho_mean", self.rho_mean),
        ];
        for (name, v) in checks {
            if !(v > 0.0) || !v.is_finite() {
                return Err(WdmError::invalid(name, format!("must be > 0 ({v})")));
            }
        }
        Ok(())
    }
}

/// Mass inside a sphere of diameter `length` at density `rho_mean`.
pub fn sphere_mass(rho_mean: f64, length: f64) -> f64 {
    (4.0 / 3.0) * PI * rho_mean * (length / 2.0).powi(3)
}

/// Interface shared by all WDM transfer-function models.
pub trait WdmModel: fmt::Debug + Send + Sync {
    /// Class name under which the model is registered.
    fn name(&self) -> &'static str;

    fn inputs(&self) -> &WdmInputs;

    fn params(&self) -> &ModelParams;

    /// Transfer function T(k) at each natural-log wavenumber (h/Mpc).
    ///
    /// Abstract: a model that does not override this reports `NotImplemented`.
    fn transfer(&self, lnk: &[f64]) -> WdmResult<Vec<f64>> {
        let _ = lnk;
        Err(WdmError::NotImplemented {
            model: self.name(),
            operation: "transfer",
        })
    }

    /// Natural log of the transfer function.
    fn ln_transfer(&self, lnk: &[f64]) -> WdmResult<Vec<f64>> {
        Ok(self.transfer(lnk)?.into_iter().map(f64::ln).collect())
    }

    /// Effective free-streaming length (Mpc/h).
    fn lam_eff_fs(&self) -> f64;

    /// Free-streaming mass (M_sun/h).
    fn m_fs(&self) -> f64 {
        sphere_mass(self.inputs().rho_mean, self.lam_eff_fs())
    }

    /// Half-mode length (Mpc/h): the wavelength at which T = 1/2.
    fn lam_hm(&self) -> f64;

    /// Half-mode mass (M_sun/h).
    fn m_hm(&self) -> f64 {
        sphere_mass(self.inputs().rho_mean, self.lam_hm())
    }

    /// Wavenumber (h/Mpc) at which the transfer function drops to 1/2, located
    /// numerically. Useful for models without a closed-form half-mode scale.
    fn half_mode_wavenumber(&self) -> WdmResult<f64> {
        let target = 0.5_f64.ln();
        let (lo, hi) = (-20.0_f64, 20.0_f64);

        let ends = self.ln_transfer(&[lo, hi])?;
        let (f_lo, f_hi) = (ends[0] - target, ends[1] - target);
        if !(f_lo > 0.0 && f_hi < 0.0) {
            return Err(WdmError::numerical(
                "half_mode_wavenumber",
                format!(
                    "{} transfer does not cross 1/2 on lnk in [{lo}, {hi}] (ends: {f_lo:.3e}, {f_hi:.3e})",
                    self.name()
                ),
            ));
        }

        let objective = |lnk: f64| -> f64 {
            match self.ln_transfer(&[lnk]) {
                Ok(v) => v[0] - target,
                Err(_) => f64::NAN,
            }
        };

        let mut convergency = SimpleConvergency {
            eps: 1e-12_f64,
            max_iter: 200,
        };
        match find_root_brent(lo, hi, &objective, &mut convergency) {
            Ok(lnk) => Ok(lnk.exp()),
            Err(e) => Err(WdmError::numerical(
                "half_mode_wavenumber",
                format!("root finding failed: {e:?}"),
            )),
        }
    }
}

/// Two models are interchangeable when class, inputs and parameters agree.
impl CacheValue for Arc<dyn WdmModel> {
    fn same_value(&self, other: &Self) -> bool {
        if Arc::ptr_eq(self, other) {
            return true;
        }
        let (a, b) = (self.inputs(), other.inputs());
        self.name() == other.name()
            && approx_eq(a.mx, b.mx)
            && approx_eq(a.omegac, b.omegac)
            && approx_eq(a.h, b.h)
            && approx_eq(a.rho_mean, b.rho_mean)
            && self.params().as_map().len() == other.params().as_map().len()
            && self
                .params()
                .iter()
                .zip(other.params().iter())
                .all(|((ka, va), (kb, vb))| ka == kb && approx_eq(va, vb))
    }
}

// ------------------------------------------------------------------------------------------------
// Bode et al. (2001) functional form
// ------------------------------------------------------------------------------------------------

fn bode_transfer(lam_fs: f64, mu: f64, lnk: &[f64]) -> Vec<f64> {
    lnk.iter()
        .map(|&lk| (1.0 + (lam_fs * lk.exp()).powf(2.0 * mu)).powf(-5.0 / mu))
        .collect()
}

// ln_1p keeps the deep-suppression tail finite where T itself underflows.
fn bode_ln_transfer(lam_fs: f64, mu: f64, lnk: &[f64]) -> Vec<f64> {
    lnk.iter()
        .map(|&lk| -(5.0 / mu) * (lam_fs * lk.exp()).powf(2.0 * mu).ln_1p())
        .collect()
}

fn bode_half_mode_length(lam_fs: f64, mu: f64) -> f64 {
    2.0 * PI * lam_fs * (2.0_f64.powf(mu / 5.0) - 1.0).powf(-0.5 / mu)
}

fn shape_params(variant: &str, params: &ModelParams) -> WdmResult<(f64, f64)> {
    let mu = params.get("mu").unwrap_or(f64::NAN);
    let g_x = params.get("g_x").unwrap_or(f64::NAN);
    if !(mu > 0.0) {
        return Err(WdmError::invalid(
            "mu",
            format!("must be > 0 for the {variant} WDM model ({mu})"),
        ));
    }
    if !(g_x > 0.0) {
        return Err(WdmError::invalid(
            "g_x",
            format!("must be > 0 for the {variant} WDM model ({g_x})"),
        ));
    }
    Ok((mu, g_x))
}

/// Transfer function of Viel et al. (2005), identical in form to Bode et al.
/// (2001) eq. A9 but with re-fitted coefficients.
#[derive(Debug, Clone, PartialEq)]
pub struct Viel05 {
    inputs: WdmInputs,
    params: ModelParams,
    mu: f64,
    g_x: f64,
}

impl Viel05 {
    pub const NAME: &'static str = "Viel05";
    pub const DEFAULTS: &'static [(&'static str, f64)] = &[("mu", 1.12), ("g_x", 1.5)];

    pub fn new(inputs: WdmInputs, overrides: &BTreeMap<String, f64>) -> WdmResult<Self> {
        let params = ModelParams::resolve(Self::NAME, Self::DEFAULTS, overrides)?;
        inputs.validate()?;
        let (mu, g_x) = shape_params(Self::NAME, &params)?;
        Ok(Self {
            inputs,
            params,
            mu,
            g_x,
        })
    }

    pub(crate) fn construct(
        inputs: WdmInputs,
        overrides: &BTreeMap<String, f64>,
    ) -> WdmResult<Arc<dyn WdmModel>> {
        Ok(Arc::new(Self::new(inputs, overrides)?))
    }
}

impl WdmModel for Viel05 {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn inputs(&self) -> &WdmInputs {
        &self.inputs
    }

    fn params(&self) -> &ModelParams {
        &self.params
    }

    fn transfer(&self, lnk: &[f64]) -> WdmResult<Vec<f64>> {
        Ok(bode_transfer(self.lam_eff_fs(), self.mu, lnk))
    }

    fn ln_transfer(&self, lnk: &[f64]) -> WdmResult<Vec<f64>> {
        Ok(bode_ln_transfer(self.lam_eff_fs(), self.mu, lnk))
    }

    fn lam_eff_fs(&self) -> f64 {
        let WdmInputs { mx, omegac, h, .. } = self.inputs;
        0.049
            * mx.powf(-1.11)
            * (omegac / 0.25).powf(0.11)
            * (h / 0.7).powf(1.22)
            * (1.5 / self.g_x).powf(0.29)
    }

    fn lam_hm(&self) -> f64 {
        bode_half_mode_length(self.lam_eff_fs(), self.mu)
    }
}

/// Bode, Ostriker & Turok (2001) eq. A9 with the paper's own coefficients.
#[derive(Debug, Clone, PartialEq)]
pub struct Bode01 {
    inputs: WdmInputs,
    params: ModelParams,
    mu: f64,
    g_x: f64,
}

impl Bode01 {
    pub const NAME: &'static str = "Bode01";
    pub const DEFAULTS: &'static [(&'static str, f64)] = &[("mu", 1.2), ("g_x", 1.5)];

    pub fn new(inputs: WdmInputs, overrides: &BTreeMap<String, f64>) -> WdmResult<Self> {
        let params = ModelParams::resolve(Self::NAME, Self::DEFAULTS, overrides)?;
        inputs.validate()?;
        let (mu, g_x) = shape_params(Self::NAME, &params)?;
        Ok(Self {
            inputs,
            params,
            mu,
            g_x,
        })
    }

    pub(crate) fn construct(
        inputs: WdmInputs,
        overrides: &BTreeMap<String, f64>,
    ) -> WdmResult<Arc<dyn WdmModel>> {
        Ok(Arc::new(Self::new(inputs, overrides)?))
    }
}

impl WdmModel for Bode01 {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn inputs(&self) -> &WdmInputs {
        &self.inputs
    }

    fn params(&self) -> &ModelParams {
        &self.params
    }

    fn transfer(&self, lnk: &[f64]) -> WdmResult<Vec<f64>> {
        Ok(bode_transfer(self.lam_eff_fs(), self.mu, lnk))
    }

    fn ln_transfer(&self, lnk: &[f64]) -> WdmResult<Vec<f64>> {
        Ok(bode_ln_transfer(self.lam_eff_fs(), self.mu, lnk))
    }

    fn lam_eff_fs(&self) -> f64 {
        let WdmInputs { mx, omegac, h, .. } = self.inputs;
        0.048
            * mx.powf(-1.15)
            * (omegac / 0.4).powf(0.15)
            * (h / 0.65).powf(1.3)
            * (1.5 / self.g_x).powf(0.29)
    }

    fn lam_hm(&self) -> f64 {
        bode_half_mode_length(self.lam_eff_fs(), self.mu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RHO_MEAN: f64 = 0.3 * 2.7754e11;

    fn viel(mx: f64) -> Viel05 {
        Viel05::new(WdmInputs::new(mx, 0.25, 0.7, RHO_MEAN), &BTreeMap::new()).unwrap()
    }

    /// Model that only supplies the scalar scales, leaving `transfer` abstract.
    #[derive(Debug)]
    struct Bare {
        inputs: WdmInputs,
        params: ModelParams,
    }

    impl WdmModel for Bare {
        fn name(&self) -> &'static str {
            "Bare"
        }
        fn inputs(&self) -> &WdmInputs {
            &self.inputs
        }
        fn params(&self) -> &ModelParams {
            &self.params
        }
        fn lam_eff_fs(&self) -> f64 {
            0.01
        }
        fn lam_hm(&self) -> f64 {
            0.1
        }
    }

    #[test]
    fn test_viel05_free_streaming_length_at_reference_cosmology() {
        // At omegac = 0.25, h = 0.7, g_x = 1.5 every ratio is 1
        let model = viel(1.0);
        assert!((model.lam_eff_fs() - 0.049).abs() < 1e-15);
    }

    #[test]
    fn test_viel05_transfer_bounds_and_monotonicity() {
        for mx in [0.5, 1.0, 3.0, 10.0] {
            let model = viel(mx);
            let lnk: Vec<f64> = (0..300).map(|i| -10.0 + 0.05 * i as f64).collect();
            let t = model.transfer(&lnk).unwrap();
            for w in t.windows(2) {
                assert!(w[1] <= w[0], "transfer must be non-increasing (mx={mx})");
            }
            for v in &t {
                assert!(*v > 0.0 && *v <= 1.0, "transfer {v} out of (0, 1] (mx={mx})");
            }
        }
    }

    #[test]
    fn test_viel05_transfer_limits() {
        let model = viel(3.0);
        let t = model.transfer(&[f64::NEG_INFINITY, 50.0]).unwrap();
        assert_eq!(t[0], 1.0);
        assert!(t[1] < 1e-10);
    }

    #[test]
    fn test_ln_transfer_matches_log_of_transfer() {
        let model = viel(2.0);
        let lnk = [-5.0, 0.0, 2.0, 4.0];
        let t = model.transfer(&lnk).unwrap();
        let lt = model.ln_transfer(&lnk).unwrap();
        for (a, b) in t.iter().zip(&lt) {
            assert!((a.ln() - b).abs() < 1e-10);
        }
    }

    #[test]
    fn test_half_mode_mass_closed_form() {
        let mut overrides = BTreeMap::new();
        overrides.insert("mu".to_string(), 5.0);
        let x = 8.3e10;
        let model = Viel05::new(WdmInputs::new(3.0, 0.25, 0.7, x), &overrides).unwrap();

        let lam_fs = 0.049 * 3.0_f64.powf(-1.11);
        let lam_hm = 2.0 * PI * lam_fs * (2.0_f64.powf(5.0 / 5.0) - 1.0).powf(-0.5 / 5.0);
        let expected = (4.0 / 3.0) * PI * x * (lam_hm / 2.0).powi(3);
        assert!((model.m_hm() - expected).abs() <= 1e-12 * expected);
    }

    #[test]
    fn test_transfer_is_one_half_at_half_mode_scale() {
        for model in [
            Arc::new(viel(3.0)) as Arc<dyn WdmModel>,
            Bode01::construct(WdmInputs::new(3.0, 0.25, 0.7, RHO_MEAN), &BTreeMap::new())
                .unwrap(),
        ] {
            let k_hm = 2.0 * PI / model.lam_hm();
            let t = model.transfer(&[k_hm.ln()]).unwrap();
            assert!((t[0] - 0.5).abs() < 1e-12);

            let k_num = model.half_mode_wavenumber().unwrap();
            assert!(((k_num - k_hm) / k_hm).abs() < 1e-6);
        }
    }

    #[test]
    fn test_heavier_particles_push_half_mode_to_smaller_masses() {
        assert!(viel(1.0).m_hm() > viel(3.0).m_hm());
        assert!(viel(3.0).m_hm() > viel(10.0).m_hm());
        assert!(viel(3.0).m_fs() < viel(3.0).m_hm());
    }

    #[test]
    fn test_unknown_parameter_rejected() {
        let mut overrides = BTreeMap::new();
        overrides.insert("foo".to_string(), 1.0);
        let res = Viel05::new(WdmInputs::new(3.0, 0.25, 0.7, RHO_MEAN), &overrides);
        assert!(matches!(res, Err(WdmError::InvalidParameter { ref name, .. }) if name == "foo"));
        let res = Bode01::new(WdmInputs::new(3.0, 0.25, 0.7, RHO_MEAN), &overrides);
        assert!(res.is_err());
    }

    #[test]
    fn test_non_positive_mass_rejected() {
        let res = Viel05::new(WdmInputs::new(0.0, 0.25, 0.7, RHO_MEAN), &BTreeMap::new());
        assert!(matches!(res, Err(WdmError::InvalidParameter { ref name, .. }) if name == "mx"));
    }

    #[test]
    fn test_abstract_transfer_not_implemented() {
        let bare = Bare {
            inputs: WdmInputs::new(3.0, 0.25, 0.7, RHO_MEAN),
            params: ModelParams::default(),
        };
        assert_eq!(
            bare.transfer(&[0.0]),
            Err(WdmError::NotImplemented {
                model: "Bare",
                operation: "transfer"
            })
        );
        assert!(bare.ln_transfer(&[0.0]).is_err());
        assert!(bare.half_mode_wavenumber().is_err());
        // Scalar scales still work from the supplied lengths
        assert!((bare.m_hm() - sphere_mass(RHO_MEAN, 0.1)).abs() < 1e-6);
    }
}
