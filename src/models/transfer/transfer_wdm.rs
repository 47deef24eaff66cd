// src/models/transfer/transfer_wdm.rs

//! Warm dark matter layer over a transfer-function framework
//!
//! [`TransferWdm`] wraps any [`TransferFramework`] and multiplies its
//! normalised power spectrum by T_wdm(k)^2. The base framework keeps ownership
//! of the CDM spectrum and its sigma_8 normalisation; this layer only applies
//! the suppression, so sigma_8 keeps referring to the CDM spectrum.
//!
//! Parameters owned by this layer:
//! - `wdm_mass`: particle mass in keV (> 0)
//! - `wdm_transfer`: model variant, by registered name or as a [`WdmClass`]
//! - `wdm_params`: overrides for the variant's model parameters
//!
//! Every other parameter name is forwarded to the wrapped framework.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::transfer_model::{delta_k, power_at, Transfer, LN_P0, LNK};
use crate::cache::{self, Cached, ParamValue, ParameterSet, Quantity, Stamp};
use crate::error::{WdmError, WdmResult};
use crate::models::traits::{Framework, TransferFramework};
use crate::models::wdm::{WdmInputs, WdmModel, WdmRegistry, VIEL05};

pub const WDM_MASS: &str = "wdm_mass";
pub const WDM_TRANSFER: &str = "wdm_transfer";
pub const WDM_PARAMS: &str = "wdm_params";
/// Stamp name of the cached WDM model instance.
pub const WDM: &str = "_wdm";

const QUANTITIES: &[&str] = &[
    LN_P0,
    "power",
    "delta_k",
    "wdm_transfer_function",
    "lam_eff_fs",
    "m_fs",
    "lam_hm",
    "m_hm",
    "k_hm",
];

fn wdm_variant(name: &str, value: ParamValue) -> Result<ParamValue, WdmError> {
    match value {
        ParamValue::Text(_) | ParamValue::Class(_) => Ok(value),
        other => Err(WdmError::invalid(
            name,
            format!("must be a WDM class or class name, got {}", other.kind()),
        )),
    }
}

/// Stamp that a wrapped framework is required to expose.
pub(crate) fn required_stamp<F: Framework + ?Sized>(inner: &F, name: &str) -> WdmResult<Stamp> {
    inner
        .stamp(name)
        .ok_or_else(|| WdmError::UnknownQuantity(name.to_string()))
}

/// Transfer framework with WDM small-scale suppression.
#[derive(Debug, Clone)]
pub struct TransferWdm<T: TransferFramework = Transfer> {
    base: T,
    params: ParameterSet,
    registry: Arc<WdmRegistry>,
    wdm: Cached<Arc<dyn WdmModel>>,
    ln_p0: Cached<Arc<[f64]>>,
}

impl Default for TransferWdm<Transfer> {
    fn default() -> Self {
        Self::new(Transfer::default())
    }
}

impl TransferWdm<Transfer> {
    /// Reference CDM base with the given overrides applied across both layers.
    pub fn with_params(params: &BTreeMap<String, ParamValue>) -> WdmResult<Self> {
        let mut t = Self::default();
        t.update(params)?;
        Ok(t)
    }
}

impl<T: TransferFramework> TransferWdm<T> {
    pub fn new(base: T) -> Self {
        let params = ParameterSet::new()
            .declare(WDM_MASS, 3.0, cache::positive)
            .declare(WDM_TRANSFER, VIEL05, wdm_variant)
            .declare(WDM_PARAMS, BTreeMap::<String, f64>::new(), cache::map);
        Self {
            base,
            params,
            registry: Arc::new(WdmRegistry::default()),
            wdm: Cached::new(),
            ln_p0: Cached::new(),
        }
    }

    /// Resolve `wdm_transfer` names against `registry` instead of the built-in one.
    pub fn with_registry(mut self, registry: Arc<WdmRegistry>) -> Self {
        self.registry = registry;
        self.wdm.invalidate();
        self
    }

    pub fn base(&self) -> &T {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut T {
        &mut self.base
    }

    fn wdm_deps(&self) -> WdmResult<Vec<Stamp>> {
        let mut deps = vec![Stamp::float(self.base.mean_dens())];
        deps.extend(self.params.stamps(&[WDM_MASS])?);
        deps.push(Stamp::float(self.base.omegac()));
        deps.push(Stamp::float(self.base.h()));
        deps.extend(self.params.stamps(&[WDM_TRANSFER, WDM_PARAMS])?);
        Ok(deps)
    }

    /// The WDM model for the current parameters.
    pub fn wdm(&mut self) -> WdmResult<Arc<dyn WdmModel>> {
        let deps = self.wdm_deps()?;
        if let Some(model) = self.wdm.fresh(&deps) {
            return Ok(model);
        }

        let inputs = WdmInputs::new(
            self.params.float(WDM_MASS)?,
            self.base.omegac(),
            self.base.h(),
            self.base.mean_dens(),
        );
        let overrides = self
            .params
            .get(WDM_PARAMS)
            .and_then(ParamValue::as_map)
            .cloned()
            .unwrap_or_default();
        let model = match self.params.get(WDM_TRANSFER) {
            Some(ParamValue::Class(class)) => class.build(inputs, &overrides)?,
            Some(ParamValue::Text(name)) => self.registry.build(name, inputs, &overrides)?,
            _ => {
                return Err(WdmError::invalid(
                    WDM_TRANSFER,
                    "must be a WDM class or class name",
                ))
            }
        };
        Ok(self.wdm.store(deps, model))
    }

    /// T_wdm(k) on the `lnk` grid.
    pub fn wdm_transfer_function(&mut self) -> WdmResult<Vec<f64>> {
        let model = self.wdm()?;
        let lnk = self.base.lnk()?;
        model.transfer(&lnk)
    }
}

impl<T: TransferFramework> TransferFramework for TransferWdm<T> {
    fn lnk(&mut self) -> WdmResult<Arc<[f64]>> {
        self.base.lnk()
    }

    /// CDM spectrum plus 2 ln T_wdm.
    fn ln_p0(&mut self) -> WdmResult<Arc<[f64]>> {
        let model = self.wdm()?;
        let base = self.base.ln_p0()?;
        let deps = vec![self.wdm.stamp(), required_stamp(&self.base, LN_P0)?];
        if let Some(p) = self.ln_p0.fresh(&deps) {
            return Ok(p);
        }

        let lnk = self.base.lnk()?;
        let ln_t = model.ln_transfer(&lnk)?;
        if ln_t.len() != base.len() {
            return Err(WdmError::numerical(
                LN_P0,
                format!(
                    "WDM transfer has {} points, base spectrum has {}",
                    ln_t.len(),
                    base.len()
                ),
            ));
        }
        let corrected: Arc<[f64]> = base.iter().zip(&ln_t).map(|(p, t)| p + 2.0 * t).collect();
        Ok(self.ln_p0.store(deps, corrected))
    }

    fn growth(&mut self) -> WdmResult<f64> {
        self.base.growth()
    }

    fn mean_dens(&self) -> f64 {
        self.base.mean_dens()
    }

    fn omegac(&self) -> f64 {
        self.base.omegac()
    }

    fn h(&self) -> f64 {
        self.base.h()
    }
}

impl<T: TransferFramework> Framework for TransferWdm<T> {
    fn set_parameter(&mut self, name: &str, value: ParamValue) -> WdmResult<bool> {
        if self.params.contains(name) {
            self.params.set(name, value)
        } else {
            self.base.set_parameter(name, value)
        }
    }

    fn parameter(&self, name: &str) -> Option<ParamValue> {
        match self.params.get(name) {
            Some(v) => Some(v.clone()),
            None => self.base.parameter(name),
        }
    }

    fn parameter_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.params.names().collect();
        names.extend(self.base.parameter_names());
        names
    }

    fn stamp(&self, name: &str) -> Option<Stamp> {
        match name {
            WDM => Some(self.wdm.stamp()),
            LN_P0 => Some(self.ln_p0.stamp()),
            _ if self.params.contains(name) => self.params.stamp(name),
            _ => self.base.stamp(name),
        }
    }

    fn quantity(&mut self, name: &str) -> WdmResult<Quantity> {
        Ok(match name {
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
            "wdm_transfer_function" => Quantity::Array(self.wdm_transfer_function()?.into()),
            "lam_eff_fs" => self.wdm()?.lam_eff_fs().into(),
            "m_fs" => self.wdm()?.m_fs().into(),
            "lam_hm" => self.wdm()?.lam_hm().into(),
            "m_hm" => self.wdm()?.m_hm().into(),
            "k_hm" => self.wdm()?.half_mode_wavenumber()?.into(),
            LNK => self.lnk()?.into(),
            other => return self.base.quantity(other),
        })
    }

    fn quantity_names(&self) -> Vec<&'static str> {
        let mut names = QUANTITIES.to_vec();
        for n in self.base.quantity_names() {
            if !names.contains(&n) {
                names.push(n);
            }
        }
        names
    }

    fn computations(&self, name: &str) -> Option<u64> {
        match name {
            WDM => Some(self.wdm.computations()),
            LN_P0 => Some(self.ln_p0.computations()),
            _ => self.base.computations(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::wdm::{WdmClass, BODE01};

    fn mine(inputs: WdmInputs, params: &BTreeMap<String, f64>) -> WdmResult<Arc<dyn WdmModel>> {
        BODE01.build(inputs, params)
    }

    fn coarse() -> TransferWdm {
        let mut t = TransferWdm::default();
        t.set_parameter("dlnk", 0.1.into()).unwrap();
        t
    }

    #[test]
    fn test_suppression_only_lowers_power() {
        let mut t = coarse();
        let cdm = t.base_mut().ln_p0().unwrap();
        let wdm = t.ln_p0().unwrap();
        assert_eq!(cdm.len(), wdm.len());
        for (c, w) in cdm.iter().zip(wdm.iter()) {
            assert!(w <= c);
        }
        // Large scales untouched
        assert!((cdm[0] - wdm[0]).abs() < 1e-12);
    }

    #[test]
    fn test_class_and_name_give_same_model() {
        let mut by_class = coarse();
        let mut by_name = coarse();
        by_name
            .set_parameter(WDM_TRANSFER, "Viel05".into())
            .unwrap();
        let a = by_class.wdm().unwrap();
        let b = by_name.wdm().unwrap();
        assert_eq!(a.m_hm(), b.m_hm());

        let p_class = by_class.ln_p0().unwrap();
        let p_name = by_name.ln_p0().unwrap();
        assert_eq!(p_class.len(), p_name.len());
        assert_eq!(&p_class[..], &p_name[..]);
    }

    #[test]
    fn test_renamed_class_keeps_its_own_constructor() {
        let mut t = coarse();
        assert_eq!(t.wdm().unwrap().name(), "Viel05");
        let changed = t
            .set_parameter(WDM_TRANSFER, WdmClass::new("Viel05", mine).into())
            .unwrap();
        assert!(changed);
        assert_eq!(t.wdm().unwrap().name(), "Bode01");
    }

    #[test]
    fn test_wdm_model_cached_until_inputs_change() {
        let mut t = coarse();
        let first = t.wdm().unwrap();
        let again = t.wdm().unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(t.computations(WDM), Some(1));

        // An unrelated knob leaves the model alone
        t.set_parameter("sigma_8", 0.9.into()).unwrap();
        t.wdm().unwrap();
        assert_eq!(t.computations(WDM), Some(1));

        t.set_parameter(WDM_MASS, 1.0.into()).unwrap();
        let lighter = t.wdm().unwrap();
        assert_eq!(t.computations(WDM), Some(2));
        assert!(lighter.m_hm() > first.m_hm());
    }

    #[test]
    fn test_unknown_variant_reported_on_use() {
        let mut t = coarse();
        t.set_parameter(WDM_TRANSFER, "Schneider12".into()).unwrap();
        assert!(matches!(t.wdm(), Err(WdmError::UnknownVariant { .. })));
        assert!(t.set_parameter(WDM_TRANSFER, 1.0.into()).is_err());
    }

    #[test]
    fn test_wdm_params_forwarded_to_model() {
        let mut t = coarse();
        let mut overrides = BTreeMap::new();
        overrides.insert("foo".to_string(), 1.0);
        t.set_parameter(WDM_PARAMS, overrides.into()).unwrap();
        assert!(matches!(t.wdm(), Err(WdmError::InvalidParameter { ref name, .. }) if name == "foo"));

        let mut overrides = BTreeMap::new();
        overrides.insert("mu".to_string(), 2.0);
        t.set_parameter(WDM_PARAMS, overrides.into()).unwrap();
        assert_eq!(t.wdm().unwrap().params().get("mu"), Some(2.0));
    }

    #[test]
    fn test_custom_registry() {
        let mut registry = WdmRegistry::empty();
        registry.register(WdmClass::new("Mine", mine));
        let mut t = coarse().with_registry(Arc::new(registry));
        t.set_parameter(WDM_TRANSFER, "Mine".into()).unwrap();
        assert_eq!(t.wdm().unwrap().name(), "Bode01");
        t.set_parameter(WDM_TRANSFER, "Viel05".into()).unwrap();
        assert!(t.wdm().is_err());
    }

    #[test]
    fn test_swapping_registry_recomputes_spectrum() {
        let mut t = coarse();
        t.set_parameter(WDM_TRANSFER, "Viel05".into()).unwrap();
        let before = t.ln_p0().unwrap();
        let runs = t.computations(LN_P0).unwrap();

        let mut registry = WdmRegistry::empty();
        registry.register(WdmClass::new("Viel05", mine));
        let mut t = t.with_registry(Arc::new(registry));

        assert_eq!(t.wdm().unwrap().name(), "Bode01");
        let after = t.ln_p0().unwrap();
        assert_eq!(t.computations(LN_P0), Some(runs + 1));
        assert!(!Arc::ptr_eq(&before, &after));
        assert!(before.iter().zip(after.iter()).any(|(b, a)| b != a));
    }

    #[test]
    fn test_scalar_quantities() {
        let mut t = coarse();
        let m_hm = t.quantity("m_hm").unwrap().as_scalar().unwrap();
        let m_fs = t.quantity("m_fs").unwrap().as_scalar().unwrap();
        assert!(m_hm > m_fs && m_fs > 0.0);
        let k_hm = t.quantity("k_hm").unwrap().as_scalar().unwrap();
        let lam_hm = t.quantity("lam_hm").unwrap().as_scalar().unwrap();
        assert!((k_hm * lam_hm / (2.0 * std::f64::consts::PI) - 1.0).abs() < 1e-6);
        // Forwarded to the base layer
        assert!(t.quantity("growth").is_ok());
        assert!(matches!(
            t.quantity("nonsense"),
            Err(WdmError::UnknownQuantity(_))
        ));
    }
}
