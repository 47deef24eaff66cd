// src/models/hmf/mass_function_wdm.rs

//! Warm dark matter mass function
//!
//! [`MassFunctionWdm`] owns a [`MassFunction`] whose transfer framework is a
//! [`TransferWdm`], so the variance and everything downstream of it already
//! see the suppressed power spectrum. On top of that, `wdm_alter` applies the
//! empirical high-mass correction of Schneider et al. (2012):
//!
//! dn/dM → dn/dM · (1 + m_hm / M)^(-0.6)

use std::collections::BTreeMap;
use std::f64::consts::LN_10;
use std::sync::Arc;

use super::mass_function::{cumulative_counts, MassFunction, DNDM, M, NGTM};
use crate::cache::{self, Cached, ParamValue, ParameterSet, Quantity, Stamp};
use crate::error::WdmResult;
use crate::models::traits::{Framework, TransferFramework};
use crate::models::transfer::transfer_wdm::required_stamp;
use crate::models::transfer::{Transfer, TransferWdm, WDM};

pub const WDM_ALTER: &str = "wdm_alter";

/// Suppression exponent of the half-mode correction.
pub const ALTER_SLOPE: f64 = -0.6;

/// `(1 + m_hm / m)^(-0.6)`
pub fn alter_factor(m: f64, m_hm: f64) -> f64 {
    (1.0 + m_hm / m).powf(ALTER_SLOPE)
}

#[derive(Debug, Clone)]
pub struct MassFunctionWdm<T: TransferFramework = Transfer> {
    hmf: MassFunction<TransferWdm<T>>,
    params: ParameterSet,
    dndm: Cached<Arc<[f64]>>,
    ngtm: Cached<Arc<[f64]>>,
}

impl Default for MassFunctionWdm<Transfer> {
    fn default() -> Self {
        Self::new(Transfer::default())
    }
}

impl MassFunctionWdm<Transfer> {
    pub fn with_params(params: &BTreeMap<String, ParamValue>) -> WdmResult<Self> {
        let mut mf = Self::default();
        mf.update(params)?;
        Ok(mf)
    }
}

impl<T: TransferFramework> MassFunctionWdm<T> {
    pub fn new(base: T) -> Self {
        Self::from_mass_function(MassFunction::new(TransferWdm::new(base)))
    }

    /// Wrap an already configured mass function (e.g. one with a custom registry).
    pub fn from_mass_function(hmf: MassFunction<TransferWdm<T>>) -> Self {
        Self {
            hmf,
            params: ParameterSet::new().declare(WDM_ALTER, false, cache::flag),
            dndm: Cached::new(),
            ngtm: Cached::new(),
        }
    }

    pub fn mass_function(&self) -> &MassFunction<TransferWdm<T>> {
        &self.hmf
    }

    pub fn mass_function_mut(&mut self) -> &mut MassFunction<TransferWdm<T>> {
        &mut self.hmf
    }

    pub fn m(&mut self) -> WdmResult<Arc<[f64]>> {
        self.hmf.m()
    }

    /// dn/dM, with the half-mode suppression applied when `wdm_alter` is set.
    pub fn dndm(&mut self) -> WdmResult<Arc<[f64]>> {
        let model = self.hmf.transfer_mut().wdm()?;
        let base = self.hmf.dndm()?;
        let mut deps = self.params.stamps(&[WDM_ALTER])?;
        deps.push(required_stamp(self.hmf.transfer(), WDM)?);
        deps.push(required_stamp(&self.hmf, DNDM)?);
        if let Some(d) = self.dndm.fresh(&deps) {
            return Ok(d);
        }

        let dndm = if self.params.flag(WDM_ALTER)? {
            let m_hm = model.m_hm();
            let m = self.hmf.m()?;
            m.iter()
                .zip(base.iter())
                .map(|(mi, d)| d * alter_factor(*mi, m_hm))
                .collect()
        } else {
            base
        };
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

    /// Cumulative counts from this layer's `dndm`, so the suppression carries through.
    pub fn ngtm(&mut self) -> WdmResult<Arc<[f64]>> {
        let m = self.m()?;
        let dndm = self.dndm()?;
        let deps = vec![
            required_stamp(&self.hmf, M)?,
            self.dndm.stamp(),
            required_stamp(&self.hmf, "ngtm_tail")?,
        ];
        if let Some(n) = self.ngtm.fresh(&deps) {
            return Ok(n);
        }
        let counts = cumulative_counts(&m, &dndm, self.hmf.ngtm_tail()?);
        Ok(self.ngtm.store(deps, counts))
    }
}

impl<T: TransferFramework> Framework for MassFunctionWdm<T> {
    fn set_parameter(&mut self, name: &str, value: ParamValue) -> WdmResult<bool> {
        if self.params.contains(name) {
            self.params.set(name, value)
        } else {
            self.hmf.set_parameter(name, value)
        }
    }

    fn parameter(&self, name: &str) -> Option<ParamValue> {
        match self.params.get(name) {
            Some(v) => Some(v.clone()),
            None => self.hmf.parameter(name),
        }
    }

    fn parameter_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.params.names().collect();
        names.extend(self.hmf.parameter_names());
        names
    }

    fn stamp(&self, name: &str) -> Option<Stamp> {
        match name {
            DNDM => Some(self.dndm.stamp()),
            NGTM => Some(self.ngtm.stamp()),
            _ if self.params.contains(name) => self.params.stamp(name),
            _ => self.hmf.stamp(name),
        }
    }

    fn quantity(&mut self, name: &str) -> WdmResult<Quantity> {
        Ok(match name {
            DNDM => self.dndm()?.into(),
            "dndlnm" => self.dndlnm()?.into(),
            "dndlog10m" => self.dndlog10m()?.into(),
            NGTM => self.ngtm()?.into(),
            other => return self.hmf.quantity(other),
        })
    }

    fn quantity_names(&self) -> Vec<&'static str> {
        self.hmf.quantity_names()
    }

    fn computations(&self, name: &str) -> Option<u64> {
        match name {
            DNDM => Some(self.dndm.computations()),
            NGTM => Some(self.ngtm.computations()),
            _ => self.hmf.computations(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::transfer::LN_P0;

    fn coarse() -> MassFunctionWdm {
        let mut mf = MassFunctionWdm::default();
        mf.set_parameter("dlog10m", 0.1.into()).unwrap();
        mf.set_parameter("dlnk", 0.1.into()).unwrap();
        mf.set_parameter("mmin", 7.0.into()).unwrap();
        mf.set_parameter("mmax", 12.0.into()).unwrap();
        mf
    }

    #[test]
    fn test_alter_factor() {
        assert!((alter_factor(1e9, 1e9) - 2f64.powf(-0.6)).abs() < 1e-15);
        assert!((alter_factor(1e20, 1e8) - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_wdm_alter_toggle_is_reversible() {
        let mut mf = coarse();
        let plain = mf.dndm().unwrap();
        let m = mf.m().unwrap();
        let m_hm = mf.quantity("m_hm").unwrap().as_scalar().unwrap();

        mf.set_parameter(WDM_ALTER, true.into()).unwrap();
        let altered = mf.dndm().unwrap();
        for i in 0..m.len() {
            let expected = plain[i] * (1.0 + m_hm / m[i]).powf(-0.6);
            assert!((altered[i] - expected).abs() <= 1e-12 * expected);
        }

        mf.set_parameter(WDM_ALTER, false.into()).unwrap();
        let restored = mf.dndm().unwrap();
        assert_eq!(&*restored, &*plain);
    }

    #[test]
    fn test_suppression_relative_to_cdm() {
        let mut wdm = coarse();
        let mut cdm = MassFunction::default();
        for (k, v) in [("dlog10m", 0.1), ("dlnk", 0.1), ("mmin", 7.0), ("mmax", 12.0)] {
            cdm.set_parameter(k, v.into()).unwrap();
        }
        wdm.set_parameter("wdm_mass", 1.0.into()).unwrap();
        let a = wdm.dndm().unwrap();
        let b = cdm.dndm().unwrap();
        // Small haloes are strongly suppressed, large ones barely
        assert!(a[0] < 0.5 * b[0]);
        let last = a.len() - 1;
        assert!((a[last] / b[last] - 1.0).abs() < 0.1);
    }

    #[test]
    fn test_ngtm_follows_altered_dndm() {
        let mut mf = coarse();
        let before = mf.ngtm().unwrap();
        mf.set_parameter(WDM_ALTER, true.into()).unwrap();
        let after = mf.ngtm().unwrap();
        assert!(after[0] < before[0]);
        assert_eq!(mf.computations(NGTM), Some(2));
    }

    #[test]
    fn test_wdm_mass_invalidates_chain_but_ngtm_tail_does_not() {
        let mut mf = coarse();
        mf.dndm().unwrap();
        assert_eq!(mf.computations(WDM), Some(1));
        assert_eq!(mf.computations(LN_P0), Some(1));
        assert_eq!(mf.computations(DNDM), Some(1));

        mf.set_parameter("ngtm_tail", false.into()).unwrap();
        mf.dndm().unwrap();
        assert_eq!(mf.computations(WDM), Some(1));
        assert_eq!(mf.computations(LN_P0), Some(1));
        assert_eq!(mf.computations(DNDM), Some(1));

        mf.set_parameter("wdm_mass", 2.0.into()).unwrap();
        mf.dndm().unwrap();
        assert_eq!(mf.computations(WDM), Some(2));
        assert_eq!(mf.computations(LN_P0), Some(2));
        assert_eq!(mf.computations(DNDM), Some(2));
    }
}
