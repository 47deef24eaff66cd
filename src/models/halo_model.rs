//! Name-resolved framework used by the fitting driver.
//!
//! Config files pick a framework by name and configure it with a keyword
//! table. [`HaloModel`] is the closed set of frameworks the crate ships, so a
//! fit can hold one by value, clone it per objective evaluation and hand the
//! clones to parallel workers.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::cache::{ParamValue, Quantity, Stamp};
use crate::error::{WdmError, WdmResult};
use crate::models::hmf::{MassFunction, MassFunctionWdm, MASS_QUANTITIES};
use crate::models::traits::{Framework, TransferFramework};
use crate::models::transfer::{Transfer, TransferWdm};

#[derive(Debug, Clone)]
pub enum HaloModel {
    Transfer(Transfer),
    TransferWdm(TransferWdm),
    MassFunction(MassFunction),
    MassFunctionWdm(MassFunctionWdm),
}

impl HaloModel {
    pub const NAMES: &'static [&'static str] =
        &["Transfer", "TransferWdm", "MassFunction", "MassFunctionWdm"];

    /// Framework with default parameters.
    pub fn from_name(name: &str) -> WdmResult<Self> {
        Ok(match name {
            "Transfer" => HaloModel::Transfer(Transfer::default()),
            "TransferWdm" => HaloModel::TransferWdm(TransferWdm::default()),
            "MassFunction" => HaloModel::MassFunction(MassFunction::default()),
            "MassFunctionWdm" => HaloModel::MassFunctionWdm(MassFunctionWdm::default()),
            other => return Err(WdmError::UnknownFramework(other.to_string())),
        })
    }

    /// Framework `name` configured with `params`.
    pub fn build(name: &str, params: &BTreeMap<String, ParamValue>) -> WdmResult<Self> {
        let mut model = Self::from_name(name)?;
        model.update(params)?;
        Ok(model)
    }

    pub fn name(&self) -> &'static str {
        match self {
            HaloModel::Transfer(_) => "Transfer",
            HaloModel::TransferWdm(_) => "TransferWdm",
            HaloModel::MassFunction(_) => "MassFunction",
            HaloModel::MassFunctionWdm(_) => "MassFunctionWdm",
        }
    }

    fn inner(&self) -> &dyn Framework {
        match self {
            HaloModel::Transfer(f) => f,
            HaloModel::TransferWdm(f) => f,
            HaloModel::MassFunction(f) => f,
            HaloModel::MassFunctionWdm(f) => f,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Framework {
        match self {
            HaloModel::Transfer(f) => f,
            HaloModel::TransferWdm(f) => f,
            HaloModel::MassFunction(f) => f,
            HaloModel::MassFunctionWdm(f) => f,
        }
    }

    /// Abscissa an array quantity is tabulated on: halo mass (M_sun/h) for
    /// mass-function quantities, wavenumber k (h/Mpc) otherwise.
    pub fn axis(&mut self, quantity: &str) -> WdmResult<Arc<[f64]>> {
        let on_mass_grid = MASS_QUANTITIES.contains(&quantity);
        match self {
            HaloModel::MassFunction(f) if on_mass_grid => f.m(),
            HaloModel::MassFunctionWdm(f) if on_mass_grid => f.m(),
            HaloModel::Transfer(f) => wavenumbers(f),
            HaloModel::TransferWdm(f) => wavenumbers(f),
            HaloModel::MassFunction(f) => wavenumbers(f.transfer_mut()),
            HaloModel::MassFunctionWdm(f) => wavenumbers(f.mass_function_mut().transfer_mut()),
        }
    }
}

fn wavenumbers<T: TransferFramework>(t: &mut T) -> WdmResult<Arc<[f64]>> {
    Ok(t.lnk()?.iter().map(|lk| lk.exp()).collect())
}

impl Framework for HaloModel {
    fn set_parameter(&mut self, name: &str, value: ParamValue) -> WdmResult<bool> {
        self.inner_mut().set_parameter(name, value)
    }

    fn parameter(&self, name: &str) -> Option<ParamValue> {
        self.inner().parameter(name)
    }

    fn parameter_names(&self) -> Vec<&'static str> {
        self.inner().parameter_names()
    }

    fn stamp(&self, name: &str) -> Option<Stamp> {
        self.inner().stamp(name)
    }

    fn quantity(&mut self, name: &str) -> WdmResult<Quantity> {
        self.inner_mut().quantity(name)
    }

    fn quantity_names(&self) -> Vec<&'static str> {
        self.inner().quantity_names()
    }

    fn computations(&self, name: &str) -> Option<u64> {
        self.inner().computations(name)
    }
}
