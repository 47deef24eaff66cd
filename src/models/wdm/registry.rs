//! Name-based resolution of WDM model classes.
//!
//! A [`WdmClass`] is a direct reference to a variant: its registered name plus
//! a constructor. A [`WdmRegistry`] maps names (as found in config files) to
//! classes. Adapters own a registry instead of consulting global state, so
//! callers can register their own variants per instance.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::wdm_model::{Bode01, Viel05, WdmInputs, WdmModel};
use crate::error::{WdmError, WdmResult};

/// Builds a model from cosmological inputs and model-parameter overrides.
pub type WdmConstructor = fn(WdmInputs, &BTreeMap<String, f64>) -> WdmResult<Arc<dyn WdmModel>>;

#[derive(Clone, Copy)]
pub struct WdmClass {
    name: &'static str,
    construct: WdmConstructor,
}

impl WdmClass {
    pub const fn new(name: &'static str, construct: WdmConstructor) -> Self {
        Self { name, construct }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn build(
        &self,
        inputs: WdmInputs,
        params: &BTreeMap<String, f64>,
    ) -> WdmResult<Arc<dyn WdmModel>> {
        (self.construct)(inputs, params)
    }
}

// Same name and same constructor. A class reusing a name with another
// constructor is a different class.
impl PartialEq for WdmClass {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.construct as usize == other.construct as usize
    }
}

impl fmt::Debug for WdmClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("WdmClass").field(&self.name).finish()
    }
}

pub const VIEL05: WdmClass = WdmClass::new(Viel05::NAME, Viel05::construct);
pub const BODE01: WdmClass = WdmClass::new(Bode01::NAME, Bode01::construct);

#[derive(Debug, Clone)]
pub struct WdmRegistry {
    classes: BTreeMap<&'static str, WdmClass>,
}

impl Default for WdmRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(VIEL05);
        registry.register(BODE01);
        registry
    }
}

impl WdmRegistry {
    pub fn empty() -> Self {
        Self {
            classes: BTreeMap::new(),
        }
    }

    /// Add a class, returning any class previously registered under the same name.
    pub fn register(&mut self, class: WdmClass) -> Option<WdmClass> {
        self.classes.insert(class.name, class)
    }

    pub fn get(&self, name: &str) -> WdmResult<WdmClass> {
        self.classes
            .get(name)
            .copied()
            .ok_or_else(|| WdmError::UnknownVariant {
                name: name.to_string(),
            })
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.classes.keys().copied().collect()
    }

    /// Look up `name` and construct it.
    pub fn build(
        &self,
        name: &str,
        inputs: WdmInputs,
        params: &BTreeMap<String, f64>,
    ) -> WdmResult<Arc<dyn WdmModel>> {
        self.get(name)?.build(inputs, params)
    }
}
