//! Model-specific parameter containers for WDM transfer-function variants.
//!
//! Each variant publishes a table of defaults. That table doubles as the
//! whitelist of recognised keys: a caller may override any of them, and any
//! key outside the table is rejected before a model instance exists.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{WdmError, WdmResult};

/// Resolved model parameters: the variant defaults with caller overrides applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    values: BTreeMap<String, f64>,
}

impl ModelParams {
    /// Merge `overrides` onto `defaults`, rejecting keys the variant does not know.
    pub fn resolve(
        variant: &str,
        defaults: &[(&str, f64)],
        overrides: &BTreeMap<String, f64>,
    ) -> WdmResult<Self> {
        for key in overrides.keys() {
            if !defaults.iter().any(|(k, _)| k == key) {
                return Err(WdmError::invalid(
                    key.clone(),
                    format!("{key} is not a valid argument for the {variant} WDM model"),
                ));
            }
        }

        let mut values: BTreeMap<String, f64> = defaults
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect();
        for (k, v) in overrides {
            if !v.is_finite() {
                return Err(WdmError::invalid(
                    k.clone(),
                    format!("must be finite for the {variant} WDM model ({v})"),
                ));
            }
            values.insert(k.clone(), *v);
        }
        Ok(Self { values })
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn as_map(&self) -> &BTreeMap<String, f64> {
        &self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFAULTS: &[(&str, f64)] = &[("mu", 1.12), ("g_x", 1.5)];

    #[test]
    fn test_defaults_fill_missing_keys() {
        let mut overrides = BTreeMap::new();
        overrides.insert("mu".to_string(), 5.0);
        let params = ModelParams::resolve("Viel05", DEFAULTS, &overrides).unwrap();
        assert_eq!(params.get("mu"), Some(5.0));
        assert_eq!(params.get("g_x"), Some(1.5));
    }

    #[test]
    fn test_unknown_key_names_key_and_variant() {
        let mut overrides = BTreeMap::new();
        overrides.insert("foo".to_string(), 1.0);
        let err = ModelParams::resolve("Viel05", DEFAULTS, &overrides).unwrap_err();
        match err {
            WdmError::InvalidParameter { name, reason } => {
                assert_eq!(name, "foo");
                assert!(reason.contains("Viel05"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
