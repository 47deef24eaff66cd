//! Parameter sets and lazily recomputed derived quantities.
//!
//! Every framework in the crate keeps its public knobs in a [`ParameterSet`]
//! and each derived quantity in a [`Cached`] entry. A cached entry remembers
//! the [`Stamp`] of every dependency it was computed against and is
//! recomputed if and only if one of those stamps no longer matches.
//!
//! * A parameter's stamp is its current value, so setting a parameter back to
//!   an earlier value makes entries computed against that value fresh again.
//! * A derived quantity's stamp is its revision. The revision only moves when
//!   a recomputation produces a value that differs from the previous one, so
//!   downstream entries survive an upstream recomputation that changed
//!   nothing.
//!
//! Floating point values compare equal within a relative tolerance of
//! [`VALUE_RTOL`]; arrays and maps compare elementwise with the same rule.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{WdmError, WdmResult};
use crate::models::wdm::registry::WdmClass;

/// Relative tolerance used when deciding whether a floating point dependency changed.
pub const VALUE_RTOL: f64 = 1e-12;

/// Monotonic per-entry revision counter.
pub type Revision = u64;

/// Float comparison used by the whole dependency graph.
pub fn approx_eq(a: f64, b: f64) -> bool {
    if a == b || (a.is_nan() && b.is_nan()) {
        return true;
    }
    (a - b).abs() <= VALUE_RTOL * a.abs().max(b.abs())
}

fn slices_match(a: &[f64], b: &[f64]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| approx_eq(*x, *y))
}

/// A parameter value as supplied by callers or by a TOML config.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Float(f64),
    Text(String),
    Map(BTreeMap<String, f64>),
    /// Direct reference to a WDM model class; only constructible from code.
    #[serde(skip)]
    Class(WdmClass),
}

impl ParamValue {
    /// Value equality with the crate-wide float tolerance.
    pub fn matches(&self, other: &ParamValue) -> bool {
        match (self, other) {
            (ParamValue::Bool(a), ParamValue::Bool(b)) => a == b,
            (ParamValue::Float(a), ParamValue::Float(b)) => approx_eq(*a, *b),
            (ParamValue::Text(a), ParamValue::Text(b)) => a == b,
            (ParamValue::Map(a), ParamValue::Map(b)) => {
                a.len() == b.len()
                    && a
                        .iter()
                        .zip(b)
                        .all(|((ka, va), (kb, vb))| ka == kb && approx_eq(*va, *vb))
            }
            (ParamValue::Class(a), ParamValue::Class(b)) => a == b,
            _ => false,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ParamValue::Bool(_) => "bool",
            ParamValue::Float(_) => "float",
            ParamValue::Text(_) => "string",
            ParamValue::Map(_) => "map",
            ParamValue::Class(_) => "WDM class",
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Text(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, f64>> {
        match self {
            ParamValue::Map(v) => Some(v),
            _ => None,
        }
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Text(v)
    }
}

impl From<BTreeMap<String, f64>> for ParamValue {
    fn from(v: BTreeMap<String, f64>) -> Self {
        ParamValue::Map(v)
    }
}

impl From<WdmClass> for ParamValue {
    fn from(v: WdmClass) -> Self {
        ParamValue::Class(v)
    }
}

/// What a cached entry remembers about one of its dependencies.
#[derive(Debug, Clone, PartialEq)]
pub enum Stamp {
    Value(ParamValue),
    Revision(Revision),
}

impl Stamp {
    pub fn matches(&self, other: &Stamp) -> bool {
        match (self, other) {
            (Stamp::Value(a), Stamp::Value(b)) => a.matches(b),
            (Stamp::Revision(a), Stamp::Revision(b)) => a == b,
            _ => false,
        }
    }

    /// Stamp for a value that is derived on the fly rather than cached (e.g. mean density).
    pub fn float(v: f64) -> Self {
        Stamp::Value(ParamValue::Float(v))
    }
}

// ------------------------------------------------------------------------------------------------
// Validators
// ------------------------------------------------------------------------------------------------

/// Checks and normalises a value before it is stored under `name`.
pub type Validator = fn(&str, ParamValue) -> WdmResult<ParamValue>;

/// Floats pass through; numeric strings are parsed.
fn coerce_float(name: &str, value: ParamValue) -> WdmResult<f64> {
    match value {
        ParamValue::Float(v) => Ok(v),
        ParamValue::Text(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| WdmError::invalid(name, format!("must be a number ({s})"))),
        other => Err(WdmError::invalid(
            name,
            format!("must be a number, got {}", other.kind()),
        )),
    }
}

pub fn finite(name: &str, value: ParamValue) -> WdmResult<ParamValue> {
    let v = coerce_float(name, value)?;
    if !v.is_finite() {
        return Err(WdmError::invalid(name, format!("must be finite ({v})")));
    }
    Ok(ParamValue::Float(v))
}

pub fn positive(name: &str, value: ParamValue) -> WdmResult<ParamValue> {
    let v = coerce_float(name, value)?;
    if !(v > 0.0) || !v.is_finite() {
        return Err(WdmError::invalid(name, format!("must be > 0 ({v})")));
    }
    Ok(ParamValue::Float(v))
}

pub fn non_negative(name: &str, value: ParamValue) -> WdmResult<ParamValue> {
    let v = coerce_float(name, value)?;
    if !(v >= 0.0) || !v.is_finite() {
        return Err(WdmError::invalid(name, format!("must be >= 0 ({v})")));
    }
    Ok(ParamValue::Float(v))
}

pub fn flag(name: &str, value: ParamValue) -> WdmResult<ParamValue> {
    match value {
        ParamValue::Bool(_) => Ok(value),
        other => Err(WdmError::invalid(
            name,
            format!("must be a boolean, got {}", other.kind()),
        )),
    }
}

pub fn map(name: &str, value: ParamValue) -> WdmResult<ParamValue> {
    match value {
        ParamValue::Map(_) => Ok(value),
        other => Err(WdmError::invalid(
            name,
            format!("must be a map of numbers, got {}", other.kind()),
        )),
    }
}

// ------------------------------------------------------------------------------------------------
// Parameter sets
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Slot {
    value: ParamValue,
    validator: Validator,
}

/// Declared parameters of one framework layer.
#[derive(Debug, Clone, Default)]
pub struct ParameterSet {
    slots: BTreeMap<&'static str, Slot>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a parameter with its default. Defaults are trusted and not validated.
    pub fn declare(
        mut self,
        name: &'static str,
        default: impl Into<ParamValue>,
        validator: Validator,
    ) -> Self {
        self.slots.insert(
            name,
            Slot {
                value: default.into(),
                validator,
            },
        );
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.slots.get(name).map(|s| &s.value)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.slots.keys().copied()
    }

    /// Validate and store. Returns whether the stored value changed.
    pub fn set(&mut self, name: &str, value: ParamValue) -> WdmResult<bool> {
        let slot = self
            .slots
            .get_mut(name)
            .ok_or_else(|| WdmError::invalid(name, "no such parameter"))?;
        let value = (slot.validator)(name, value)?;
        if slot.value.matches(&value) {
            return Ok(false);
        }
        slot.value = value;
        Ok(true)
    }

    pub fn stamp(&self, name: &str) -> Option<Stamp> {
        self.get(name).map(|v| Stamp::Value(v.clone()))
    }

    /// Stamps for a list of declared names; undeclared names are a programming error
    /// surfaced as `InvalidParameter`.
    pub fn stamps(&self, names: &[&str]) -> WdmResult<Vec<Stamp>> {
        names
            .iter()
            .map(|n| {
                self.stamp(n)
                    .ok_or_else(|| WdmError::invalid(*n, "no such parameter"))
            })
            .collect()
    }

    pub fn float(&self, name: &str) -> WdmResult<f64> {
        self.get(name)
            .and_then(ParamValue::as_f64)
            .ok_or_else(|| WdmError::invalid(name, "expected a float"))
    }

    pub fn flag(&self, name: &str) -> WdmResult<bool> {
        self.get(name)
            .and_then(ParamValue::as_bool)
            .ok_or_else(|| WdmError::invalid(name, "expected a boolean"))
    }

    pub fn text(&self, name: &str) -> WdmResult<&str> {
        self.get(name)
            .and_then(ParamValue::as_str)
            .ok_or_else(|| WdmError::invalid(name, "expected a string"))
    }
}

// ------------------------------------------------------------------------------------------------
// Cached derived quantities
// ------------------------------------------------------------------------------------------------

/// Values that can live in a [`Cached`] entry.
pub trait CacheValue: Clone {
    /// Whether two computed values are the same for invalidation purposes.
    fn same_value(&self, other: &Self) -> bool;
}

impl CacheValue for f64 {
    fn same_value(&self, other: &Self) -> bool {
        approx_eq(*self, *other)
    }
}

impl CacheValue for Arc<[f64]> {
    fn same_value(&self, other: &Self) -> bool {
        Arc::ptr_eq(self, other) || slices_match(self, other)
    }
}

/// One memoized derived quantity.
#[derive(Debug, Clone)]
pub struct Cached<T> {
    value: Option<T>,
    seen: Vec<Stamp>,
    revision: Revision,
    computations: u64,
}

impl<T> Default for Cached<T> {
    fn default() -> Self {
        Self {
            value: None,
            seen: Vec::new(),
            revision: 0,
            computations: 0,
        }
    }
}

impl<T: CacheValue> Cached<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// The stored value, if it was computed against exactly these dependency stamps.
    pub fn fresh(&self, deps: &[Stamp]) -> Option<T> {
        let value = self.value.as_ref()?;
        let unchanged = self.seen.len() == deps.len()
            && self.seen.iter().zip(deps).all(|(a, b)| a.matches(b));
        unchanged.then(|| value.clone())
    }

    /// Record a freshly computed value and the stamps it was computed against.
    pub fn store(&mut self, deps: Vec<Stamp>, value: T) -> T {
        let changed = match &self.value {
            Some(previous) => !previous.same_value(&value),
            None => true,
        };
        if changed {
            self.revision += 1;
            self.value = Some(value.clone());
        }
        self.seen = deps;
        self.computations += 1;
        match &self.value {
            Some(v) if !changed => v.clone(),
            _ => value,
        }
    }

    /// Drop the stored value but keep the revision, so the next `store` always
    /// publishes a new revision to dependents computed against the old one.
    pub fn invalidate(&mut self) {
        self.value = None;
        self.seen.clear();
    }

    pub fn stamp(&self) -> Stamp {
        Stamp::Revision(self.revision)
    }

    pub fn computations(&self) -> u64 {
        self.computations
    }

    pub fn peek(&self) -> Option<&T> {
        self.value.as_ref()
    }
}

// ------------------------------------------------------------------------------------------------
// Named quantities
// ------------------------------------------------------------------------------------------------

/// Result of reading a named quantity from a framework.
#[derive(Debug, Clone)]
pub enum Quantity {
    Scalar(f64),
    Array(Arc<[f64]>),
}

impl Quantity {
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Quantity::Scalar(v) => Some(*v),
            Quantity::Array(_) => None,
        }
    }

    pub fn as_array(&self) -> Option<&Arc<[f64]>> {
        match self {
            Quantity::Array(v) => Some(v),
            Quantity::Scalar(_) => None,
        }
    }

    pub fn to_vec(&self) -> Vec<f64> {
        match self {
            Quantity::Scalar(v) => vec![*v],
            Quantity::Array(v) => v.to_vec(),
        }
    }
}

impl From<f64> for Quantity {
    fn from(v: f64) -> Self {
        Quantity::Scalar(v)
    }
}

impl From<Arc<[f64]>> for Quantity {
    fn from(v: Arc<[f64]>) -> Self {
        Quantity::Array(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arr(v: &[f64]) -> Arc<[f64]> {
        Arc::from(v)
    }

    #[test]
    fn test_parameter_set_reports_changes_by_value() {
        let mut params = ParameterSet::new().declare("h", 0.7, positive);
        assert!(!params.set("h", ParamValue::Float(0.7)).unwrap());
        assert!(!params.set("h", ParamValue::Float(0.7 * (1.0 + 1e-14))).unwrap());
        assert!(params.set("h", ParamValue::Float(0.68)).unwrap());
        assert_eq!(params.float("h").unwrap(), 0.68);
    }

    #[test]
    fn test_parameter_set_rejects_unknown_and_invalid() {
        let mut params = ParameterSet::new().declare("h", 0.7, positive);
        assert!(matches!(
            params.set("nope", ParamValue::Float(1.0)),
            Err(WdmError::InvalidParameter { .. })
        ));
        assert!(params.set("h", ParamValue::Float(-1.0)).is_err());
        assert!(params.set("h", ParamValue::Bool(true)).is_err());
        // Failed sets leave the stored value alone
        assert_eq!(params.float("h").unwrap(), 0.7);
    }

    #[test]
    fn test_numeric_strings_are_parsed() {
        let mut params = ParameterSet::new().declare("mx", 3.0, positive);
        assert!(params.set("mx", ParamValue::from("4.5")).unwrap());
        assert_eq!(params.float("mx").unwrap(), 4.5);
        assert!(params.set("mx", ParamValue::from("heavy")).is_err());
    }

    #[test]
    fn test_cached_fresh_only_for_matching_stamps() {
        let mut cache: Cached<Arc<[f64]>> = Cached::new();
        let deps = vec![Stamp::float(1.0), Stamp::Revision(3)];
        assert!(cache.fresh(&deps).is_none());

        let stored = cache.store(deps.clone(), arr(&[1.0, 2.0]));
        let again = cache.fresh(&deps).unwrap();
        assert!(Arc::ptr_eq(&stored, &again));
        assert_eq!(cache.computations(), 1);

        assert!(cache.fresh(&[Stamp::float(2.0), Stamp::Revision(3)]).is_none());
        assert!(cache.fresh(&[Stamp::float(1.0), Stamp::Revision(4)]).is_none());
    }

    #[test]
    fn test_revision_moves_only_when_value_changes() {
        let mut cache: Cached<Arc<[f64]>> = Cached::new();
        assert_eq!(cache.stamp(), Stamp::Revision(0));
        cache.store(vec![Stamp::float(1.0)], arr(&[1.0, 2.0]));
        assert_eq!(cache.stamp(), Stamp::Revision(1));

        // Recomputed under new deps but with an identical result
        cache.store(vec![Stamp::float(2.0)], arr(&[1.0, 2.0]));
        assert_eq!(cache.stamp(), Stamp::Revision(1));
        assert_eq!(cache.computations(), 2);

        cache.store(vec![Stamp::float(3.0)], arr(&[1.0, 2.5]));
        assert_eq!(cache.stamp(), Stamp::Revision(2));
    }

    #[test]
    fn test_invalidate_keeps_revision_moving() {
        let mut cache: Cached<Arc<[f64]>> = Cached::new();
        let deps = vec![Stamp::float(1.0)];
        cache.store(deps.clone(), arr(&[1.0]));
        assert_eq!(cache.stamp(), Stamp::Revision(1));

        cache.invalidate();
        assert!(cache.fresh(&deps).is_none());
        assert!(cache.peek().is_none());
        assert_eq!(cache.stamp(), Stamp::Revision(1));

        // Same value as before, yet dependents must still see a new revision
        cache.store(deps, arr(&[1.0]));
        assert_eq!(cache.stamp(), Stamp::Revision(2));
    }

    #[test]
    fn test_map_values_compare_elementwise() {
        let mut a = BTreeMap::new();
        a.insert("mu".to_string(), 1.12);
        let mut b = a.clone();
        assert!(ParamValue::Map(a.clone()).matches(&ParamValue::Map(b.clone())));
        b.insert("g_x".to_string(), 1.5);
        assert!(!ParamValue::Map(a).matches(&ParamValue::Map(b)));
    }
}
