//! Layer attribute values.
//!
//! Attributes mirror the per-kind parameter records of the source format
//! (`convolution_param`, `pooling_param`, ...) flattened into one bag per
//! layer. Nested messages such as `scale_filler` are kept as records.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Ints(Vec<i64>),
    Floats(Vec<f64>),
    Record(Attributes),
}

impl AttrValue {
    fn type_name(&self) -> &'static str {
        match self {
            AttrValue::Bool(_) => "bool",
            AttrValue::Int(_) => "int",
            AttrValue::Float(_) => "float",
            AttrValue::Str(_) => "string",
            AttrValue::Ints(_) => "int list",
            AttrValue::Floats(_) => "float list",
            AttrValue::Record(_) => "record",
        }
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        AttrValue::Bool(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Int(value)
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        AttrValue::Float(value)
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Str(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::Str(value)
    }
}

impl From<Vec<i64>> for AttrValue {
    fn from(value: Vec<i64>) -> Self {
        AttrValue::Ints(value)
    }
}

impl From<Vec<f64>> for AttrValue {
    fn from(value: Vec<f64>) -> Self {
        AttrValue::Floats(value)
    }
}

impl From<Attributes> for AttrValue {
    fn from(value: Attributes) -> Self {
        AttrValue::Record(value)
    }
}

/// Raised when an attribute exists but holds a value of the wrong type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("attribute `{key}` expected {expected}, found {found}")]
pub struct AttrTypeError {
    pub key: String,
    pub expected: &'static str,
    pub found: &'static str,
}

/// Attribute bag of a layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes(BTreeMap<String, AttrValue>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: &str, value: impl Into<AttrValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<AttrValue>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    fn mismatch(&self, key: &str, expected: &'static str) -> AttrTypeError {
        AttrTypeError {
            key: key.to_string(),
            expected,
            found: self.0.get(key).map(AttrValue::type_name).unwrap_or("nothing"),
        }
    }

    pub fn bool(&self, key: &str) -> Result<Option<bool>, AttrTypeError> {
        match self.get(key) {
            None => Ok(None),
            Some(AttrValue::Bool(v)) => Ok(Some(*v)),
            Some(AttrValue::Int(v)) => Ok(Some(*v != 0)),
            Some(_) => Err(self.mismatch(key, "bool")),
        }
    }

    pub fn int(&self, key: &str) -> Result<Option<i64>, AttrTypeError> {
        match self.get(key) {
            None => Ok(None),
            Some(AttrValue::Int(v)) => Ok(Some(*v)),
            Some(AttrValue::Ints(v)) if v.len() == 1 => Ok(Some(v[0])),
            Some(_) => Err(self.mismatch(key, "int")),
        }
    }

    pub fn float(&self, key: &str) -> Result<Option<f64>, AttrTypeError> {
        match self.get(key) {
            None => Ok(None),
            Some(AttrValue::Float(v)) => Ok(Some(*v)),
            Some(AttrValue::Int(v)) => Ok(Some(*v as f64)),
            Some(AttrValue::Floats(v)) if v.len() == 1 => Ok(Some(v[0])),
            Some(AttrValue::Ints(v)) if v.len() == 1 => Ok(Some(v[0] as f64)),
            Some(_) => Err(self.mismatch(key, "float")),
        }
    }

    pub fn str(&self, key: &str) -> Result<Option<&str>, AttrTypeError> {
        match self.get(key) {
            None => Ok(None),
            Some(AttrValue::Str(v)) => Ok(Some(v.as_str())),
            Some(_) => Err(self.mismatch(key, "string")),
        }
    }

    /// Repeated integer field; a scalar counts as a one-element list and a
    /// missing key as an empty one.
    pub fn ints(&self, key: &str) -> Result<Vec<i64>, AttrTypeError> {
        match self.get(key) {
            None => Ok(Vec::new()),
            Some(AttrValue::Int(v)) => Ok(vec![*v]),
            Some(AttrValue::Ints(v)) => Ok(v.clone()),
            Some(_) => Err(self.mismatch(key, "int list")),
        }
    }

    /// Repeated float field with the same scalar promotion as [`Attributes::ints`].
    pub fn floats(&self, key: &str) -> Result<Vec<f64>, AttrTypeError> {
        match self.get(key) {
            None => Ok(Vec::new()),
            Some(AttrValue::Float(v)) => Ok(vec![*v]),
            Some(AttrValue::Int(v)) => Ok(vec![*v as f64]),
            Some(AttrValue::Floats(v)) => Ok(v.clone()),
            Some(AttrValue::Ints(v)) => Ok(v.iter().map(|x| *x as f64).collect()),
            Some(_) => Err(self.mismatch(key, "float list")),
        }
    }

    pub fn record(&self, key: &str) -> Result<Option<&Attributes>, AttrTypeError> {
        match self.get(key) {
            None => Ok(None),
            Some(AttrValue::Record(v)) => Ok(Some(v)),
            Some(_) => Err(self.mismatch(key, "record")),
        }
    }

    /// Enumerated field given either by name or by ordinal.
    pub fn variant(
        &self,
        key: &str,
        names: &[&'static str],
    ) -> Result<Option<usize>, AttrTypeError> {
        let found = match self.get(key) {
            None => return Ok(None),
            Some(AttrValue::Int(v)) => usize::try_from(*v).ok().filter(|v| *v < names.len()),
            Some(AttrValue::Str(v)) => names.iter().position(|n| n.eq_ignore_ascii_case(v)),
            Some(_) => None,
        };
        found
            .map(Some)
            .ok_or_else(|| self.mismatch(key, "one of the enumerated values"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_promotes_to_list() {
        let attrs = Attributes::new().with("pad", 2i64);
        assert_eq!(attrs.ints("pad").unwrap(), vec![2]);
        assert!(attrs.ints("stride").unwrap().is_empty());
    }

    #[test]
    fn test_int_coerces_to_float() {
        let attrs = Attributes::new().with("scale", 3i64);
        assert_eq!(attrs.float("scale").unwrap(), Some(3.0));
    }

    #[test]
    fn test_type_mismatch_is_reported() {
        let attrs = Attributes::new().with("group", "two");
        let err = attrs.int("group").unwrap_err();
        assert_eq!(err.expected, "int");
        assert_eq!(err.found, "string");
    }

    #[test]
    fn test_type_error_is_std_error() {
        let err = Attributes::new().with("eps", true).float("eps").unwrap_err();
        let boxed: Box<dyn std::error::Error> = Box::new(err);
        assert_eq!(boxed.to_string(), "attribute `eps` expected float, found bool");
    }

    #[test]
    fn test_variant_accepts_name_or_ordinal() {
        let names = ["MAX", "AVE", "STOCHASTIC"];
        let by_name = Attributes::new().with("pool", "AVE");
        let by_index = Attributes::new().with("pool", 2i64);
        assert_eq!(by_name.variant("pool", &names).unwrap(), Some(1));
        assert_eq!(by_index.variant("pool", &names).unwrap(), Some(2));
        assert!(Attributes::new().with("pool", 7i64).variant("pool", &names).is_err());
    }

    #[test]
    fn test_json_values_pick_natural_types() {
        let attrs: Attributes = serde_json::from_str(
            r#"{"pad": [1, 2], "coeff": [0.5, 1.5], "eps": 1e-5, "filler": {"value": 2.0}}"#,
        )
        .unwrap();
        assert_eq!(attrs.get("pad"), Some(&AttrValue::Ints(vec![1, 2])));
        assert_eq!(attrs.floats("coeff").unwrap(), vec![0.5, 1.5]);
        assert_eq!(
            attrs.record("filler").unwrap().unwrap().float("value").unwrap(),
            Some(2.0)
        );
    }
}
