//! Source model description: layers, attributes and learned blobs.
//!
//! Decoding the binary model format is left to the caller. A JSON form of
//! the same structure can be read with [`NetDescription::from_json`] and
//! [`ParameterSet::from_json`].

mod attribute;
mod blob;
mod kind;
mod layer;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub use attribute::{AttrTypeError, AttrValue, Attributes};
pub use blob::Blob;
pub use kind::OperatorKind;
pub use layer::Layer;

use crate::errors::ConvertError;

/// Ordered layer list of a network.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetDescription {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Legacy top-level input declarations. When non-empty they replace the
    /// tops of `Input` layers as the model inputs.
    #[serde(default, alias = "input", skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<String>,
    #[serde(default, alias = "layer")]
    pub layers: Vec<Layer>,
}

impl NetDescription {
    pub fn new(layers: Vec<Layer>) -> Self {
        Self {
            name: None,
            inputs: Vec::new(),
            layers,
        }
    }

    pub fn from_json(json: &str) -> Result<Self, ConvertError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, ConvertError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Learned blobs keyed by layer name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSet(HashMap<String, Vec<Blob>>);

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, layer: &str, blobs: Vec<Blob>) {
        self.0.insert(layer.to_string(), blobs);
    }

    pub fn with(mut self, layer: &str, blobs: Vec<Blob>) -> Self {
        self.insert(layer, blobs);
        self
    }

    pub fn get(&self, layer: &str) -> Option<&[Blob]> {
        self.0.get(layer).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn from_json(json: &str) -> Result<Self, ConvertError> {
        Ok(serde_json::from_str(json)?)
    }
}
