//! A single named layer of the source network.

use serde::{Deserialize, Serialize};

use super::attribute::{AttrValue, Attributes};
use super::blob::Blob;
use crate::errors::ConvertError;

/// One processing step of the source model.
///
/// `inputs` and `outputs` are tensor names (`bottom` and `top` in Caffe
/// terms). Normalization and fusion rewrite them; everything else stays as
/// loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, alias = "bottom")]
    pub inputs: Vec<String>,
    #[serde(default, alias = "top")]
    pub outputs: Vec<String>,
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attributes: Attributes,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blobs: Vec<Blob>,
}

impl Layer {
    /// Creates a layer with no tensors, attributes or blobs.
    pub fn new(name: &str, kind: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: kind.to_string(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            attributes: Attributes::new(),
            blobs: Vec::new(),
        }
    }

    pub fn with_inputs(mut self, inputs: &[&str]) -> Self {
        self.inputs = inputs.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_outputs(mut self, outputs: &[&str]) -> Self {
        self.outputs = outputs.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_attr(mut self, key: &str, value: impl Into<AttrValue>) -> Self {
        self.attributes.insert(key, value);
        self
    }

    pub fn with_blob(mut self, blob: Blob) -> Self {
        self.blobs.push(blob);
        self
    }

    /// True when the layer overwrites its single input tensor.
    pub fn is_in_place(&self) -> bool {
        self.inputs.len() == 1 && self.outputs.len() == 1 && self.inputs[0] == self.outputs[0]
    }

    /// Returns blob `index` or `MissingParameter` naming this layer.
    pub fn blob(&self, index: usize, what: &str) -> Result<&Blob, ConvertError> {
        self.blobs
            .get(index)
            .ok_or_else(|| ConvertError::MissingParameter {
                layer: self.name.clone(),
                index,
                what: what.to_string(),
            })
    }

    /// Checks the number of declared inputs.
    pub fn expect_inputs(&self, count: usize) -> Result<(), ConvertError> {
        if self.inputs.len() != count {
            return Err(ConvertError::invalid(
                &self.name,
                format!(
                    "expected {count} input(s), found {}",
                    self.inputs.len()
                ),
            ));
        }
        Ok(())
    }

    // Typed attribute access; a value of the wrong type is an invalid attribute.

    pub fn attr_bool(&self, key: &str, default: bool) -> Result<bool, ConvertError> {
        self.attributes
            .bool(key)
            .map(|v| v.unwrap_or(default))
            .map_err(|e| ConvertError::invalid(&self.name, e.to_string()))
    }

    pub fn attr_int(&self, key: &str, default: i64) -> Result<i64, ConvertError> {
        self.attr_int_opt(key).map(|v| v.unwrap_or(default))
    }

    pub fn attr_int_opt(&self, key: &str) -> Result<Option<i64>, ConvertError> {
        self.attributes
            .int(key)
            .map_err(|e| ConvertError::invalid(&self.name, e.to_string()))
    }

    /// Non-negative integer attribute.
    pub fn attr_usize(&self, key: &str, default: usize) -> Result<usize, ConvertError> {
        match self.attr_int_opt(key)? {
            None => Ok(default),
            Some(v) => usize::try_from(v).map_err(|_| {
                ConvertError::invalid(&self.name, format!("`{key}` must be non-negative, got {v}"))
            }),
        }
    }

    /// Required non-negative integer attribute.
    pub fn require_usize(&self, key: &str) -> Result<usize, ConvertError> {
        if !self.attributes.contains(key) {
            return Err(ConvertError::invalid(
                &self.name,
                format!("missing required attribute `{key}`"),
            ));
        }
        self.attr_usize(key, 0)
    }

    pub fn attr_float(&self, key: &str, default: f64) -> Result<f64, ConvertError> {
        self.attributes
            .float(key)
            .map(|v| v.unwrap_or(default))
            .map_err(|e| ConvertError::invalid(&self.name, e.to_string()))
    }

    pub fn attr_str(&self, key: &str) -> Result<Option<&str>, ConvertError> {
        self.attributes
            .str(key)
            .map_err(|e| ConvertError::invalid(&self.name, e.to_string()))
    }

    pub fn attr_ints(&self, key: &str) -> Result<Vec<i64>, ConvertError> {
        self.attributes
            .ints(key)
            .map_err(|e| ConvertError::invalid(&self.name, e.to_string()))
    }

    /// Repeated non-negative integer attribute.
    pub fn attr_usizes(&self, key: &str) -> Result<Vec<usize>, ConvertError> {
        self.attr_ints(key)?
            .into_iter()
            .map(|v| {
                usize::try_from(v).map_err(|_| {
                    ConvertError::invalid(
                        &self.name,
                        format!("`{key}` entries must be non-negative, got {v}"),
                    )
                })
            })
            .collect()
    }

    pub fn attr_floats(&self, key: &str) -> Result<Vec<f64>, ConvertError> {
        self.attributes
            .floats(key)
            .map_err(|e| ConvertError::invalid(&self.name, e.to_string()))
    }

    pub fn attr_record(&self, key: &str) -> Result<Option<&Attributes>, ConvertError> {
        self.attributes
            .record(key)
            .map_err(|e| ConvertError::invalid(&self.name, e.to_string()))
    }

    pub fn attr_variant(
        &self,
        key: &str,
        names: &[&'static str],
        default: usize,
    ) -> Result<usize, ConvertError> {
        self.attributes
            .variant(key, names)
            .map(|v| v.unwrap_or(default))
            .map_err(|e| ConvertError::invalid(&self.name, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_place_detection() {
        let relu = Layer::new("relu1", "ReLU")
            .with_inputs(&["conv1"])
            .with_outputs(&["conv1"]);
        assert!(relu.is_in_place());

        let conv = Layer::new("conv1", "Convolution")
            .with_inputs(&["data"])
            .with_outputs(&["conv1"]);
        assert!(!conv.is_in_place());
    }

    #[test]
    fn test_missing_blob_names_layer() {
        let layer = Layer::new("fc6", "InnerProduct");
        match layer.blob(0, "weight") {
            Err(ConvertError::MissingParameter { layer, index, .. }) => {
                assert_eq!(layer, "fc6");
                assert_eq!(index, 0);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_attribute_type_error_is_invalid_attribute() {
        let layer = Layer::new("pool1", "Pooling").with_attr("kernel_size", "three");
        assert!(matches!(
            layer.attr_int("kernel_size", 1),
            Err(ConvertError::InvalidAttribute { .. })
        ));
    }

    #[test]
    fn test_negative_usize_rejected() {
        let layer = Layer::new("slice", "Slice").with_attr("slice_point", vec![2i64, -1]);
        assert!(layer.attr_usizes("slice_point").is_err());
    }

    #[test]
    fn test_deserialize_caffe_field_names() {
        let layer: Layer = serde_json::from_str(
            r#"{"name": "conv1", "type": "Convolution", "bottom": ["data"], "top": ["conv1"],
                "attributes": {"num_output": 8, "kernel_size": 3}}"#,
        )
        .unwrap();
        assert_eq!(layer.inputs, vec!["data"]);
        assert_eq!(layer.outputs, vec!["conv1"]);
        assert_eq!(layer.require_usize("num_output").unwrap(), 8);
        assert!(layer.blobs.is_empty());
    }
}
