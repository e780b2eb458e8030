//! Resolution of in-place layers.
//!
//! A layer whose single output repeats its single input name overwrites that
//! tensor. Normalization gives each such layer its own output, named after
//! the layer, and points every later reader at the newest version.

use std::collections::HashMap;

use crate::model::{Layer, OperatorKind};

/// Original in-place tensor name to the name of the layer that last wrote it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenameRecord(HashMap<String, String>);

impl RenameRecord {
    /// Current name of `tensor`.
    pub fn resolve<'a>(&'a self, tensor: &'a str) -> &'a str {
        self.0.get(tensor).map(String::as_str).unwrap_or(tensor)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Layer name to the tensor name it originally declared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreRecord(HashMap<String, String>);

impl RestoreRecord {
    /// Name a caller knows `tensor` by.
    pub fn restore<'a>(&'a self, tensor: &'a str) -> &'a str {
        self.0.get(tensor).map(String::as_str).unwrap_or(tensor)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Result of [`normalize`].
#[derive(Debug, Clone)]
pub struct Normalized {
    pub layers: Vec<Layer>,
    pub renames: RenameRecord,
    pub restore: RestoreRecord,
}

/// Renames the outputs of in-place layers after the layers themselves.
pub fn normalize(mut layers: Vec<Layer>) -> Normalized {
    let mut renames = HashMap::new();
    let mut restore = HashMap::new();

    for layer in layers.iter_mut() {
        if OperatorKind::parse(&layer.kind) == Some(OperatorKind::Input) {
            continue;
        }
        let in_place = layer.is_in_place();

        for input in layer.inputs.iter_mut() {
            if let Some(current) = renames.get(input.as_str()) {
                *input = String::clone(current);
            }
        }

        if in_place {
            let original = std::mem::replace(&mut layer.outputs[0], layer.name.clone());
            log::debug!("in-place layer `{}` now writes `{}`", layer.name, layer.name);
            renames.insert(original.clone(), layer.name.clone());
            restore.insert(layer.name.clone(), original);
        }
    }

    Normalized {
        layers,
        renames: RenameRecord(renames),
        restore: RestoreRecord(restore),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn chain() -> Vec<Layer> {
        vec![
            Layer::new("data", "Input").with_outputs(&["data"]),
            Layer::new("conv1", "Convolution")
                .with_inputs(&["data"])
                .with_outputs(&["conv1"]),
            Layer::new("bn1", "BatchNorm")
                .with_inputs(&["conv1"])
                .with_outputs(&["conv1"]),
            Layer::new("relu1", "ReLU")
                .with_inputs(&["conv1"])
                .with_outputs(&["conv1"]),
            Layer::new("pool1", "Pooling")
                .with_inputs(&["conv1"])
                .with_outputs(&["pool1"]),
        ]
    }

    #[test]
    fn test_in_place_chain_is_renamed() {
        let normalized = normalize(chain());
        let layers = &normalized.layers;

        assert_eq!(layers[2].inputs, vec!["conv1"]);
        assert_eq!(layers[2].outputs, vec!["bn1"]);
        assert_eq!(layers[3].inputs, vec!["bn1"]);
        assert_eq!(layers[3].outputs, vec!["relu1"]);
        assert_eq!(layers[4].inputs, vec!["relu1"]);
    }

    #[test]
    fn test_outputs_unique_after_normalization() {
        let normalized = normalize(chain());
        let mut seen = HashSet::new();
        for layer in &normalized.layers {
            for output in &layer.outputs {
                assert!(seen.insert(output.clone()), "duplicate output {output}");
            }
        }
    }

    #[test]
    fn test_restore_record_maps_back() {
        let normalized = normalize(chain());
        assert_eq!(normalized.restore.restore("relu1"), "conv1");
        assert_eq!(normalized.restore.restore("pool1"), "pool1");
        assert_eq!(normalized.renames.resolve("conv1"), "relu1");
    }

    #[test]
    fn test_multi_input_layers_are_rewritten() {
        let layers = vec![
            Layer::new("data", "Input").with_outputs(&["data"]),
            Layer::new("relu", "ReLU")
                .with_inputs(&["data"])
                .with_outputs(&["data"]),
            Layer::new("sum", "Eltwise")
                .with_inputs(&["data", "other"])
                .with_outputs(&["sum"]),
        ];
        let normalized = normalize(layers);
        assert_eq!(normalized.layers[2].inputs, vec!["relu", "other"]);
        // Input layers are never renamed.
        assert_eq!(normalized.layers[0].outputs, vec!["data"]);
    }

    #[test]
    fn test_no_in_place_layers_is_identity() {
        let layers = vec![
            Layer::new("data", "Input").with_outputs(&["data"]),
            Layer::new("fc", "InnerProduct")
                .with_inputs(&["data"])
                .with_outputs(&["fc"]),
        ];
        let normalized = normalize(layers.clone());
        assert_eq!(normalized.layers, layers);
        assert!(normalized.renames.is_empty());
        assert!(normalized.restore.is_empty());
    }
}
