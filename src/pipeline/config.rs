//! Translation configuration.

use std::collections::HashMap;

use crate::ir::DType;

/// Caller-supplied overrides and pass toggles for [`translate`](super::translate).
#[derive(Debug, Clone)]
pub struct TranslateConfig {
    /// Shape of each model input, keyed by tensor name.
    pub input_shapes: HashMap<String, Vec<usize>>,
    /// Element type of each model input, keyed by tensor name.
    pub input_dtypes: HashMap<String, DType>,
    /// Element type of inputs without an entry in `input_dtypes`.
    pub default_dtype: DType,
    /// Whether in-place layers are renamed before conversion.
    pub normalize_in_place: bool,
    /// Whether adjacent BatchNorm/Scale pairs are fused.
    pub fuse_batch_norm: bool,
}

impl Default for TranslateConfig {
    fn default() -> Self {
        Self {
            input_shapes: HashMap::new(),
            input_dtypes: HashMap::new(),
            default_dtype: DType::Float32,
            normalize_in_place: true,
            fuse_batch_norm: true,
        }
    }
}

impl TranslateConfig {
    /// Creates a new TranslateConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the shape of input `name`.
    pub fn input_shape(mut self, name: &str, shape: &[usize]) -> Self {
        self.input_shapes.insert(name.to_string(), shape.to_vec());
        self
    }

    /// Sets the element type of input `name`.
    pub fn input_dtype(mut self, name: &str, dtype: DType) -> Self {
        self.input_dtypes.insert(name.to_string(), dtype);
        self
    }

    pub fn default_dtype(mut self, dtype: DType) -> Self {
        self.default_dtype = dtype;
        self
    }

    /// Enables or disables in-place normalization.
    pub fn normalize_in_place(mut self, enabled: bool) -> Self {
        self.normalize_in_place = enabled;
        self
    }

    /// Enables or disables BatchNorm/Scale fusion.
    pub fn fuse_batch_norm(mut self, enabled: bool) -> Self {
        self.fuse_batch_norm = enabled;
        self
    }

    pub(crate) fn dtype_of(&self, name: &str) -> DType {
        self.input_dtypes
            .get(name)
            .copied()
            .unwrap_or(self.default_dtype)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TranslateConfig::default();
        assert!(config.input_shapes.is_empty());
        assert_eq!(config.default_dtype, DType::Float32);
        assert!(config.normalize_in_place);
        assert!(config.fuse_batch_norm);
    }

    #[test]
    fn test_config_builder() {
        let config = TranslateConfig::new()
            .input_shape("data", &[1, 3, 224, 224])
            .input_dtype("ids", DType::Int64)
            .fuse_batch_norm(false);

        assert_eq!(config.input_shapes["data"], vec![1, 3, 224, 224]);
        assert_eq!(config.dtype_of("ids"), DType::Int64);
        assert_eq!(config.dtype_of("data"), DType::Float32);
        assert!(!config.fuse_batch_norm);
    }
}
