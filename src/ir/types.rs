//! Tensor types and literal arrays.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::ConvertError;

/// Element type of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    #[default]
    Float32,
    Float64,
    Int32,
    Int64,
    Bool,
}

impl DType {
    pub fn name(self) -> &'static str {
        match self {
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Bool => "bool",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Static type of an IR value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorType {
    pub shape: Vec<usize>,
    pub dtype: DType,
}

impl TensorType {
    pub fn new(shape: Vec<usize>, dtype: DType) -> Self {
        Self { shape, dtype }
    }

    pub fn float32(shape: Vec<usize>) -> Self {
        Self::new(shape, DType::Float32)
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    pub(crate) fn with_shape(&self, shape: Vec<usize>) -> Self {
        Self::new(shape, self.dtype)
    }
}

impl fmt::Display for TensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: Vec<String> = self.shape.iter().map(|d| d.to_string()).collect();
        write!(f, "Tensor[({}), {}]", dims.join(", "), self.dtype)
    }
}

/// A concrete `float32` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Literal {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl Literal {
    /// Creates a literal, checking that the data fills the shape exactly.
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self, ConvertError> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(ConvertError::InvalidBlob {
                message: format!(
                    "literal of shape {shape:?} needs {expected} values, got {}",
                    data.len()
                ),
            });
        }
        Ok(Self { shape, data })
    }

    /// Rank-0 literal.
    pub fn scalar(value: f32) -> Self {
        Self {
            shape: Vec::new(),
            data: vec![value],
        }
    }

    /// Rank-1 literal.
    pub fn vector(data: Vec<f32>) -> Self {
        Self {
            shape: vec![data.len()],
            data,
        }
    }

    /// Literal filled with one value.
    pub fn full(shape: Vec<usize>, value: f32) -> Self {
        let len = shape.iter().product();
        Self {
            shape,
            data: vec![value; len],
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    pub fn tensor_type(&self) -> TensorType {
        TensorType::float32(self.shape.clone())
    }

    /// Same data under a new shape with the same element count.
    pub fn reshaped(self, shape: Vec<usize>) -> Result<Self, ConvertError> {
        Self::new(shape, self.data)
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.shape.is_empty() {
            return write!(f, "{}f", self.data[0]);
        }
        let values: Vec<String> = self.data.iter().map(|v| v.to_string()).collect();
        write!(f, "[{}]", values.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dtype_names() {
        assert_eq!(DType::Int32.to_string(), "int32");
        assert_eq!(DType::default().name(), "float32");
    }

    #[test]
    fn test_tensor_type_display() {
        let ty = TensorType::float32(vec![1, 3, 224, 224]);
        assert_eq!(ty.to_string(), "Tensor[(1, 3, 224, 224), float32]");
        assert_eq!(ty.numel(), 3 * 224 * 224);
    }

    #[test]
    fn test_literal_checks_length() {
        assert!(Literal::new(vec![2, 2], vec![0.0; 4]).is_ok());
        assert!(Literal::new(vec![2, 2], vec![0.0; 3]).is_err());
        assert_eq!(Literal::scalar(0.5).to_string(), "0.5f");
    }

    #[test]
    fn test_literal_reshape_keeps_data() {
        let literal = Literal::vector(vec![1.0, 2.0, 3.0, 4.0]);
        let square = literal.clone().reshaped(vec![2, 2]).unwrap();
        assert_eq!(square.shape(), &[2, 2]);
        assert_eq!(square.data(), literal.data());
        assert!(literal.reshaped(vec![3]).is_err());
    }
}
