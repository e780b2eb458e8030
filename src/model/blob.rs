//! Learned parameter blobs.

use serde::{Deserialize, Serialize};

use crate::errors::ConvertError;

/// Immutable learned parameter array attached to a layer.
///
/// The length of `data` always equals the product of `shape`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawBlob")]
pub struct Blob {
    shape: Vec<usize>,
    data: Vec<f32>,
}

#[derive(Deserialize)]
struct RawBlob {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl TryFrom<RawBlob> for Blob {
    type Error = ConvertError;

    fn try_from(raw: RawBlob) -> Result<Self, Self::Error> {
        Blob::new(raw.shape, raw.data)
    }
}

impl Blob {
    /// Creates a blob, checking that the data length matches the shape.
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self, ConvertError> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(ConvertError::InvalidBlob {
                message: format!(
                    "shape {shape:?} holds {expected} values but {} were given",
                    data.len()
                ),
            });
        }
        Ok(Self { shape, data })
    }

    /// Creates a one-dimensional blob.
    pub fn from_vec(data: Vec<f32>) -> Self {
        Self {
            shape: vec![data.len()],
            data,
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
