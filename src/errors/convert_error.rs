//! Translation error types.

use thiserror::Error;

/// Errors that can occur while translating a layer list into IR.
///
/// Every error aborts the whole translation; there is no partial result.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("The following operators are not supported: {}", kinds.join(", "))]
    UnsupportedOperator { kinds: Vec<String> },

    #[error("Tensor `{name}` is not bound")]
    UnboundTensor { name: String },

    #[error("Layer `{layer}` is missing parameter blob {index} ({what})")]
    MissingParameter {
        layer: String,
        index: usize,
        what: String,
    },

    #[error("Shape mismatch in layer `{layer}`: {message}")]
    ShapeMismatch { layer: String, message: String },

    #[error("Invalid attribute in layer `{layer}`: {message}")]
    InvalidAttribute { layer: String, message: String },

    #[error("Model input `{name}` has no shape override")]
    MissingInputShape { name: String },

    #[error("Invalid blob: {message}")]
    InvalidBlob { message: String },

    #[error("Evaluation error: {message}")]
    Evaluation { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ConvertError {
    pub(crate) fn invalid(layer: &str, message: impl Into<String>) -> Self {
        Self::InvalidAttribute {
            layer: layer.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn shape(layer: &str, message: impl Into<String>) -> Self {
        Self::ShapeMismatch {
            layer: layer.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn unbound(name: &str) -> Self {
        Self::UnboundTensor {
            name: name.to_string(),
        }
    }

    pub(crate) fn evaluation(message: impl Into<String>) -> Self {
        Self::Evaluation {
            message: message.into(),
        }
    }
}
