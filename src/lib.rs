//! # caffe-ir
//!
//! Translates Caffe-style layer lists into a typed, SSA-form computation
//! graph.
//!
//! The source model is an ordered list of [`Layer`]s, each with named input
//! and output tensors, a bag of attributes and learned blobs. Translation
//! runs in a fixed sequence:
//!
//! 1. validate operator kinds and layer order
//! 2. rename the outputs of in-place layers
//! 3. fuse BatchNorm/Scale pairs
//! 4. convert every layer through its per-kind routine
//!
//! The result is an [`ir::Function`] plus the constants it refers to.
//!
//! ## Example
//!
//! ```
//! use caffe_ir::prelude::*;
//!
//! let net = NetDescription::new(vec![
//!     Layer::new("data", "Input").with_outputs(&["data"]),
//!     Layer::new("relu", "ReLU")
//!         .with_inputs(&["data"])
//!         .with_outputs(&["data"]),
//! ]);
//! let config = TranslateConfig::new().input_shape("data", &[1, 3]);
//!
//! let model = translate(net, &ParameterSet::new(), &config).unwrap();
//! assert_eq!(model.outputs, vec!["data"]);
//! assert!(model.function.to_string().contains("relu(%data)"));
//! ```

pub mod convert;
pub mod errors;
pub mod graph;
pub mod ir;
pub mod model;
pub mod pipeline;

// Re-exports for convenience
pub use errors::ConvertError;
pub use model::{Layer, NetDescription, OperatorKind, ParameterSet};
pub use pipeline::{TranslateConfig, TranslatedModel, translate};

/// Backend used by the reference evaluator in tests and examples.
pub type ReferenceBackend = burn::backend::NdArray;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::errors::ConvertError;
    pub use crate::ir::{DType, Function, GraphBuilder, Literal, Op, TensorType};
    pub use crate::model::{Attributes, Blob, Layer, NetDescription, OperatorKind, ParameterSet};
    pub use crate::pipeline::{TranslateConfig, TranslatedModel, translate};
    pub use crate::ReferenceBackend;
}
