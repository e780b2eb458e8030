//! Per-kind conversion of layers into IR.
//!
//! [`converter_for`] is an exhaustive match over [`OperatorKind`], so adding a
//! kind without a routine fails to compile. Every routine takes the layer and
//! a [`ConvertContext`] and returns one IR value per declared output.

mod activation;
mod conv;
mod dense;
mod elementwise;
mod norm;
pub mod param_str;
mod pool;
mod tensor_ops;
mod vision;

pub(crate) use vision::unsupported_python_layer;

use std::collections::HashMap;

use crate::errors::ConvertError;
use crate::graph::{MergedBatchNorm, SymbolTable};
use crate::ir::{GraphBuilder, Literal, Op, ValueId};
use crate::model::{Layer, OperatorKind};

/// Signature shared by all conversion routines.
pub type ConvertFn = fn(&Layer, &mut ConvertContext<'_>) -> Result<Vec<ValueId>, ConvertError>;

/// Returns the conversion routine for `kind`. `Input` layers have none; they
/// are bound as placeholders before conversion starts.
pub fn converter_for(kind: OperatorKind) -> Option<ConvertFn> {
    use OperatorKind as K;

    let routine: ConvertFn = match kind {
        K::Input => return None,
        K::Convolution | K::DepthwiseConvolution => conv::convolution,
        K::Deconvolution => conv::deconvolution,
        K::Pooling => pool::pooling,
        K::Eltwise => elementwise::eltwise,
        K::Power => elementwise::power,
        K::Scale => elementwise::scale,
        K::InnerProduct => dense::inner_product,
        K::Embed => dense::embed,
        K::BatchNorm => norm::batch_norm,
        K::SegBatchNorm => norm::seg_batch_norm,
        K::Lrn => norm::lrn,
        K::Normalize => norm::normalize,
        K::Concat => tensor_ops::concat,
        K::Crop => tensor_ops::crop,
        K::Flatten => tensor_ops::flatten,
        K::Permute => tensor_ops::permute,
        K::Reshape => tensor_ops::reshape,
        K::Slice => tensor_ops::slice,
        K::Relu => activation::relu,
        K::PRelu => activation::prelu,
        K::Sigmoid => activation::sigmoid,
        K::TanH => activation::tanh,
        K::Softmax => activation::softmax,
        K::Dropout => activation::dropout,
        K::PriorBox => vision::prior_box,
        K::Proposal => vision::proposal,
        K::Python => vision::python,
        K::RoiPooling => vision::roi_pooling,
        K::PsRoiPooling => vision::psroi_pooling,
        K::Upsample => vision::upsample,
        K::Resize => vision::resize,
    };
    Some(routine)
}

/// State a conversion routine reads and extends.
pub struct ConvertContext<'a> {
    pub graph: &'a mut GraphBuilder,
    pub symbols: &'a mut SymbolTable,
    /// Fused BatchNorm parameters keyed by layer name.
    pub merged: &'a HashMap<String, MergedBatchNorm>,
    /// Model input tensor names in declaration order.
    pub model_inputs: &'a [String],
}

impl ConvertContext<'_> {
    /// Resolves input `index` of `layer` through the symbol table.
    pub fn input(&self, layer: &Layer, index: usize) -> Result<ValueId, ConvertError> {
        let name = layer.inputs.get(index).ok_or_else(|| {
            ConvertError::invalid(&layer.name, format!("missing input {index}"))
        })?;
        self.symbols.get(name)
    }

    pub fn shape(&self, value: ValueId) -> Vec<usize> {
        self.graph.shape(value).to_vec()
    }

    /// Applies a single-result operator on behalf of `layer`.
    pub fn apply(
        &mut self,
        layer: &Layer,
        op: Op,
        inputs: &[ValueId],
    ) -> Result<ValueId, ConvertError> {
        self.graph
            .apply_single(op, inputs)
            .map_err(|e| ConvertError::shape(&layer.name, e.to_string()))
    }

    /// Applies a multi-result operator on behalf of `layer`.
    pub fn apply_multi(
        &mut self,
        layer: &Layer,
        op: Op,
        inputs: &[ValueId],
    ) -> Result<Vec<ValueId>, ConvertError> {
        self.graph
            .apply(op, inputs)
            .map_err(|e| ConvertError::shape(&layer.name, e.to_string()))
    }

    /// Exports `literal` as a named parameter.
    pub fn constant(&mut self, literal: Literal) -> ValueId {
        self.symbols.new_constant(self.graph, literal)
    }

    /// Embeds a scalar directly in the graph.
    pub fn scalar(&mut self, value: f32) -> ValueId {
        self.graph.literal(Literal::scalar(value))
    }

    /// Blob `index` of `layer` reshaped to `shape`.
    pub fn blob_literal(
        &self,
        layer: &Layer,
        index: usize,
        what: &str,
        shape: Vec<usize>,
    ) -> Result<Literal, ConvertError> {
        let blob = layer.blob(index, what)?;
        Literal::vector(blob.data().to_vec()).reshaped(shape).map_err(|_| {
            ConvertError::shape(
                &layer.name,
                format!("{what} blob with {} values does not fit the expected shape", blob.len()),
            )
        })
    }

    /// Blob `index` of `layer` exported as a rank-1 parameter.
    pub fn blob_vector(
        &mut self,
        layer: &Layer,
        index: usize,
        what: &str,
    ) -> Result<ValueId, ConvertError> {
        let data = layer.blob(index, what)?.data().to_vec();
        Ok(self.constant(Literal::vector(data)))
    }
}

/// Resolves a possibly negative axis against `rank`.
pub(crate) fn normalize_axis(layer: &Layer, axis: i64, rank: usize) -> Result<usize, ConvertError> {
    let resolved = if axis < 0 { axis + rank as i64 } else { axis };
    if resolved < 0 || resolved >= rank as i64 {
        return Err(ConvertError::invalid(
            &layer.name,
            format!("axis {axis} is out of range for rank {rank}"),
        ));
    }
    Ok(resolved as usize)
}

/// Shape that places `len` values on `axis` of a rank-`rank` tensor.
pub(crate) fn along_axis(rank: usize, axis: usize, len: usize) -> Vec<usize> {
    let mut shape = vec![1; rank.max(axis + 1)];
    shape[axis] = len;
    shape
}
