//! Fully connected and embedding layers.

use super::ConvertContext;
use crate::errors::ConvertError;
use crate::ir::{DType, Op, ValueId};
use crate::model::Layer;

/// Columns of a weight blob holding `rows` rows, or `ShapeMismatch`.
fn columns(layer: &Layer, rows: usize) -> Result<usize, ConvertError> {
    let len = layer.blob(0, "weight")?.len();
    if rows == 0 || len % rows != 0 {
        return Err(ConvertError::shape(
            &layer.name,
            format!("weight blob with {len} values does not split into {rows} rows"),
        ));
    }
    Ok(len / rows)
}

fn dims(shape: &[usize]) -> Vec<i64> {
    shape.iter().map(|&d| d as i64).collect()
}

/// InnerProduct: `y = x · Wᵀ + b` over the flattened input.
pub(super) fn inner_product(
    layer: &Layer,
    ctx: &mut ConvertContext<'_>,
) -> Result<Vec<ValueId>, ConvertError> {
    layer.expect_inputs(1)?;
    let data = ctx.input(layer, 0)?;
    let axis = layer.attr_int("axis", 1)?;
    if axis != 1 {
        return Err(ConvertError::invalid(
            &layer.name,
            format!("only axis 1 is supported, got {axis}"),
        ));
    }

    let units = layer.require_usize("num_output")?;
    let features = columns(layer, units)?;
    let weight = ctx.blob_literal(layer, 0, "weight", vec![units, features])?;
    let weight = ctx.constant(weight);

    let flat = ctx.apply(
        layer,
        Op::Reshape {
            newshape: vec![-1, features as i64],
        },
        &[data],
    )?;
    let mut out = ctx.apply(layer, Op::Dense { units }, &[flat, weight])?;
    if layer.attr_bool("bias_term", true)? {
        let bias = ctx.blob_vector(layer, 1, "bias")?;
        out = ctx.apply(layer, Op::BiasAdd { axis: 1 }, &[out, bias])?;
    }
    Ok(vec![out])
}

/// Embed: row lookup into a `[input_dim, num_output]` table.
pub(super) fn embed(
    layer: &Layer,
    ctx: &mut ConvertContext<'_>,
) -> Result<Vec<ValueId>, ConvertError> {
    layer.expect_inputs(1)?;
    let indices = ctx.input(layer, 0)?;
    let input_shape = ctx.shape(indices);
    let units = layer.require_usize("num_output")?;
    let input_dim = layer.require_usize("input_dim")?;

    let table = ctx.blob_literal(layer, 0, "weight", vec![input_dim, units])?;
    let table = ctx.constant(table);

    let indices = ctx.apply(layer, Op::Cast { dtype: DType::Int32 }, &[indices])?;
    let flat = ctx.apply(layer, Op::Reshape { newshape: vec![-1] }, &[indices])?;
    let mut out = ctx.apply(layer, Op::Take { axis: 0 }, &[table, flat])?;
    if layer.attr_bool("bias_term", true)? {
        let bias = ctx.blob_vector(layer, 1, "bias")?;
        out = ctx.apply(layer, Op::Add, &[out, bias])?;
    }

    let mut target = dims(&input_shape);
    target.push(units as i64);
    Ok(vec![ctx.apply(layer, Op::Reshape { newshape: target }, &[out])?])
}
