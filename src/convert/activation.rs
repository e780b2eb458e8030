//! Activation layers.
//!
//! - ReLU: `max(0, x)`, or `max(αx, x)` with a configured or learned slope
//! - PReLU: per-channel learned slope on axis 1
//! - Sigmoid, TanH and Softmax along a configured axis
//! - Dropout: identity at inference, kept as an annotated operator

use super::{ConvertContext, normalize_axis};
use crate::errors::ConvertError;
use crate::ir::{Literal, Op, ValueId};
use crate::model::Layer;

fn unary(layer: &Layer, ctx: &mut ConvertContext<'_>, op: Op) -> Result<Vec<ValueId>, ConvertError> {
    layer.expect_inputs(1)?;
    let data = ctx.input(layer, 0)?;
    Ok(vec![ctx.apply(layer, op, &[data])?])
}

pub(super) fn relu(
    layer: &Layer,
    ctx: &mut ConvertContext<'_>,
) -> Result<Vec<ValueId>, ConvertError> {
    let slope = layer.attr_float("negative_slope", 0.0)?;
    let op = if slope != 0.0 {
        Op::LeakyRelu { alpha: slope }
    } else {
        match layer.blobs.first().map(|b| b.data()) {
            Some([learned]) => Op::LeakyRelu {
                alpha: f64::from(*learned),
            },
            _ => Op::Relu,
        }
    };
    unary(layer, ctx, op)
}

pub(super) fn prelu(
    layer: &Layer,
    ctx: &mut ConvertContext<'_>,
) -> Result<Vec<ValueId>, ConvertError> {
    layer.expect_inputs(1)?;
    let data = ctx.input(layer, 0)?;
    let channels = ctx.shape(data).get(1).copied().unwrap_or(1);

    let slope = layer.blob(0, "slope")?.data();
    let alpha = match slope {
        [shared] => vec![*shared; channels],
        per_channel => per_channel.to_vec(),
    };
    let alpha = ctx.constant(Literal::vector(alpha));
    Ok(vec![ctx.apply(layer, Op::PRelu { axis: 1 }, &[data, alpha])?])
}

pub(super) fn sigmoid(
    layer: &Layer,
    ctx: &mut ConvertContext<'_>,
) -> Result<Vec<ValueId>, ConvertError> {
    unary(layer, ctx, Op::Sigmoid)
}

pub(super) fn tanh(
    layer: &Layer,
    ctx: &mut ConvertContext<'_>,
) -> Result<Vec<ValueId>, ConvertError> {
    unary(layer, ctx, Op::Tanh)
}

pub(super) fn softmax(
    layer: &Layer,
    ctx: &mut ConvertContext<'_>,
) -> Result<Vec<ValueId>, ConvertError> {
    layer.expect_inputs(1)?;
    let data = ctx.input(layer, 0)?;
    let rank = ctx.shape(data).len();
    let axis = normalize_axis(layer, layer.attr_int("axis", 1)?, rank)?;
    Ok(vec![ctx.apply(layer, Op::Softmax { axis }, &[data])?])
}

pub(super) fn dropout(
    layer: &Layer,
    ctx: &mut ConvertContext<'_>,
) -> Result<Vec<ValueId>, ConvertError> {
    let rate = layer.attr_float("dropout_ratio", 0.5)?;
    unary(layer, ctx, Op::Dropout { rate })
}
