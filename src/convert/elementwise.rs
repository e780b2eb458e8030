//! Elementwise arithmetic layers: Eltwise, Power and unfused Scale.

use super::{ConvertContext, along_axis, normalize_axis};
use crate::errors::ConvertError;
use crate::ir::{Literal, Op, ValueId};
use crate::model::Layer;

const ELTWISE_OPS: [&str; 3] = ["PROD", "SUM", "MAX"];

pub(super) fn eltwise(
    layer: &Layer,
    ctx: &mut ConvertContext<'_>,
) -> Result<Vec<ValueId>, ConvertError> {
    layer.expect_inputs(2)?;
    let lhs = ctx.input(layer, 0)?;
    let rhs = ctx.input(layer, 1)?;
    let (lhs_shape, rhs_shape) = (ctx.shape(lhs), ctx.shape(rhs));
    if lhs_shape != rhs_shape {
        return Err(ConvertError::shape(
            &layer.name,
            format!("operands {lhs_shape:?} and {rhs_shape:?} differ"),
        ));
    }

    let out = match layer.attr_variant("operation", &ELTWISE_OPS, 1)? {
        0 => ctx.apply(layer, Op::Multiply, &[lhs, rhs])?,
        2 => ctx.apply(layer, Op::Maximum, &[lhs, rhs])?,
        _ => {
            let coeff = layer.attr_floats("coeff")?;
            match coeff.as_slice() {
                [] => ctx.apply(layer, Op::Add, &[lhs, rhs])?,
                [a, b] => {
                    let a = ctx.constant(Literal::scalar(*a as f32));
                    let b = ctx.constant(Literal::scalar(*b as f32));
                    let lhs = ctx.apply(layer, Op::Multiply, &[lhs, a])?;
                    let rhs = ctx.apply(layer, Op::Multiply, &[rhs, b])?;
                    ctx.apply(layer, Op::Add, &[lhs, rhs])?
                }
                other => {
                    return Err(ConvertError::invalid(
                        &layer.name,
                        format!("expected 2 coefficients, found {}", other.len()),
                    ));
                }
            }
        }
    };
    Ok(vec![out])
}

pub(super) fn power(
    layer: &Layer,
    ctx: &mut ConvertContext<'_>,
) -> Result<Vec<ValueId>, ConvertError> {
    layer.expect_inputs(1)?;
    let data = ctx.input(layer, 0)?;
    let power = layer.attr_float("power", 1.0)?;
    let scale = layer.attr_float("scale", 1.0)?;
    let shift = layer.attr_float("shift", 0.0)?;

    let scale = ctx.scalar(scale as f32);
    let shift = ctx.scalar(shift as f32);
    let scaled = ctx.apply(layer, Op::Multiply, &[data, scale])?;
    let mut out = ctx.apply(layer, Op::Add, &[scaled, shift])?;
    if power != 1.0 {
        let exponent = ctx.scalar(power as f32);
        out = ctx.apply(layer, Op::Power, &[out, exponent])?;
    }
    Ok(vec![out])
}

/// Per-channel affine transform of a Scale layer that was not fused.
pub(super) fn scale(
    layer: &Layer,
    ctx: &mut ConvertContext<'_>,
) -> Result<Vec<ValueId>, ConvertError> {
    layer.expect_inputs(1)?;
    let data = ctx.input(layer, 0)?;
    let rank = ctx.shape(data).len();
    let axis = normalize_axis(layer, layer.attr_int("axis", 1)?, rank)?;

    let len = layer.blob(0, "gain")?.len();
    let shape = along_axis(rank, axis, len);
    let gain = ctx.blob_literal(layer, 0, "gain", shape.clone())?;
    let shift = if layer.attr_bool("bias_term", false)? {
        ctx.blob_literal(layer, 1, "shift", shape)?
    } else {
        Literal::full(shape, 0.0)
    };

    let gain = ctx.constant(gain);
    let shift = ctx.constant(shift);
    let scaled = ctx.apply(layer, Op::Multiply, &[data, gain])?;
    Ok(vec![ctx.apply(layer, Op::Add, &[scaled, shift])?])
}
