//! Normalization layers.

use super::{ConvertContext, along_axis};
use crate::errors::ConvertError;
use crate::graph::{DEFAULT_BN_EPS, moving_average_factor};
use crate::ir::{Literal, NormRegion, Op, ValueId};
use crate::model::Layer;

const NORM_REGIONS: [&str; 2] = ["ACROSS_CHANNELS", "WITHIN_CHANNEL"];

/// Replaces negative variance entries by zero.
fn clamp_variance(layer: &Layer, mut variance: Vec<f32>) -> Vec<f32> {
    let negative = variance.iter().filter(|v| **v < 0.0).count();
    if negative > 0 {
        log::warn!(
            "`{}`: clamping {negative} negative variance value(s) to zero",
            layer.name
        );
        for v in variance.iter_mut().filter(|v| **v < 0.0) {
            *v = 0.0;
        }
    }
    variance
}

fn channel_check(layer: &Layer, channels: usize, len: usize, what: &str) -> Result<(), ConvertError> {
    if len != channels {
        return Err(ConvertError::shape(
            &layer.name,
            format!("{what} has {len} values for {channels} channels"),
        ));
    }
    Ok(())
}

/// Emits `batch_norm(x, gamma, beta, mean, variance)` over axis 1.
fn emit_batch_norm(
    layer: &Layer,
    ctx: &mut ConvertContext<'_>,
    data: ValueId,
    [gamma, beta, mean, variance]: [Vec<f32>; 4],
    epsilon: f64,
    scale: bool,
) -> Result<ValueId, ConvertError> {
    let variance = clamp_variance(layer, variance);
    let params = [gamma, beta, mean, variance].map(|v| ctx.constant(Literal::vector(v)));
    ctx.apply(
        layer,
        Op::BatchNorm {
            axis: 1,
            epsilon,
            scale,
        },
        &[data, params[0], params[1], params[2], params[3]],
    )
}

pub(super) fn batch_norm(
    layer: &Layer,
    ctx: &mut ConvertContext<'_>,
) -> Result<Vec<ValueId>, ConvertError> {
    layer.expect_inputs(1)?;
    let data = ctx.input(layer, 0)?;
    let shape = ctx.shape(data);
    let channels = shape.get(1).copied().unwrap_or(0);

    if let Some(merged) = ctx.merged.get(&layer.name).cloned() {
        log::debug!("`{}`: emitting fused batch norm", layer.name);
        channel_check(layer, channels, merged.mean.len(), "fused statistics")?;
        let tuple = [merged.gain, merged.shift, merged.mean, merged.variance];
        let out = emit_batch_norm(layer, ctx, data, tuple, merged.epsilon, true)?;
        return Ok(vec![out]);
    }

    if layer.blobs.len() >= 3 {
        let factor = moving_average_factor(layer)?;
        let mean: Vec<f32> = layer.blob(0, "mean")?.data().iter().map(|v| v * factor).collect();
        let variance: Vec<f32> = layer
            .blob(1, "variance")?
            .data()
            .iter()
            .map(|v| v * factor)
            .collect();
        channel_check(layer, channels, mean.len(), "mean")?;
        channel_check(layer, channels, variance.len(), "variance")?;
        let epsilon = layer.attr_float("eps", DEFAULT_BN_EPS)?;
        let tuple = [vec![1.0; channels], vec![0.0; channels], mean, variance];
        return Ok(vec![emit_batch_norm(layer, ctx, data, tuple, epsilon, false)?]);
    }

    // Legacy two-blob layout: blob 0 scales and blob 1 shifts each channel.
    let rank = shape.len();
    let gain_len = layer.blob(0, "scale")?.len();
    let shift_len = layer.blob(1, "shift")?.len();
    let gain = ctx.blob_literal(layer, 0, "scale", along_axis(rank, 1, gain_len))?;
    let shift = ctx.blob_literal(layer, 1, "shift", along_axis(rank, 1, shift_len))?;
    let gain = ctx.constant(gain);
    let shift = ctx.constant(shift);
    let scaled = ctx.apply(layer, Op::Multiply, &[data, gain])?;
    Ok(vec![ctx.apply(layer, Op::Add, &[scaled, shift])?])
}

/// SegNet `BN`: learned scale and shift in their declared shapes.
pub(super) fn seg_batch_norm(
    layer: &Layer,
    ctx: &mut ConvertContext<'_>,
) -> Result<Vec<ValueId>, ConvertError> {
    layer.expect_inputs(1)?;
    let data = ctx.input(layer, 0)?;
    let gain_shape = layer.blob(0, "scale")?.shape().to_vec();
    let shift_shape = layer.blob(1, "shift")?.shape().to_vec();
    let gain = ctx.blob_literal(layer, 0, "scale", gain_shape)?;
    let shift = ctx.blob_literal(layer, 1, "shift", shift_shape)?;
    let gain = ctx.constant(gain);
    let shift = ctx.constant(shift);
    let scaled = ctx.apply(layer, Op::Multiply, &[data, gain])?;
    Ok(vec![ctx.apply(layer, Op::Add, &[scaled, shift])?])
}

pub(super) fn lrn(
    layer: &Layer,
    ctx: &mut ConvertContext<'_>,
) -> Result<Vec<ValueId>, ConvertError> {
    layer.expect_inputs(1)?;
    let data = ctx.input(layer, 0)?;
    let norm_region = match layer.attr_variant("norm_region", &NORM_REGIONS, 0)? {
        0 => NormRegion::AcrossChannels,
        _ => NormRegion::WithinChannel,
    };
    let op = Op::Lrn {
        size: layer.attr_usize("local_size", 5)?,
        axis: 1,
        alpha: layer.attr_float("alpha", 1.0)?,
        beta: layer.attr_float("beta", 0.75)?,
        bias: layer.attr_float("k", 1.0)?,
        norm_region,
    };
    Ok(vec![ctx.apply(layer, op, &[data])?])
}

/// SSD-style L2 normalization followed by a learned scale.
pub(super) fn normalize(
    layer: &Layer,
    ctx: &mut ConvertContext<'_>,
) -> Result<Vec<ValueId>, ConvertError> {
    layer.expect_inputs(1)?;
    let data = ctx.input(layer, 0)?;
    let rank = ctx.shape(data).len();
    let axes = if layer.attr_bool("across_spatial", true)? {
        (1..rank).collect()
    } else {
        vec![1]
    };
    let eps = layer.attr_float("eps", 1e-10)?;
    let normalized = ctx.apply(layer, Op::L2Normalize { eps, axes }, &[data])?;

    let scale = if layer.attr_bool("channel_shared", true)? {
        let value = match layer.blobs.first().and_then(|b| b.data().first()) {
            Some(v) => *v,
            None => match layer.attr_record("scale_filler")? {
                Some(filler) => filler
                    .float("value")
                    .map_err(|e| ConvertError::invalid(&layer.name, e.to_string()))?
                    .unwrap_or(1.0) as f32,
                None => 1.0,
            },
        };
        Literal::scalar(value)
    } else {
        let len = layer.blob(0, "scale")?.len();
        ctx.blob_literal(layer, 0, "scale", along_axis(rank, 1, len))?
    };
    let scale = ctx.constant(scale);
    Ok(vec![ctx.apply(layer, Op::Multiply, &[normalized, scale])?])
}
