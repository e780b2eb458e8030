//! BatchNorm + Scale fusion.
//!
//! Caffe splits batch normalization into a statistics layer (`BatchNorm`)
//! and an affine layer (`Scale`). When the two are adjacent the pair is
//! translated as a single `batch_norm` with learned gain and shift.

use std::collections::HashMap;

use crate::errors::ConvertError;
use crate::model::{Layer, OperatorKind};

/// Default `eps` of a BatchNorm layer.
pub const DEFAULT_BN_EPS: f64 = 1e-5;

/// Output name of a dropped Scale layer to the surviving BatchNorm output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FusionRecord(HashMap<String, String>);

impl FusionRecord {
    pub fn resolve<'a>(&'a self, tensor: &'a str) -> &'a str {
        self.0.get(tensor).map(String::as_str).unwrap_or(tensor)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Statistics and affine parameters of a fused BatchNorm/Scale pair.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedBatchNorm {
    pub mean: Vec<f32>,
    pub variance: Vec<f32>,
    pub epsilon: f64,
    pub gain: Vec<f32>,
    pub shift: Vec<f32>,
}

/// Result of [`fuse`].
#[derive(Debug, Clone)]
pub struct Fused {
    pub layers: Vec<Layer>,
    pub record: FusionRecord,
    /// Merged parameters keyed by BatchNorm layer name.
    pub merged: HashMap<String, MergedBatchNorm>,
}

fn is_kind(layer: &Layer, kind: OperatorKind) -> bool {
    OperatorKind::parse(&layer.kind) == Some(kind)
}

/// Whether `scale` reads exactly the single output of `bn`.
fn fusable(bn: &Layer, scale: &Layer) -> bool {
    is_kind(bn, OperatorKind::BatchNorm)
        && is_kind(scale, OperatorKind::Scale)
        && !bn.outputs.is_empty()
        && scale.inputs.len() == 1
        && scale.inputs[0] == bn.outputs[0]
}

/// Factor applied to the running mean and variance of a BatchNorm layer.
///
/// Caffe stores unnormalized sums together with a moving-average count in
/// blob 2; the statistics are those sums divided by the count.
pub(crate) fn moving_average_factor(bn: &Layer) -> Result<f32, ConvertError> {
    let Some(blob) = bn.blobs.get(2) else {
        return Ok(1.0);
    };
    let count = blob.data().first().copied().unwrap_or(0.0);
    if count < 0.0 {
        return Err(ConvertError::invalid(
            &bn.name,
            format!("negative moving-average count {count}"),
        ));
    }
    Ok(if count == 0.0 { 1.0 } else { 1.0 / count })
}

fn merge(bn: &Layer, scale: &Layer) -> Result<MergedBatchNorm, ConvertError> {
    let factor = moving_average_factor(bn)?;
    let mean: Vec<f32> = bn.blob(0, "mean")?.data().iter().map(|v| v * factor).collect();
    let variance: Vec<f32> = bn
        .blob(1, "variance")?
        .data()
        .iter()
        .map(|v| v * factor)
        .collect();
    let epsilon = bn.attr_float("eps", DEFAULT_BN_EPS)?;

    let gain = scale.blob(0, "gain")?.data().to_vec();
    let shift = if scale.attr_bool("bias_term", false)? {
        scale.blob(1, "shift")?.data().to_vec()
    } else {
        vec![0.0; gain.len()]
    };

    if variance.len() != mean.len() || gain.len() != mean.len() || shift.len() != mean.len() {
        return Err(ConvertError::shape(
            &scale.name,
            format!(
                "cannot fuse {} statistics with {} gains and {} shifts",
                mean.len(),
                gain.len(),
                shift.len()
            ),
        ));
    }

    Ok(MergedBatchNorm {
        mean,
        variance,
        epsilon,
        gain,
        shift,
    })
}

/// Fuses every BatchNorm immediately followed by a Scale reading its output.
pub fn fuse(layers: Vec<Layer>) -> Result<Fused, ConvertError> {
    let mut record = HashMap::new();
    let mut merged = HashMap::new();
    let mut out = Vec::with_capacity(layers.len());

    let mut iter = layers.into_iter().peekable();
    while let Some(mut layer) = iter.next() {
        if is_kind(&layer, OperatorKind::Input) {
            out.push(layer);
            continue;
        }

        for input in layer.inputs.iter_mut() {
            if let Some(target) = record.get(input.as_str()) {
                *input = String::clone(target);
            }
        }

        let scale = match iter.peek() {
            Some(next) if fusable(&layer, next) => iter.next(),
            _ => None,
        };
        if let Some(scale) = scale {
            merged.insert(layer.name.clone(), merge(&layer, &scale)?);
            let survivor = if layer.outputs.len() == 1 {
                layer.outputs[0].clone()
            } else {
                layer.name.clone()
            };
            let dropped = scale.outputs.first().unwrap_or(&scale.name).clone();
            log::debug!(
                "fused `{}` into `{}`; `{dropped}` now reads `{survivor}`",
                scale.name,
                layer.name
            );
            record.insert(dropped, survivor);
        }
        out.push(layer);
    }

    Ok(Fused {
        layers: out,
        record: FusionRecord(record),
        merged,
    })
}
