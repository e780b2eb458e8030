//! Static shape inference for every IR operator.

use super::op::{Conv2dAttrs, Op, Pool2dAttrs, SplitSections};
use super::types::{DType, TensorType};

type Inferred = Result<Vec<TensorType>, String>;

/// Computes the result types of `op` applied to `inputs`.
pub(crate) fn infer(op: &Op, inputs: &[&TensorType]) -> Inferred {
    if op.is_variadic() {
        if inputs.is_empty() {
            return Err(format!("{} needs at least one operand", op.name()));
        }
    } else if inputs.len() != op.arity() {
        return Err(format!(
            "{} takes {} operand(s), got {}",
            op.name(),
            op.arity(),
            inputs.len()
        ));
    }

    let data = inputs[0];
    let same = || -> Inferred { Ok(vec![data.clone()]) };

    match op {
        Op::Conv2d(attrs) => conv2d(attrs, data, inputs[1]),
        Op::Conv2dTranspose(attrs) => conv2d_transpose(attrs, data, inputs[1]),
        Op::BiasAdd { axis } => {
            channel_vector(data, inputs[1], *axis, "bias")?;
            same()
        }
        Op::Dense { units } => {
            let weight = inputs[1];
            expect_rank(data, 2, "dense input")?;
            expect_rank(weight, 2, "dense weight")?;
            if weight.shape[0] != *units || weight.shape[1] != data.shape[1] {
                return Err(format!(
                    "dense weight {:?} does not map {} features to {units} units",
                    weight.shape, data.shape[1]
                ));
            }
            Ok(vec![data.with_shape(vec![data.shape[0], *units])])
        }

        Op::Add | Op::Subtract | Op::Multiply | Op::Divide | Op::Maximum | Op::Power => {
            let shape = broadcast(&data.shape, &inputs[1].shape)?;
            Ok(vec![data.with_shape(shape)])
        }

        Op::Reshape { newshape } => {
            let shape = resolve_newshape(&data.shape, newshape)?;
            Ok(vec![data.with_shape(shape)])
        }
        Op::BatchFlatten => {
            if data.rank() < 1 {
                return Err("batch_flatten needs a batch axis".to_string());
            }
            let rest: usize = data.shape[1..].iter().product();
            Ok(vec![data.with_shape(vec![data.shape[0], rest])])
        }
        Op::Concatenate { axis } => concatenate(inputs, *axis),
        Op::Split { sections, axis } => split(data, sections, *axis),
        Op::StridedSlice { begin, end } => {
            if begin.len() != data.rank() || end.len() != data.rank() {
                return Err(format!(
                    "strided_slice bounds must cover all {} axes",
                    data.rank()
                ));
            }
            let mut shape = Vec::with_capacity(data.rank());
            for ((b, e), dim) in begin.iter().zip(end).zip(&data.shape) {
                if b > e || e > dim {
                    return Err(format!("slice {b}..{e} is out of range for extent {dim}"));
                }
                shape.push(e - b);
            }
            Ok(vec![data.with_shape(shape)])
        }
        Op::Transpose { axes } => {
            let mut seen = vec![false; data.rank()];
            if axes.len() != data.rank() {
                return Err(format!(
                    "transpose order {axes:?} does not match rank {}",
                    data.rank()
                ));
            }
            for &a in axes {
                if a >= data.rank() || seen[a] {
                    return Err(format!("transpose order {axes:?} is not a permutation"));
                }
                seen[a] = true;
            }
            Ok(vec![data.with_shape(axes.iter().map(|&a| data.shape[a]).collect())])
        }

        Op::BatchNorm { axis, .. } => {
            for (param, what) in inputs[1..].iter().zip(["gamma", "beta", "mean", "variance"]) {
                channel_vector(data, param, *axis, what)?;
            }
            same()
        }
        Op::Lrn { axis, .. } | Op::Softmax { axis } => {
            check_axis(data, *axis)?;
            same()
        }
        Op::L2Normalize { axes, .. } => {
            for &axis in axes {
                check_axis(data, axis)?;
            }
            same()
        }
        Op::PRelu { axis } => {
            channel_vector(data, inputs[1], *axis, "alpha")?;
            same()
        }
        Op::Relu | Op::LeakyRelu { .. } | Op::Sigmoid | Op::Tanh | Op::Dropout { .. } => same(),

        Op::MaxPool2d(attrs) | Op::AvgPool2d(attrs) | Op::MaxPool2dLocation(attrs) => {
            pool2d(attrs, data)
        }
        Op::GlobalMaxPool2d | Op::GlobalAvgPool2d => {
            expect_rank(data, 4, "global pooling input")?;
            Ok(vec![data.with_shape(vec![data.shape[0], data.shape[1], 1, 1])])
        }
        Op::Upsampling {
            scale_h, scale_w, ..
        } => {
            expect_rank(data, 4, "upsampling input")?;
            let h = (data.shape[2] as f64 * scale_h).floor() as usize;
            let w = (data.shape[3] as f64 * scale_w).floor() as usize;
            Ok(vec![data.with_shape(vec![data.shape[0], data.shape[1], h, w])])
        }
        Op::Unpooling { scale_h, scale_w } => {
            expect_rank(data, 4, "unpooling input")?;
            if inputs[1].shape != data.shape {
                return Err(format!(
                    "unpooling mask {:?} does not match input {:?}",
                    inputs[1].shape, data.shape
                ));
            }
            let s = &data.shape;
            Ok(vec![data.with_shape(vec![s[0], s[1], s[2] * scale_h, s[3] * scale_w])])
        }

        Op::Proposal(attrs) => {
            let (bbox, im_info) = (inputs[1], inputs[2]);
            expect_rank(data, 4, "proposal class scores")?;
            expect_rank(bbox, 4, "proposal box deltas")?;
            let anchors = attrs.scales.len() * attrs.ratios.len();
            if data.shape[1] != 2 * anchors || bbox.shape[1] != 4 * anchors {
                return Err(format!(
                    "proposal expects {} score and {} delta channels for {anchors} anchors",
                    2 * anchors,
                    4 * anchors
                ));
            }
            if im_info.shape != [data.shape[0], 3] {
                return Err(format!("im_info must be [{}, 3]", data.shape[0]));
            }
            let rows = data.shape[0] * attrs.rpn_post_nms_top_n;
            Ok(vec![data.with_shape(vec![rows, 5])])
        }
        Op::RoiPool { pooled_size, .. } => {
            let rois = roi_count(data, inputs[1])?;
            Ok(vec![data.with_shape(vec![
                rois,
                data.shape[1],
                pooled_size[0],
                pooled_size[1],
            ])])
        }
        Op::PsRoiPool {
            output_dim,
            group_size,
            ..
        } => {
            let rois = roi_count(data, inputs[1])?;
            if data.shape[1] != output_dim * group_size * group_size {
                return Err(format!(
                    "position sensitive pooling needs {} channels, got {}",
                    output_dim * group_size * group_size,
                    data.shape[1]
                ));
            }
            Ok(vec![data.with_shape(vec![
                rois,
                *output_dim,
                *group_size,
                *group_size,
            ])])
        }

        Op::Take { axis } => {
            check_axis(data, *axis)?;
            let indices = inputs[1];
            let mut shape = data.shape[..*axis].to_vec();
            shape.extend_from_slice(&indices.shape);
            shape.extend_from_slice(&data.shape[axis + 1..]);
            Ok(vec![data.with_shape(shape)])
        }
        Op::Cast { dtype } => Ok(vec![TensorType::new(data.shape.clone(), *dtype)]),
    }
}

fn expect_rank(ty: &TensorType, rank: usize, what: &str) -> Result<(), String> {
    if ty.rank() != rank {
        return Err(format!(
            "{what} must have rank {rank}, got shape {:?}",
            ty.shape
        ));
    }
    Ok(())
}

fn check_axis(ty: &TensorType, axis: usize) -> Result<(), String> {
    if axis >= ty.rank() {
        return Err(format!("axis {axis} is out of range for shape {:?}", ty.shape));
    }
    Ok(())
}

/// A rank-1 parameter whose length matches `data` along `axis`.
fn channel_vector(
    data: &TensorType,
    param: &TensorType,
    axis: usize,
    what: &str,
) -> Result<(), String> {
    check_axis(data, axis)?;
    if param.shape != [data.shape[axis]] {
        return Err(format!(
            "{what} of shape {:?} does not match {} channels",
            param.shape, data.shape[axis]
        ));
    }
    Ok(())
}

/// Numpy-style broadcasting of two shapes.
pub(crate) fn broadcast(lhs: &[usize], rhs: &[usize]) -> Result<Vec<usize>, String> {
    let rank = lhs.len().max(rhs.len());
    let mut out = vec![0; rank];
    for i in 0..rank {
        let l = if i < rank - lhs.len() { 1 } else { lhs[i - (rank - lhs.len())] };
        let r = if i < rank - rhs.len() { 1 } else { rhs[i - (rank - rhs.len())] };
        out[i] = match (l, r) {
            (a, b) if a == b => a,
            (1, b) => b,
            (a, 1) => a,
            _ => return Err(format!("shapes {lhs:?} and {rhs:?} do not broadcast")),
        };
    }
    Ok(out)
}

/// Resolves a reshape target: `0` copies the input dimension at the same
/// position and a single `-1` is inferred from the element count.
pub(crate) fn resolve_newshape(input: &[usize], newshape: &[i64]) -> Result<Vec<usize>, String> {
    let total: usize = input.iter().product();
    let mut shape = Vec::with_capacity(newshape.len());
    let mut inferred = None;
    for (i, &dim) in newshape.iter().enumerate() {
        match dim {
            0 => match input.get(i) {
                Some(&d) => shape.push(d),
                None => return Err(format!("reshape copies missing dimension {i}")),
            },
            -1 => {
                if inferred.replace(i).is_some() {
                    return Err("reshape may infer only one dimension".to_string());
                }
                shape.push(1);
            }
            d if d > 0 => shape.push(d as usize),
            d => return Err(format!("invalid reshape dimension {d}")),
        }
    }
    let known: usize = shape.iter().product();
    if let Some(i) = inferred {
        if known == 0 || total % known != 0 {
            return Err(format!(
                "cannot reshape {input:?} ({total} elements) into {newshape:?}"
            ));
        }
        shape[i] = total / known;
    } else if known != total {
        return Err(format!(
            "cannot reshape {input:?} ({total} elements) into {newshape:?}"
        ));
    }
    Ok(shape)
}

fn conv2d(attrs: &Conv2dAttrs, data: &TensorType, weight: &TensorType) -> Inferred {
    expect_rank(data, 4, "conv2d input")?;
    expect_rank(weight, 4, "conv2d weight")?;
    if attrs.groups == 0 || weight.shape[1] * attrs.groups != data.shape[1] {
        return Err(format!(
            "weight {:?} with {} group(s) does not fit {} input channels",
            weight.shape, attrs.groups, data.shape[1]
        ));
    }
    if weight.shape[0] != attrs.channels {
        return Err(format!(
            "weight {:?} does not produce {} channels",
            weight.shape, attrs.channels
        ));
    }
    check_kernel(attrs, weight)?;
    let mut shape = vec![data.shape[0], attrs.channels];
    for i in 0..2 {
        let extent = data.shape[2 + i] + 2 * attrs.padding[i];
        let window = attrs.dilation[i] * (attrs.kernel_size[i] - 1) + 1;
        if attrs.strides[i] == 0 || extent < window {
            return Err(format!(
                "kernel window {window} does not fit padded extent {extent}"
            ));
        }
        shape.push((extent - window) / attrs.strides[i] + 1);
    }
    Ok(vec![data.with_shape(shape)])
}

fn conv2d_transpose(attrs: &Conv2dAttrs, data: &TensorType, weight: &TensorType) -> Inferred {
    expect_rank(data, 4, "conv2d_transpose input")?;
    expect_rank(weight, 4, "conv2d_transpose weight")?;
    if weight.shape[0] != data.shape[1] {
        return Err(format!(
            "weight {:?} does not take {} input channels",
            weight.shape, data.shape[1]
        ));
    }
    check_kernel(attrs, weight)?;
    let mut shape = vec![data.shape[0], weight.shape[1] * attrs.groups];
    for i in 0..2 {
        let grown = (data.shape[2 + i].saturating_sub(1)) * attrs.strides[i]
            + attrs.dilation[i] * (attrs.kernel_size[i] - 1)
            + 1;
        if grown < 2 * attrs.padding[i] {
            return Err(format!(
                "padding {} exceeds output extent {grown}",
                attrs.padding[i]
            ));
        }
        shape.push(grown - 2 * attrs.padding[i]);
    }
    Ok(vec![data.with_shape(shape)])
}

fn check_kernel(attrs: &Conv2dAttrs, weight: &TensorType) -> Result<(), String> {
    if attrs.kernel_size[0] == 0
        || attrs.kernel_size[1] == 0
        || weight.shape[2..] != attrs.kernel_size
    {
        return Err(format!(
            "weight {:?} does not match kernel {:?}",
            weight.shape, attrs.kernel_size
        ));
    }
    Ok(())
}

fn pool2d(attrs: &Pool2dAttrs, data: &TensorType) -> Inferred {
    expect_rank(data, 4, "pooling input")?;
    let mut shape = vec![data.shape[0], data.shape[1]];
    for i in 0..2 {
        let (k, s, p) = (attrs.pool_size[i], attrs.strides[i], attrs.padding[i]);
        let extent = data.shape[2 + i] + 2 * p;
        if k == 0 || s == 0 || extent < k {
            return Err(format!("pool window {k} does not fit padded extent {extent}"));
        }
        let span = extent - k;
        let mut out = if attrs.ceil_mode {
            span.div_ceil(s) + 1
        } else {
            span / s + 1
        };
        // The last window has to start inside the input or its leading padding.
        if attrs.ceil_mode && p > 0 && (out - 1) * s >= data.shape[2 + i] + p {
            out -= 1;
        }
        shape.push(out);
    }
    Ok(vec![data.with_shape(shape)])
}

fn concatenate(inputs: &[&TensorType], axis: usize) -> Inferred {
    let first = inputs[0];
    check_axis(first, axis)?;
    let mut shape = first.shape.clone();
    for other in &inputs[1..] {
        let compatible = other.rank() == first.rank()
            && other
                .shape
                .iter()
                .zip(&first.shape)
                .enumerate()
                .all(|(i, (a, b))| i == axis || a == b);
        if !compatible {
            return Err(format!(
                "cannot concatenate {:?} with {:?} along axis {axis}",
                first.shape, other.shape
            ));
        }
        shape[axis] += other.shape[axis];
    }
    Ok(vec![first.with_shape(shape)])
}

fn split(data: &TensorType, sections: &SplitSections, axis: usize) -> Inferred {
    check_axis(data, axis)?;
    let extent = data.shape[axis];
    let bounds: Vec<usize> = match sections {
        SplitSections::Count(n) => {
            if *n == 0 || extent % n != 0 {
                return Err(format!("extent {extent} does not split into {n} equal parts"));
            }
            (0..=*n).map(|i| i * extent / n).collect()
        }
        SplitSections::Indices(points) => {
            let mut bounds = Vec::with_capacity(points.len() + 2);
            bounds.push(0);
            for &p in points {
                if p > extent || bounds.last().is_some_and(|&last| p < last) {
                    return Err(format!(
                        "split points {points:?} are not sorted within extent {extent}"
                    ));
                }
                bounds.push(p);
            }
            bounds.push(extent);
            bounds
        }
    };
    Ok(bounds
        .windows(2)
        .map(|w| {
            let mut shape = data.shape.clone();
            shape[axis] = w[1] - w[0];
            data.with_shape(shape)
        })
        .collect())
}

fn roi_count(data: &TensorType, rois: &TensorType) -> Result<usize, String> {
    expect_rank(data, 4, "roi pooling input")?;
    if rois.rank() != 2 || rois.shape[1] != 5 {
        return Err(format!("rois must be [R, 5], got {:?}", rois.shape));
    }
    if rois.dtype != DType::Float32 {
        return Err("rois must be float32".to_string());
    }
    Ok(rois.shape[0])
}
