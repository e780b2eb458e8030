//! Layers that only move data around: reshape, concat, crop, slice,
//! permute and flatten.

use super::{ConvertContext, normalize_axis};
use crate::errors::ConvertError;
use crate::ir::{Op, SplitSections, ValueId};
use crate::model::Layer;

fn dims(shape: &[usize]) -> Vec<i64> {
    shape.iter().map(|&d| d as i64).collect()
}

/// Target dims of a Reshape layer, given either as a `{dim: [...]}` record
/// or directly as a list.
fn reshape_dims(layer: &Layer) -> Result<Vec<i64>, ConvertError> {
    match layer.attr_record("shape") {
        Ok(Some(record)) => record
            .ints("dim")
            .map_err(|e| ConvertError::invalid(&layer.name, e.to_string())),
        _ => layer.attr_ints("shape"),
    }
}

/// Caffe reshape: `dims` replace the span `[start, end)` of `input`.
///
/// A zero copies the dimension at the same position of the replaced span and
/// at most one `-1` is inferred from the element count.
fn caffe_reshape(
    layer: &Layer,
    input: &[usize],
    dims: &[i64],
    axis: i64,
    num_axes: i64,
) -> Result<Vec<usize>, ConvertError> {
    let rank = input.len() as i64;
    let start = if axis < 0 { rank + axis + 1 } else { axis };
    if start < 0 || start > rank {
        return Err(ConvertError::invalid(
            &layer.name,
            format!("axis {axis} is out of range for rank {rank}"),
        ));
    }
    let end = match num_axes {
        -1 => rank,
        n if n >= 0 && start + n <= rank => start + n,
        n => {
            return Err(ConvertError::invalid(
                &layer.name,
                format!("num_axes {n} is out of range from axis {start} for rank {rank}"),
            ));
        }
    };
    let (start, end) = (start as usize, end as usize);
    let span = &input[start..end];

    let mut resolved = Vec::with_capacity(dims.len());
    let mut inferred = None;
    for (i, &d) in dims.iter().enumerate() {
        match d {
            0 => match span.get(i) {
                Some(&copied) => resolved.push(copied),
                None => {
                    return Err(ConvertError::invalid(
                        &layer.name,
                        format!("dim {i} copies past the reshaped span {span:?}"),
                    ));
                }
            },
            -1 if inferred.is_none() => {
                inferred = Some(i);
                resolved.push(1);
            }
            d if d > 0 => resolved.push(d as usize),
            d => {
                return Err(ConvertError::invalid(
                    &layer.name,
                    format!("invalid reshape dim {d}"),
                ));
            }
        }
    }

    let span_count: usize = span.iter().product();
    let known: usize = resolved.iter().product();
    let fits = match inferred {
        Some(i) if known > 0 && span_count % known == 0 => {
            resolved[i] = span_count / known;
            true
        }
        Some(_) => false,
        None => known == span_count,
    };
    if !fits {
        return Err(ConvertError::shape(
            &layer.name,
            format!("cannot reshape {input:?} with dims {dims:?}"),
        ));
    }

    let mut shape = input[..start].to_vec();
    shape.extend(resolved);
    shape.extend_from_slice(&input[end..]);
    Ok(shape)
}

pub(super) fn reshape(
    layer: &Layer,
    ctx: &mut ConvertContext<'_>,
) -> Result<Vec<ValueId>, ConvertError> {
    layer.expect_inputs(1)?;
    let data = ctx.input(layer, 0)?;
    let shape = caffe_reshape(
        layer,
        &ctx.shape(data),
        &reshape_dims(layer)?,
        layer.attr_int("axis", 0)?,
        layer.attr_int("num_axes", -1)?,
    )?;
    let newshape = dims(&shape);
    Ok(vec![ctx.apply(layer, Op::Reshape { newshape }, &[data])?])
}

pub(super) fn concat(
    layer: &Layer,
    ctx: &mut ConvertContext<'_>,
) -> Result<Vec<ValueId>, ConvertError> {
    let inputs = (0..layer.inputs.len())
        .map(|i| ctx.input(layer, i))
        .collect::<Result<Vec<_>, _>>()?;
    let Some(&first) = inputs.first() else {
        return Err(ConvertError::invalid(&layer.name, "concat needs an input"));
    };
    let shape = ctx.shape(first);

    if inputs.len() == 1 {
        let newshape = dims(&shape);
        return Ok(vec![ctx.apply(layer, Op::Reshape { newshape }, &[first])?]);
    }
    let axis = normalize_axis(layer, layer.attr_int("axis", 1)?, shape.len())?;
    Ok(vec![ctx.apply(layer, Op::Concatenate { axis }, &inputs)?])
}

/// Crops the first input to the extent of the second from `axis` on.
pub(super) fn crop(
    layer: &Layer,
    ctx: &mut ConvertContext<'_>,
) -> Result<Vec<ValueId>, ConvertError> {
    layer.expect_inputs(2)?;
    let data = ctx.input(layer, 0)?;
    let reference = ctx.input(layer, 1)?;
    let (shape, target) = (ctx.shape(data), ctx.shape(reference));
    if shape == target {
        return Ok(vec![data]);
    }
    if shape.len() != target.len() {
        return Err(ConvertError::shape(
            &layer.name,
            format!("cannot crop {shape:?} to {target:?}"),
        ));
    }

    let rank = shape.len();
    let axis = normalize_axis(layer, layer.attr_int("axis", 2)?, rank)?;
    let cropped = rank - axis;
    let offsets = match layer.attr_usizes("offset")?.as_slice() {
        [] => vec![0; cropped],
        [o] => vec![*o; cropped],
        all if all.len() == cropped => all.to_vec(),
        all => {
            return Err(ConvertError::invalid(
                &layer.name,
                format!("{} offsets given for {cropped} cropped axes", all.len()),
            ));
        }
    };

    let mut begin = vec![0; rank];
    let mut end = shape.clone();
    for (i, offset) in offsets.into_iter().enumerate() {
        begin[axis + i] = offset;
        end[axis + i] = offset + target[axis + i];
    }
    Ok(vec![ctx.apply(layer, Op::StridedSlice { begin, end }, &[data])?])
}

pub(super) fn slice(
    layer: &Layer,
    ctx: &mut ConvertContext<'_>,
) -> Result<Vec<ValueId>, ConvertError> {
    layer.expect_inputs(1)?;
    let data = ctx.input(layer, 0)?;
    let rank = ctx.shape(data).len();
    let axis = normalize_axis(layer, layer.attr_int("axis", 1)?, rank)?;

    let mut points = layer.attr_usizes("slice_point")?;
    let sections = if points.is_empty() {
        SplitSections::Count(layer.outputs.len())
    } else {
        points.sort_unstable();
        SplitSections::Indices(points)
    };
    ctx.apply_multi(layer, Op::Split { sections, axis }, &[data])
}

pub(super) fn permute(
    layer: &Layer,
    ctx: &mut ConvertContext<'_>,
) -> Result<Vec<ValueId>, ConvertError> {
    layer.expect_inputs(1)?;
    let data = ctx.input(layer, 0)?;
    let rank = ctx.shape(data).len();

    let mut axes = layer.attr_usizes("order")?;
    // Axes left out keep their relative order after the listed ones.
    for axis in 0..rank {
        if !axes.contains(&axis) {
            axes.push(axis);
        }
    }
    Ok(vec![ctx.apply(layer, Op::Transpose { axes }, &[data])?])
}

pub(super) fn flatten(
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
    Ok(vec![ctx.apply(layer, Op::BatchFlatten, &[data])?])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::testing::Harness;
    use crate::model::Attributes;

    fn reshape_layer(dims: Vec<i64>) -> Layer {
        Layer::new("reshape", "Reshape")
            .with_inputs(&["data"])
            .with_outputs(&["reshape"])
            .with_attr("shape", Attributes::new().with("dim", dims))
    }

    #[test]
    fn test_reshape_copies_and_infers() {
        let mut h = Harness::new().input("data", &[2, 3, 4]);
        let out = h.run(&reshape_layer(vec![0, -1])).unwrap();
        assert_eq!(h.shape(out[0]), vec![2, 12]);
    }

    #[test]
    fn test_reshape_from_axis_keeps_leading_dims() {
        let mut h = Harness::new().input("data", &[2, 3, 4]);
        let out = h
            .run(&reshape_layer(vec![0, -1]).with_attr("axis", 1i64))
            .unwrap();
        assert_eq!(h.shape(out[0]), vec![2, 3, 4]);
    }

    #[test]
    fn test_reshape_partial_span() {
        let layer = Layer::new("r", "Reshape");
        let shape = caffe_reshape(&layer, &[2, 3, 4, 5], &[-1], 1, 2).unwrap();
        assert_eq!(shape, vec![2, 12, 5]);
        let shape = caffe_reshape(&layer, &[2, 8], &[1, 1], -1, 0).unwrap();
        assert_eq!(shape, vec![2, 8, 1, 1]);
    }

    #[test]
    fn test_reshape_count_mismatch() {
        let mut h = Harness::new().input("data", &[2, 3, 4]);
        assert!(matches!(
            h.run(&reshape_layer(vec![5, -1])),
            Err(ConvertError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_reshape_accepts_plain_list() {
        let mut h = Harness::new().input("data", &[2, 3, 4]);
        let layer = Layer::new("reshape", "Reshape")
            .with_inputs(&["data"])
            .with_outputs(&["reshape"])
            .with_attr("shape", vec![4i64, 6]);
        let out = h.run(&layer).unwrap();
        assert_eq!(h.shape(out[0]), vec![4, 6]);
    }

    #[test]
    fn test_concat_single_input_is_identity_reshape() {
        let mut h = Harness::new().input("a", &[1, 3]);
        let layer = Layer::new("cat", "Concat")
            .with_inputs(&["a"])
            .with_outputs(&["cat"]);
        let out = h.run(&layer).unwrap();
        assert_eq!(h.shape(out[0]), vec![1, 3]);
        assert_eq!(h.finish(out).op_names(), vec!["reshape"]);
    }

    #[test]
    fn test_concat_along_channels() {
        let mut h = Harness::new()
            .input("a", &[1, 3, 2, 2])
            .input("b", &[1, 5, 2, 2]);
        let layer = Layer::new("cat", "Concat")
            .with_inputs(&["a", "b"])
            .with_outputs(&["cat"]);
        let out = h.run(&layer).unwrap();
        assert_eq!(h.shape(out[0]), vec![1, 8, 2, 2]);
    }

    #[test]
    fn test_crop_with_offset() {
        let mut h = Harness::new()
            .input("big", &[1, 3, 10, 10])
            .input("small", &[1, 3, 6, 6]);
        let layer = Layer::new("crop", "Crop")
            .with_inputs(&["big", "small"])
            .with_outputs(&["crop"])
            .with_attr("offset", 2i64);
        let out = h.run(&layer).unwrap();
        assert_eq!(h.shape(out[0]), vec![1, 3, 6, 6]);
        match &h.finish(out).body()[0].op {
            Op::StridedSlice { begin, end } => {
                assert_eq!(begin, &vec![0, 0, 2, 2]);
                assert_eq!(end, &vec![1, 3, 8, 8]);
            }
            other => panic!("unexpected op {other:?}"),
        }
    }

    #[test]
    fn test_crop_equal_shapes_is_passthrough() {
        let mut h = Harness::new()
            .input("a", &[1, 3, 4, 4])
            .input("b", &[1, 3, 4, 4]);
        let layer = Layer::new("crop", "Crop")
            .with_inputs(&["a", "b"])
            .with_outputs(&["crop"]);
        let out = h.run(&layer).unwrap();
        assert_eq!(out[0], h.symbols.get("a").unwrap());
    }

    #[test]
    fn test_crop_offset_count_mismatch() {
        let mut h = Harness::new()
            .input("a", &[1, 3, 8, 8])
            .input("b", &[1, 3, 4, 4]);
        let layer = Layer::new("crop", "Crop")
            .with_inputs(&["a", "b"])
            .with_outputs(&["crop"])
            .with_attr("offset", vec![1i64, 2, 3]);
        assert!(matches!(
            h.run(&layer),
            Err(ConvertError::InvalidAttribute { .. })
        ));
    }

    #[test]
    fn test_slice_points_are_sorted() {
        let mut h = Harness::new().input("data", &[1, 10]);
        let layer = Layer::new("slice", "Slice")
            .with_inputs(&["data"])
            .with_outputs(&["a", "b", "c"])
            .with_attr("slice_point", vec![6i64, 2]);
        let out = h.run(&layer).unwrap();
        let shapes: Vec<_> = out.iter().map(|v| h.shape(*v)).collect();
        assert_eq!(shapes, vec![vec![1, 2], vec![1, 4], vec![1, 4]]);
    }

    #[test]
    fn test_slice_equal_sections() {
        let mut h = Harness::new().input("data", &[1, 6, 2]);
        let layer = Layer::new("slice", "Slice")
            .with_inputs(&["data"])
            .with_outputs(&["a", "b"]);
        let out = h.run(&layer).unwrap();
        assert_eq!(h.shape(out[1]), vec![1, 3, 2]);
    }

    #[test]
    fn test_permute_completes_order() {
        let mut h = Harness::new().input("data", &[1, 2, 3, 4]);
        let layer = Layer::new("perm", "Permute")
            .with_inputs(&["data"])
            .with_outputs(&["perm"])
            .with_attr("order", vec![0i64, 2]);
        let out = h.run(&layer).unwrap();
        assert_eq!(h.shape(out[0]), vec![1, 3, 2, 4]);
    }

    #[test]
    fn test_flatten() {
        let mut h = Harness::new().input("data", &[2, 3, 4]);
        let layer = Layer::new("flat", "Flatten")
            .with_inputs(&["data"])
            .with_outputs(&["flat"]);
        let out = h.run(&layer).unwrap();
        assert_eq!(h.shape(out[0]), vec![2, 12]);

        let bad = layer.with_attr("axis", 2i64);
        assert!(h.run(&bad).is_err());
    }
}
