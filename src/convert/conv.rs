//! Convolution and deconvolution layers.

use super::ConvertContext;
use crate::errors::ConvertError;
use crate::ir::{Conv2dAttrs, KernelLayout, Op, ValueId};
use crate::model::Layer;

/// Reads a per-axis window parameter.
///
/// `*_h`/`*_w` win when either is positive. Otherwise the generic repeated
/// field is used, its second entry defaulting to the first. `None` means the
/// layer sets neither form.
fn window_pair(
    layer: &Layer,
    generic: &str,
    h_key: &str,
    w_key: &str,
) -> Result<Option<[usize; 2]>, ConvertError> {
    let h = layer.attr_usize(h_key, 0)?;
    let w = layer.attr_usize(w_key, 0)?;
    if h > 0 || w > 0 {
        return Ok(Some([h, w]));
    }
    let values = layer.attr_usizes(generic)?;
    Ok(match values.as_slice() {
        [] => None,
        [v] => Some([*v, *v]),
        [h, w, ..] => Some([*h, *w]),
    })
}

fn conv_attrs(layer: &Layer, layout: KernelLayout) -> Result<Conv2dAttrs, ConvertError> {
    let kernel_size = window_pair(layer, "kernel_size", "kernel_h", "kernel_w")?
        .ok_or_else(|| ConvertError::invalid(&layer.name, "no kernel size given"))?;
    let padding = window_pair(layer, "pad", "pad_h", "pad_w")?.unwrap_or([0, 0]);
    let strides = window_pair(layer, "stride", "stride_h", "stride_w")?.unwrap_or([1, 1]);
    let dilation = match layer.attr_usizes("dilation")?.as_slice() {
        [] => [1, 1],
        [d] => [*d, *d],
        [h, w, ..] => [*h, *w],
    };
    let groups = layer.attr_usize("group", 1)?;
    if groups == 0 {
        return Err(ConvertError::invalid(&layer.name, "`group` must be positive"));
    }
    Ok(Conv2dAttrs {
        channels: layer.require_usize("num_output")?,
        kernel_size,
        strides,
        padding,
        dilation,
        groups,
        kernel_layout: layout,
    })
}

fn add_bias(
    layer: &Layer,
    ctx: &mut ConvertContext<'_>,
    out: ValueId,
) -> Result<ValueId, ConvertError> {
    if layer.blobs.len() < 2 {
        return Ok(out);
    }
    let bias = ctx.blob_vector(layer, 1, "bias")?;
    ctx.apply(layer, Op::BiasAdd { axis: 1 }, &[out, bias])
}

pub(super) fn convolution(
    layer: &Layer,
    ctx: &mut ConvertContext<'_>,
) -> Result<Vec<ValueId>, ConvertError> {
    layer.expect_inputs(1)?;
    let data = ctx.input(layer, 0)?;
    let attrs = conv_attrs(layer, KernelLayout::Oihw)?;

    let [kh, kw] = attrs.kernel_size;
    let len = layer.blob(0, "weight")?.len();
    let per_filter = attrs.channels * kh * kw;
    if per_filter == 0 || len % per_filter != 0 {
        return Err(ConvertError::shape(
            &layer.name,
            format!(
                "weight blob with {len} values does not hold {} filters of {kh}x{kw}",
                attrs.channels
            ),
        ));
    }
    let literal = ctx.blob_literal(
        layer,
        0,
        "weight",
        vec![attrs.channels, len / per_filter, kh, kw],
    )?;
    let weight = ctx.constant(literal);

    let out = ctx.apply(layer, Op::Conv2d(attrs), &[data, weight])?;
    Ok(vec![add_bias(layer, ctx, out)?])
}

pub(super) fn deconvolution(
    layer: &Layer,
    ctx: &mut ConvertContext<'_>,
) -> Result<Vec<ValueId>, ConvertError> {
    layer.expect_inputs(1)?;
    let data = ctx.input(layer, 0)?;
    let attrs = conv_attrs(layer, KernelLayout::Iohw)?;

    // Weights are stored as (in, out / group, kh, kw).
    let blob = layer.blob(0, "weight")?;
    let shape = if blob.shape().len() == 4 {
        blob.shape().to_vec()
    } else {
        let [kh, kw] = attrs.kernel_size;
        let in_channels = ctx.shape(data).get(1).copied().unwrap_or(0);
        vec![in_channels, attrs.channels / attrs.groups, kh, kw]
    };
    let literal = ctx.blob_literal(layer, 0, "weight", shape)?;
    let weight = ctx.constant(literal);

    let out = ctx.apply(layer, Op::Conv2dTranspose(attrs), &[data, weight])?;
    Ok(vec![add_bias(layer, ctx, out)?])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::testing::Harness;
    use crate::model::Blob;

    fn conv(num_output: i64, kernel: i64) -> Layer {
        Layer::new("conv1", "Convolution")
            .with_inputs(&["data"])
            .with_outputs(&["conv1"])
            .with_attr("num_output", num_output)
            .with_attr("kernel_size", kernel)
    }

    #[test]
    fn test_window_pair_precedence() {
        let layer = Layer::new("c", "Convolution")
            .with_attr("kernel_size", vec![3i64, 5])
            .with_attr("kernel_h", 2i64);
        assert_eq!(
            window_pair(&layer, "kernel_size", "kernel_h", "kernel_w").unwrap(),
            Some([2, 0])
        );

        let layer = Layer::new("c", "Convolution").with_attr("pad", 1i64);
        assert_eq!(window_pair(&layer, "pad", "pad_h", "pad_w").unwrap(), Some([1, 1]));
        assert_eq!(window_pair(&layer, "stride", "stride_h", "stride_w").unwrap(), None);
    }

    #[test]
    fn test_convolution_with_bias() {
        let mut h = Harness::new().input("data", &[1, 3, 8, 8]);
        let layer = conv(4, 3)
            .with_attr("pad", 1i64)
            .with_blob(Blob::from_vec(vec![0.1; 4 * 3 * 9]))
            .with_blob(Blob::from_vec(vec![0.0; 4]));
        let out = h.run(&layer).unwrap();
        assert_eq!(h.shape(out[0]), vec![1, 4, 8, 8]);
        assert_eq!(h.finish(out).op_names(), vec!["conv2d", "bias_add"]);
    }

    #[test]
    fn test_grouped_convolution_infers_input_channels() {
        let mut h = Harness::new().input("data", &[1, 4, 6, 6]);
        let layer = conv(4, 3)
            .with_attr("group", 2i64)
            .with_attr("stride", 2i64)
            .with_blob(Blob::from_vec(vec![0.0; 4 * 2 * 9]));
        let out = h.run(&layer).unwrap();
        assert_eq!(h.shape(out[0]), vec![1, 4, 2, 2]);
    }

    #[test]
    fn test_missing_kernel_is_invalid() {
        let mut h = Harness::new().input("data", &[1, 3, 8, 8]);
        let layer = Layer::new("conv1", "Convolution")
            .with_inputs(&["data"])
            .with_outputs(&["conv1"])
            .with_attr("num_output", 4i64)
            .with_blob(Blob::from_vec(vec![0.0; 12]));
        assert!(matches!(
            h.run(&layer),
            Err(ConvertError::InvalidAttribute { .. })
        ));
    }

    #[test]
    fn test_missing_weight_names_layer() {
        let mut h = Harness::new().input("data", &[1, 3, 8, 8]);
        match h.run(&conv(4, 3)) {
            Err(ConvertError::MissingParameter { layer, index, .. }) => {
                assert_eq!(layer, "conv1");
                assert_eq!(index, 0);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_deconvolution_keeps_declared_shape() {
        let mut h = Harness::new().input("data", &[1, 2, 4, 4]);
        let layer = Layer::new("up", "Deconvolution")
            .with_inputs(&["data"])
            .with_outputs(&["up"])
            .with_attr("num_output", 3i64)
            .with_attr("kernel_size", 2i64)
            .with_attr("stride", 2i64)
            .with_blob(Blob::new(vec![2, 3, 2, 2], vec![0.0; 24]).unwrap());
        let out = h.run(&layer).unwrap();
        assert_eq!(h.shape(out[0]), vec![1, 3, 8, 8]);
    }
}
