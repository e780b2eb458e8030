//! Pooling layers.

use super::ConvertContext;
use crate::errors::ConvertError;
use crate::ir::{Op, Pool2dAttrs, ValueId};
use crate::model::Layer;

const POOL_METHODS: [&str; 3] = ["MAX", "AVE", "STOCHASTIC"];

/// `*_h`/`*_w` when either is positive, else the scalar field for both
/// sides. Pooling parameters are never repeated, so only the first entry of
/// the scalar counts.
fn window(
    layer: &Layer,
    scalar: &str,
    h_key: &str,
    w_key: &str,
) -> Result<Option<[usize; 2]>, ConvertError> {
    let h = layer.attr_usize(h_key, 0)?;
    let w = layer.attr_usize(w_key, 0)?;
    if h > 0 || w > 0 {
        return Ok(Some([h, w]));
    }
    Ok(layer.attr_usizes(scalar)?.first().map(|v| [*v, *v]))
}

pub(super) fn pooling(
    layer: &Layer,
    ctx: &mut ConvertContext<'_>,
) -> Result<Vec<ValueId>, ConvertError> {
    layer.expect_inputs(1)?;
    let data = ctx.input(layer, 0)?;
    let method = layer.attr_variant("pool", &POOL_METHODS, 0)?;
    if method == 2 {
        return Err(ConvertError::UnsupportedOperator {
            kinds: vec!["STOCHASTIC pool".to_string()],
        });
    }

    if layer.attr_bool("global_pooling", false)? {
        let op = if method == 0 {
            Op::GlobalMaxPool2d
        } else {
            Op::GlobalAvgPool2d
        };
        return Ok(vec![ctx.apply(layer, op, &[data])?]);
    }

    let pool_size = window(layer, "kernel_size", "kernel_h", "kernel_w")?
        .ok_or_else(|| ConvertError::invalid(&layer.name, "no kernel size given"))?;
    let attrs = Pool2dAttrs {
        pool_size,
        strides: window(layer, "stride", "stride_h", "stride_w")?.unwrap_or([1, 1]),
        padding: window(layer, "pad", "pad_h", "pad_w")?.unwrap_or([0, 0]),
        ceil_mode: layer.attr_bool("ceil_mode", true)?,
        count_include_pad: method == 1,
    };

    if method == 1 {
        return Ok(vec![ctx.apply(layer, Op::AvgPool2d(attrs), &[data])?]);
    }
    if layer.outputs.len() == 2 {
        let pooled = ctx.apply(layer, Op::MaxPool2d(attrs.clone()), &[data])?;
        let location = ctx.apply(layer, Op::MaxPool2dLocation(attrs), &[data])?;
        return Ok(vec![pooled, location]);
    }
    Ok(vec![ctx.apply(layer, Op::MaxPool2d(attrs), &[data])?])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::testing::Harness;

    fn pool(method: &str) -> Layer {
        Layer::new("pool1", "Pooling")
            .with_inputs(&["data"])
            .with_outputs(&["pool1"])
            .with_attr("pool", method)
            .with_attr("kernel_size", 3i64)
            .with_attr("stride", 2i64)
    }

    #[test]
    fn test_max_pool_rounds_up() {
        let mut h = Harness::new().input("data", &[1, 8, 6, 6]);
        let out = h.run(&pool("MAX")).unwrap();
        // (6 - 3) / 2 rounded up, plus one.
        assert_eq!(h.shape(out[0]), vec![1, 8, 3, 3]);
    }

    #[test]
    fn test_floor_mode() {
        let mut h = Harness::new().input("data", &[1, 8, 6, 6]);
        let out = h.run(&pool("MAX").with_attr("ceil_mode", false)).unwrap();
        assert_eq!(h.shape(out[0]), vec![1, 8, 2, 2]);
    }

    #[test]
    fn test_average_counts_padding() {
        let mut h = Harness::new().input("data", &[1, 8, 6, 6]);
        let out = h.run(&pool("AVE").with_attr("pad", 1i64)).unwrap();
        let function = h.finish(out);
        match &function.body()[0].op {
            Op::AvgPool2d(attrs) => {
                assert!(attrs.count_include_pad);
                assert_eq!(attrs.padding, [1, 1]);
            }
            other => panic!("unexpected op {other:?}"),
        }
    }

    #[test]
    fn test_scalar_window_uses_first_entry() {
        let mut h = Harness::new().input("data", &[1, 8, 6, 6]);
        let layer = pool("MAX")
            .with_attr("kernel_size", vec![2i64, 3])
            .with_attr("stride", vec![2i64, 1]);
        let out = h.run(&layer).unwrap();
        let function = h.finish(out);
        match &function.body()[0].op {
            Op::MaxPool2d(attrs) => {
                assert_eq!(attrs.pool_size, [2, 2]);
                assert_eq!(attrs.strides, [2, 2]);
            }
            other => panic!("unexpected op {other:?}"),
        }
    }

    #[test]
    fn test_explicit_height_and_width() {
        let mut h = Harness::new().input("data", &[1, 8, 6, 6]);
        let layer = pool("MAX")
            .with_attr("kernel_h", 3i64)
            .with_attr("kernel_w", 1i64)
            .with_attr("stride_h", 1i64)
            .with_attr("stride_w", 1i64)
            .with_attr("ceil_mode", false);
        let out = h.run(&layer).unwrap();
        assert_eq!(h.shape(out[0]), vec![1, 8, 4, 6]);
    }

    #[test]
    fn test_global_pooling_ignores_window() {
        let mut h = Harness::new().input("data", &[2, 8, 7, 7]);
        let layer = Layer::new("gap", "Pooling")
            .with_inputs(&["data"])
            .with_outputs(&["gap"])
            .with_attr("pool", 1i64)
            .with_attr("global_pooling", true);
        let out = h.run(&layer).unwrap();
        assert_eq!(h.shape(out[0]), vec![2, 8, 1, 1]);
    }

    #[test]
    fn test_two_outputs_return_location() {
        let mut h = Harness::new().input("data", &[1, 2, 4, 4]);
        let layer = pool("MAX").with_outputs(&["pool1", "pool1_mask"]);
        let out = h.run(&layer).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(
            h.finish(out).op_names(),
            vec!["max_pool2d", "max_pool2d_location"]
        );
    }

    #[test]
    fn test_stochastic_is_unsupported() {
        let mut h = Harness::new().input("data", &[1, 2, 4, 4]);
        assert!(matches!(
            h.run(&pool("STOCHASTIC")),
            Err(ConvertError::UnsupportedOperator { .. })
        ));
    }
}
