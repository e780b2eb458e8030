//! Detection and resampling layers: PriorBox, region proposals, ROI pooling,
//! upsampling and resize.

use super::ConvertContext;
use super::param_str::{self, ParamMap, ParamValue};
use crate::errors::ConvertError;
use crate::ir::{Literal, Op, ProposalAttrs, ResizeMethod, ValueId};
use crate::model::Layer;

/// Spatial extent `(h, w)` of a rank-4 NCHW value.
fn spatial(layer: &Layer, shape: &[usize], what: &str) -> Result<(usize, usize), ConvertError> {
    match shape {
        [_, _, h, w] => Ok((*h, *w)),
        other => Err(ConvertError::shape(
            &layer.name,
            format!("{what} must be NCHW, got {other:?}"),
        )),
    }
}

/// Geometry of the default boxes of a PriorBox layer.
#[derive(Debug, Clone, PartialEq)]
struct PriorBoxGeometry {
    min_sizes: Vec<f64>,
    max_sizes: Vec<f64>,
    ratios: Vec<f64>,
    step: (f64, f64),
    offset: f64,
    image: (f64, f64),
    clip: bool,
    variance: Vec<f64>,
}

impl PriorBoxGeometry {
    fn from_layer(
        layer: &Layer,
        feature: (usize, usize),
        image: (usize, usize),
    ) -> Result<Self, ConvertError> {
        let min_sizes = layer.attr_floats("min_size")?;
        if min_sizes.is_empty() {
            return Err(ConvertError::invalid(&layer.name, "`min_size` is required"));
        }
        let max_sizes = layer.attr_floats("max_size")?;
        if !max_sizes.is_empty() && max_sizes.len() != min_sizes.len() {
            return Err(ConvertError::invalid(
                &layer.name,
                format!(
                    "{} max sizes given for {} min sizes",
                    max_sizes.len(),
                    min_sizes.len()
                ),
            ));
        }

        let flip = layer.attr_bool("flip", true)?;
        let mut ratios = vec![1.0];
        for r in layer.attr_floats("aspect_ratio")? {
            if r != 1.0 {
                ratios.push(r);
                if flip {
                    ratios.push(1.0 / r);
                }
            }
        }

        let img_size = layer.attr_usize("img_size", 0)?;
        let pick = |specific: usize, fallback: usize| {
            if specific > 0 {
                specific
            } else if img_size > 0 {
                img_size
            } else {
                fallback
            }
        };
        let img_h = pick(layer.attr_usize("img_h", 0)?, image.0) as f64;
        let img_w = pick(layer.attr_usize("img_w", 0)?, image.1) as f64;

        let step = layer.attr_float("step", 0.0)?;
        let step_h = layer.attr_float("step_h", 0.0)?;
        let step_w = layer.attr_float("step_w", 0.0)?;
        let step = if step_h > 0.0 || step_w > 0.0 {
            (step_h, step_w)
        } else if step > 0.0 {
            (step, step)
        } else {
            (img_h / feature.0 as f64, img_w / feature.1 as f64)
        };

        let variance = match layer.attr_floats("variance")? {
            v if v.is_empty() => vec![0.1],
            v if v.len() == 1 || v.len() == 4 => v,
            v => {
                return Err(ConvertError::invalid(
                    &layer.name,
                    format!("expected 1 or 4 variance values, found {}", v.len()),
                ));
            }
        };

        Ok(Self {
            min_sizes,
            max_sizes,
            ratios,
            step,
            offset: layer.attr_float("offset", 0.5)?,
            image: (img_h, img_w),
            clip: layer.attr_bool("clip", false)?,
            variance,
        })
    }

    fn push_box(&self, out: &mut Vec<f32>, center: (f64, f64), width: f64, height: f64) {
        let (cy, cx) = center;
        let (img_h, img_w) = self.image;
        out.extend([
            ((cx - width / 2.0) / img_w) as f32,
            ((cy - height / 2.0) / img_h) as f32,
            ((cx + width / 2.0) / img_w) as f32,
            ((cy + height / 2.0) / img_h) as f32,
        ]);
    }

    /// Box coordinates for every position of a `feature`-sized map followed
    /// by the variance block.
    fn generate(&self, feature: (usize, usize)) -> Vec<f32> {
        let mut coords = Vec::new();
        for row in 0..feature.0 {
            for col in 0..feature.1 {
                let center = (
                    (row as f64 + self.offset) * self.step.0,
                    (col as f64 + self.offset) * self.step.1,
                );
                for (i, &min) in self.min_sizes.iter().enumerate() {
                    self.push_box(&mut coords, center, min, min);
                    if let Some(&max) = self.max_sizes.get(i) {
                        let side = (min * max).sqrt();
                        self.push_box(&mut coords, center, side, side);
                    }
                    for &ratio in self.ratios.iter().filter(|r| **r != 1.0) {
                        let root = ratio.sqrt();
                        self.push_box(&mut coords, center, min * root, min / root);
                    }
                }
            }
        }
        if self.clip {
            for c in coords.iter_mut() {
                *c = c.clamp(0.0, 1.0);
            }
        }

        let variance: Vec<f32> = match self.variance.as_slice() {
            [v] => vec![*v as f32; coords.len()],
            four => four
                .iter()
                .map(|v| *v as f32)
                .cycle()
                .take(coords.len())
                .collect(),
        };
        coords.extend(variance);
        coords
    }
}

pub(super) fn prior_box(
    layer: &Layer,
    ctx: &mut ConvertContext<'_>,
) -> Result<Vec<ValueId>, ConvertError> {
    layer.expect_inputs(2)?;
    let feature = ctx.input(layer, 0)?;
    let image = ctx.input(layer, 1)?;
    let feature = spatial(layer, &ctx.shape(feature), "feature map")?;
    let image = spatial(layer, &ctx.shape(image), "image")?;

    let geometry = PriorBoxGeometry::from_layer(layer, feature, image)?;
    let data = geometry.generate(feature);
    // Priors only depend on spatial sizes; one row pair serves every image.
    let per_row = data.len() / 2;
    let literal = Literal::new(vec![1, 2, per_row], data)?;
    log::debug!("`{}`: {} prior boxes", layer.name, per_row / 4);
    Ok(vec![ctx.constant(literal)])
}

/// `im_info` rows `[h, w, 1]` derived from the first model input.
fn image_info(layer: &Layer, ctx: &mut ConvertContext<'_>) -> Result<ValueId, ConvertError> {
    let name = ctx.model_inputs.first().ok_or_else(|| {
        ConvertError::invalid(&layer.name, "the model declares no input to size im_info by")
    })?;
    let input = ctx.symbols.get(name)?;
    let shape = ctx.shape(input);
    let (h, w) = spatial(layer, &shape, "model input")?;
    let rows = shape[0];
    let data = [h as f32, w as f32, 1.0].repeat(rows);
    let literal = Literal::new(vec![rows, 3], data)?;
    Ok(ctx.constant(literal))
}

/// Caffe `Proposal` layer: class scores and box deltas, with `im_info`
/// synthesized from the model input.
pub(super) fn proposal(
    layer: &Layer,
    ctx: &mut ConvertContext<'_>,
) -> Result<Vec<ValueId>, ConvertError> {
    layer.expect_inputs(2)?;
    let scores = ctx.input(layer, 0)?;
    let deltas = ctx.input(layer, 1)?;
    let im_info = image_info(layer, ctx)?;

    let mut attrs = ProposalAttrs::default();
    let scales = layer.attr_floats("scale")?;
    if !scales.is_empty() {
        attrs.scales = scales;
    }
    let ratios = layer.attr_floats("ratio")?;
    if !ratios.is_empty() {
        attrs.ratios = ratios;
    }
    attrs.feature_stride = layer.attr_usize("feat_stride", attrs.feature_stride)?;
    attrs.rpn_pre_nms_top_n = layer.attr_usize("pre_nms_topn", attrs.rpn_pre_nms_top_n)?;
    attrs.rpn_post_nms_top_n = layer.attr_usize("post_nms_topn", attrs.rpn_post_nms_top_n)?;
    attrs.threshold = layer.attr_float("nms_thresh", attrs.threshold)?;
    attrs.rpn_min_size = layer.attr_usize("min_size", attrs.rpn_min_size)?;

    Ok(vec![ctx.apply(layer, Op::Proposal(attrs), &[scores, deltas, im_info])?])
}

/// Name of the only Python layer that can be translated.
const PROPOSAL_LAYER: &str = "proposallayer";

/// `Python.<layer>` when `layer` is a Python layer that cannot be
/// translated.
pub(crate) fn unsupported_python_layer(layer: &Layer) -> Option<String> {
    let target = layer.attr_str("layer").ok().flatten().unwrap_or_default();
    if target.eq_ignore_ascii_case(PROPOSAL_LAYER) {
        None
    } else {
        Some(format!("Python.{target}"))
    }
}

fn proposal_params(layer: &Layer, params: &ParamMap) -> Result<ProposalAttrs, ConvertError> {
    let bad = |key: &str, value: &ParamValue| {
        ConvertError::invalid(&layer.name, format!("param_str `{key}` has bad value {value:?}"))
    };
    let list = |key: &str, default: Vec<f64>| match params.get(key) {
        None => Ok(default),
        Some(v) => v.as_f64_list().ok_or_else(|| bad(key, v)),
    };
    let count = |key: &str, default: usize| match params.get(key) {
        None => Ok(default),
        Some(v) => v
            .as_i64()
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| bad(key, v)),
    };

    let defaults = ProposalAttrs::default();
    Ok(ProposalAttrs {
        scales: list("scales", defaults.scales)?,
        ratios: list("ratios", defaults.ratios)?,
        feature_stride: count("feat_stride", defaults.feature_stride)?,
        threshold: match params.get("rpn_nms_thresh") {
            None => defaults.threshold,
            Some(v) => v.as_f64().ok_or_else(|| bad("rpn_nms_thresh", v))?,
        },
        rpn_pre_nms_top_n: count("rpn_pre_nms_top_n", defaults.rpn_pre_nms_top_n)?,
        rpn_post_nms_top_n: count("rpn_post_nms_top_n", defaults.rpn_post_nms_top_n)?,
        rpn_min_size: count("rpn_min_size", defaults.rpn_min_size)?,
        iou_loss: match params.get("iou_loss") {
            None => defaults.iou_loss,
            Some(v) => v.as_bool().ok_or_else(|| bad("iou_loss", v))?,
        },
    })
}

/// Python layers; only `ProposalLayer` with its `param_str` is understood.
pub(super) fn python(
    layer: &Layer,
    ctx: &mut ConvertContext<'_>,
) -> Result<Vec<ValueId>, ConvertError> {
    if let Some(kind) = unsupported_python_layer(layer) {
        return Err(ConvertError::UnsupportedOperator { kinds: vec![kind] });
    }
    layer.expect_inputs(3)?;
    let text = layer.attr_str("param_str")?.unwrap_or_default();
    let params = param_str::parse(text)
        .map_err(|e| ConvertError::invalid(&layer.name, e.to_string()))?;
    let attrs = proposal_params(layer, &params)?;

    let inputs = (0..3)
        .map(|i| ctx.input(layer, i))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(vec![ctx.apply(layer, Op::Proposal(attrs), &inputs)?])
}

pub(super) fn roi_pooling(
    layer: &Layer,
    ctx: &mut ConvertContext<'_>,
) -> Result<Vec<ValueId>, ConvertError> {
    layer.expect_inputs(2)?;
    let data = ctx.input(layer, 0)?;
    let rois = ctx.input(layer, 1)?;
    let pooled_h = layer.require_usize("pooled_h")?;
    let pooled_w = layer.require_usize("pooled_w")?;
    if pooled_h == 0 || pooled_w == 0 {
        return Err(ConvertError::invalid(
            &layer.name,
            "pooled size must be positive",
        ));
    }
    let op = Op::RoiPool {
        pooled_size: [pooled_h, pooled_w],
        spatial_scale: layer.attr_float("spatial_scale", 1.0)?,
    };
    Ok(vec![ctx.apply(layer, op, &[data, rois])?])
}

pub(super) fn psroi_pooling(
    layer: &Layer,
    ctx: &mut ConvertContext<'_>,
) -> Result<Vec<ValueId>, ConvertError> {
    layer.expect_inputs(2)?;
    let data = ctx.input(layer, 0)?;
    let rois = ctx.input(layer, 1)?;
    let op = Op::PsRoiPool {
        spatial_scale: layer.attr_float("spatial_scale", 1.0)?,
        output_dim: layer.require_usize("output_dim")?,
        group_size: layer.require_usize("group_size")?,
    };
    Ok(vec![ctx.apply(layer, op, &[data, rois])?])
}

pub(super) fn upsample(
    layer: &Layer,
    ctx: &mut ConvertContext<'_>,
) -> Result<Vec<ValueId>, ConvertError> {
    let scale = layer.attr_usize("scale", 2)?;
    let data = ctx.input(layer, 0)?;
    let out = match layer.inputs.len() {
        1 => {
            let op = Op::Upsampling {
                scale_h: scale as f64,
                scale_w: scale as f64,
                method: ResizeMethod::NearestNeighbor,
                align_corners: false,
            };
            ctx.apply(layer, op, &[data])?
        }
        2 => {
            let mask = ctx.input(layer, 1)?;
            let op = Op::Unpooling {
                scale_h: scale,
                scale_w: scale,
            };
            ctx.apply(layer, op, &[data, mask])?
        }
        n => {
            return Err(ConvertError::invalid(
                &layer.name,
                format!("expected 1 or 2 inputs, found {n}"),
            ));
        }
    };
    Ok(vec![out])
}

pub(super) fn resize(
    layer: &Layer,
    ctx: &mut ConvertContext<'_>,
) -> Result<Vec<ValueId>, ConvertError> {
    layer.expect_inputs(1)?;
    let data = ctx.input(layer, 0)?;
    let op = Op::Upsampling {
        scale_h: layer.attr_float("y_scaling", 1.0)?,
        scale_w: layer.attr_float("x_scaling", 1.0)?,
        method: ResizeMethod::Bilinear,
        align_corners: false,
    };
    Ok(vec![ctx.apply(layer, op, &[data])?])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::testing::Harness;

    fn prior_box_layer() -> Layer {
        Layer::new("prior", "PriorBox")
            .with_inputs(&["feature", "image"])
            .with_outputs(&["prior"])
            .with_attr("min_size", 4.0)
            .with_attr("aspect_ratio", vec![1.0])
            .with_attr("flip", false)
            .with_attr("clip", true)
    }

    fn params(h: Harness) -> std::collections::BTreeMap<String, Literal> {
        h.symbols.into_params()
    }

    #[test]
    fn test_single_prior_box() {
        let mut h = Harness::new()
            .input("feature", &[1, 8, 1, 1])
            .input("image", &[1, 3, 4, 4]);
        let out = h.run(&prior_box_layer()).unwrap();
        assert_eq!(h.shape(out[0]), vec![1, 2, 4]);

        let params = params(h);
        assert_eq!(
            params["_param_1"].data(),
            &[0.0, 0.0, 1.0, 1.0, 0.1, 0.1, 0.1, 0.1]
        );
    }

    #[test]
    fn test_prior_box_batch_stays_one() {
        let mut h = Harness::new()
            .input("feature", &[2, 8, 1, 1])
            .input("image", &[2, 3, 4, 4]);
        let out = h.run(&prior_box_layer()).unwrap();
        assert_eq!(h.shape(out[0]), vec![1, 2, 4]);
        assert_eq!(params(h)["_param_1"].data().len(), 8);
    }

    #[test]
    fn test_prior_boxes_per_position() {
        let mut h = Harness::new()
            .input("feature", &[1, 8, 2, 2])
            .input("image", &[1, 3, 8, 8]);
        let layer = prior_box_layer()
            .with_attr("max_size", 8.0)
            .with_attr("aspect_ratio", vec![2.0])
            .with_attr("flip", true)
            .with_attr("variance", vec![0.1, 0.1, 0.2, 0.2]);
        let out = h.run(&layer).unwrap();
        // 4 positions, each with min, max, 2 and 1/2 boxes.
        assert_eq!(h.shape(out[0]), vec![1, 2, 4 * 4 * 4]);

        let params = params(h);
        let data = params["_param_1"].data();
        assert_eq!(&data[64..68], &[0.1, 0.1, 0.2, 0.2]);
    }

    #[test]
    fn test_prior_box_requires_min_size() {
        let mut h = Harness::new()
            .input("feature", &[1, 8, 1, 1])
            .input("image", &[1, 3, 4, 4]);
        let layer = Layer::new("prior", "PriorBox")
            .with_inputs(&["feature", "image"])
            .with_outputs(&["prior"]);
        assert!(matches!(
            h.run(&layer),
            Err(ConvertError::InvalidAttribute { .. })
        ));
    }

    #[test]
    fn test_prior_box_max_size_count() {
        let mut h = Harness::new()
            .input("feature", &[1, 8, 1, 1])
            .input("image", &[1, 3, 4, 4]);
        let layer = prior_box_layer().with_attr("max_size", vec![8.0, 16.0]);
        assert!(matches!(
            h.run(&layer),
            Err(ConvertError::InvalidAttribute { .. })
        ));
    }

    #[test]
    fn test_proposal_builds_image_info() {
        let mut h = Harness::new()
            .input("data", &[2, 3, 224, 320])
            .input("cls", &[2, 24, 14, 20])
            .input("bbox", &[2, 48, 14, 20]);
        let layer = Layer::new("rois", "Proposal")
            .with_inputs(&["cls", "bbox"])
            .with_outputs(&["rois"])
            .with_attr("post_nms_topn", 100i64);
        let out = h.run(&layer).unwrap();
        assert_eq!(h.shape(out[0]), vec![200, 5]);

        let params = params(h);
        assert_eq!(
            params["_param_1"].data(),
            &[224.0, 320.0, 1.0, 224.0, 320.0, 1.0]
        );
    }

    #[test]
    fn test_python_proposal_layer() {
        let mut h = Harness::new()
            .input("cls", &[1, 6, 4, 4])
            .input("bbox", &[1, 12, 4, 4])
            .input("im_info", &[1, 3]);
        let layer = Layer::new("rois", "Python")
            .with_inputs(&["cls", "bbox", "im_info"])
            .with_outputs(&["rois"])
            .with_attr("layer", "ProposalLayer")
            .with_attr("param_str", "'feat_stride': 8, 'scales': (8, 16, 32), 'ratios': [1]");
        let out = h.run(&layer).unwrap();
        assert_eq!(h.shape(out[0]), vec![300, 5]);

        match &h.finish(out).body()[0].op {
            Op::Proposal(attrs) => {
                assert_eq!(attrs.feature_stride, 8);
                assert_eq!(attrs.scales, vec![8.0, 16.0, 32.0]);
                assert_eq!(attrs.rpn_pre_nms_top_n, 6000);
            }
            other => panic!("unexpected op {other:?}"),
        }
    }

    #[test]
    fn test_other_python_layer_is_unsupported() {
        let layer = Layer::new("py", "Python").with_attr("layer", "CustomLayer");
        assert_eq!(
            unsupported_python_layer(&layer),
            Some("Python.CustomLayer".to_string())
        );
        let layer = Layer::new("py", "Python").with_attr("layer", "proposalLayer");
        assert_eq!(unsupported_python_layer(&layer), None);
    }

    #[test]
    fn test_python_bad_param_str() {
        let mut h = Harness::new()
            .input("cls", &[1, 6, 4, 4])
            .input("bbox", &[1, 12, 4, 4])
            .input("im_info", &[1, 3]);
        let layer = Layer::new("rois", "Python")
            .with_inputs(&["cls", "bbox", "im_info"])
            .with_outputs(&["rois"])
            .with_attr("layer", "ProposalLayer")
            .with_attr("param_str", "'feat_stride': 'wide'");
        assert!(matches!(
            h.run(&layer),
            Err(ConvertError::InvalidAttribute { .. })
        ));
    }

    #[test]
    fn test_roi_pooling() {
        let mut h = Harness::new()
            .input("conv5", &[1, 256, 14, 14])
            .input("rois", &[32, 5]);
        let layer = Layer::new("pool5", "ROIPooling")
            .with_inputs(&["conv5", "rois"])
            .with_outputs(&["pool5"])
            .with_attr("pooled_h", 7i64)
            .with_attr("pooled_w", 7i64)
            .with_attr("spatial_scale", 0.0625);
        let out = h.run(&layer).unwrap();
        assert_eq!(h.shape(out[0]), vec![32, 256, 7, 7]);
    }

    #[test]
    fn test_psroi_pooling_requires_group_size() {
        let mut h = Harness::new()
            .input("cls", &[1, 98, 14, 14])
            .input("rois", &[4, 5]);
        let layer = Layer::new("ps", "PSROIPooling")
            .with_inputs(&["cls", "rois"])
            .with_outputs(&["ps"])
            .with_attr("output_dim", 2i64);
        assert!(h.run(&layer).is_err());

        let out = h.run(&layer.with_attr("group_size", 7i64)).unwrap();
        assert_eq!(h.shape(out[0]), vec![4, 2, 7, 7]);
    }

    #[test]
    fn test_upsample_variants() {
        let mut h = Harness::new()
            .input("x", &[1, 4, 3, 3])
            .input("mask", &[1, 4, 3, 3]);
        let nearest = Layer::new("up", "Upsample")
            .with_inputs(&["x"])
            .with_outputs(&["up"]);
        let out = h.run(&nearest).unwrap();
        assert_eq!(h.shape(out[0]), vec![1, 4, 6, 6]);

        let unpool = nearest.with_inputs(&["x", "mask"]).with_attr("scale", 3i64);
        let out = h.run(&unpool).unwrap();
        assert_eq!(h.shape(out[0]), vec![1, 4, 9, 9]);
    }

    #[test]
    fn test_resize_is_bilinear() {
        let mut h = Harness::new().input("x", &[1, 4, 3, 5]);
        let layer = Layer::new("resize", "Resize")
            .with_inputs(&["x"])
            .with_outputs(&["resize"])
            .with_attr("x_scaling", 2.0)
            .with_attr("y_scaling", 3.0);
        let out = h.run(&layer).unwrap();
        assert_eq!(h.shape(out[0]), vec![1, 4, 9, 10]);
    }
}
