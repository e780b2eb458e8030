//! Typed operators of the target IR.
//!
//! Each variant carries its attributes. Operators serialize as an object
//! tagged with `op`, which is also how they are printed in the text form.

use serde::{Deserialize, Serialize};

use super::types::DType;

/// Attributes shared by `conv2d` and `conv2d_transpose`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conv2dAttrs {
    pub channels: usize,
    pub kernel_size: [usize; 2],
    pub strides: [usize; 2],
    pub padding: [usize; 2],
    pub dilation: [usize; 2],
    pub groups: usize,
    pub kernel_layout: KernelLayout,
}

/// Weight layout of a convolution kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum KernelLayout {
    Oihw,
    Iohw,
}

/// Attributes of the windowed 2d pooling operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pool2dAttrs {
    pub pool_size: [usize; 2],
    pub strides: [usize; 2],
    pub padding: [usize; 2],
    pub ceil_mode: bool,
    #[serde(default)]
    pub count_include_pad: bool,
}

/// Region proposal attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalAttrs {
    pub scales: Vec<f64>,
    pub ratios: Vec<f64>,
    pub feature_stride: usize,
    pub threshold: f64,
    pub rpn_pre_nms_top_n: usize,
    pub rpn_post_nms_top_n: usize,
    pub rpn_min_size: usize,
    pub iou_loss: bool,
}

impl Default for ProposalAttrs {
    fn default() -> Self {
        Self {
            scales: vec![4.0, 8.0, 16.0, 32.0],
            ratios: vec![0.5, 1.0, 2.0],
            feature_stride: 16,
            threshold: 0.7,
            rpn_pre_nms_top_n: 6000,
            rpn_post_nms_top_n: 300,
            rpn_min_size: 16,
            iou_loss: false,
        }
    }
}

/// How `split` divides its axis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SplitSections {
    /// That many equal parts.
    Count(usize),
    /// Sorted split points.
    Indices(Vec<usize>),
}

/// Resampling method of `upsampling`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeMethod {
    NearestNeighbor,
    Bilinear,
}

/// Normalization region of `lrn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NormRegion {
    AcrossChannels,
    WithinChannel,
}

/// An IR operator with its attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    Conv2d(Conv2dAttrs),
    Conv2dTranspose(Conv2dAttrs),
    BiasAdd {
        axis: usize,
    },
    Dense {
        units: usize,
    },

    Add,
    Subtract,
    Multiply,
    Divide,
    Maximum,
    Power,

    Reshape {
        newshape: Vec<i64>,
    },
    BatchFlatten,
    Concatenate {
        axis: usize,
    },
    Split {
        sections: SplitSections,
        axis: usize,
    },
    StridedSlice {
        begin: Vec<usize>,
        end: Vec<usize>,
    },
    Transpose {
        axes: Vec<usize>,
    },

    BatchNorm {
        axis: usize,
        epsilon: f64,
        scale: bool,
    },
    Lrn {
        size: usize,
        axis: usize,
        alpha: f64,
        beta: f64,
        bias: f64,
        norm_region: NormRegion,
    },
    L2Normalize {
        eps: f64,
        axes: Vec<usize>,
    },

    Relu,
    LeakyRelu {
        alpha: f64,
    },
    PRelu {
        axis: usize,
    },
    Sigmoid,
    Tanh,
    Softmax {
        axis: usize,
    },
    Dropout {
        rate: f64,
    },

    MaxPool2d(Pool2dAttrs),
    AvgPool2d(Pool2dAttrs),
    MaxPool2dLocation(Pool2dAttrs),
    GlobalMaxPool2d,
    GlobalAvgPool2d,

    Upsampling {
        scale_h: f64,
        scale_w: f64,
        method: ResizeMethod,
        align_corners: bool,
    },
    Unpooling {
        scale_h: usize,
        scale_w: usize,
    },

    Proposal(ProposalAttrs),
    RoiPool {
        pooled_size: [usize; 2],
        spatial_scale: f64,
    },
    PsRoiPool {
        spatial_scale: f64,
        output_dim: usize,
        group_size: usize,
    },

    Take {
        axis: usize,
    },
    Cast {
        dtype: DType,
    },
}

impl Op {
    /// Operator name as printed and exported.
    pub fn name(&self) -> &'static str {
        match self {
            Op::Conv2d(_) => "conv2d",
            Op::Conv2dTranspose(_) => "conv2d_transpose",
            Op::BiasAdd { .. } => "bias_add",
            Op::Dense { .. } => "dense",
            Op::Add => "add",
            Op::Subtract => "subtract",
            Op::Multiply => "multiply",
            Op::Divide => "divide",
            Op::Maximum => "maximum",
            Op::Power => "power",
            Op::Reshape { .. } => "reshape",
            Op::BatchFlatten => "batch_flatten",
            Op::Concatenate { .. } => "concatenate",
            Op::Split { .. } => "split",
            Op::StridedSlice { .. } => "strided_slice",
            Op::Transpose { .. } => "transpose",
            Op::BatchNorm { .. } => "batch_norm",
            Op::Lrn { .. } => "lrn",
            Op::L2Normalize { .. } => "l2_normalize",
            Op::Relu => "relu",
            Op::LeakyRelu { .. } => "leaky_relu",
            Op::PRelu { .. } => "p_relu",
            Op::Sigmoid => "sigmoid",
            Op::Tanh => "tanh",
            Op::Softmax { .. } => "softmax",
            Op::Dropout { .. } => "dropout",
            Op::MaxPool2d(_) => "max_pool2d",
            Op::AvgPool2d(_) => "avg_pool2d",
            Op::MaxPool2dLocation(_) => "max_pool2d_location",
            Op::GlobalMaxPool2d => "global_max_pool2d",
            Op::GlobalAvgPool2d => "global_avg_pool2d",
            Op::Upsampling { .. } => "upsampling",
            Op::Unpooling { .. } => "unpooling",
            Op::Proposal(_) => "proposal",
            Op::RoiPool { .. } => "roi_pool",
            Op::PsRoiPool { .. } => "ps_roi_pool",
            Op::Take { .. } => "take",
            Op::Cast { .. } => "cast",
        }
    }

    /// Number of operands the operator takes.
    pub fn arity(&self) -> usize {
        match self {
            Op::Conv2d(_) | Op::Conv2dTranspose(_) | Op::BiasAdd { .. } | Op::Dense { .. } => 2,
            Op::Add | Op::Subtract | Op::Multiply | Op::Divide | Op::Maximum | Op::Power => 2,
            Op::PRelu { .. } | Op::Unpooling { .. } | Op::Take { .. } => 2,
            Op::RoiPool { .. } | Op::PsRoiPool { .. } => 2,
            Op::Proposal(_) => 3,
            Op::BatchNorm { .. } => 5,
            // Variadic; checked by shape inference.
            Op::Concatenate { .. } => 0,
            _ => 1,
        }
    }

    pub(crate) fn is_variadic(&self) -> bool {
        matches!(self, Op::Concatenate { .. })
    }

    /// Key/value attribute pairs for the text form.
    pub(crate) fn attributes(&self) -> Vec<(String, String)> {
        let Ok(serde_json::Value::Object(map)) = serde_json::to_value(self) else {
            return Vec::new();
        };
        let mut attrs: Vec<(String, String)> = map
            .into_iter()
            .filter(|(k, _)| k != "op")
            .map(|(k, v)| {
                let text = match v {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                (k, text)
            })
            .collect();
        attrs.sort();
        attrs
    }
}
