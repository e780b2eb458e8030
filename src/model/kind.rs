//! Closed set of supported layer kinds.

use std::fmt;

/// Every layer kind the translator knows how to handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatorKind {
    Input,
    BatchNorm,
    SegBatchNorm,
    Concat,
    Convolution,
    DepthwiseConvolution,
    Crop,
    Deconvolution,
    Dropout,
    Eltwise,
    Embed,
    Flatten,
    InnerProduct,
    Lrn,
    Normalize,
    Permute,
    Pooling,
    Power,
    PRelu,
    PriorBox,
    Proposal,
    PsRoiPooling,
    Python,
    Relu,
    Reshape,
    Resize,
    RoiPooling,
    Scale,
    Sigmoid,
    Slice,
    Softmax,
    TanH,
    Upsample,
}

impl OperatorKind {
    /// Parses a layer type tag. Returns `None` for unknown tags.
    pub fn parse(tag: &str) -> Option<Self> {
        let kind = match tag {
            "Input" => Self::Input,
            "BatchNorm" => Self::BatchNorm,
            "BN" => Self::SegBatchNorm,
            "Concat" => Self::Concat,
            "Convolution" => Self::Convolution,
            "DepthwiseConvolution" => Self::DepthwiseConvolution,
            "Crop" => Self::Crop,
            "Deconvolution" => Self::Deconvolution,
            "Dropout" => Self::Dropout,
            "Eltwise" => Self::Eltwise,
            "Embed" => Self::Embed,
            "Flatten" => Self::Flatten,
            "InnerProduct" => Self::InnerProduct,
            "LRN" => Self::Lrn,
            "Normalize" => Self::Normalize,
            "Permute" => Self::Permute,
            "Pooling" => Self::Pooling,
            "Power" => Self::Power,
            "PReLU" => Self::PRelu,
            "PriorBox" => Self::PriorBox,
            "proposal" | "Proposal" => Self::Proposal,
            "PSROIPooling" => Self::PsRoiPooling,
            "Python" => Self::Python,
            "ReLU" => Self::Relu,
            "Reshape" => Self::Reshape,
            "Resize" => Self::Resize,
            "ROIPooling" => Self::RoiPooling,
            "Scale" => Self::Scale,
            "Sigmoid" => Self::Sigmoid,
            "Slice" => Self::Slice,
            "Softmax" => Self::Softmax,
            "TanH" => Self::TanH,
            "Upsample" => Self::Upsample,
            _ => return None,
        };
        Some(kind)
    }

    /// Canonical type tag.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Input => "Input",
            Self::BatchNorm => "BatchNorm",
            Self::SegBatchNorm => "BN",
            Self::Concat => "Concat",
            Self::Convolution => "Convolution",
            Self::DepthwiseConvolution => "DepthwiseConvolution",
            Self::Crop => "Crop",
            Self::Deconvolution => "Deconvolution",
            Self::Dropout => "Dropout",
            Self::Eltwise => "Eltwise",
            Self::Embed => "Embed",
            Self::Flatten => "Flatten",
            Self::InnerProduct => "InnerProduct",
            Self::Lrn => "LRN",
            Self::Normalize => "Normalize",
            Self::Permute => "Permute",
            Self::Pooling => "Pooling",
            Self::Power => "Power",
            Self::PRelu => "PReLU",
            Self::PriorBox => "PriorBox",
            Self::Proposal => "proposal",
            Self::PsRoiPooling => "PSROIPooling",
            Self::Python => "Python",
            Self::Relu => "ReLU",
            Self::Reshape => "Reshape",
            Self::Resize => "Resize",
            Self::RoiPooling => "ROIPooling",
            Self::Scale => "Scale",
            Self::Sigmoid => "Sigmoid",
            Self::Slice => "Slice",
            Self::Softmax => "Softmax",
            Self::TanH => "TanH",
            Self::Upsample => "Upsample",
        }
    }
}

impl fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trips_tag() {
        for tag in ["Convolution", "BN", "LRN", "PReLU", "proposal", "TanH"] {
            let kind = OperatorKind::parse(tag).unwrap();
            assert_eq!(kind.tag(), tag);
        }
    }

    #[test]
    fn test_unknown_tag() {
        assert_eq!(OperatorKind::parse("Swish"), None);
        assert_eq!(OperatorKind::parse("relu"), None);
    }
}
