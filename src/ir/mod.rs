//! Target computation-graph IR.
//!
//! A [`GraphBuilder`] accumulates typed operator applications in SSA form and
//! seals them into a [`Function`]. Shapes are inferred eagerly, so the
//! translator can query the static shape of anything it has already built.

mod builder;
pub mod eval;
mod function;
mod op;
mod shape;
mod types;

pub use builder::{GraphBuilder, ShapeError};
pub use function::{
    Function, FunctionExport, Instruction, InstructionExport, ParamExport, Value, ValueDef,
    ValueId,
};
pub use op::{
    Conv2dAttrs, KernelLayout, NormRegion, Op, Pool2dAttrs, ProposalAttrs, ResizeMethod,
    SplitSections,
};
pub use types::{DType, Literal, TensorType};
