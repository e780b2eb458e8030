//! Layer-graph passes that run before conversion.
//!
//! Layers go through [`normalize`] first, then [`fuse`]. Both passes return
//! read-only records that later stages use to map tensor names.

mod fusion;
mod normalize;
mod symbol_table;

pub use fusion::{DEFAULT_BN_EPS, Fused, FusionRecord, MergedBatchNorm, fuse};
pub(crate) use fusion::moving_average_factor;
pub use normalize::{Normalized, RenameRecord, RestoreRecord, normalize};
pub use symbol_table::{PARAM_PREFIX, SymbolTable};
