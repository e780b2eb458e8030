//! End-to-end translation of a layer list.

mod config;
mod translate;

pub use config::TranslateConfig;
pub use translate::{TranslatedModel, translate};
