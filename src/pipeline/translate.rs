//! The translation pipeline.
//!
//! Validation happens up front: unsupported kinds, duplicate layer names and
//! out-of-order references are all reported before any IR is built.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use super::TranslateConfig;
use crate::convert::{ConvertContext, converter_for, unsupported_python_layer};
use crate::errors::ConvertError;
use crate::graph::{Fused, Normalized, SymbolTable, fuse, normalize};
use crate::ir::{Function, GraphBuilder, Literal, TensorType};
use crate::model::{Layer, NetDescription, OperatorKind, ParameterSet};

/// Result of [`translate`].
#[derive(Debug, Clone, Serialize)]
pub struct TranslatedModel {
    pub function: Function,
    /// Every constant materialized during translation, keyed by name. This
    /// is a superset of the function's free parameters when a later layer
    /// overwrote a tensor before it was read.
    pub params: BTreeMap<String, Literal>,
    /// Model output names as the source model declares them.
    pub outputs: Vec<String>,
}

impl TranslatedModel {
    pub fn to_json(&self) -> Result<String, ConvertError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn is_input(layer: &Layer) -> bool {
    OperatorKind::parse(&layer.kind) == Some(OperatorKind::Input)
}

/// Rejects unknown kinds (all of them at once, in first-seen order) and
/// duplicate layer names.
fn validate(layers: &[Layer]) -> Result<(), ConvertError> {
    let mut unsupported: Vec<String> = Vec::new();
    for layer in layers {
        let rejected = match OperatorKind::parse(&layer.kind) {
            None => Some(layer.kind.clone()),
            Some(OperatorKind::Python) => unsupported_python_layer(layer),
            Some(_) => None,
        };
        if let Some(kind) = rejected {
            if !unsupported.contains(&kind) {
                unsupported.push(kind);
            }
        }
    }
    if !unsupported.is_empty() {
        return Err(ConvertError::UnsupportedOperator { kinds: unsupported });
    }

    let mut names = HashSet::new();
    for layer in layers {
        if !names.insert(layer.name.as_str()) {
            return Err(ConvertError::invalid(&layer.name, "duplicate layer name"));
        }
    }
    Ok(())
}

/// Model inputs: the legacy declaration list, else the tops of Input layers.
fn model_inputs(net_inputs: &[String], layers: &[Layer]) -> Vec<String> {
    if !net_inputs.is_empty() {
        return net_inputs.to_vec();
    }
    layers
        .iter()
        .filter(|l| is_input(l))
        .flat_map(|l| l.outputs.iter().cloned())
        .collect()
}

/// Tops of computing layers that no layer reads, in declaration order.
fn model_outputs(layers: &[Layer]) -> Vec<String> {
    let consumed: HashSet<&str> = layers
        .iter()
        .flat_map(|l| l.inputs.iter().map(String::as_str))
        .collect();
    let mut outputs = Vec::new();
    for layer in layers.iter().filter(|l| !is_input(l) && !l.inputs.is_empty()) {
        for top in &layer.outputs {
            if !consumed.contains(top.as_str()) && !outputs.contains(top) {
                outputs.push(top.clone());
            }
        }
    }
    outputs
}

/// Every layer may only read tensors produced before it.
fn check_order(inputs: &[String], layers: &[Layer]) -> Result<(), ConvertError> {
    let mut defined: HashSet<&str> = inputs.iter().map(String::as_str).collect();
    for layer in layers {
        if !is_input(layer) {
            if let Some(missing) = layer.inputs.iter().find(|i| !defined.contains(i.as_str())) {
                log::debug!("`{}` reads `{missing}` before it is produced", layer.name);
                return Err(ConvertError::unbound(missing));
            }
        }
        defined.extend(layer.outputs.iter().map(String::as_str));
    }
    Ok(())
}

/// Translates a layer list into an IR function.
///
/// Blobs in `params` replace the inline blobs of the layer with the same
/// name.
pub fn translate(
    net: NetDescription,
    params: &ParameterSet,
    config: &TranslateConfig,
) -> Result<TranslatedModel, ConvertError> {
    let NetDescription {
        name,
        inputs: declared_inputs,
        mut layers,
    } = net;
    validate(&layers)?;

    for layer in layers.iter_mut() {
        if let Some(blobs) = params.get(&layer.name) {
            layer.blobs = blobs.to_vec();
        }
    }

    let Normalized {
        layers,
        renames,
        restore,
    } = if config.normalize_in_place {
        normalize(layers)
    } else {
        Normalized {
            layers,
            renames: Default::default(),
            restore: Default::default(),
        }
    };
    log::debug!("normalization renamed {} in-place tensor(s)", renames.len());
    let inputs = model_inputs(&declared_inputs, &layers);
    let outputs = model_outputs(&layers);

    let fused = if config.fuse_batch_norm {
        fuse(layers)?
    } else {
        Fused {
            layers,
            record: Default::default(),
            merged: Default::default(),
        }
    };
    log::debug!("fused {} BatchNorm/Scale pair(s)", fused.merged.len());
    check_order(&inputs, &fused.layers)?;

    let mut graph = GraphBuilder::new();
    let mut symbols = SymbolTable::new();
    for input in &inputs {
        let shape = config
            .input_shapes
            .get(input)
            .ok_or_else(|| ConvertError::MissingInputShape {
                name: input.clone(),
            })?;
        let ty = TensorType::new(shape.clone(), config.dtype_of(input));
        let value = graph.placeholder(input, ty);
        symbols.set(input, value);
    }

    let mut ctx = ConvertContext {
        graph: &mut graph,
        symbols: &mut symbols,
        merged: &fused.merged,
        model_inputs: &inputs,
    };
    let mut converted = 0;
    for layer in &fused.layers {
        let kind = OperatorKind::parse(&layer.kind).ok_or_else(|| {
            ConvertError::UnsupportedOperator {
                kinds: vec![layer.kind.clone()],
            }
        })?;
        let Some(routine) = converter_for(kind) else {
            continue;
        };

        ctx.graph.set_span(Some(&layer.name));
        let values = routine(layer, &mut ctx)?;
        if values.len() != layer.outputs.len() {
            return Err(ConvertError::invalid(
                &layer.name,
                format!(
                    "produced {} value(s) for {} declared output(s)",
                    values.len(),
                    layer.outputs.len()
                ),
            ));
        }
        for (top, value) in layer.outputs.iter().zip(values) {
            ctx.symbols.set(top, value);
        }
        log::debug!("converted `{}` ({kind})", layer.name);
        converted += 1;
    }
    ctx.graph.set_span(None);

    let mut results = Vec::with_capacity(outputs.len());
    let mut output_names = Vec::with_capacity(outputs.len());
    for output in &outputs {
        let current = fused.record.resolve(output);
        results.push(symbols.get(current)?);
        output_names.push(restore.restore(output).to_string());
    }

    let function = graph.finish(results);
    let unused = symbols
        .constant_count()
        .saturating_sub(function.param_names().len());
    if unused > 0 {
        log::debug!("{unused} exported constant(s) are not read by the function");
    }
    let params = symbols.into_params();

    log::info!(
        "translated {} ({converted} layers) into {} instructions with {} parameters",
        name.as_deref().unwrap_or("network"),
        function.body().len(),
        params.len()
    );
    Ok(TranslatedModel {
        function,
        params,
        outputs: output_names,
    })
}
