//! Tensor name bindings and exported constants.

use std::collections::{BTreeMap, HashMap};

use crate::errors::ConvertError;
use crate::ir::{GraphBuilder, Literal, ValueId};

/// Prefix of synthesized constant names.
pub const PARAM_PREFIX: &str = "_param_";

/// Maps tensor names to IR values and records every constant created
/// during translation.
#[derive(Debug, Default)]
pub struct SymbolTable {
    bindings: HashMap<String, ValueId>,
    constants: Vec<(String, Literal)>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up the value bound to `name`.
    pub fn get(&self, name: &str) -> Result<ValueId, ConvertError> {
        self.bindings
            .get(name)
            .copied()
            .ok_or_else(|| ConvertError::unbound(name))
    }

    /// Binds `name`, replacing any previous binding.
    pub fn set(&mut self, name: &str, value: ValueId) {
        self.bindings.insert(name.to_string(), value);
    }

    /// Materializes `literal` as a fresh named parameter `_param_N`.
    pub fn new_constant(&mut self, graph: &mut GraphBuilder, literal: Literal) -> ValueId {
        let name = format!("{PARAM_PREFIX}{}", self.constants.len() + 1);
        let value = graph.constant_param(&name, literal.clone());
        self.bindings.insert(name.clone(), value);
        self.constants.push((name, literal));
        value
    }

    /// Number of constants created so far.
    pub fn constant_count(&self) -> usize {
        self.constants.len()
    }

    /// Every constant created during translation, keyed by name.
    pub fn into_params(self) -> BTreeMap<String, Literal> {
        self.constants.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::TensorType;

    #[test]
    fn test_get_unbound() {
        let table = SymbolTable::new();
        match table.get("conv1") {
            Err(ConvertError::UnboundTensor { name }) => assert_eq!(name, "conv1"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_set_overwrites() {
        let mut graph = GraphBuilder::new();
        let a = graph.placeholder("a", TensorType::float32(vec![1]));
        let b = graph.placeholder("b", TensorType::float32(vec![1]));

        let mut table = SymbolTable::new();
        table.set("x", a);
        table.set("x", b);
        assert_eq!(table.get("x").unwrap(), b);
    }

    #[test]
    fn test_constants_are_numbered_from_one() {
        let mut graph = GraphBuilder::new();
        let mut table = SymbolTable::new();
        table.new_constant(&mut graph, Literal::scalar(1.0));
        let second = table.new_constant(&mut graph, Literal::vector(vec![1.0, 2.0]));

        assert_eq!(table.get("_param_2").unwrap(), second);
        assert_eq!(graph.shape(second), &[2]);

        let params = table.into_params();
        assert_eq!(
            params.keys().cloned().collect::<Vec<_>>(),
            vec!["_param_1", "_param_2"]
        );
    }
}
