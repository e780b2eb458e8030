//! Incremental construction of IR functions.

use thiserror::Error;

use super::function::{Function, Instruction, Value, ValueDef, ValueId};
use super::op::Op;
use super::shape;
use super::types::{Literal, TensorType};

/// Operand types violate an operator's structural precondition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{op}: {message}")]
pub struct ShapeError {
    pub op: &'static str,
    pub message: String,
}

/// Builds a straight-line SSA function one instruction at a time.
///
/// Every applied operator is type-checked immediately, so the static shape
/// of any value can be queried as soon as it exists.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    values: Vec<Value>,
    instructions: Vec<Instruction>,
    span: Option<String>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_value(&mut self, def: ValueDef, ty: TensorType) -> ValueId {
        let id = ValueId(self.values.len());
        self.values.push(Value { def, ty });
        id
    }

    /// Declares a free input.
    pub fn placeholder(&mut self, name: &str, ty: TensorType) -> ValueId {
        self.push_value(
            ValueDef::Placeholder {
                name: name.to_string(),
            },
            ty,
        )
    }

    /// Declares a named constant parameter.
    pub fn constant_param(&mut self, name: &str, literal: Literal) -> ValueId {
        let ty = literal.tensor_type();
        self.push_value(
            ValueDef::Param {
                name: name.to_string(),
                literal,
            },
            ty,
        )
    }

    /// Embeds a constant directly in the graph.
    pub fn literal(&mut self, literal: Literal) -> ValueId {
        let ty = literal.tensor_type();
        self.push_value(ValueDef::Literal(literal), ty)
    }

    /// Sets the source span attached to subsequent instructions.
    pub fn set_span(&mut self, span: Option<&str>) {
        self.span = span.map(str::to_string);
    }

    /// Applies `op` and returns one value per result.
    pub fn apply(&mut self, op: Op, inputs: &[ValueId]) -> Result<Vec<ValueId>, ShapeError> {
        let operand_types: Vec<&TensorType> = inputs.iter().map(|id| self.ty(*id)).collect();
        let result_types = shape::infer(&op, &operand_types).map_err(|message| ShapeError {
            op: op.name(),
            message,
        })?;

        let outputs: Vec<ValueId> = result_types
            .into_iter()
            .map(|ty| self.push_value(ValueDef::Computed, ty))
            .collect();
        self.instructions.push(Instruction {
            op,
            inputs: inputs.to_vec(),
            outputs: outputs.clone(),
            span: self.span.clone(),
        });
        Ok(outputs)
    }

    /// Applies a single-result operator.
    pub fn apply_single(&mut self, op: Op, inputs: &[ValueId]) -> Result<ValueId, ShapeError> {
        let name = op.name();
        let outputs = self.apply(op, inputs)?;
        match outputs.as_slice() {
            [single] => Ok(*single),
            _ => Err(ShapeError {
                op: name,
                message: format!("expected one result, got {}", outputs.len()),
            }),
        }
    }

    pub fn ty(&self, id: ValueId) -> &TensorType {
        &self.values[id.0].ty
    }

    pub fn shape(&self, id: ValueId) -> &[usize] {
        &self.values[id.0].ty.shape
    }

    /// Number of instructions emitted so far.
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Seals the graph into a function returning `results`.
    ///
    /// Instructions that do not feed a result are dropped, and only the
    /// placeholders and constants that remain in use become parameters.
    pub fn finish(self, results: Vec<ValueId>) -> Function {
        let mut live = vec![false; self.values.len()];
        for id in &results {
            live[id.0] = true;
        }

        let mut keep = vec![false; self.instructions.len()];
        for (index, instr) in self.instructions.iter().enumerate().rev() {
            if instr.outputs.iter().any(|id| live[id.0]) {
                keep[index] = true;
                for input in &instr.inputs {
                    live[input.0] = true;
                }
            }
        }

        let params = self
            .values
            .iter()
            .enumerate()
            .filter(|(index, value)| {
                live[*index]
                    && matches!(
                        value.def,
                        ValueDef::Placeholder { .. } | ValueDef::Param { .. }
                    )
            })
            .map(|(index, _)| ValueId(index))
            .collect();

        let body = self
            .instructions
            .into_iter()
            .zip(keep)
            .filter_map(|(instr, kept)| kept.then_some(instr))
            .collect();

        Function {
            values: self.values,
            params,
            body,
            results,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_infers_types() {
        let mut graph = GraphBuilder::new();
        let x = graph.placeholder("x", TensorType::float32(vec![2, 3]));
        let w = graph.constant_param("_param_1", Literal::vector(vec![1.0, 2.0, 3.0]));
        let y = graph.apply_single(Op::Multiply, &[x, w]).unwrap();
        assert_eq!(graph.shape(y), &[2, 3]);
    }

    #[test]
    fn test_shape_error_names_operator() {
        let mut graph = GraphBuilder::new();
        let a = graph.placeholder("a", TensorType::float32(vec![2, 3]));
        let b = graph.placeholder("b", TensorType::float32(vec![4]));
        let err = graph.apply_single(Op::Add, &[a, b]).unwrap_err();
        assert_eq!(err.op, "add");
    }

    #[test]
    fn test_finish_prunes_unused_work() {
        let mut graph = GraphBuilder::new();
        let x = graph.placeholder("x", TensorType::float32(vec![4]));
        let unused = graph.placeholder("unused", TensorType::float32(vec![4]));
        let _dead = graph.apply_single(Op::Sigmoid, &[unused]).unwrap();
        let y = graph.apply_single(Op::Relu, &[x]).unwrap();

        let function = graph.finish(vec![y]);
        assert_eq!(function.body().len(), 1);
        assert_eq!(function.input_names(), vec!["x"]);
    }

    #[test]
    fn test_multi_result_operator() {
        let mut graph = GraphBuilder::new();
        let x = graph.placeholder("x", TensorType::float32(vec![1, 4]));
        let parts = graph
            .apply(
                Op::Split {
                    sections: crate::ir::SplitSections::Count(2),
                    axis: 1,
                },
                &[x],
            )
            .unwrap();
        assert_eq!(parts.len(), 2);
        assert!(
            graph
                .apply_single(
                    Op::Split {
                        sections: crate::ir::SplitSections::Count(2),
                        axis: 1,
                    },
                    &[x],
                )
                .is_err()
        );
    }

    #[test]
    fn test_text_form() {
        let mut graph = GraphBuilder::new();
        let x = graph.placeholder("data", TensorType::float32(vec![1, 2]));
        let half = graph.literal(Literal::scalar(0.5));
        graph.set_span(Some("scale"));
        let y = graph.apply_single(Op::Multiply, &[x, half]).unwrap();

        let text = graph.finish(vec![y]).to_string();
        assert_eq!(
            text,
            "fn (%data: Tensor[(1, 2), float32]) {\n  \
             %0 = multiply(%data, 0.5f) /* scale */ : Tensor[(1, 2), float32];\n  \
             return %0\n}"
        );
    }
}
