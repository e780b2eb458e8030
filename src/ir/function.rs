//! Sealed IR functions, their text form and JSON export.

use std::collections::HashMap;
use std::fmt;

use serde::{Serialize, Serializer};

use super::op::Op;
use super::types::{Literal, TensorType};

/// Handle to an IR value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub(crate) usize);

impl ValueId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// How a value comes into existence.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueDef {
    /// Free input supplied by the caller.
    Placeholder { name: String },
    /// Named constant exported with the model.
    Param { name: String, literal: Literal },
    /// Constant embedded directly in the graph.
    Literal(Literal),
    /// Result of an instruction.
    Computed,
}

/// A value with its static type.
#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    pub def: ValueDef,
    pub ty: TensorType,
}

/// One operator application.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub op: Op,
    pub inputs: Vec<ValueId>,
    pub outputs: Vec<ValueId>,
    /// Name of the source layer the instruction was emitted for.
    pub span: Option<String>,
}

/// A callable unit: free parameters, a straight-line body and its results.
///
/// Only instructions that contribute to a result are kept.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub(crate) values: Vec<Value>,
    pub(crate) params: Vec<ValueId>,
    pub(crate) body: Vec<Instruction>,
    pub(crate) results: Vec<ValueId>,
}

impl Function {
    /// Free parameters in creation order, constants included.
    pub fn params(&self) -> &[ValueId] {
        &self.params
    }

    pub fn body(&self) -> &[Instruction] {
        &self.body
    }

    pub fn results(&self) -> &[ValueId] {
        &self.results
    }

    pub fn value(&self, id: ValueId) -> &Value {
        &self.values[id.0]
    }

    pub fn ty(&self, id: ValueId) -> &TensorType {
        &self.values[id.0].ty
    }

    /// Names of the caller-supplied inputs.
    pub fn input_names(&self) -> Vec<&str> {
        self.params
            .iter()
            .filter_map(|id| match &self.values[id.0].def {
                ValueDef::Placeholder { name } => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Names of the constant parameters the body refers to.
    pub fn param_names(&self) -> Vec<&str> {
        self.params
            .iter()
            .filter_map(|id| match &self.values[id.0].def {
                ValueDef::Param { name, .. } => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Result types in order.
    pub fn result_types(&self) -> Vec<&TensorType> {
        self.results.iter().map(|id| self.ty(*id)).collect()
    }

    /// Operator names of the body, in order.
    pub fn op_names(&self) -> Vec<&'static str> {
        self.body.iter().map(|i| i.op.name()).collect()
    }

    /// Text names of every value reachable from the body.
    fn value_names(&self) -> HashMap<ValueId, String> {
        let mut names = HashMap::new();
        for id in &self.params {
            if let ValueDef::Placeholder { name } | ValueDef::Param { name, .. } =
                &self.values[id.0].def
            {
                names.insert(*id, format!("%{name}"));
            }
        }
        let mut counter = 0;
        for instr in &self.body {
            for input in &instr.inputs {
                if let ValueDef::Literal(literal) = &self.values[input.0].def {
                    names.insert(*input, literal.to_string());
                }
            }
            for output in &instr.outputs {
                names.insert(*output, format!("%{counter}"));
                counter += 1;
            }
        }
        for id in &self.results {
            if let ValueDef::Literal(literal) = &self.values[id.0].def {
                names.insert(*id, literal.to_string());
            }
        }
        names
    }

    fn name_of(names: &HashMap<ValueId, String>, id: ValueId) -> String {
        names
            .get(&id)
            .cloned()
            .unwrap_or_else(|| format!("%v{}", id.0))
    }

    /// Export form with values referenced by their text names.
    pub fn to_export(&self) -> FunctionExport {
        let names = self.value_names();
        FunctionExport {
            params: self
                .params
                .iter()
                .map(|id| ParamExport {
                    name: Self::name_of(&names, *id),
                    ty: self.ty(*id).clone(),
                })
                .collect(),
            body: self
                .body
                .iter()
                .map(|instr| InstructionExport {
                    op: instr.op.clone(),
                    inputs: instr
                        .inputs
                        .iter()
                        .map(|id| Self::name_of(&names, *id))
                        .collect(),
                    outputs: instr
                        .outputs
                        .iter()
                        .map(|id| Self::name_of(&names, *id))
                        .collect(),
                    types: instr.outputs.iter().map(|id| self.ty(*id).clone()).collect(),
                    span: instr.span.clone(),
                })
                .collect(),
            results: self
                .results
                .iter()
                .map(|id| Self::name_of(&names, *id))
                .collect(),
        }
    }
}

/// Serializable form of a [`Function`].
#[derive(Debug, Clone, Serialize)]
pub struct FunctionExport {
    pub params: Vec<ParamExport>,
    pub body: Vec<InstructionExport>,
    pub results: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParamExport {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: TensorType,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstructionExport {
    pub op: Op,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub types: Vec<TensorType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<String>,
}

impl Serialize for Function {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_export().serialize(serializer)
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = self.value_names();

        let params: Vec<String> = self
            .params
            .iter()
            .map(|id| format!("{}: {}", Self::name_of(&names, *id), self.ty(*id)))
            .collect();
        writeln!(f, "fn ({}) {{", params.join(", "))?;

        for instr in &self.body {
            let outputs: Vec<String> = instr
                .outputs
                .iter()
                .map(|id| Self::name_of(&names, *id))
                .collect();
            let mut args: Vec<String> = instr
                .inputs
                .iter()
                .map(|id| Self::name_of(&names, *id))
                .collect();
            args.extend(
                instr
                    .op
                    .attributes()
                    .into_iter()
                    .map(|(k, v)| format!("{k}={v}")),
            );
            let types: Vec<String> = instr
                .outputs
                .iter()
                .map(|id| self.ty(*id).to_string())
                .collect();

            write!(f, "  ")?;
            if outputs.len() == 1 {
                write!(f, "{}", outputs[0])?;
            } else {
                write!(f, "({})", outputs.join(", "))?;
            }
            write!(f, " = {}({})", instr.op.name(), args.join(", "))?;
            if let Some(span) = &instr.span {
                write!(f, " /* {span} */")?;
            }
            if types.len() == 1 {
                writeln!(f, " : {};", types[0])?;
            } else {
                writeln!(f, " : ({});", types.join(", "))?;
            }
        }

        let results: Vec<String> = self
            .results
            .iter()
            .map(|id| Self::name_of(&names, *id))
            .collect();
        if results.len() == 1 {
            writeln!(f, "  return {}", results[0])?;
        } else {
            writeln!(f, "  return ({})", results.join(", "))?;
        }
        write!(f, "}}")
    }
}
