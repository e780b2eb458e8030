//! Reference evaluation of IR functions on a burn backend.
//!
//! Every value is held as a rank-4 tensor whose logical shape is left-padded
//! with ones, so numpy-style broadcasting lines up with burn's. Only the
//! elementwise, shape, normalization, dense and convolution operators have
//! kernels here; the vision operators are left to a real compiler.

use std::collections::HashMap;
use std::ops::Range;

use burn::tensor::module::{conv_transpose2d, conv2d};
use burn::tensor::ops::{ConvOptions, ConvTransposeOptions};
use burn::tensor::{Int, Shape, Tensor, TensorData, activation, backend::Backend};

use super::function::{Function, Instruction, ValueDef, ValueId};
use super::op::{Op, SplitSections};
use super::types::Literal;
use crate::errors::ConvertError;

const RANK: usize = 4;

fn padded(shape: &[usize]) -> Result<[usize; RANK], ConvertError> {
    if shape.len() > RANK {
        return Err(ConvertError::evaluation(format!(
            "rank {} exceeds the evaluator limit of {RANK}",
            shape.len()
        )));
    }
    let mut out = [1; RANK];
    out[RANK - shape.len()..].copy_from_slice(shape);
    Ok(out)
}

/// Physical axis of logical `axis` in a value of logical rank `rank`.
fn physical(axis: usize, rank: usize) -> usize {
    axis + RANK - rank
}

/// Runs `function` on the given named inputs and returns its results.
pub fn evaluate<B: Backend>(
    function: &Function,
    inputs: &[(&str, Literal)],
    device: &B::Device,
) -> Result<Vec<Literal>, ConvertError> {
    let mut evaluator = Evaluator::<B> {
        function,
        device: device.clone(),
        tensors: HashMap::new(),
    };

    for id in function.params() {
        let tensor = match &function.value(*id).def {
            ValueDef::Placeholder { name } => {
                let (_, literal) = inputs
                    .iter()
                    .find(|(n, _)| *n == name.as_str())
                    .ok_or_else(|| ConvertError::evaluation(format!("no value for input `{name}`")))?;
                if literal.shape() != function.ty(*id).shape.as_slice() {
                    return Err(ConvertError::evaluation(format!(
                        "input `{name}` has shape {:?}, expected {:?}",
                        literal.shape(),
                        function.ty(*id).shape
                    )));
                }
                evaluator.tensor_of(literal)?
            }
            ValueDef::Param { literal, .. } => evaluator.tensor_of(literal)?,
            _ => continue,
        };
        evaluator.tensors.insert(*id, tensor);
    }

    for instr in function.body() {
        let outputs = evaluator.step(instr)?;
        for (id, tensor) in instr.outputs.iter().zip(outputs) {
            evaluator.tensors.insert(*id, tensor);
        }
    }

    function
        .results()
        .iter()
        .map(|id| {
            let tensor = evaluator.get(*id)?;
            let data = tensor
                .into_data()
                .convert::<f32>()
                .to_vec::<f32>()
                .map_err(|e| ConvertError::evaluation(format!("{e:?}")))?;
            Literal::new(function.ty(*id).shape.clone(), data)
        })
        .collect()
}

struct Evaluator<'a, B: Backend> {
    function: &'a Function,
    device: B::Device,
    tensors: HashMap<ValueId, Tensor<B, RANK>>,
}

impl<B: Backend> Evaluator<'_, B> {
    fn tensor_of(&self, literal: &Literal) -> Result<Tensor<B, RANK>, ConvertError> {
        let data = TensorData::new(literal.data().to_vec(), padded(literal.shape())?);
        Ok(Tensor::<B, RANK>::from_data(data, &self.device))
    }

    fn get(&self, id: ValueId) -> Result<Tensor<B, RANK>, ConvertError> {
        if let Some(tensor) = self.tensors.get(&id) {
            return Ok(tensor.clone());
        }
        match &self.function.value(id).def {
            ValueDef::Literal(literal) => self.tensor_of(literal),
            _ => Err(ConvertError::evaluation(format!(
                "value %v{} used before definition",
                id.index()
            ))),
        }
    }

    fn rank(&self, id: ValueId) -> usize {
        self.function.ty(id).rank()
    }

    /// Reshapes a rank-1 value so it broadcasts along `axis` of a value with
    /// logical rank `rank`.
    fn along_axis(
        &self,
        id: ValueId,
        axis: usize,
        rank: usize,
    ) -> Result<Tensor<B, RANK>, ConvertError> {
        let len = self.function.ty(id).numel();
        let mut dims = [1; RANK];
        dims[physical(axis, rank)] = len;
        Ok(self.get(id)?.reshape(Shape::new(dims)))
    }

    fn step(&self, instr: &Instruction) -> Result<Vec<Tensor<B, RANK>>, ConvertError> {
        let arg = |i: usize| self.get(instr.inputs[i]);
        let rank = self.rank(instr.inputs[0]);
        let out_shape = |i: usize| padded(&self.function.ty(instr.outputs[i]).shape);

        let single = match &instr.op {
            Op::Add => arg(0)?.add(arg(1)?),
            Op::Subtract => arg(0)?.sub(arg(1)?),
            Op::Multiply => arg(0)?.mul(arg(1)?),
            Op::Divide => arg(0)?.div(arg(1)?),
            Op::Maximum => {
                let (a, b) = (arg(0)?, arg(1)?);
                let spread = a.clone().sub(b.clone()).abs();
                a.add(b).add(spread).div_scalar(2.0)
            }
            Op::Power => {
                let exponent = instr.inputs[1];
                if self.function.ty(exponent).numel() == 1 {
                    let value = self.scalar(exponent)?;
                    arg(0)?.powf_scalar(value)
                } else {
                    arg(0)?.powf(arg(1)?)
                }
            }

            Op::Relu => activation::relu(arg(0)?),
            Op::LeakyRelu { alpha } => {
                let x = arg(0)?;
                x.clone()
                    .clamp_min(0.0)
                    .add(x.clamp_max(0.0).mul_scalar(*alpha as f32))
            }
            Op::PRelu { axis } => {
                let x = arg(0)?;
                let slope = self.along_axis(instr.inputs[1], *axis, rank)?;
                x.clone().clamp_min(0.0).add(x.clamp_max(0.0).mul(slope))
            }
            Op::Sigmoid => activation::sigmoid(arg(0)?),
            Op::Tanh => activation::tanh(arg(0)?),
            Op::Softmax { axis } => activation::softmax(arg(0)?, physical(*axis, rank)),
            Op::Dropout { .. } => arg(0)?,

            Op::Reshape { .. } | Op::BatchFlatten => arg(0)?.reshape(Shape::new(out_shape(0)?)),
            Op::Concatenate { axis } => {
                let parts = (0..instr.inputs.len())
                    .map(arg)
                    .collect::<Result<Vec<_>, _>>()?;
                Tensor::cat(parts, physical(*axis, rank))
            }
            Op::Split { sections, axis } => {
                return self.split(arg(0)?, sections, *axis, instr);
            }
            Op::StridedSlice { begin, end } => {
                let mut ranges: [Range<usize>; RANK] = [0..1, 0..1, 0..1, 0..1];
                for (i, (b, e)) in begin.iter().zip(end).enumerate() {
                    ranges[physical(i, rank)] = *b..*e;
                }
                arg(0)?.slice(ranges)
            }
            Op::Transpose { axes } => {
                let offset = RANK - rank;
                let mut order: [isize; RANK] = [0, 1, 2, 3];
                for (i, a) in axes.iter().enumerate() {
                    order[offset + i] = (offset + a) as isize;
                }
                arg(0)?.permute(order)
            }

            Op::BatchNorm {
                axis,
                epsilon,
                scale,
            } => {
                let view = |i: usize| self.along_axis(instr.inputs[i], *axis, rank);
                let (beta, mean, var) = (view(2)?, view(3)?, view(4)?);
                let normalized = arg(0)?
                    .sub(mean)
                    .div(var.add_scalar(*epsilon as f32).sqrt());
                let scaled = if *scale {
                    normalized.mul(view(1)?)
                } else {
                    normalized
                };
                scaled.add(beta)
            }
            Op::BiasAdd { axis } => arg(0)?.add(self.along_axis(instr.inputs[1], *axis, rank)?),
            Op::Dense { .. } => arg(0)?.matmul(arg(1)?.swap_dims(2, 3)),
            Op::L2Normalize { eps, axes } => {
                let x = arg(0)?;
                let mut sum = x.clone().mul(x.clone());
                for axis in axes {
                    sum = sum.sum_dim(physical(*axis, rank));
                }
                x.div(sum.clamp_min(*eps as f32).sqrt())
            }
            Op::Cast { .. } => arg(0)?,
            Op::Take { axis } => {
                let indices = self.indices(instr.inputs[1])?;
                arg(0)?
                    .select(physical(*axis, rank), indices)
                    .reshape(Shape::new(out_shape(0)?))
            }

            Op::Conv2d(attrs) => conv2d(
                arg(0)?,
                arg(1)?,
                None,
                ConvOptions::new(attrs.strides, attrs.padding, attrs.dilation, attrs.groups),
            ),
            Op::Conv2dTranspose(attrs) => conv_transpose2d(
                arg(0)?,
                arg(1)?,
                None,
                ConvTransposeOptions::new(
                    attrs.strides,
                    attrs.padding,
                    [0, 0],
                    attrs.dilation,
                    attrs.groups,
                ),
            ),
            Op::GlobalAvgPool2d => arg(0)?.mean_dim(2).mean_dim(3),
            Op::GlobalMaxPool2d => arg(0)?.max_dim(2).max_dim(3),

            other => {
                return Err(ConvertError::evaluation(format!(
                    "no reference kernel for `{}`",
                    other.name()
                )));
            }
        };
        Ok(vec![single])
    }

    fn split(
        &self,
        x: Tensor<B, RANK>,
        sections: &SplitSections,
        axis: usize,
        instr: &Instruction,
    ) -> Result<Vec<Tensor<B, RANK>>, ConvertError> {
        let rank = self.rank(instr.inputs[0]);
        let dim = physical(axis, rank);
        let extent = self.function.ty(instr.inputs[0]).shape[axis];
        let mut bounds = vec![0];
        match sections {
            SplitSections::Count(n) => bounds.extend((1..=*n).map(|i| i * extent / n)),
            SplitSections::Indices(points) => {
                bounds.extend(points.iter().copied());
                bounds.push(extent);
            }
        }
        Ok(bounds
            .windows(2)
            .map(|w| x.clone().narrow(dim, w[0], w[1] - w[0]))
            .collect())
    }

    fn values(&self, id: ValueId) -> Result<Vec<f32>, ConvertError> {
        self.get(id)?
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| ConvertError::evaluation(format!("{e:?}")))
    }

    fn scalar(&self, id: ValueId) -> Result<f32, ConvertError> {
        self.values(id)?
            .first()
            .copied()
            .ok_or_else(|| ConvertError::evaluation("empty scalar operand"))
    }

    fn indices(&self, id: ValueId) -> Result<Tensor<B, 1, Int>, ConvertError> {
        let values: Vec<i64> = self.values(id)?.into_iter().map(|v| v as i64).collect();
        let len = values.len();
        Ok(Tensor::<B, 1, Int>::from_data(
            TensorData::new(values, [len]),
            &self.device,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{GraphBuilder, TensorType};
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn run(function: &Function, inputs: &[(&str, Literal)]) -> Vec<Literal> {
        let device = <TestBackend as Backend>::Device::default();
        evaluate::<TestBackend>(function, inputs, &device).unwrap()
    }

    #[test]
    fn test_broadcast_multiply_by_scalar() {
        let mut graph = GraphBuilder::new();
        let x = graph.placeholder("x", TensorType::float32(vec![2, 2]));
        let two = graph.literal(Literal::scalar(2.0));
        let y = graph.apply_single(Op::Multiply, &[x, two]).unwrap();
        let function = graph.finish(vec![y]);

        let input = Literal::new(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let out = run(&function, &[("x", input)]);
        assert_eq!(out[0].data(), &[2.0, 4.0, 6.0, 8.0]);
        assert_eq!(out[0].shape(), &[2, 2]);
    }

    #[test]
    fn test_maximum() {
        let mut graph = GraphBuilder::new();
        let a = graph.placeholder("a", TensorType::float32(vec![3]));
        let b = graph.placeholder("b", TensorType::float32(vec![3]));
        let y = graph.apply_single(Op::Maximum, &[a, b]).unwrap();
        let function = graph.finish(vec![y]);

        let out = run(
            &function,
            &[
                ("a", Literal::vector(vec![1.0, 5.0, -2.0])),
                ("b", Literal::vector(vec![3.0, 4.0, -1.0])),
            ],
        );
        assert_eq!(out[0].data(), &[3.0, 5.0, -1.0]);
    }

    #[test]
    fn test_dense_and_bias() {
        let mut graph = GraphBuilder::new();
        let x = graph.placeholder("x", TensorType::float32(vec![1, 2]));
        let w = graph.constant_param(
            "_param_1",
            Literal::new(vec![3, 2], vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0]).unwrap(),
        );
        let b = graph.constant_param("_param_2", Literal::vector(vec![0.5, 0.5, 0.5]));
        let y = graph.apply_single(Op::Dense { units: 3 }, &[x, w]).unwrap();
        let y = graph.apply_single(Op::BiasAdd { axis: 1 }, &[y, b]).unwrap();
        let function = graph.finish(vec![y]);

        let out = run(&function, &[("x", Literal::new(vec![1, 2], vec![2.0, 3.0]).unwrap())]);
        assert_eq!(out[0].shape(), &[1, 3]);
        assert_eq!(out[0].data(), &[2.5, 3.5, 5.5]);
    }

    #[test]
    fn test_split_and_transpose() {
        let mut graph = GraphBuilder::new();
        let x = graph.placeholder("x", TensorType::float32(vec![2, 3]));
        let t = graph
            .apply_single(Op::Transpose { axes: vec![1, 0] }, &[x])
            .unwrap();
        let parts = graph
            .apply(
                Op::Split {
                    sections: SplitSections::Indices(vec![1]),
                    axis: 0,
                },
                &[t],
            )
            .unwrap();
        let function = graph.finish(parts);

        let input = Literal::new(vec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let out = run(&function, &[("x", input)]);
        assert_eq!(out[0].shape(), &[1, 2]);
        assert_eq!(out[0].data(), &[1.0, 4.0]);
        assert_eq!(out[1].data(), &[2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn test_missing_input_is_error() {
        let mut graph = GraphBuilder::new();
        let x = graph.placeholder("x", TensorType::float32(vec![1]));
        let y = graph.apply_single(Op::Relu, &[x]).unwrap();
        let function = graph.finish(vec![y]);

        let device = <TestBackend as Backend>::Device::default();
        let result = evaluate::<TestBackend>(&function, &[], &device);
        assert!(matches!(result, Err(ConvertError::Evaluation { .. })));
    }

    #[test]
    fn test_vision_ops_have_no_kernel() {
        let mut graph = GraphBuilder::new();
        let x = graph.placeholder("x", TensorType::float32(vec![1, 1, 2, 2]));
        let y = graph
            .apply_single(
                Op::Unpooling {
                    scale_h: 2,
                    scale_w: 2,
                },
                &[x, x],
            )
            .unwrap();
        let function = graph.finish(vec![y]);

        let device = <TestBackend as Backend>::Device::default();
        let input = Literal::full(vec![1, 1, 2, 2], 1.0);
        let result = evaluate::<TestBackend>(&function, &[("x", input)], &device);
        assert!(matches!(result, Err(ConvertError::Evaluation { .. })));
    }
}
