use crate::{
    executor::{check_feeds, Executor, HostTensor},
    program::Program,
};
use gradix_core::error::{Error, Result};
use gradix_tensor::{Context, ContextConfig, OpKind, Tensor};
use std::collections::HashMap;

/// Interprets a program op by op with the eager tensor kernels, in the
/// dtypes the program declares.
#[derive(Clone, Debug, Default)]
pub struct ReferenceExecutor;

impl ReferenceExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Executor for ReferenceExecutor {
    fn name(&self) -> &str {
        "reference"
    }

    fn run(&self, program: &Program, feeds: &[HostTensor]) -> Result<Vec<HostTensor>> {
        check_feeds(program, feeds)?;
        let span = tracing::debug_span!("reference_run", instructions = program.instructions().len());
        let _enter = span.enter();

        let ctx = Context::with_config(ContextConfig::default());
        let _guard = ctx.no_grad();

        let mut values: HashMap<&str, Tensor> = HashMap::new();
        for (decl, feed) in program.feeds().iter().zip(feeds) {
            values.insert(&decl.name, ctx.tensor_from_buffer(feed.buffer().clone(), feed.shape())?);
        }
        for constant in program.constants() {
            values.insert(
                &constant.name,
                ctx.tensor_from_buffer(constant.buffer.clone(), &constant.shape)?,
            );
        }

        for inst in program.instructions() {
            let inputs = inst
                .inputs
                .iter()
                .map(|name| lookup(&values, name))
                .collect::<Result<Vec<_>>>()?;
            let outputs = apply_op(&inst.op, &inputs)?;
            for (name, tensor) in inst.outputs.iter().zip(outputs) {
                values.insert(name, tensor);
            }
        }

        program
            .fetches()
            .iter()
            .map(|name| lookup(&values, name).map(HostTensor::from_tensor))
            .collect()
    }
}

fn lookup<'a>(values: &'a HashMap<&str, Tensor>, name: &str) -> Result<&'a Tensor> {
    values
        .get(name)
        .ok_or_else(|| Error::Argument(format!("value `{}` is not defined", name)))
}

/// Runs one program instruction on eager tensors.
pub(crate) fn apply_op(op: &OpKind, inputs: &[&Tensor]) -> Result<Vec<Tensor>> {
    let x = inputs
        .first()
        .ok_or_else(|| Error::InvalidGraph(format!("`{}` has no inputs", op)))?;
    let rhs = || {
        inputs
            .get(1)
            .ok_or_else(|| Error::InvalidGraph(format!("`{}` needs two inputs", op)))
    };

    let out = match op {
        OpKind::Add => x.add(rhs()?)?,
        OpKind::Sub => x.sub(rhs()?)?,
        OpKind::Mul => x.mul(rhs()?)?,
        OpKind::Div => x.div(rhs()?)?,
        OpKind::Neg => x.neg()?,
        OpKind::Exp => x.exp()?,
        OpKind::Log => x.log()?,
        OpKind::Sqrt => x.sqrt()?,
        OpKind::Square => x.square()?,
        OpKind::Relu => x.relu()?,
        OpKind::LeakyRelu { alpha } => x.leaky_relu(*alpha)?,
        OpKind::Sigmoid => x.sigmoid()?,
        OpKind::Tanh => x.tanh()?,
        OpKind::Scale { factor } => x.scale(*factor)?,
        OpKind::AddScalar { value } => x.add_scalar(*value)?,
        OpKind::Sum => x.sum()?,
        OpKind::Mean => x.mean()?,
        OpKind::SumToShape { shape } => x.sum_to_shape(shape)?,
        OpKind::BroadcastTo { shape } => x.broadcast_to(shape)?,
        OpKind::Reshape { shape } => x.reshape(shape)?,
        OpKind::Transpose => x.transpose()?,
        OpKind::MatMul => x.matmul(rhs()?)?,
        OpKind::Split { at } => {
            let (head, tail) = x.split(*at)?;
            return Ok(vec![head, tail]);
        },
        OpKind::Concat => Tensor::concat(inputs)?,
        OpKind::Cast { dtype } => x.to_dtype(*dtype)?,
        OpKind::Custom(name) => {
            return Err(Error::Unsupported(format!("custom op `{}` cannot be interpreted", name)));
        },
    };

    Ok(vec![out])
}
