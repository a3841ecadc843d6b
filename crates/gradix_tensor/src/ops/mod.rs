mod binary;
mod custom;
mod matmul;
mod reduction;
mod transform;
mod unary;

use crate::{
    graph::{grad_fn, GradFn},
    Context, OpKind, Tensor,
};
use gradix_core::{
    buffer::Buffer,
    error::{Error, Result},
    layout::Layout,
};
use std::sync::Arc;

/// Context shared by every input of an op.
pub(crate) fn common_context(inputs: &[&Tensor]) -> Result<Context> {
    let first = inputs
        .first()
        .ok_or_else(|| Error::Argument("op needs at least one input".into()))?;
    let ctx = first.context()?;
    if let Some(foreign) = inputs.iter().find(|t| !t.belongs_to(&ctx)) {
        return Err(Error::InvalidGraph(format!(
            "tensor {} belongs to another context",
            foreign.label()
        )));
    }
    Ok(ctx)
}

/// Wraps freshly computed buffers as the outputs of `op` and records the
/// node when the context asks for it.
pub(crate) fn apply_in(
    ctx: &Context,
    op: OpKind,
    inputs: &[&Tensor],
    outputs: Vec<(Layout, Buffer)>,
    grad_fn: Option<GradFn>,
) -> Result<Vec<Tensor>> {
    let requires_grad = ctx.is_grad_enabled() && inputs.iter().any(|t| t.requires_grad());
    let outputs: Vec<Tensor> = outputs
        .into_iter()
        .map(|(layout, buffer)| Tensor::from_parts(ctx, layout, Arc::new(buffer), !requires_grad))
        .collect();

    if ctx.should_record(inputs) {
        let refs: Vec<&Tensor> = outputs.iter().collect();
        ctx.record(op, inputs, &refs, grad_fn)?;
    }

    Ok(outputs)
}

pub(crate) fn apply<G>(op: OpKind, inputs: &[&Tensor], outputs: Vec<(Layout, Buffer)>, grad: G) -> Result<Vec<Tensor>>
where
    G: Fn(&Context, &[Tensor], &[Tensor], &[Option<Tensor>]) -> Result<Vec<Option<Tensor>>> + Send + Sync + 'static,
{
    let ctx = common_context(inputs)?;
    apply_in(&ctx, op, inputs, outputs, Some(grad_fn(grad)))
}

pub(crate) fn apply_single<G>(op: OpKind, inputs: &[&Tensor], layout: Layout, buffer: Buffer, grad: G) -> Result<Tensor>
where
    G: Fn(&Context, &[Tensor], &[Tensor], &[Option<Tensor>]) -> Result<Vec<Option<Tensor>>> + Send + Sync + 'static,
{
    let name = op.name().to_string();
    apply(op, inputs, vec![(layout, buffer)], grad)?
        .pop()
        .ok_or_else(|| Error::Internal {
            message: format!("`{}` produced no output", name),
        })
}

/// Upstream gradient of output `index`; the engine never calls a grad
/// function of a single-output op without one.
pub(crate) fn upstream(grads: &[Option<Tensor>], index: usize) -> Result<&Tensor> {
    grads.get(index).and_then(|g| g.as_ref()).ok_or_else(|| Error::Internal {
        message: format!("missing upstream gradient for output {}", index),
    })
}

/// Constant tensor built from `buffer`, never part of the graph.
pub(crate) fn constant(ctx: &Context, layout: Layout, buffer: Buffer) -> Tensor {
    Tensor::from_parts(ctx, layout, Arc::new(buffer), true)
}
