//! Shared fixtures for the gradix benchmarks.

use gradix_core::error::Result;
use gradix_exec::{lower, HostTensor, Program};
use gradix_tensor::{AccumulationOrder, Context, ContextConfig, Tensor};

pub const SIZES: [(usize, &str); 3] = [(16, "small"), (64, "medium"), (256, "large")];

/// Parameter of shape `[rows, cols]` drawn from `[-1, 1)`.
pub fn param(ctx: &Context, rows: usize, cols: usize, seed: u64) -> Result<Tensor> {
    let t = ctx.uniform_seeded(&[rows, cols], -1.0, 1.0, seed)?;
    t.set_stop_gradient(false);
    Ok(t)
}

/// Two-layer perceptron loss over `x: [n, n]`, returning the loss and the
/// parameters it depends on.
pub fn mlp_loss(ctx: &Context, n: usize) -> Result<(Tensor, Vec<Tensor>)> {
    let x = ctx.uniform_seeded(&[n, n], -1.0, 1.0, 0)?;
    let w1 = param(ctx, n, n, 1)?;
    let w2 = param(ctx, n, n, 2)?;
    let b = param(ctx, 1, n, 3)?;
    let h = x.matmul(&w1)?.add(&b)?.tanh()?;
    let loss = h.matmul(&w2)?.sigmoid()?.mean()?;
    Ok((loss, vec![w1, w2, b]))
}

pub fn context(order: AccumulationOrder) -> Context {
    Context::with_config(ContextConfig::default().with_accumulation_order(order))
}

/// Lowered forward pass of [`mlp_loss`] with `x` as the only feed.
pub fn mlp_program(n: usize) -> Result<(Program, Vec<HostTensor>)> {
    let ctx = Context::with_config(ContextConfig::default().with_trace(true));
    let x = ctx.uniform_seeded(&[n, n], -1.0, 1.0, 0)?;
    let w1 = ctx.uniform_seeded(&[n, n], -1.0, 1.0, 1)?;
    let w2 = ctx.uniform_seeded(&[n, n], -1.0, 1.0, 2)?;
    let b = ctx.uniform_seeded(&[n], -1.0, 1.0, 3)?;
    let loss = x.matmul(&w1)?.add(&b)?.tanh()?.matmul(&w2)?.sigmoid()?.mean()?;
    let program = lower(&ctx, &[&x], &[&loss])?;
    Ok((program, vec![HostTensor::from_tensor(&x)]))
}
