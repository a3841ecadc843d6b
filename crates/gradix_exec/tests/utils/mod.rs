#![allow(dead_code)]

use gradix_core::error::Result;
use gradix_exec::{lower, HostTensor, Program};
use gradix_tensor::{Context, ContextConfig, Tensor};

/// Context that records every op, as lowering needs.
pub fn setup_traced_context() -> Context {
    Context::with_config(ContextConfig::default().with_trace(true))
}

pub fn setup_named(tensor: Tensor, name: &str) -> Result<Tensor> {
    tensor.set_name(name)?;
    Ok(tensor)
}

/// `out = sigmoid(tanh(x @ w + b))`, `loss = mean(out)`, with `x` fed and
/// `w`, `b` baked in.
pub fn setup_mlp(seed: u64) -> Result<(Program, Vec<HostTensor>)> {
    let ctx = setup_traced_context();
    let x = setup_named(ctx.uniform_seeded(&[8, 16], -0.5, 0.5, seed)?, "x")?;
    let w = setup_named(ctx.uniform_seeded(&[16, 4], -0.5, 0.5, seed + 1)?, "w")?;
    let b = setup_named(ctx.uniform_seeded(&[4], -0.5, 0.5, seed + 2)?, "b")?;

    let out = setup_named(x.matmul(&w)?.add(&b)?.tanh()?.sigmoid()?, "out")?;
    let loss = setup_named(out.mean()?, "loss")?;

    let program = lower(&ctx, &[&x], &[&out, &loss])?;
    Ok((program, vec![HostTensor::from_tensor(&x)]))
}

pub fn assert_close(actual: &[f32], expected: &[f32], tol: f32) {
    assert_eq!(actual.len(), expected.len(), "length mismatch");
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!((a - e).abs() <= tol, "index {}: got {}, expected {} (tol {})", i, a, e, tol);
    }
}

#[macro_export]
macro_rules! test_precisions {
    ([$($case:ident),*]) => {
        $(
            mod $case {
                use super::*;
                use paste::paste;

                paste! {
                    #[test]
                    fn f32() -> Result<()> {
                        test_functions::[<$case _test>](Precision::F32)
                    }

                    #[test]
                    fn f16() -> Result<()> {
                        test_functions::[<$case _test>](Precision::F16)
                    }
                }
            }
        )*
    };
}
