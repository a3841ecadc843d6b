#![allow(dead_code)]

use gradix_core::error::Result;
use gradix_tensor::{AccumulationOrder, Context, ContextConfig, Tensor};

pub fn setup_context(order: AccumulationOrder) -> Context {
    Context::with_config(ContextConfig::default().with_accumulation_order(order))
}

/// Leaf that requires a gradient.
pub fn setup_param(ctx: &Context, data: Vec<f32>, shape: &[usize]) -> Result<Tensor> {
    let x = ctx.tensor(data, shape)?;
    x.set_stop_gradient(false);
    Ok(x)
}

pub fn setup_uniform_param(ctx: &Context, shape: &[usize], seed: u64) -> Result<Tensor> {
    let x = ctx.uniform_seeded(shape, -1.0, 1.0, seed)?;
    x.set_stop_gradient(false);
    Ok(x)
}

pub fn assert_close(actual: &[f32], expected: &[f32], tol: f32) {
    assert_eq!(actual.len(), expected.len(), "length mismatch");
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        let bound = tol * e.abs().max(1.0);
        assert!((a - e).abs() <= bound, "index {}: got {}, expected {} (tol {})", i, a, e, bound);
    }
}

#[macro_export]
macro_rules! test_orders {
    ([$($case:ident),*]) => {
        $(
            mod $case {
                use super::*;
                use paste::paste;

                paste! {
                    #[test]
                    fn insertion() -> Result<()> {
                        test_functions::[<$case _test>](AccumulationOrder::Insertion)
                    }

                    #[test]
                    fn sorted() -> Result<()> {
                        test_functions::[<$case _test>](AccumulationOrder::Sorted)
                    }
                }
            }
        )*
    };
}
