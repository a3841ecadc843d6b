pub mod prelude;

pub use gradix_core as core;
pub use gradix_exec as exec;
pub use gradix_tensor as tensor;

pub use gradix_core::dtype::{bf16, bfloat16, f16, float16, float32, float64, half};
pub use crate::core::{
    dtype::*,
    error::{Error, Result},
};
pub use crate::tensor::{grad, AccumulationOrder, Context, ContextConfig, GradOptions, Gradient, Tensor};
