pub use crate::{
    grad, AccumulationOrder, BackwardOptions, Context, ContextConfig, GradOptions, GradRequest, Gradient, Tensor,
};
pub use gradix_core::{
    dtype::DType,
    error::{Error, Result},
};
