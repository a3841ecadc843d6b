pub use crate::core::{
    dtype::{get_default_dtype, set_default_dtype, DType},
    error::{Error, Result},
};
pub use crate::exec::prelude::*;
pub use crate::tensor::prelude::*;
pub use crate::{bf16, f16};
