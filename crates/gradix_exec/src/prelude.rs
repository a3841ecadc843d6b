pub use crate::{
    assert_parity, canonicalize, compare, lower, CompileStrategy, CompiledExecutor, Executor, HostTensor, Precision,
    Program, ProgramBuilder, ReferenceExecutor, Tolerance,
};
