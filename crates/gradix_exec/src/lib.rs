//! Lowering of recorded forward computations into flat [`Program`]s, and
//! two executors for them: a [`ReferenceExecutor`] that replays each op
//! eagerly and a [`CompiledExecutor`] that canonicalizes, fuses and caches
//! an execution plan. [`parity`] checks that the two agree.

mod compiled;
mod executor;
mod lower;
pub mod parity;
pub mod prelude;
mod program;
mod reference;

pub use compiled::{canonicalize, CompileStrategy, CompiledExecutor, CompiledPlan, Precision};
pub use executor::{Executor, HostTensor};
pub use lower::lower;
pub use parity::{assert_parity, compare, FetchReport, ParityReport, Tolerance};
pub use program::{Constant, Feed, Instruction, Program, ProgramBuilder, ValueInfo};
pub use reference::ReferenceExecutor;
