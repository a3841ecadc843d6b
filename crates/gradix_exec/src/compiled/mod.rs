mod canonicalize;
mod plan;

pub use canonicalize::canonicalize;
pub use plan::CompiledPlan;

use crate::{
    executor::{check_feeds, Executor, HostTensor},
    program::Program,
};
use dashmap::DashMap;
use gradix_core::{
    dtype::DType,
    error::{Error, Result},
};
use std::sync::Arc;

/// Dtype every compiled value is computed in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Precision {
    #[default]
    F32,
    F16,
}

impl Precision {
    pub fn dtype(&self) -> DType {
        match self {
            Self::F32 => DType::F32,
            Self::F16 => DType::F16,
        }
    }
}

/// Knobs of the compiled executor.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CompileStrategy {
    pub precision: Precision,
    /// Fold chains of elementwise ops into a single map kernel.
    pub fuse_elementwise: bool,
    /// Size of a dedicated worker pool; `None` runs on the global rayon pool.
    pub num_threads: Option<usize>,
    /// Chunk length of parallel sums. Fixed per plan, so sums are
    /// reproducible run to run.
    pub reduce_chunk: usize,
}

impl Default for CompileStrategy {
    fn default() -> Self {
        Self {
            precision: Precision::F32,
            fuse_elementwise: true,
            num_threads: None,
            reduce_chunk: 4096,
        }
    }
}

impl CompileStrategy {
    pub fn with_precision(mut self, precision: Precision) -> Self {
        self.precision = precision;
        self
    }

    pub fn with_fuse_elementwise(mut self, fuse: bool) -> Self {
        self.fuse_elementwise = fuse;
        self
    }

    pub fn with_num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = Some(num_threads);
        self
    }

    pub fn with_reduce_chunk(mut self, chunk: usize) -> Self {
        self.reduce_chunk = chunk.max(1);
        self
    }

    #[cfg(feature = "serde")]
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::DeserializationError(format!("Failed to deserialize strategy from JSON: {}", e)))
    }
}

/// Executes programs through cached [`CompiledPlan`]s.
///
/// Plans are keyed by [`Program::fingerprint`], so running the same program
/// again skips canonicalization and planning.
pub struct CompiledExecutor {
    strategy: CompileStrategy,
    cache: DashMap<u64, Arc<CompiledPlan>>,
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl CompiledExecutor {
    pub fn new(strategy: CompileStrategy) -> Result<Self> {
        let pool = match strategy.num_threads {
            Some(n) => Some(Arc::new(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .thread_name(|i| format!("gradix-exec-{}", i))
                    .build()
                    .map_err(|e| Error::External {
                        message: format!("failed to build worker pool: {}", e),
                    })?,
            )),
            None => None,
        };
        Ok(Self {
            strategy,
            cache: DashMap::new(),
            pool,
        })
    }

    pub fn strategy(&self) -> &CompileStrategy {
        &self.strategy
    }

    /// Compiles `program`, or returns the cached plan.
    pub fn compile(&self, program: &Program) -> Result<Arc<CompiledPlan>> {
        let key = program.fingerprint();
        if let Some(plan) = self.cache.get(&key) {
            tracing::trace!(fingerprint = key, "plan cache hit");
            return Ok(Arc::clone(plan.value()));
        }

        let span = tracing::info_span!("compile", fingerprint = key, precision = ?self.strategy.precision);
        let _enter = span.enter();
        let plan = Arc::new(CompiledPlan::compile(program, &self.strategy)?);
        tracing::debug!(
            steps = plan.num_steps(),
            fused = plan.fused_stages(),
            slots = plan.num_slots(),
            "compiled"
        );
        self.cache.insert(key, Arc::clone(&plan));
        Ok(plan)
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

impl Default for CompiledExecutor {
    fn default() -> Self {
        Self {
            strategy: CompileStrategy::default(),
            cache: DashMap::new(),
            pool: None,
        }
    }
}

impl Executor for CompiledExecutor {
    fn name(&self) -> &str {
        "compiled"
    }

    fn precision(&self) -> Option<DType> {
        Some(self.strategy.precision.dtype())
    }

    fn run(&self, program: &Program, feeds: &[HostTensor]) -> Result<Vec<HostTensor>> {
        check_feeds(program, feeds)?;
        let plan = self.compile(program)?;
        let span = tracing::debug_span!("compiled_run", steps = plan.num_steps());
        let _enter = span.enter();
        match &self.pool {
            Some(pool) => pool.install(|| plan.execute(feeds)),
            None => plan.execute(feeds),
        }
    }
}
