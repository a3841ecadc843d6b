use crate::{
    graph::{Graph, GradFn, NodeId, NodeInfo, OpKind},
    Tensor,
};
use gradix_core::{
    dtype::{get_default_dtype, DType},
    error::{Error, Result},
};
use std::{
    cell::Cell,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, Weak,
    },
};

// ────────────────────────────────────────────────────────────────────────────
//  Accumulation order
// ────────────────────────────────────────────────────────────────────────────

/// How the engine sums several gradient contributions to the same tensor.
///
/// Floating-point addition is not associative, so the two policies can
/// differ in the last bits (or more, under cancellation).
///
/// * `Insertion` – ready nodes are visited newest first and every
///   contribution is added to a running sum as soon as it arrives.
/// * `Sorted` – contributions are buffered and summed in ascending creation
///   order of the node that produced them, seeds first. The result does not
///   depend on traversal order.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum AccumulationOrder {
    #[default]
    Insertion,
    Sorted,
}

impl AccumulationOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insertion => "insertion",
            Self::Sorted => "sorted",
        }
    }
}

thread_local! {
    static DEFAULT_ACCUMULATION_ORDER: Cell<AccumulationOrder> = const { Cell::new(AccumulationOrder::Insertion) };
}

pub fn get_default_accumulation_order() -> AccumulationOrder {
    DEFAULT_ACCUMULATION_ORDER.with(|o| o.get())
}

pub fn set_default_accumulation_order(order: AccumulationOrder) {
    DEFAULT_ACCUMULATION_ORDER.with(|o| o.set(order));
}

// ────────────────────────────────────────────────────────────────────────────
//  Config
// ────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ContextConfig {
    pub accumulation_order: AccumulationOrder,
    /// Record every op, even when no input requires a gradient. Needed to
    /// lower a forward pass into a program.
    pub trace: bool,
    pub default_dtype: DType,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            accumulation_order: get_default_accumulation_order(),
            trace: false,
            default_dtype: get_default_dtype(),
        }
    }
}

impl ContextConfig {
    pub fn with_accumulation_order(mut self, order: AccumulationOrder) -> Self {
        self.accumulation_order = order;
        self
    }

    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    pub fn with_default_dtype(mut self, dtype: DType) -> Self {
        self.default_dtype = dtype;
        self
    }
}

// ────────────────────────────────────────────────────────────────────────────
//  Context
// ────────────────────────────────────────────────────────────────────────────

static CONTEXT_COUNTER: AtomicUsize = AtomicUsize::new(1);

pub(crate) struct ContextInner {
    id: usize,
    config: ContextConfig,
    graph: Mutex<Graph>,
    grad_enabled: AtomicBool,
}

/// Execution context owning one computation graph.
///
/// Every tensor created by a context, or derived from its tensors, records
/// into that context's graph. Tensors only hold a weak handle, so dropping
/// the last `Context` clone releases the graph and everything it retains.
/// Independent contexts share no mutable state and can live on different
/// threads.
#[derive(Clone)]
pub struct Context(Arc<ContextInner>);

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    pub fn new() -> Self {
        Self::with_config(ContextConfig::default())
    }

    pub fn with_config(config: ContextConfig) -> Self {
        Self(Arc::new(ContextInner {
            id: CONTEXT_COUNTER.fetch_add(1, Ordering::Relaxed),
            config,
            graph: Mutex::new(Graph::default()),
            grad_enabled: AtomicBool::new(true),
        }))
    }

    pub(crate) fn from_inner(inner: Arc<ContextInner>) -> Self {
        Self(inner)
    }

    pub(crate) fn downgrade(&self) -> Weak<ContextInner> {
        Arc::downgrade(&self.0)
    }

    pub(crate) fn owns(&self, handle: &Weak<ContextInner>) -> bool {
        std::ptr::eq(handle.as_ptr(), Arc::as_ptr(&self.0))
    }

    pub fn id(&self) -> usize {
        self.0.id
    }

    pub fn config(&self) -> &ContextConfig {
        &self.0.config
    }

    pub fn accumulation_order(&self) -> AccumulationOrder {
        self.0.config.accumulation_order
    }

    pub fn default_dtype(&self) -> DType {
        self.0.config.default_dtype
    }

    pub(crate) fn graph(&self) -> Result<MutexGuard<'_, Graph>> {
        self.0.graph.lock().map_err(|_| Error::Lock)
    }

    // grad mode

    pub fn is_grad_enabled(&self) -> bool {
        self.0.grad_enabled.load(Ordering::Relaxed)
    }

    pub(crate) fn set_grad_enabled(&self, enabled: bool) -> bool {
        self.0.grad_enabled.swap(enabled, Ordering::Relaxed)
    }

    /// Suspends recording until the guard is dropped. Ops run inside the
    /// scope produce `stop_gradient` tensors.
    pub fn no_grad(&self) -> NoGradGuard {
        let prev_enabled = self.set_grad_enabled(false);
        NoGradGuard {
            ctx: self.clone(),
            prev_enabled,
        }
    }

    pub(crate) fn grad_mode(&self, enabled: bool) -> NoGradGuard {
        let prev_enabled = self.set_grad_enabled(enabled);
        NoGradGuard {
            ctx: self.clone(),
            prev_enabled,
        }
    }

    /// Whether an op over `inputs` should append a node.
    pub(crate) fn should_record(&self, inputs: &[&Tensor]) -> bool {
        self.is_grad_enabled() && (self.0.config.trace || inputs.iter().any(|t| t.requires_grad()))
    }

    // graph

    /// Appends a node producing `outputs` from `inputs`.
    ///
    /// Fails with `InvalidGraph` when either side is empty, an output
    /// already has a producer, an output is also an input or an ancestor
    /// of one, or a tensor belongs to another context.
    pub fn record(
        &self,
        op: OpKind,
        inputs: &[&Tensor],
        outputs: &[&Tensor],
        grad_fn: Option<GradFn>,
    ) -> Result<NodeId> {
        if let Some(foreign) = inputs.iter().chain(outputs.iter()).find(|t| !t.belongs_to(self)) {
            return Err(Error::InvalidGraph(format!(
                "tensor {} recorded into `{}` belongs to another context",
                foreign.label(),
                op
            )));
        }

        let inputs = inputs.iter().map(|&t| t.clone()).collect();
        let outputs = outputs.iter().map(|&t| t.clone()).collect();
        let nid = self.graph()?.add_node(op, inputs, outputs, grad_fn)?;
        tracing::trace!(node = nid.index(), "recorded");

        Ok(nid)
    }

    pub fn node_count(&self) -> Result<usize> {
        Ok(self.graph()?.len())
    }

    pub fn producer_of(&self, tensor: &Tensor) -> Result<Option<NodeId>> {
        Ok(self.graph()?.producer(tensor.id()))
    }

    pub fn node(&self, id: NodeId) -> Result<NodeInfo> {
        self.graph()?
            .node(id)
            .map(NodeInfo::from)
            .ok_or_else(|| Error::Argument(format!("node {} does not exist", id.index())))
    }

    /// Snapshot of every recorded node in creation order.
    pub fn nodes(&self) -> Result<Vec<NodeInfo>> {
        Ok(self.graph()?.nodes().iter().map(NodeInfo::from).collect())
    }
}

/// Restores the previous recording state of a context on drop.
pub struct NoGradGuard {
    ctx: Context,
    prev_enabled: bool,
}

impl Drop for NoGradGuard {
    fn drop(&mut self) {
        self.ctx.set_grad_enabled(self.prev_enabled);
    }
}
