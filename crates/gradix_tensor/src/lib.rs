mod context;
mod creation;
mod engine;
mod graph;
pub(crate) mod ops;
pub mod prelude;

pub use context::{
    get_default_accumulation_order, set_default_accumulation_order, AccumulationOrder, Context, ContextConfig,
    NoGradGuard,
};
pub use engine::{grad, BackwardOptions, GradOptions, GradRequest, Gradient};
pub use graph::{grad_fn, GradFn, NodeId, NodeInfo, OpKind};

use context::ContextInner;
use gradix_core::{
    buffer::Buffer,
    dtype::DType,
    error::{Error, Result},
    layout::Layout,
};
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex, Weak,
    },
};

// ────────────────────────────────────────────────────────────────────────────
//  Tensor
// ────────────────────────────────────────────────────────────────────────────

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorId(usize);
static TENSOR_COUNTER: AtomicUsize = AtomicUsize::new(1);
#[inline]
pub(crate) fn next_tensor_id() -> TensorId {
    TensorId(TENSOR_COUNTER.fetch_add(1, Ordering::Relaxed))
}

impl fmt::Display for TensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

pub(crate) struct TensorInner {
    id: TensorId,
    name: Mutex<Option<String>>,
    layout: Layout,
    buffer: Arc<Buffer>,
    stop_gradient: AtomicBool,
    grad: Mutex<Option<Tensor>>,
    ctx: Weak<ContextInner>,
}

/// A shaped, typed value owned by a [`Context`].
///
/// Cloning a `Tensor` clones a handle; the buffer is shared and never
/// written after creation.
#[derive(Clone)]
pub struct Tensor(Arc<TensorInner>);

impl Tensor {
    pub(crate) fn from_parts(ctx: &Context, layout: Layout, buffer: Arc<Buffer>, stop_gradient: bool) -> Self {
        Self(Arc::new(TensorInner {
            id: next_tensor_id(),
            name: Mutex::new(None),
            layout,
            buffer,
            stop_gradient: AtomicBool::new(stop_gradient),
            grad: Mutex::new(None),
            ctx: ctx.downgrade(),
        }))
    }

    #[inline]
    pub fn id(&self) -> TensorId {
        self.0.id
    }

    pub fn name(&self) -> Option<String> {
        self.0.name.lock().ok().and_then(|name| name.clone())
    }

    pub fn set_name(&self, name: impl Into<String>) -> Result<()> {
        *self.0.name.lock().map_err(|_| Error::Lock)? = Some(name.into());
        Ok(())
    }

    /// Name if one was set, the id otherwise. Used in error messages.
    pub fn label(&self) -> String {
        self.name().unwrap_or_else(|| self.id().to_string())
    }

    pub fn context(&self) -> Result<Context> {
        self.0.ctx.upgrade().map(Context::from_inner).ok_or(Error::ContextReleased)
    }

    pub(crate) fn belongs_to(&self, ctx: &Context) -> bool {
        ctx.owns(&self.0.ctx)
    }

    // data

    pub fn buffer(&self) -> &Buffer {
        &self.0.buffer
    }

    pub(crate) fn buffer_arc(&self) -> Arc<Buffer> {
        self.0.buffer.clone()
    }

    pub fn layout(&self) -> &Layout {
        &self.0.layout
    }

    pub fn shape(&self) -> &[usize] {
        self.0.layout.shape()
    }

    pub fn size(&self) -> usize {
        self.0.layout.size()
    }

    pub fn ndim(&self) -> usize {
        self.0.layout.ndim()
    }

    pub fn dim_size(&self, dim: usize) -> Option<usize> {
        self.0.layout.dim_size(dim)
    }

    pub fn dtype(&self) -> DType {
        self.0.buffer.dtype()
    }

    pub fn to_vec_f32(&self) -> Vec<f32> {
        self.0.buffer.to_f32_vec()
    }

    pub fn to_vec_f64(&self) -> Vec<f64> {
        self.0.buffer.to_f64_vec()
    }

    /// Value of a single-element tensor.
    pub fn item(&self) -> Result<f64> {
        if self.size() != 1 {
            return Err(Error::IncompatibleShape(format!(
                "item() needs exactly one element, tensor has shape {:?}",
                self.shape()
            )));
        }
        self.0.buffer.get(0)
    }

    // grad flags

    pub fn stop_gradient(&self) -> bool {
        self.0.stop_gradient.load(Ordering::Relaxed)
    }

    pub fn requires_grad(&self) -> bool {
        !self.stop_gradient()
    }

    pub fn set_stop_gradient(&self, stop_gradient: bool) {
        self.0.stop_gradient.store(stop_gradient, Ordering::Relaxed);
    }

    /// Shares the buffer but drops the producer; the result never
    /// receives a gradient.
    pub fn detach(&self) -> Result<Tensor> {
        let ctx = self.context()?;
        Ok(Tensor::from_parts(&ctx, self.0.layout.clone(), self.buffer_arc(), true))
    }

    pub fn is_leaf(&self) -> Result<bool> {
        Ok(self.context()?.producer_of(self)?.is_none())
    }

    // data - grad

    /// Stored gradient accumulated by [`backward`](Self::backward).
    pub fn grad(&self) -> Result<Option<Tensor>> {
        Ok(self.0.grad.lock().map_err(|_| Error::Lock)?.clone())
    }

    pub fn clear_grad(&self) -> Result<()> {
        *self.0.grad.lock().map_err(|_| Error::Lock)? = None;
        Ok(())
    }

    /// Stored gradient plus `grad`, without writing it back.
    pub(crate) fn summed_grad(&self, grad: &Tensor) -> Result<Tensor> {
        let slot = self.0.grad.lock().map_err(|_| Error::Lock)?;
        match slot.as_ref() {
            Some(prev) => prev.add(grad),
            None => Ok(grad.clone()),
        }
    }

    pub(crate) fn store_grad(&self, grad: Tensor) -> Result<()> {
        *self.0.grad.lock().map_err(|_| Error::Lock)? = Some(grad);
        Ok(())
    }
}

impl PartialEq for Tensor {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Tensor {}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("shape", &self.shape())
            .field("dtype", &self.dtype())
            .field("stop_gradient", &self.stop_gradient())
            .finish()
    }
}
