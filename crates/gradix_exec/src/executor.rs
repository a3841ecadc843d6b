use crate::program::Program;
use gradix_core::{
    buffer::{Buffer, HostElement},
    dtype::DType,
    error::{Error, Result},
    layout::Layout,
};
use gradix_tensor::Tensor;

/// Plain host value passed into and out of executors. Carries no graph
/// or context.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HostTensor {
    shape: Vec<usize>,
    buffer: Buffer,
}

impl HostTensor {
    pub fn new(buffer: Buffer, shape: &[usize]) -> Result<Self> {
        if Layout::compute_size(shape) != buffer.len() {
            return Err(Error::IncompatibleShape(format!(
                "{} values cannot fill shape {:?}",
                buffer.len(),
                shape
            )));
        }
        Ok(Self {
            shape: shape.to_vec(),
            buffer,
        })
    }

    pub fn from_vec<T: HostElement>(values: Vec<T>, shape: &[usize]) -> Result<Self> {
        Self::new(Buffer::from_vec(values), shape)
    }

    pub fn from_tensor(tensor: &Tensor) -> Self {
        Self {
            shape: tensor.shape().to_vec(),
            buffer: tensor.buffer().clone(),
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.buffer.dtype()
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    pub fn into_buffer(self) -> Buffer {
        self.buffer
    }

    pub fn to_vec_f32(&self) -> Vec<f32> {
        self.buffer.to_f32_vec()
    }

    pub fn to_vec_f64(&self) -> Vec<f64> {
        self.buffer.to_f64_vec()
    }
}

/// Runs a lowered [`Program`].
///
/// `feeds` are positionally aligned with [`Program::feeds`]; the result is
/// aligned with [`Program::fetches`].
pub trait Executor: Send + Sync {
    fn name(&self) -> &str;

    /// Dtype every value is computed in, when the executor forces one.
    fn precision(&self) -> Option<DType> {
        None
    }

    fn run(&self, program: &Program, feeds: &[HostTensor]) -> Result<Vec<HostTensor>>;
}

/// Checks `feeds` against the program's declared feeds.
pub(crate) fn check_feeds(program: &Program, feeds: &[HostTensor]) -> Result<()> {
    if feeds.len() != program.feeds().len() {
        return Err(Error::Argument(format!(
            "program expects {} feeds, got {}",
            program.feeds().len(),
            feeds.len()
        )));
    }
    for (decl, feed) in program.feeds().iter().zip(feeds) {
        if decl.shape != feed.shape() || decl.dtype != feed.dtype() {
            return Err(Error::Argument(format!(
                "feed `{}` must be {:?} {:?}, got {:?} {:?}",
                decl.name,
                decl.dtype,
                decl.shape,
                feed.dtype(),
                feed.shape()
            )));
        }
    }
    Ok(())
}
