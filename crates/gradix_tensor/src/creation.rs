use crate::{Context, Tensor};
use gradix_core::{
    buffer::{Buffer, HostElement},
    dtype::DType,
    error::{Error, Result},
    layout::Layout,
};
use rand::{distributions::Uniform, prelude::*, rngs::StdRng};
use std::sync::Arc;

/// ## Factory helpers
///
/// Every tensor built here is a leaf with `stop_gradient = true`; call
/// [`Tensor::set_stop_gradient`] to make it a differentiable parameter.
/// Tensors without an explicit dtype use the context's default dtype.
impl Context {
    fn leaf(&self, layout: Layout, buffer: Buffer) -> Tensor {
        Tensor::from_parts(self, layout, Arc::new(buffer), true)
    }

    fn check_size(shape: &[usize], len: usize) -> Result<Layout> {
        let layout = Layout::from_shape(shape);
        if layout.size() != len {
            return Err(Error::IncompatibleShape(format!(
                "{} values cannot fill shape {:?} ({} elements)",
                len,
                shape,
                layout.size()
            )));
        }
        Ok(layout)
    }

    /// Tensor holding `values` in row-major order; the dtype follows `T`.
    pub fn tensor<T: HostElement>(&self, values: Vec<T>, shape: &[usize]) -> Result<Tensor> {
        let layout = Self::check_size(shape, values.len())?;
        Ok(self.leaf(layout, Buffer::from_vec(values)))
    }

    pub fn tensor_from_buffer(&self, buffer: Buffer, shape: &[usize]) -> Result<Tensor> {
        let layout = Self::check_size(shape, buffer.len())?;
        Ok(self.leaf(layout, buffer))
    }

    pub fn tensor_with_dtype(&self, values: &[f64], shape: &[usize], dtype: DType) -> Result<Tensor> {
        let layout = Self::check_size(shape, values.len())?;
        Ok(self.leaf(layout, Buffer::from_f64_slice(values, dtype)))
    }

    pub fn scalar(&self, value: f64) -> Tensor {
        self.leaf(
            Layout::from_shape(&[]),
            Buffer::from_f64_slice(&[value], self.default_dtype()),
        )
    }

    pub fn full(&self, shape: &[usize], value: f64) -> Tensor {
        self.full_with_dtype(shape, value, self.default_dtype())
    }

    pub fn full_with_dtype(&self, shape: &[usize], value: f64, dtype: DType) -> Tensor {
        let layout = Layout::from_shape(shape);
        let buffer = Buffer::full(layout.size(), dtype, value);
        self.leaf(layout, buffer)
    }

    pub fn zeros(&self, shape: &[usize]) -> Tensor {
        self.full(shape, 0.0)
    }

    pub fn ones(&self, shape: &[usize]) -> Tensor {
        self.full(shape, 1.0)
    }

    pub fn zeros_like(&self, src: &Tensor) -> Result<Tensor> {
        self.filled_like(src, 0.0)
    }

    pub fn ones_like(&self, src: &Tensor) -> Result<Tensor> {
        self.filled_like(src, 1.0)
    }

    fn filled_like(&self, src: &Tensor, value: f64) -> Result<Tensor> {
        if !src.belongs_to(self) {
            return Err(Error::Argument(format!(
                "tensor {} belongs to another context",
                src.label()
            )));
        }
        Ok(self.full_with_dtype(src.shape(), value, src.dtype()))
    }

    // random

    /// Samples uniformly from `[low, high)` with a thread-local generator.
    pub fn uniform(&self, shape: &[usize], low: f64, high: f64) -> Result<Tensor> {
        self.uniform_with_rng(shape, low, high, &mut thread_rng())
    }

    /// Like [`uniform`](Self::uniform), reproducible for a given `seed`.
    pub fn uniform_seeded(&self, shape: &[usize], low: f64, high: f64, seed: u64) -> Result<Tensor> {
        self.uniform_with_rng(shape, low, high, &mut StdRng::seed_from_u64(seed))
    }

    fn uniform_with_rng<R: Rng>(&self, shape: &[usize], low: f64, high: f64, rng: &mut R) -> Result<Tensor> {
        if !(low < high) {
            return Err(Error::Argument(format!(
                "uniform range [{}, {}) is empty",
                low, high
            )));
        }
        let layout = Layout::from_shape(shape);
        let dist = Uniform::new(low, high);
        let values: Vec<f64> = (0..layout.size()).map(|_| dist.sample(rng)).collect();
        Ok(self.leaf(layout, Buffer::from_f64_slice(&values, self.default_dtype())))
    }

    /// Standard normal samples.
    pub fn randn(&self, shape: &[usize]) -> Result<Tensor> {
        self.randn_with_rng(shape, &mut thread_rng())
    }

    pub fn randn_seeded(&self, shape: &[usize], seed: u64) -> Result<Tensor> {
        self.randn_with_rng(shape, &mut StdRng::seed_from_u64(seed))
    }

    fn randn_with_rng<R: Rng>(&self, shape: &[usize], rng: &mut R) -> Result<Tensor> {
        let layout = Layout::from_shape(shape);
        let normal = rand_distr::Normal::new(0.0, 1.0).map_err(|_| Error::External {
            message: "failed to create normal distribution with mean=0.0 and std=1.0".to_string(),
        })?;
        let values: Vec<f64> = (0..layout.size()).map(|_| normal.sample(rng)).collect();
        Ok(self.leaf(layout, Buffer::from_f64_slice(&values, self.default_dtype())))
    }
}

#[cfg(test)]
mod tests {
    use crate::Context;
    use gradix_core::{dtype::DType, error::Result};

    #[test]
    fn leaves_do_not_require_grad() -> Result<()> {
        let ctx = Context::new();
        let x = ctx.tensor(vec![1.0f32, 2.0, 3.0, 4.0], &[2, 2])?;
        assert_eq!(x.shape(), &[2, 2]);
        assert_eq!(x.dtype(), DType::F32);
        assert!(x.stop_gradient());
        assert!(x.is_leaf()?);
        assert!(ctx.tensor(vec![1.0f32, 2.0, 3.0], &[2, 2]).is_err());
        Ok(())
    }

    #[test]
    fn like_constructors_follow_source() -> Result<()> {
        let ctx = Context::new();
        let x = ctx.tensor_with_dtype(&[1.0, 2.0], &[2], DType::F64)?;
        let ones = ctx.ones_like(&x)?;
        assert_eq!(ones.dtype(), DType::F64);
        assert_eq!(ones.to_vec_f64(), vec![1.0, 1.0]);
        assert_eq!(ctx.zeros_like(&x)?.to_vec_f64(), vec![0.0, 0.0]);

        let other = Context::new();
        assert!(other.ones_like(&x).is_err());
        Ok(())
    }

    #[test]
    fn seeded_uniform_is_reproducible() -> Result<()> {
        let ctx = Context::new();
        let a = ctx.uniform_seeded(&[16], 1.0, 2.0, 7)?;
        let b = ctx.uniform_seeded(&[16], 1.0, 2.0, 7)?;
        assert_eq!(a.to_vec_f32(), b.to_vec_f32());
        assert!(a.to_vec_f32().iter().all(|&v| (1.0..2.0).contains(&v)));
        assert!(ctx.uniform(&[2], 1.0, 1.0).is_err());
        assert_eq!(ctx.randn_seeded(&[3, 3], 1)?.size(), 9);
        Ok(())
    }
}
