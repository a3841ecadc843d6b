use crate::{
    ops::{apply_single, upstream},
    OpKind, Tensor,
};
use gradix_core::{
    be,
    buffer::Buffer,
    error::{Error, Result},
    layout::Layout,
};
use std::borrow::Cow;

fn expand<'a>(tensor: &'a Tensor, shape: &[usize]) -> Cow<'a, Buffer> {
    if tensor.shape() == shape {
        Cow::Borrowed(tensor.buffer())
    } else {
        Cow::Owned(be::ops::transform::broadcast_to(tensor.buffer(), tensor.shape(), shape))
    }
}

fn binary_forward(
    lhs: &Tensor,
    rhs: &Tensor,
    kernel: fn(&Buffer, &Buffer) -> Result<Buffer>,
) -> Result<(Layout, Buffer)> {
    if lhs.dtype() != rhs.dtype() {
        return Err(Error::DTypeMismatch {
            expected: lhs.dtype(),
            got: rhs.dtype(),
        });
    }
    let shape = Layout::broadcast_shape(lhs.shape(), rhs.shape())?;
    let buffer = kernel(&expand(lhs, &shape), &expand(rhs, &shape))?;
    Ok((Layout::from_shape(&shape), buffer))
}

impl Tensor {
    pub fn add(&self, rhs: &Tensor) -> Result<Tensor> {
        let (layout, buffer) = binary_forward(self, rhs, be::ops::binary::add)?;
        let lhs_shape = self.shape().to_vec();
        let rhs_shape = rhs.shape().to_vec();

        apply_single(OpKind::Add, &[self, rhs], layout, buffer, move |_, _, _, grads| {
            let g = upstream(grads, 0)?;
            Ok(vec![Some(g.sum_to_shape(&lhs_shape)?), Some(g.sum_to_shape(&rhs_shape)?)])
        })
    }

    pub fn sub(&self, rhs: &Tensor) -> Result<Tensor> {
        let (layout, buffer) = binary_forward(self, rhs, be::ops::binary::sub)?;
        let lhs_shape = self.shape().to_vec();
        let rhs_shape = rhs.shape().to_vec();

        apply_single(OpKind::Sub, &[self, rhs], layout, buffer, move |_, _, _, grads| {
            let g = upstream(grads, 0)?;
            Ok(vec![
                Some(g.sum_to_shape(&lhs_shape)?),
                Some(g.neg()?.sum_to_shape(&rhs_shape)?),
            ])
        })
    }

    pub fn mul(&self, rhs: &Tensor) -> Result<Tensor> {
        let (layout, buffer) = binary_forward(self, rhs, be::ops::binary::mul)?;

        apply_single(OpKind::Mul, &[self, rhs], layout, buffer, |_, inputs, _, grads| {
            let g = upstream(grads, 0)?;
            let (lhs, rhs) = (&inputs[0], &inputs[1]);
            Ok(vec![
                Some(g.mul(rhs)?.sum_to_shape(lhs.shape())?),
                Some(g.mul(lhs)?.sum_to_shape(rhs.shape())?),
            ])
        })
    }

    pub fn div(&self, rhs: &Tensor) -> Result<Tensor> {
        let (layout, buffer) = binary_forward(self, rhs, be::ops::binary::div)?;

        apply_single(OpKind::Div, &[self, rhs], layout, buffer, |_, inputs, _, grads| {
            let g = upstream(grads, 0)?;
            let (lhs, rhs) = (&inputs[0], &inputs[1]);
            let grad_lhs = g.div(rhs)?.sum_to_shape(lhs.shape())?;
            let grad_rhs = g.mul(lhs)?.div(&rhs.square()?)?.neg()?.sum_to_shape(rhs.shape())?;
            Ok(vec![Some(grad_lhs), Some(grad_rhs)])
        })
    }
}
