use crate::{
    ops::{apply_single, upstream},
    OpKind, Tensor,
};
use gradix_core::{
    be,
    error::{Error, Result},
    layout::Layout,
};

impl Tensor {
    /// Sum of all elements, as a tensor of shape `[]`.
    pub fn sum(&self) -> Result<Tensor> {
        let buffer = be::ops::reduction::sum_all(self.buffer());
        apply_single(OpKind::Sum, &[self], Layout::from_shape(&[]), buffer, |_, inputs, _, grads| {
            Ok(vec![Some(upstream(grads, 0)?.broadcast_to(inputs[0].shape())?)])
        })
    }

    pub fn mean(&self) -> Result<Tensor> {
        let n = self.size().max(1) as f64;
        let buffer = be::ops::unary::scale(&be::ops::reduction::sum_all(self.buffer()), 1.0 / n);
        apply_single(OpKind::Mean, &[self], Layout::from_shape(&[]), buffer, move |_, inputs, _, grads| {
            Ok(vec![Some(
                upstream(grads, 0)?.broadcast_to(inputs[0].shape())?.scale(1.0 / n)?,
            )])
        })
    }

    /// Sums over the dimensions along which `shape` broadcasts to this
    /// tensor's shape. Returns `self` unchanged when the shapes match.
    pub fn sum_to_shape(&self, shape: &[usize]) -> Result<Tensor> {
        if self.shape() == shape {
            return Ok(self.clone());
        }
        if !Layout::from_shape(shape).can_broadcast_to(self.shape()) {
            return Err(Error::IncompatibleShape(format!(
                "cannot sum {:?} down to {:?}",
                self.shape(),
                shape
            )));
        }

        let buffer = be::ops::reduction::sum_to_shape(self.buffer(), self.shape(), shape);
        apply_single(
            OpKind::SumToShape { shape: shape.to_vec() },
            &[self],
            Layout::from_shape(shape),
            buffer,
            |_, inputs, _, grads| Ok(vec![Some(upstream(grads, 0)?.broadcast_to(inputs[0].shape())?)]),
        )
    }
}
