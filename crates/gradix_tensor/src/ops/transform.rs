use crate::{
    ops::{apply, apply_single, common_context, upstream},
    OpKind, Tensor,
};
use gradix_core::{
    be,
    error::{Error, Result},
    layout::Layout,
};

impl Tensor {
    /// Returns `self` unchanged when the shape already matches.
    pub fn broadcast_to(&self, shape: &[usize]) -> Result<Tensor> {
        if self.shape() == shape {
            return Ok(self.clone());
        }
        if !self.layout().can_broadcast_to(shape) {
            return Err(Error::IncompatibleShape(format!(
                "cannot broadcast {:?} to {:?}",
                self.shape(),
                shape
            )));
        }

        let buffer = be::ops::transform::broadcast_to(self.buffer(), self.shape(), shape);
        apply_single(
            OpKind::BroadcastTo { shape: shape.to_vec() },
            &[self],
            Layout::from_shape(shape),
            buffer,
            |_, inputs, _, grads| Ok(vec![Some(upstream(grads, 0)?.sum_to_shape(inputs[0].shape())?)]),
        )
    }

    pub fn reshape(&self, shape: &[usize]) -> Result<Tensor> {
        if self.shape() == shape {
            return Ok(self.clone());
        }
        let mut layout = self.layout().clone();
        layout.view(shape)?;

        apply_single(
            OpKind::Reshape { shape: shape.to_vec() },
            &[self],
            layout,
            self.buffer().clone(),
            |_, inputs, _, grads| Ok(vec![Some(upstream(grads, 0)?.reshape(inputs[0].shape())?)]),
        )
    }

    /// Transpose of a 2-D tensor.
    pub fn transpose(&self) -> Result<Tensor> {
        let (rows, cols) = match *self.shape() {
            [rows, cols] => (rows, cols),
            _ => {
                return Err(Error::DimensionMismatch {
                    expected: vec![0, 0],
                    got: self.shape().to_vec(),
                })
            },
        };

        let buffer = be::ops::transform::transpose2d(self.buffer(), rows, cols);
        apply_single(
            OpKind::Transpose,
            &[self],
            Layout::from_shape(&[cols, rows]),
            buffer,
            |_, _, _, grads| Ok(vec![Some(upstream(grads, 0)?.transpose()?)]),
        )
    }

    /// Splits along dim 0 into rows `[0, at)` and `[at, n)`.
    pub fn split(&self, at: usize) -> Result<(Tensor, Tensor)> {
        let rows = self.dim_size(0).ok_or(Error::DimensionOutOfBounds { dim: 0, ndim: 0 })?;
        if at == 0 || at >= rows {
            return Err(Error::Argument(format!(
                "split point {} must lie strictly inside dim 0 of size {}",
                at, rows
            )));
        }

        let row_size = self.size() / rows;
        let (head, tail) = be::ops::transform::split(self.buffer(), at * row_size)?;
        let mut head_shape = self.shape().to_vec();
        head_shape[0] = at;
        let mut tail_shape = self.shape().to_vec();
        tail_shape[0] = rows - at;

        let mut outputs = apply(
            OpKind::Split { at },
            &[self],
            vec![
                (Layout::from_shape(&head_shape), head),
                (Layout::from_shape(&tail_shape), tail),
            ],
            |ctx, _, outputs, grads| {
                let mut parts = Vec::with_capacity(outputs.len());
                for (output, grad) in outputs.iter().zip(grads) {
                    match grad {
                        Some(g) => parts.push(g.clone()),
                        None => parts.push(ctx.zeros_like(output)?),
                    }
                }
                let refs: Vec<&Tensor> = parts.iter().collect();
                Ok(vec![Some(Tensor::concat(&refs)?)])
            },
        )?;

        match (outputs.pop(), outputs.pop()) {
            (Some(tail), Some(head)) => Ok((head, tail)),
            _ => Err(Error::Internal {
                message: "split produced fewer than two outputs".into(),
            }),
        }
    }

    /// Concatenates along dim 0. All parts must agree on the trailing dims.
    pub fn concat(parts: &[&Tensor]) -> Result<Tensor> {
        let first = parts
            .first()
            .ok_or_else(|| Error::Argument("concat needs at least one tensor".into()))?;
        if first.ndim() == 0 {
            return Err(Error::DimensionOutOfBounds { dim: 0, ndim: 0 });
        }
        if parts.len() == 1 {
            return Ok((*first).clone());
        }
        common_context(parts)?;

        let trailing = &first.shape()[1..];
        let mut rows = 0;
        for part in parts {
            if part.ndim() == 0 || &part.shape()[1..] != trailing {
                return Err(Error::DimensionMismatch {
                    expected: first.shape().to_vec(),
                    got: part.shape().to_vec(),
                });
            }
            rows += part.shape()[0];
        }

        let buffers: Vec<_> = parts.iter().map(|t| t.buffer()).collect();
        let buffer = be::ops::transform::concat(&buffers)?;
        let mut shape = first.shape().to_vec();
        shape[0] = rows;
        let sizes: Vec<usize> = parts.iter().map(|t| t.shape()[0]).collect();

        apply_single(OpKind::Concat, parts, Layout::from_shape(&shape), buffer, move |_, _, _, grads| {
            let mut rest = upstream(grads, 0)?.clone();
            let mut out = Vec::with_capacity(sizes.len());
            for &rows in &sizes[..sizes.len() - 1] {
                let (head, tail) = rest.split(rows)?;
                out.push(Some(head));
                rest = tail;
            }
            out.push(Some(rest));
            Ok(out)
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::{Context, Tensor};
    use gradix_core::error::Result;

    #[test]
    fn split_and_concat_forward() -> Result<()> {
        let ctx = Context::new();
        let x = ctx.tensor(vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], &[3, 2])?;
        let (a, b) = x.split(1)?;
        assert_eq!(a.shape(), &[1, 2]);
        assert_eq!(b.to_vec_f32(), vec![3.0, 4.0, 5.0, 6.0]);
        let y = Tensor::concat(&[&b, &a])?;
        assert_eq!(y.to_vec_f32(), vec![3.0, 4.0, 5.0, 6.0, 1.0, 2.0]);
        assert!(x.split(3).is_err());
        Ok(())
    }

    #[test]
    fn transpose_and_reshape() -> Result<()> {
        let ctx = Context::new();
        let x = ctx.tensor(vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3])?;
        assert_eq!(x.transpose()?.shape(), &[3, 2]);
        assert_eq!(x.transpose()?.to_vec_f32(), vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
        assert_eq!(x.reshape(&[3, 2])?.to_vec_f32(), x.to_vec_f32());
        assert!(x.reshape(&[4]).is_err());
        assert!(x.reshape(&[6])?.transpose().is_err());
        Ok(())
    }
}
