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
    /// `[m, k] @ [k, n] -> [m, n]`.
    pub fn matmul(&self, rhs: &Tensor) -> Result<Tensor> {
        let (m, k, n) = match (self.shape(), rhs.shape()) {
            (&[m, k], &[k2, n]) if k == k2 => (m, k, n),
            (lhs, rhs) => {
                return Err(Error::IncompatibleShape(format!(
                    "matmul needs [m, k] @ [k, n], got {:?} @ {:?}",
                    lhs, rhs
                )))
            },
        };

        let buffer = be::ops::matmul::matmul(self.buffer(), rhs.buffer(), m, k, n)?;
        apply_single(
            OpKind::MatMul,
            &[self, rhs],
            Layout::from_shape(&[m, n]),
            buffer,
            |_, inputs, _, grads| {
                let g = upstream(grads, 0)?;
                let (lhs, rhs) = (&inputs[0], &inputs[1]);
                Ok(vec![
                    Some(g.matmul(&rhs.transpose()?)?),
                    Some(lhs.transpose()?.matmul(g)?),
                ])
            },
        )
    }
}
