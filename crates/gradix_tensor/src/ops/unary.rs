use crate::{
    ops::{apply_single, constant, upstream},
    OpKind, Tensor,
};
use gradix_core::{be, dtype::DType, error::Result};

macro_rules! declare_unary_op {
    ($name:ident, $op:expr, |$g:ident, $x:ident, $y:ident| $grad:expr) => {
        pub fn $name(&self) -> Result<Tensor> {
            let buffer = be::ops::unary::$name(self.buffer());
            apply_single($op, &[self], self.layout().clone(), buffer, |_, inputs, outputs, grads| {
                let $g = upstream(grads, 0)?;
                let $x = &inputs[0];
                let $y = &outputs[0];
                let _ = ($x, $y);
                Ok(vec![Some($grad)])
            })
        }
    };
}

impl Tensor {
    declare_unary_op!(neg, OpKind::Neg, |g, x, y| g.neg()?);
    declare_unary_op!(exp, OpKind::Exp, |g, x, y| g.mul(y)?);
    declare_unary_op!(log, OpKind::Log, |g, x, y| g.div(x)?);
    declare_unary_op!(sqrt, OpKind::Sqrt, |g, x, y| g.scale(0.5)?.div(y)?);
    declare_unary_op!(square, OpKind::Square, |g, x, y| g.mul(&x.scale(2.0)?)?);
    declare_unary_op!(relu, OpKind::Relu, |g, x, y| g.mul(&x.step_mask()?)?);
    declare_unary_op!(sigmoid, OpKind::Sigmoid, |g, x, y| g.mul(&y.mul(&y.neg()?.add_scalar(1.0)?)?)?);
    declare_unary_op!(tanh, OpKind::Tanh, |g, x, y| g.mul(&y.square()?.neg()?.add_scalar(1.0)?)?);

    pub fn leaky_relu(&self, alpha: f64) -> Result<Tensor> {
        let buffer = be::ops::unary::leaky_relu(self.buffer(), alpha);
        apply_single(
            OpKind::LeakyRelu { alpha },
            &[self],
            self.layout().clone(),
            buffer,
            move |_, inputs, _, grads| {
                let g = upstream(grads, 0)?;
                Ok(vec![Some(g.mul(&inputs[0].leaky_step_mask(alpha)?)?)])
            },
        )
    }

    pub fn scale(&self, factor: f64) -> Result<Tensor> {
        let buffer = be::ops::unary::scale(self.buffer(), factor);
        apply_single(
            OpKind::Scale { factor },
            &[self],
            self.layout().clone(),
            buffer,
            move |_, _, _, grads| Ok(vec![Some(upstream(grads, 0)?.scale(factor)?)]),
        )
    }

    pub fn add_scalar(&self, value: f64) -> Result<Tensor> {
        let buffer = be::ops::unary::add_scalar(self.buffer(), value);
        apply_single(
            OpKind::AddScalar { value },
            &[self],
            self.layout().clone(),
            buffer,
            |_, _, _, grads| Ok(vec![Some(upstream(grads, 0)?.clone())]),
        )
    }

    /// Converts to `dtype`; the gradient is converted back.
    pub fn to_dtype(&self, dtype: DType) -> Result<Tensor> {
        if self.dtype() == dtype {
            return Ok(self.clone());
        }
        let source = self.dtype();
        let buffer = self.buffer().to_dtype(dtype);
        apply_single(
            OpKind::Cast { dtype },
            &[self],
            self.layout().clone(),
            buffer,
            move |_, _, _, grads| Ok(vec![Some(upstream(grads, 0)?.to_dtype(source)?)]),
        )
    }

    // constant masks used by the piecewise-linear activations; their own
    // derivative is zero almost everywhere, so they stay out of the graph

    pub(crate) fn step_mask(&self) -> Result<Tensor> {
        let ctx = self.context()?;
        Ok(constant(&ctx, self.layout().clone(), be::ops::unary::step(self.buffer())))
    }

    pub(crate) fn leaky_step_mask(&self, alpha: f64) -> Result<Tensor> {
        let ctx = self.context()?;
        Ok(constant(
            &ctx,
            self.layout().clone(),
            be::ops::unary::leaky_step(self.buffer(), alpha),
        ))
    }
}

#[cfg(test)]
mod tests {
    use crate::Context;
    use gradix_core::{dtype::DType, error::Result};

    #[test]
    fn forward_values() -> Result<()> {
        let ctx = Context::new();
        let x = ctx.tensor(vec![-1.0f64, 0.0, 2.0], &[3])?;
        assert_eq!(x.relu()?.to_vec_f64(), vec![0.0, 0.0, 2.0]);
        assert_eq!(x.leaky_relu(0.5)?.to_vec_f64(), vec![-0.5, 0.0, 2.0]);
        assert_eq!(x.scale(3.0)?.add_scalar(1.0)?.to_vec_f64(), vec![-2.0, 1.0, 7.0]);
        assert_eq!(x.square()?.sqrt()?.to_vec_f64(), vec![1.0, 0.0, 2.0]);
        assert_eq!(x.to_dtype(DType::F16)?.dtype(), DType::F16);
        Ok(())
    }

    #[test]
    fn masks_are_constants() -> Result<()> {
        let ctx = Context::new();
        let x = ctx.tensor(vec![-1.0f32, 3.0], &[2])?;
        x.set_stop_gradient(false);
        let mask = x.step_mask()?;
        assert!(mask.stop_gradient());
        assert_eq!(mask.to_vec_f32(), vec![0.0, 1.0]);
        assert_eq!(ctx.node_count()?, 0);
        Ok(())
    }
}
