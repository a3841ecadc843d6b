use crate::Element;
use rayon::prelude::*;

/// Applies `func` elementwise, `output[i] = func(input[i])`.
pub fn map<T: Element, F>(input: &[T], output: &mut [T], func: F)
where
    F: Fn(f64) -> f64 + Sync + Send,
{
    output
        .par_iter_mut()
        .zip(input.par_iter())
        .for_each(|(out_val, &x)| *out_val = T::from_f64(func(x.to_f64())));
}

macro_rules! unary_op {
    ($name:ident, $func:expr) => {
        pub fn $name<T: Element>(input: &[T], output: &mut [T]) {
            map(input, output, $func);
        }
    };
}

macro_rules! unary_op_with_constant {
    ($name:ident, $func:expr) => {
        pub fn $name<T: Element>(input: &[T], constant: f64, output: &mut [T]) {
            let func = $func;
            map(input, output, move |x| func(x, constant));
        }
    };
}

unary_op!(neg, |x: f64| -x);
unary_op!(exp, |x: f64| x.exp());
unary_op!(log, |x: f64| x.ln());
unary_op!(sqrt, |x: f64| x.sqrt());
unary_op!(square, |x: f64| x * x);
unary_op!(relu, |x: f64| if x > 0.0 { x } else { 0.0 });
unary_op!(sigmoid, |x: f64| 1.0 / (1.0 + (-x).exp()));
unary_op!(tanh, |x: f64| x.tanh());
// 1 where x > 0, else 0
unary_op!(step, |x: f64| if x > 0.0 { 1.0 } else { 0.0 });

unary_op_with_constant!(leaky_relu, |x: f64, alpha: f64| if x > 0.0 { x } else { alpha * x });
// 1 where x > 0, else alpha
unary_op_with_constant!(leaky_step, |x: f64, alpha: f64| if x > 0.0 { 1.0 } else { alpha });
unary_op_with_constant!(scale, |x: f64, factor: f64| x * factor);
unary_op_with_constant!(add_scalar, |x: f64, value: f64| x + value);

pub fn fill<T: Element>(output: &mut [T], value: f64) {
    let value = T::from_f64(value);
    output.par_iter_mut().for_each(|out_val| *out_val = value);
}

pub fn cast<S: Element, D: Element>(input: &[S], output: &mut [D]) {
    output
        .par_iter_mut()
        .zip(input.par_iter())
        .for_each(|(out_val, &x)| *out_val = D::from_f64(x.to_f64()));
}
