use crate::Element;
use rayon::prelude::*;

/// Elementwise `output[i] = func(lhs[i], rhs[i])` over equally sized slices.
pub fn zip_map<T: Element, F>(lhs: &[T], rhs: &[T], output: &mut [T], func: F)
where
    F: Fn(f64, f64) -> f64 + Sync + Send,
{
    output
        .par_iter_mut()
        .zip(lhs.par_iter().zip(rhs.par_iter()))
        .for_each(|(out_val, (&a, &b))| *out_val = T::from_f64(func(a.to_f64(), b.to_f64())));
}

macro_rules! binary_op {
    ($name:ident, $func:expr) => {
        pub fn $name<T: Element>(lhs: &[T], rhs: &[T], output: &mut [T]) {
            zip_map(lhs, rhs, output, $func);
        }
    };
}

binary_op!(add, |a: f64, b: f64| a + b);
binary_op!(sub, |a: f64, b: f64| a - b);
binary_op!(mul, |a: f64, b: f64| a * b);
binary_op!(div, |a: f64, b: f64| a / b);
