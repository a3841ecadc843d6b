use crate::{buffer::Buffer, map_data};
use gradix_cpu::{ops::unary, Element};

macro_rules! declare_unary_op {
    ($($name:ident),* $(,)?) => {
        $(
            pub fn $name(input: &Buffer) -> Buffer {
                fn kernel<T: Element>(v: &[T]) -> Vec<T> {
                    let mut out = vec![T::default(); v.len()];
                    unary::$name(v, &mut out);
                    out
                }
                Buffer::from_data(map_data!(input.data(), v => kernel(v)))
            }
        )*
    };
}

macro_rules! declare_unary_op_with_constant {
    ($($name:ident),* $(,)?) => {
        $(
            pub fn $name(input: &Buffer, constant: f64) -> Buffer {
                fn kernel<T: Element>(v: &[T], constant: f64) -> Vec<T> {
                    let mut out = vec![T::default(); v.len()];
                    unary::$name(v, constant, &mut out);
                    out
                }
                Buffer::from_data(map_data!(input.data(), v => kernel(v, constant)))
            }
        )*
    };
}

declare_unary_op!(neg, exp, log, sqrt, square, relu, sigmoid, tanh, step);
declare_unary_op_with_constant!(leaky_relu, leaky_step, scale, add_scalar);
