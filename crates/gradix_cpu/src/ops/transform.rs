use crate::{
    utils::{broadcast_strides, get_strided_index},
    Element,
};
use rayon::prelude::*;

pub fn broadcast_to<T: Element>(input: &[T], in_shape: &[usize], out_shape: &[usize], output: &mut [T]) {
    let strides = broadcast_strides(in_shape, out_shape);
    output.par_iter_mut().enumerate().for_each(|(i, out_val)| {
        *out_val = input[get_strided_index(i, out_shape.len(), out_shape, &strides)];
    });
}

pub fn transpose2d<T: Element>(input: &[T], rows: usize, cols: usize, output: &mut [T]) {
    output.par_iter_mut().enumerate().for_each(|(i, out_val)| {
        let (c, r) = (i / rows, i % rows);
        *out_val = input[r * cols + c];
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_column() {
        let mut out = [0.0f32; 6];
        broadcast_to(&[1.0, 2.0], &[2, 1], &[2, 3], &mut out);
        assert_eq!(out, [1.0, 1.0, 1.0, 2.0, 2.0, 2.0]);
    }

    #[test]
    fn transpose() {
        let mut out = [0.0f32; 6];
        transpose2d(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 2, 3, &mut out);
        assert_eq!(out, [1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }
}
