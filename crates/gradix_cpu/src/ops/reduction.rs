use crate::{
    utils::{broadcast_strides, get_strided_index},
    Element,
};
use rayon::prelude::*;

/// Sums every element, accumulating in `f64` in index order.
pub fn sum_all<T: Element>(input: &[T]) -> T {
    T::from_f64(input.iter().fold(0.0, |acc, &x| acc + x.to_f64()))
}

/// Parallel sum over fixed-size chunks. Partial sums are combined in chunk
/// order, so the result is reproducible for a given `chunk_size`.
pub fn sum_chunked<T: Element>(input: &[T], chunk_size: usize) -> T {
    let partials: Vec<f64> = input
        .par_chunks(chunk_size.max(1))
        .map(|chunk| chunk.iter().fold(0.0, |acc, &x| acc + x.to_f64()))
        .collect();
    T::from_f64(partials.iter().sum())
}

/// Reduces `input` (of `in_shape`) onto `out_shape` by summing over every
/// dimension `out_shape` broadcasts along. The inverse of `broadcast_to`.
pub fn sum_to_shape<T: Element>(input: &[T], in_shape: &[usize], out_shape: &[usize], output: &mut [T]) {
    let strides = broadcast_strides(out_shape, in_shape);
    let mut acc = vec![0.0f64; output.len()];
    for (i, &x) in input.iter().enumerate() {
        let dst = get_strided_index(i, in_shape.len(), in_shape, &strides);
        acc[dst] += x.to_f64();
    }
    for (out_val, v) in output.iter_mut().zip(acc) {
        *out_val = T::from_f64(v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sums_rows_and_columns() {
        let input = [1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0];
        let mut rows = [0.0f32; 2];
        sum_to_shape(&input, &[2, 3], &[2, 1], &mut rows);
        assert_eq!(rows, [6.0, 15.0]);

        let mut cols = [0.0f32; 3];
        sum_to_shape(&input, &[2, 3], &[3], &mut cols);
        assert_eq!(cols, [5.0, 7.0, 9.0]);

        let mut all = [0.0f32; 1];
        sum_to_shape(&input, &[2, 3], &[], &mut all);
        assert_eq!(all, [21.0]);
        assert_eq!(sum_all(&input), 21.0);
        assert_eq!(sum_chunked(&input, 4), 21.0);
    }
}
