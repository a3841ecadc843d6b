use crate::Element;
use rayon::prelude::*;

/// `output[m, n] = lhs[m, k] @ rhs[k, n]`, row-major, one rayon task per output row.
pub fn matmul<T: Element>(lhs: &[T], rhs: &[T], m: usize, k: usize, n: usize, output: &mut [T]) {
    debug_assert_eq!(lhs.len(), m * k);
    debug_assert_eq!(rhs.len(), k * n);
    debug_assert_eq!(output.len(), m * n);

    output.par_chunks_mut(n.max(1)).enumerate().for_each(|(row, out_row)| {
        for (col, out_val) in out_row.iter_mut().enumerate() {
            let mut acc = 0.0f64;
            for p in 0..k {
                acc += lhs[row * k + p].to_f64() * rhs[p * n + col].to_f64();
            }
            *out_val = T::from_f64(acc);
        }
    });
}
