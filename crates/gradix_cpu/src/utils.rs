#[inline]
pub fn is_contiguous(num_dims: usize, dims: &[usize], strides: &[usize]) -> bool {
    let mut acc = 1;
    for d in 0..num_dims {
        let dim_idx = num_dims - 1 - d;
        if dims[dim_idx] > 1 && acc != strides[dim_idx] {
            return false;
        }
        acc *= dims[dim_idx];
    }
    true
}

#[inline]
pub fn get_strided_index(idx: usize, num_dims: usize, dims: &[usize], strides: &[usize]) -> usize {
    let mut strided_i = 0;
    let mut remaining_idx = idx;

    for d in 0..num_dims {
        let dim_idx = num_dims - 1 - d;
        strided_i += (remaining_idx % dims[dim_idx]) * strides[dim_idx];
        remaining_idx /= dims[dim_idx];
    }

    strided_i
}

/// Strides that read `src_shape` as if it had `dst_shape`, with zero
/// strides on the broadcast dimensions.
pub fn broadcast_strides(src_shape: &[usize], dst_shape: &[usize]) -> Vec<usize> {
    let rank_diff = dst_shape.len() - src_shape.len();
    let mut strides = vec![0; dst_shape.len()];
    let mut acc = 1;
    for i in (0..src_shape.len()).rev() {
        if src_shape[i] != 1 {
            strides[i + rank_diff] = acc;
        }
        acc *= src_shape[i];
    }
    strides
}
