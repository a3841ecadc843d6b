use crate::{buffer::Buffer, layout::Layout, map_data};
use gradix_cpu::{ops::reduction, Element};

pub fn sum_all(input: &Buffer) -> Buffer {
    Buffer::from_data(map_data!(input.data(), v => vec![reduction::sum_all(v)]))
}

pub fn sum_chunked(input: &Buffer, chunk_size: usize) -> Buffer {
    Buffer::from_data(map_data!(input.data(), v => vec![reduction::sum_chunked(v, chunk_size)]))
}

pub fn sum_to_shape(input: &Buffer, in_shape: &[usize], out_shape: &[usize]) -> Buffer {
    fn kernel<T: Element>(v: &[T], in_shape: &[usize], out_shape: &[usize]) -> Vec<T> {
        let mut out = vec![T::default(); Layout::compute_size(out_shape)];
        reduction::sum_to_shape(v, in_shape, out_shape, &mut out);
        out
    }
    Buffer::from_data(map_data!(input.data(), v => kernel(v, in_shape, out_shape)))
}
