use crate::{
    buffer::{Buffer, BufferData},
    error::{Error, Result},
    layout::Layout,
    map_data,
};
use gradix_cpu::{ops::transform, Element};

pub fn broadcast_to(input: &Buffer, in_shape: &[usize], out_shape: &[usize]) -> Buffer {
    fn kernel<T: Element>(v: &[T], in_shape: &[usize], out_shape: &[usize]) -> Vec<T> {
        let mut out = vec![T::default(); Layout::compute_size(out_shape)];
        transform::broadcast_to(v, in_shape, out_shape, &mut out);
        out
    }
    Buffer::from_data(map_data!(input.data(), v => kernel(v, in_shape, out_shape)))
}

pub fn transpose2d(input: &Buffer, rows: usize, cols: usize) -> Buffer {
    fn kernel<T: Element>(v: &[T], rows: usize, cols: usize) -> Vec<T> {
        let mut out = vec![T::default(); v.len()];
        transform::transpose2d(v, rows, cols, &mut out);
        out
    }
    Buffer::from_data(map_data!(input.data(), v => kernel(v, rows, cols)))
}

/// Splits a buffer into `[0, at)` and `[at, len)`.
pub fn split(input: &Buffer, at: usize) -> Result<(Buffer, Buffer)> {
    if at > input.len() {
        return Err(Error::Argument(format!(
            "split point {} exceeds buffer of {} elements",
            at,
            input.len()
        )));
    }
    let head = Buffer::from_data(map_data!(input.data(), v => v[..at].to_vec()));
    let tail = Buffer::from_data(map_data!(input.data(), v => v[at..].to_vec()));
    Ok((head, tail))
}

pub fn concat(inputs: &[&Buffer]) -> Result<Buffer> {
    let first = inputs
        .first()
        .ok_or_else(|| Error::Argument("concat needs at least one buffer".into()))?;
    let dtype = first.dtype();

    macro_rules! join {
        ($variant:ident) => {{
            let mut out = Vec::with_capacity(inputs.iter().map(|b| b.len()).sum());
            for buf in inputs {
                match buf.data() {
                    BufferData::$variant(v) => out.extend_from_slice(v),
                    _ => {
                        return Err(Error::DTypeMismatch {
                            expected: dtype,
                            got: buf.dtype(),
                        })
                    },
                }
            }
            BufferData::$variant(out)
        }};
    }

    let data = match first.data() {
        BufferData::BF16(_) => join!(BF16),
        BufferData::F16(_) => join!(F16),
        BufferData::F32(_) => join!(F32),
        BufferData::F64(_) => join!(F64),
    };
    Ok(Buffer::from_data(data))
}
