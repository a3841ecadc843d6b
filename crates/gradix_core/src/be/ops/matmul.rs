use crate::{
    buffer::{Buffer, BufferData},
    error::{Error, Result},
};
use gradix_cpu::{ops::matmul as kernels, Element};

pub fn matmul(lhs: &Buffer, rhs: &Buffer, m: usize, k: usize, n: usize) -> Result<Buffer> {
    fn kernel<T: Element>(a: &[T], b: &[T], m: usize, k: usize, n: usize) -> Vec<T> {
        let mut out = vec![T::default(); m * n];
        kernels::matmul(a, b, m, k, n, &mut out);
        out
    }

    if lhs.len() != m * k || rhs.len() != k * n {
        return Err(Error::IncompatibleShape(format!(
            "matmul buffers of {} and {} elements do not match [{}, {}] @ [{}, {}]",
            lhs.len(),
            rhs.len(),
            m,
            k,
            k,
            n
        )));
    }

    let data = match (lhs.data(), rhs.data()) {
        (BufferData::BF16(a), BufferData::BF16(b)) => BufferData::BF16(kernel(a, b, m, k, n)),
        (BufferData::F16(a), BufferData::F16(b)) => BufferData::F16(kernel(a, b, m, k, n)),
        (BufferData::F32(a), BufferData::F32(b)) => BufferData::F32(kernel(a, b, m, k, n)),
        (BufferData::F64(a), BufferData::F64(b)) => BufferData::F64(kernel(a, b, m, k, n)),
        _ => {
            return Err(Error::DTypeMismatch {
                expected: lhs.dtype(),
                got: rhs.dtype(),
            })
        },
    };
    Ok(Buffer::from_data(data))
}
