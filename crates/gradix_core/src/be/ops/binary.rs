use crate::{
    buffer::{Buffer, BufferData},
    error::{Error, Result},
};
use gradix_cpu::{ops::binary, Element};

macro_rules! declare_binary_op {
    ($($name:ident),* $(,)?) => {
        $(
            pub fn $name(lhs: &Buffer, rhs: &Buffer) -> Result<Buffer> {
                fn kernel<T: Element>(a: &[T], b: &[T]) -> Vec<T> {
                    let mut out = vec![T::default(); a.len()];
                    binary::$name(a, b, &mut out);
                    out
                }

                check_operands(lhs, rhs)?;
                let data = match (lhs.data(), rhs.data()) {
                    (BufferData::BF16(a), BufferData::BF16(b)) => BufferData::BF16(kernel(a, b)),
                    (BufferData::F16(a), BufferData::F16(b)) => BufferData::F16(kernel(a, b)),
                    (BufferData::F32(a), BufferData::F32(b)) => BufferData::F32(kernel(a, b)),
                    (BufferData::F64(a), BufferData::F64(b)) => BufferData::F64(kernel(a, b)),
                    _ => unreachable!("operand dtypes checked above"),
                };
                Ok(Buffer::from_data(data))
            }
        )*
    };
}

fn check_operands(lhs: &Buffer, rhs: &Buffer) -> Result<()> {
    if lhs.dtype() != rhs.dtype() {
        return Err(Error::DTypeMismatch {
            expected: lhs.dtype(),
            got: rhs.dtype(),
        });
    }
    if lhs.len() != rhs.len() {
        return Err(Error::IncompatibleShape(format!(
            "elementwise operands have {} and {} elements",
            lhs.len(),
            rhs.len()
        )));
    }
    Ok(())
}

declare_binary_op!(add, sub, mul, div);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::DType;

    #[test]
    fn rejects_mixed_dtypes() {
        let a = Buffer::full(2, DType::F32, 1.0);
        let b = Buffer::full(2, DType::F64, 1.0);
        assert!(matches!(add(&a, &b), Err(Error::DTypeMismatch { .. })));
        let c = Buffer::full(3, DType::F32, 1.0);
        assert!(matches!(mul(&a, &c), Err(Error::IncompatibleShape(_))));
        assert_eq!(sub(&a, &a).unwrap().to_f32_vec(), vec![0.0, 0.0]);
    }
}
