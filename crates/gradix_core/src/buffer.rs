use crate::{
    dtype::DType,
    error::{Error, Result},
};
use gradix_cpu::{ops::unary, Element};
use half::{bf16, f16};

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BufferData {
    BF16(Vec<bf16>),
    F16(Vec<f16>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

/// Runs `$body` with `$v` bound to the typed slice of a `BufferData`.
#[macro_export]
macro_rules! with_data {
    ($data:expr, $v:ident => $body:expr) => {
        match $data {
            $crate::buffer::BufferData::BF16($v) => $body,
            $crate::buffer::BufferData::F16($v) => $body,
            $crate::buffer::BufferData::F32($v) => $body,
            $crate::buffer::BufferData::F64($v) => $body,
        }
    };
}

/// Like `with_data!`, but wraps the `Vec` produced by `$body` back into
/// the same `BufferData` variant.
#[macro_export]
macro_rules! map_data {
    ($data:expr, $v:ident => $body:expr) => {
        match $data {
            $crate::buffer::BufferData::BF16($v) => $crate::buffer::BufferData::BF16($body),
            $crate::buffer::BufferData::F16($v) => $crate::buffer::BufferData::F16($body),
            $crate::buffer::BufferData::F32($v) => $crate::buffer::BufferData::F32($body),
            $crate::buffer::BufferData::F64($v) => $crate::buffer::BufferData::F64($body),
        }
    };
}

/// Host element types a `Buffer` can be built from directly.
pub trait HostElement: Element {
    const DTYPE: DType;

    fn wrap(values: Vec<Self>) -> BufferData;
}

macro_rules! impl_host_element {
    ($($type:ty => $variant:ident),* $(,)?) => {
        $(
            impl HostElement for $type {
                const DTYPE: DType = DType::$variant;

                fn wrap(values: Vec<Self>) -> BufferData {
                    BufferData::$variant(values)
                }
            }
        )*
    };
}

impl_host_element!(bf16 => BF16, f16 => F16, f32 => F32, f64 => F64);

/// Contiguous host storage of a tensor. Buffers are immutable once built;
/// every kernel writes into a fresh buffer.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Buffer {
    data: BufferData,
}

impl Buffer {
    pub fn from_data(data: BufferData) -> Self {
        Self { data }
    }

    pub fn from_vec<T: HostElement>(values: Vec<T>) -> Self {
        Self { data: T::wrap(values) }
    }

    pub fn zeros(size: usize, dtype: DType) -> Self {
        Self::full(size, dtype, 0.0)
    }

    pub fn full(size: usize, dtype: DType, value: f64) -> Self {
        fn filled<T: Element>(size: usize, value: f64) -> Vec<T> {
            let mut out = vec![T::default(); size];
            unary::fill(&mut out, value);
            out
        }

        let data = match dtype {
            DType::BF16 => BufferData::BF16(filled(size, value)),
            DType::F16 => BufferData::F16(filled(size, value)),
            DType::F32 => BufferData::F32(filled(size, value)),
            DType::F64 => BufferData::F64(filled(size, value)),
        };
        Self { data }
    }

    pub fn from_f64_slice(values: &[f64], dtype: DType) -> Self {
        Buffer::from_vec(values.to_vec()).to_dtype(dtype)
    }

    pub fn from_f32_slice(values: &[f32], dtype: DType) -> Self {
        Buffer::from_vec(values.to_vec()).to_dtype(dtype)
    }

    pub fn data(&self) -> &BufferData {
        &self.data
    }

    pub fn into_data(self) -> BufferData {
        self.data
    }

    pub fn len(&self) -> usize {
        with_data!(&self.data, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dtype(&self) -> DType {
        match self.data {
            BufferData::BF16(_) => DType::BF16,
            BufferData::F16(_) => DType::F16,
            BufferData::F32(_) => DType::F32,
            BufferData::F64(_) => DType::F64,
        }
    }

    pub fn to_f64_vec(&self) -> Vec<f64> {
        with_data!(&self.data, v => v.iter().map(|x| x.to_f64()).collect())
    }

    pub fn to_f32_vec(&self) -> Vec<f32> {
        match &self.data {
            BufferData::F32(v) => v.clone(),
            other => with_data!(other, v => v.iter().map(|x| x.to_f64() as f32).collect()),
        }
    }

    pub fn get(&self, index: usize) -> Result<f64> {
        with_data!(&self.data, v => v
            .get(index)
            .map(|x| x.to_f64())
            .ok_or_else(|| Error::Argument(format!("index {} out of bounds for buffer of {}", index, v.len()))))
    }

    pub fn to_dtype(&self, dtype: DType) -> Self {
        if dtype == self.dtype() {
            return self.clone();
        }

        fn converted<S: Element, D: Element>(input: &[S]) -> Vec<D> {
            let mut out = vec![D::default(); input.len()];
            unary::cast(input, &mut out);
            out
        }

        let data = with_data!(&self.data, v => match dtype {
            DType::BF16 => BufferData::BF16(converted(v)),
            DType::F16 => BufferData::F16(converted(v)),
            DType::F32 => BufferData::F32(converted(v)),
            DType::F64 => BufferData::F64(converted(v)),
        });
        Self { data }
    }
}
