use half::{bf16, f16};

/// Storage element of a host buffer.
///
/// Kernels compute in `f64` and round once on store, so every dtype sees
/// the same arithmetic and only differs by its final rounding.
pub trait Element: Copy + Default + Send + Sync + PartialEq + std::fmt::Debug + 'static {
    const NAME: &'static str;

    fn to_f64(self) -> f64;
    fn from_f64(value: f64) -> Self;
}

macro_rules! impl_element {
    ($type:ty, $name:expr, $to:expr, $from:expr) => {
        impl Element for $type {
            const NAME: &'static str = $name;

            #[inline]
            fn to_f64(self) -> f64 {
                $to(self)
            }

            #[inline]
            fn from_f64(value: f64) -> Self {
                $from(value)
            }
        }
    };
}

impl_element!(f32, "f32", |x: f32| x as f64, |v: f64| v as f32);
impl_element!(f64, "f64", |x: f64| x, |v: f64| v);
impl_element!(f16, "f16", |x: f16| x.to_f64(), f16::from_f64);
impl_element!(bf16, "bf16", |x: bf16| x.to_f64(), bf16::from_f64);
