pub mod be;
pub mod buffer;
pub mod dtype;
pub mod error;
pub mod layout;

pub use gradix_cpu as cpu;
