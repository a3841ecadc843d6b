pub use gradix_internal::*;
