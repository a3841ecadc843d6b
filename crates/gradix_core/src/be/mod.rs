//! Backend dispatch: typed buffer matching in front of the `gradix_cpu` kernels.

pub mod ops;
