use crate::dtype::DType;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    // gradient requests and graph structure
    Argument(String),
    UnusedInput {
        index: usize,
        tensor: String,
    },
    GraphConsumed {
        op: String,
    },
    InvalidGraph(String),
    NoGradientDefined {
        op: String,
    },
    ContextReleased,
    // executors
    ParityMismatch {
        fetch: String,
        max_abs_diff: f64,
        tolerance: f64,
    },
    //
    DTypeMismatch {
        expected: DType,
        got: DType,
    },
    UnsupportedDType,
    IncompatibleShape(String),
    DimensionMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    DimensionOutOfBounds {
        dim: usize,
        ndim: usize,
    },
    Unsupported(String),
    InvalidState(String),
    Lock,
    // serde
    #[cfg(feature = "serde")]
    SerializationError(String),
    #[cfg(feature = "serde")]
    DeserializationError(String),
    //
    Internal {
        message: String,
    },
    External {
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Argument(msg) => write!(f, "Invalid argument: {}", msg),
            Self::UnusedInput { index, tensor } => write!(
                f,
                "Input {} ({}) is not reachable from the outputs; set allow_unused=true to get an empty gradient instead",
                index, tensor
            ),
            Self::GraphConsumed { op } => write!(
                f,
                "Graph already consumed at node `{}`; pass retain_graph=true to backward through it more than once",
                op
            ),
            Self::InvalidGraph(msg) => write!(f, "Invalid graph: {}", msg),
            Self::NoGradientDefined { op } => write!(f, "Operator `{}` has no gradient defined", op),
            Self::ContextReleased => write!(f, "Execution context has been released"),
            Self::ParityMismatch {
                fetch,
                max_abs_diff,
                tolerance,
            } => write!(
                f,
                "Executors disagree on `{}`: max abs diff {:e} exceeds tolerance {:e}",
                fetch, max_abs_diff, tolerance
            ),

            Self::DTypeMismatch { expected, got } => {
                write!(f, "DType mismatch: expected {:?}, got {:?}", expected, got)
            },
            Self::UnsupportedDType => write!(f, "Unsupported data type"),
            Self::IncompatibleShape(msg) => write!(f, "Incompatible shape: {}", msg),
            Self::DimensionMismatch { expected, got } => {
                write!(f, "Dimension mismatch: expected {:?}, got {:?}", expected, got)
            },
            Self::DimensionOutOfBounds { dim, ndim } => {
                write!(
                    f,
                    "Dimension out of bounds: dimension {} is not valid for tensor with {} dimensions",
                    dim, ndim
                )
            },
            Self::Unsupported(msg) => write!(f, "Unsupported: {}", msg),
            Self::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Self::Lock => write!(f, "Lock poisoned"),
            #[cfg(feature = "serde")]
            Self::SerializationError(msg) => {
                write!(f, "Serialization error: {}", msg)
            },
            #[cfg(feature = "serde")]
            Self::DeserializationError(msg) => {
                write!(f, "Deserialization error: {}", msg)
            },
            Self::Internal { message } => {
                write!(f, "Internal error: {}", message)
            },
            Self::External { message } => {
                write!(f, "External error: {}", message)
            },
        }
    }
}

impl std::error::Error for Error {}
