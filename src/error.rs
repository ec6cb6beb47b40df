use crate::array::DataType;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Incompatible shapes for operation {op}: {shape_a:?} and {shape_b:?}")]
    IncompatibleShapes {
        op: String,
        shape_a: Vec<usize>,
        shape_b: Vec<usize>,
    },

    #[error("Invalid dimension {dimension} for array of rank {rank}")]
    InvalidDimension { dimension: usize, rank: usize },

    #[error("Operation {op} has no math defined for {dtype:?} data")]
    UnsupportedOperation { op: String, dtype: DataType },

    #[error("Array storage has been released")]
    UseAfterFree,

    #[error("Differentiation error: {0}")]
    DifferentiationError(String),

    #[error("Fusion error: {0}")]
    FusionError(String),

    #[error("Unknown operation: {0}")]
    UnknownOp(String),

    #[error("Node belongs to graph {actual}, expected graph {expected}")]
    GraphMismatch { expected: usize, actual: usize },

    #[error("Placeholder {0} has no array bound")]
    UnboundPlaceholder(String),

    #[error("Variable {0} is already registered")]
    DuplicateVariable(String),

    #[error("Index out of bounds: index {index}, size {size}")]
    IndexOutOfBounds { index: usize, size: usize },

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Internal logic error: {0}")]
    InternalLogicError(String),

    #[error("Gradient check error: analytical={analytical:?}, numerical={numerical:?}, max_rel_error={max_rel_error}, max_abs_error={max_abs_error}, at_index={at_index}")]
    GradientCheckError {
        analytical: Vec<f64>,
        numerical: Vec<f64>,
        max_rel_error: f64,
        max_abs_error: f64,
        at_index: usize,
    },
}

impl Error {
    pub(crate) fn unsupported(op: &str, dtype: DataType) -> Self {
        Error::UnsupportedOperation {
            op: op.to_string(),
            dtype,
        }
    }

    pub(crate) fn shape_mismatch(expected: &[usize], actual: &[usize]) -> Self {
        Error::ShapeMismatch {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }
}
