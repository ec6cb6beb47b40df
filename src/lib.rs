//! A tensor-operation and reverse-mode differentiation engine
//!
//! This library provides:
//! - Strided, typed n-dimensional arrays with shared-storage views
//! - A closed catalogue of transform, scalar, reduction and index-reduction ops,
//!   executed eagerly with dimension restriction and in-place or copy semantics
//! - A differentiable function graph that builds gradient graphs out of
//!   ordinary nodes
//! - The im2col/col2im layout transform, pooling and convolution on top of it
//!
//! # Features
//! - `debug_logs` - Emits `log::debug!` records from the executor and graph
//! - `serialization` - Serde support for op metadata and a JSON registry export
//! - `cpu_openblas` - Links OpenBLAS for matrix products
//!
//! # Example
//! ```rust
//! use ndgrad::{DataType, ExecutionContext, Graph, NDArray};
//!
//! fn main() -> Result<(), ndgrad::Error> {
//!     let mut graph = Graph::with_context(ExecutionContext::new(DataType::Double));
//!     let x = graph.var("x", NDArray::from_vec(vec![1.0, 2.0, 3.0], &[3], DataType::Double)?)?;
//!     let sq = graph.square(x)?;
//!     let loss = graph.sum(sq, &[])?;
//!
//!     let grads = graph.differentiate(loss, &[x])?;
//!     let dx = graph.exec(grads[0])?;
//!     assert_eq!(dx.to_vec_f64()?, vec![2.0, 4.0, 6.0]);
//!     Ok(())
//! }
//! ```

// --- Central debug_println macro definition ---
/// Conditional logging macro. Logs at debug level if 'debug_logs' feature is enabled.
#[cfg(feature = "debug_logs")]
#[macro_export]
macro_rules! debug_println {
    ($($arg:tt)*) => {
        ::log::debug!(target: module_path!(), $($arg)*)
    };
}

/// Conditional logging macro (disabled version). Does nothing.
#[cfg(not(feature = "debug_logs"))]
#[macro_export]
macro_rules! debug_println {
    ($($arg:tt)*) => {};
}

#[cfg(feature = "cpu_openblas")]
extern crate openblas_src;

pub mod array;
pub mod context;
pub mod convolution;
pub mod error;
pub mod executor;
pub mod graph;
pub mod loss;
mod meta;
pub mod ops;
pub mod registry;
pub mod transforms;
pub mod util;

pub mod test_utils;

pub use array::{DataType, NDArray, Order, Value};
pub use context::ExecutionContext;
pub use convolution::{Im2ColConfig, PoolingType};
pub use error::Error;
pub use executor::OpExecutor;
pub use graph::{Graph, NodeRef, PendingFunction};
pub use loss::FMeasure;
pub use ops::{OpFamily, Operation};
pub use registry::OpMetadata;
