//! Trellis Core
//!
//! This crate provides path-addressed incremental computation channels.
//! It implements:
//!
//! - Authoritative sources with whole, path and insert writes
//! - Lazily recomputed derived nodes with per-path dirty tracking
//! - Elementwise maps, path views and zips
//! - Callback listeners at the leaves of the graph
//!
//! The crate is designed to be used both as a native Rust library and, with
//! the `python` feature, as a Python extension module via PyO3.
//!
//! # Architecture
//!
//! - `path`: Dot-separated addresses into nested values
//! - `value`: Reading and writing `serde_json::Value`s at a path
//! - `dirty`: The set of stale addresses of a cached value
//! - `channel`: Sources, derived nodes, listeners and the edges between them
//!
//! # Example
//!
//! ```rust
//! use serde_json::json;
//! use trellis_core::channel::{Channel, ElementwiseMap, Source};
//! use trellis_core::path::Path;
//!
//! let numbers = Source::new(json!([1, 2, 3]));
//! let labels = ElementwiseMap::typed(numbers.clone(), |x: i64| format!("({})", x * 2));
//! assert_eq!(labels.get_data().unwrap(), json!(["(2)", "(4)", "(6)"]));
//!
//! // Only element 2 is recomputed.
//! numbers.set_data_at_index(&Path::from("2"), json!(5)).unwrap();
//! assert_eq!(labels.get_data_at_index(&Path::from("2")).unwrap(), json!("(10)"));
//! ```

pub mod channel;
pub mod dirty;
pub mod error;
pub mod path;
pub mod value;

#[cfg(feature = "python")]
mod python;

pub use error::{ChannelError, Result};

#[cfg(feature = "python")]
use pyo3::prelude::*;

/// Python module definition.
///
/// This function is called by Python when importing the module.
#[cfg(feature = "python")]
#[pymodule]
fn _core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<python::PySource>()?;
    m.add_class::<python::PyElementwiseMap>()?;
    m.add_class::<python::PyPathView>()?;
    m.add_class::<python::PyListener>()?;

    m.add("__version__", env!("CARGO_PKG_VERSION"))?;

    Ok(())
}
