//! Python bindings.
//!
//! Values cross the boundary as plain Python objects (None, bool, int,
//! float, str, list, dict) and are held as `serde_json::Value` on the Rust
//! side. Python callables used as transforms or listener callbacks are
//! called with the GIL re-acquired, so channels stay `Send + Sync`.

use std::sync::Arc;

use pyo3::exceptions::{
    PyKeyError, PyNotImplementedError, PyRuntimeError, PyTypeError, PyValueError,
};
use pyo3::prelude::*;
use pyo3::types::{PyBool, PyDict, PyFloat, PyList, PyLong, PyString, PyTuple};
use serde_json::{Map, Number, Value};
use tracing::warn;

use crate::channel::{Channel, ElementwiseMap, Listener, Modification, PathView, Source};
use crate::error::ChannelError;
use crate::path::Path;

impl From<ChannelError> for PyErr {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::InvalidPath { .. } => PyKeyError::new_err(err.to_string()),
            ChannelError::UnsupportedModification { .. } => {
                PyNotImplementedError::new_err(err.to_string())
            }
            ChannelError::Serialization(_) => PyValueError::new_err(err.to_string()),
            ChannelError::StaleCacheRead { .. } | ChannelError::Callback(_) => {
                PyRuntimeError::new_err(err.to_string())
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Value conversion
// ----------------------------------------------------------------------------

fn to_py(py: Python<'_>, value: &Value) -> PyResult<PyObject> {
    Ok(match value {
        Value::Null => py.None(),
        Value::Bool(b) => b.into_py(py),
        Value::Number(n) => match (n.as_i64(), n.as_u64()) {
            (Some(i), _) => i.into_py(py),
            (None, Some(u)) => u.into_py(py),
            _ => n.as_f64().unwrap_or(f64::NAN).into_py(py),
        },
        Value::String(s) => s.as_str().into_py(py),
        Value::Array(items) => {
            let list = PyList::empty_bound(py);
            for item in items {
                list.append(to_py(py, item)?)?;
            }
            list.into_any().unbind()
        }
        Value::Object(fields) => {
            let dict = PyDict::new_bound(py);
            for (key, item) in fields {
                dict.set_item(key, to_py(py, item)?)?;
            }
            dict.into_any().unbind()
        }
    })
}

fn from_py(obj: &Bound<'_, PyAny>) -> PyResult<Value> {
    if obj.is_none() {
        return Ok(Value::Null);
    }
    // bool is a subclass of int, so it has to be checked first.
    if let Ok(b) = obj.downcast::<PyBool>() {
        return Ok(Value::Bool(b.is_true()));
    }
    if obj.is_instance_of::<PyLong>() {
        if let Ok(i) = obj.extract::<i64>() {
            return Ok(Value::from(i));
        }
        return Ok(Value::from(obj.extract::<u64>()?));
    }
    if obj.is_instance_of::<PyFloat>() {
        let f = obj.extract::<f64>()?;
        return Number::from_f64(f)
            .map(Value::Number)
            .ok_or_else(|| PyValueError::new_err(format!("{f} cannot be stored in a channel")));
    }
    if obj.is_instance_of::<PyString>() {
        return Ok(Value::String(obj.extract::<String>()?));
    }
    if obj.is_instance_of::<PyList>() || obj.is_instance_of::<PyTuple>() {
        return obj
            .iter()?
            .map(|item| from_py(&item?))
            .collect::<PyResult<Vec<_>>>()
            .map(Value::Array);
    }
    if let Ok(dict) = obj.downcast::<PyDict>() {
        let mut fields = Map::new();
        for (key, item) in dict.iter() {
            fields.insert(key.extract::<String>()?, from_py(&item)?);
        }
        return Ok(Value::Object(fields));
    }
    Err(PyTypeError::new_err(format!(
        "unsupported channel value of type {}",
        obj.get_type().name()?
    )))
}

/// The Rust channel behind any of the Python channel classes.
fn channel_of(obj: &Bound<'_, PyAny>) -> PyResult<Arc<dyn Channel>> {
    if let Ok(source) = obj.downcast::<PySource>() {
        return Ok(source.borrow().inner.clone());
    }
    if let Ok(map) = obj.downcast::<PyElementwiseMap>() {
        return Ok(map.borrow().inner.clone());
    }
    if let Ok(view) = obj.downcast::<PyPathView>() {
        return Ok(view.borrow().inner.clone());
    }
    Err(PyTypeError::new_err("expected Source, ElementwiseMap or PathView"))
}

fn callback_error(err: PyErr) -> ChannelError {
    ChannelError::Callback(err.to_string())
}

// ----------------------------------------------------------------------------
// Classes
// ----------------------------------------------------------------------------

/// Python-exposed Source.
#[pyclass(name = "Source")]
pub struct PySource {
    inner: Arc<Source>,
}

#[pymethods]
impl PySource {
    #[new]
    fn new(value: &Bound<'_, PyAny>) -> PyResult<Self> {
        Ok(Self {
            inner: Source::new(from_py(value)?),
        })
    }

    #[getter]
    fn id(&self) -> u64 {
        self.inner.id().raw()
    }

    fn get_data(&self, py: Python<'_>) -> PyResult<PyObject> {
        to_py(py, &self.inner.get_data()?)
    }

    fn get_data_at_index(&self, py: Python<'_>, path: &str) -> PyResult<PyObject> {
        to_py(py, &self.inner.get_data_at_index(&Path::from(path))?)
    }

    fn set_data(&self, value: &Bound<'_, PyAny>) -> PyResult<()> {
        Ok(self.inner.set_data(from_py(value)?)?)
    }

    fn set_data_at_index(&self, path: &str, value: &Bound<'_, PyAny>) -> PyResult<()> {
        Ok(self.inner.set_data_at_index(&Path::from(path), from_py(value)?)?)
    }

    fn insert_at_index(&self, path: &str, value: &Bound<'_, PyAny>) -> PyResult<()> {
        Ok(self.inner.insert_at_index(&Path::from(path), from_py(value)?)?)
    }

    fn downstream_count(&self) -> usize {
        self.inner.downstream_count()
    }

    fn __repr__(&self) -> String {
        format!(
            "Source(id={}, downstream={})",
            self.inner.id().raw(),
            self.inner.downstream_count()
        )
    }
}

/// Python-exposed ElementwiseMap. `transform` is called once per element.
#[pyclass(name = "ElementwiseMap")]
pub struct PyElementwiseMap {
    inner: Arc<ElementwiseMap>,
}

#[pymethods]
impl PyElementwiseMap {
    #[new]
    fn new(upstream: &Bound<'_, PyAny>, transform: PyObject) -> PyResult<Self> {
        let upstream = channel_of(upstream)?;
        let inner = ElementwiseMap::try_new(upstream, move |item| {
            Python::with_gil(|py| {
                let out = transform.call1(py, (to_py(py, item)?,))?;
                from_py(out.bind(py))
            })
            .map_err(callback_error)
        });
        Ok(Self { inner })
    }

    #[getter]
    fn id(&self) -> u64 {
        self.inner.id().raw()
    }

    fn get_data(&self, py: Python<'_>) -> PyResult<PyObject> {
        to_py(py, &self.inner.get_data()?)
    }

    fn get_data_at_index(&self, py: Python<'_>, path: &str) -> PyResult<PyObject> {
        to_py(py, &self.inner.get_data_at_index(&Path::from(path))?)
    }

    /// `(full, partial)` recompute counts.
    fn stats(&self) -> (usize, usize) {
        let stats = self.inner.stats();
        (stats.full, stats.partial)
    }

    fn disconnect(&self) {
        self.inner.disconnect();
    }
}

/// Python-exposed PathView.
#[pyclass(name = "PathView")]
pub struct PyPathView {
    inner: Arc<PathView>,
}

#[pymethods]
impl PyPathView {
    #[new]
    fn new(upstream: &Bound<'_, PyAny>, path: &str) -> PyResult<Self> {
        Ok(Self {
            inner: PathView::new(channel_of(upstream)?, path),
        })
    }

    #[getter]
    fn id(&self) -> u64 {
        self.inner.id().raw()
    }

    /// The upstream path currently viewed.
    #[getter]
    fn watched(&self) -> String {
        self.inner.watched().into()
    }

    fn get_data(&self, py: Python<'_>) -> PyResult<PyObject> {
        to_py(py, &self.inner.get_data()?)
    }

    fn get_data_at_index(&self, py: Python<'_>, path: &str) -> PyResult<PyObject> {
        to_py(py, &self.inner.get_data_at_index(&Path::from(path))?)
    }

    fn disconnect(&self) {
        self.inner.disconnect();
    }
}

/// Python-exposed Listener.
///
/// Exceptions raised by callbacks are logged and swallowed, since the
/// write that triggered them has already been applied.
#[pyclass(name = "Listener")]
pub struct PyListener {
    inner: Arc<Listener>,
}

fn call_logged(callback: &PyObject, args: impl FnOnce(Python<'_>) -> PyResult<Py<PyTuple>>) {
    Python::with_gil(|py| {
        if let Err(err) = args(py).and_then(|args| callback.call1(py, args)) {
            warn!(error = %err, "listener callback raised");
        }
    });
}

#[pymethods]
impl PyListener {
    #[new]
    fn new(
        upstream: &Bound<'_, PyAny>,
        on_data: PyObject,
        on_data_at_index: PyObject,
        on_modify: PyObject,
    ) -> PyResult<Self> {
        let upstream = channel_of(upstream)?;
        let inner = Listener::new(
            upstream,
            move |value| {
                call_logged(&on_data, |py| {
                    Ok(PyTuple::new_bound(py, [to_py(py, &value)?]).unbind())
                })
            },
            move |path, value| {
                call_logged(&on_data_at_index, |py| {
                    let path = path.as_str().into_py(py);
                    Ok(PyTuple::new_bound(py, [path, to_py(py, &value)?]).unbind())
                })
            },
            move |modification: &Modification| {
                call_logged(&on_modify, |py| {
                    let modification = serde_json::to_value(modification)
                        .map_err(|err| PyValueError::new_err(err.to_string()))?;
                    Ok(PyTuple::new_bound(py, [to_py(py, &modification)?]).unbind())
                })
            },
        );
        Ok(Self { inner })
    }

    fn disconnect(&self) {
        self.inner.disconnect();
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
