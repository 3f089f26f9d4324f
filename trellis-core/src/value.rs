//! Path-based access into channel values.
//!
//! Channel values are `serde_json::Value`s: records are objects, sequences
//! are arrays. Sources use the strict accessors, which fail with
//! [`ChannelError::InvalidPath`] on anything that does not resolve. Derived
//! caches use [`write_at`], which builds missing containers on the way down.

use serde_json::{Map, Value};

use crate::error::{ChannelError, Result};
use crate::path::Path;

/// Parse a segment as an index into `items`, bounded by `limit`.
fn index_in(path: &Path, segment: &str, limit: usize) -> Result<usize> {
    let index = segment.parse::<usize>().map_err(|_| {
        ChannelError::invalid_path(path, format!("segment `{segment}` is not a sequence index"))
    })?;
    if index >= limit {
        return Err(ChannelError::invalid_path(
            path,
            format!("index {index} out of range for length {limit}"),
        ));
    }
    Ok(index)
}

fn step<'a>(path: &Path, current: &'a Value, segment: &str) -> Result<&'a Value> {
    match current {
        Value::Array(items) => Ok(&items[index_in(path, segment, items.len())?]),
        Value::Object(fields) => fields
            .get(segment)
            .ok_or_else(|| ChannelError::invalid_path(path, format!("no field `{segment}`"))),
        _ => Err(ChannelError::invalid_path(
            path,
            format!("cannot descend into a scalar at `{segment}`"),
        )),
    }
}

fn step_mut<'a>(path: &Path, current: &'a mut Value, segment: &str) -> Result<&'a mut Value> {
    match current {
        Value::Array(items) => {
            let index = index_in(path, segment, items.len())?;
            Ok(&mut items[index])
        }
        Value::Object(fields) => fields
            .get_mut(segment)
            .ok_or_else(|| ChannelError::invalid_path(path, format!("no field `{segment}`"))),
        _ => Err(ChannelError::invalid_path(
            path,
            format!("cannot descend into a scalar at `{segment}`"),
        )),
    }
}

/// Read the value at `path`.
pub fn get_at<'a>(value: &'a Value, path: &Path) -> Result<&'a Value> {
    path.segments()
        .try_fold(value, |current, segment| step(path, current, segment))
}

/// Resolve the container holding the last segment of `path`.
fn parent_mut<'a, 'p>(value: &'a mut Value, path: &'p Path) -> Result<(&'a mut Value, &'p str)> {
    let last = path
        .last_segment()
        .ok_or_else(|| ChannelError::invalid_path(path, "root path has no parent"))?;
    let depth = path.depth();
    let mut current = value;
    for segment in path.segments().take(depth - 1) {
        current = step_mut(path, current, segment)?;
    }
    Ok((current, last))
}

/// Replace the value at `path`. The root path replaces everything.
///
/// Sequence slots must already exist; record fields may be new.
pub fn set_at(value: &mut Value, path: &Path, new_value: Value) -> Result<()> {
    if path.is_root() {
        *value = new_value;
        return Ok(());
    }
    let (container, last) = parent_mut(value, path)?;
    match container {
        Value::Array(items) => {
            let index = index_in(path, last, items.len())?;
            items[index] = new_value;
            Ok(())
        }
        Value::Object(fields) => {
            fields.insert(last.to_owned(), new_value);
            Ok(())
        }
        _ => Err(ChannelError::invalid_path(path, "parent is not a container")),
    }
}

/// Insert into the sequence addressed by `path.parent()` at the index given
/// by the last segment. Elements at or after that index move up by one.
pub fn insert_at(value: &mut Value, path: &Path, new_value: Value) -> Result<()> {
    let (container, last) = parent_mut(value, path)?;
    match container {
        Value::Array(items) => {
            let index = index_in(path, last, items.len() + 1)?;
            items.insert(index, new_value);
            Ok(())
        }
        _ => Err(ChannelError::invalid_path(path, "insertion target is not a sequence")),
    }
}

/// Write `new_value` at `path`, creating containers that do not exist yet.
///
/// Integer segments produce arrays padded with `null`, anything else
/// produces objects. A scalar standing where a container is needed is
/// replaced. Only derived caches use this.
pub fn write_at(value: &mut Value, path: &Path, new_value: Value) -> Result<()> {
    let mut current = value;
    for segment in path.segments() {
        let as_index = segment.parse::<usize>().ok();
        if !matches!(current, Value::Array(_) | Value::Object(_)) {
            *current = match as_index {
                Some(_) => Value::Array(Vec::new()),
                None => Value::Object(Map::new()),
            };
        }
        current = match current {
            Value::Array(items) => {
                let index = as_index.ok_or_else(|| {
                    ChannelError::invalid_path(
                        path,
                        format!("segment `{segment}` is not a sequence index"),
                    )
                })?;
                if items.len() <= index {
                    items.resize(index + 1, Value::Null);
                }
                &mut items[index]
            }
            Value::Object(fields) => fields.entry(segment.to_owned()).or_insert(Value::Null),
            _ => unreachable!("scalars were replaced above"),
        };
    }
    *current = new_value;
    Ok(())
}
