//! Path Algebra
//!
//! A [`Path`] addresses a location inside a structured value: a dot-joined
//! list of segments, each either a record field name or a sequence index.
//! `"rows.2.name"` is the `name` field of the third element of `rows`.
//!
//! The empty path is the root and addresses the whole value. Whole-value
//! operations on channels never go through the algebra below.
//!
//! All operations are pure and linear in the length of the path.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ChannelError, Result};

/// Segment separator.
pub const SEPARATOR: char = '.';

/// A dot-separated address into a structured value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Path(String);

impl Path {
    /// The root path, addressing the whole value.
    pub fn root() -> Self {
        Self(String::new())
    }

    /// Build a path from a string, trimming stray separators at either end.
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim_matches(SEPARATOR).to_owned())
    }

    /// Build a path from individual segments.
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut raw = String::new();
        for segment in segments {
            if !raw.is_empty() {
                raw.push(SEPARATOR);
            }
            raw.push_str(segment.as_ref());
        }
        Self::new(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of segments. The root has none.
    pub fn depth(&self) -> usize {
        if self.is_root() {
            0
        } else {
            self.0.matches(SEPARATOR).count() + 1
        }
    }

    /// Segments from root to leaf.
    pub fn segments(&self) -> impl Iterator<Item = &str> + '_ {
        self.0.split(SEPARATOR).take(self.depth())
    }

    pub fn first_segment(&self) -> Option<&str> {
        self.segments().next()
    }

    pub fn last_segment(&self) -> Option<&str> {
        if self.is_root() {
            None
        } else {
            self.0.rsplit(SEPARATOR).next()
        }
    }

    /// True iff `self` lies strictly below `parent`.
    ///
    /// Every non-root path is below the root.
    pub fn is_sub_path_of(&self, parent: &Path) -> bool {
        if parent.is_root() {
            return !self.is_root();
        }
        self.0.len() > parent.0.len()
            && self.0.starts_with(parent.as_str())
            && self.0[parent.0.len()..].starts_with(SEPARATOR)
    }

    /// `self` relative to `parent`, or `None` when `self` is not below it.
    pub fn sub_path(&self, parent: &Path) -> Option<Path> {
        if !self.is_sub_path_of(parent) {
            return None;
        }
        if parent.is_root() {
            return Some(self.clone());
        }
        Some(Self(self.0[parent.0.len() + 1..].to_owned()))
    }

    /// True iff `self` equals `other` or lies below it.
    pub fn is_ancestor_or_self_of(&self, other: &Path) -> bool {
        self == other || other.is_sub_path_of(self)
    }

    /// All segments but the last. The root has no parent; a single-segment
    /// path has the root as its parent.
    pub fn parent(&self) -> Option<Path> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind(SEPARATOR) {
            Some(at) => Some(Self(self.0[..at].to_owned())),
            None => Some(Self::root()),
        }
    }

    /// Proper ancestors, nearest first, ending with the root.
    pub fn ancestors(&self) -> impl Iterator<Item = Path> {
        std::iter::successors(self.parent(), |p| p.parent())
    }

    pub fn is_sibling_of(&self, other: &Path) -> bool {
        self.parent() == other.parent()
    }

    /// Parse the final segment as a sequence index.
    ///
    /// Only meaningful for paths known to address sequence elements.
    pub fn last_index(&self) -> Result<usize> {
        let last = self
            .last_segment()
            .ok_or_else(|| ChannelError::invalid_path(self, "root path has no index"))?;
        last.parse::<usize>().map_err(|_| {
            ChannelError::invalid_path(self, format!("segment `{last}` is not a sequence index"))
        })
    }

    /// Replace the final segment with its index plus one.
    pub fn increment_last(&self) -> Result<Path> {
        let next = self.last_index()? + 1;
        Ok(match self.parent() {
            Some(parent) => parent.join(&Path::from(next)),
            None => Path::from(next),
        })
    }

    /// `self + "." + other`, treating the root as the identity.
    pub fn join(&self, other: &Path) -> Path {
        match (self.is_root(), other.is_root()) {
            (true, _) => other.clone(),
            (_, true) => self.clone(),
            _ => Self(format!("{}{}{}", self.0, SEPARATOR, other.0)),
        }
    }

    /// Re-base `self` after an insertion at `insert`.
    ///
    /// Returns the shifted path when `self` is `insert`, a later sibling of
    /// it, or anything below one of those. Returns `None` when the
    /// insertion leaves `self` where it is.
    pub fn shift_for_insert(&self, insert: &Path) -> Option<Path> {
        let depth = insert.depth();
        if depth == 0 || self.depth() < depth {
            return None;
        }
        let inserted_at = insert.last_index().ok()?;

        let mut segments: Vec<&str> = self.segments().collect();
        let axis = depth - 1;
        if !segments[..axis].iter().copied().eq(insert.segments().take(axis)) {
            return None;
        }
        let current = segments[axis].parse::<usize>().ok()?;
        if current < inserted_at {
            return None;
        }
        let shifted = (current + 1).to_string();
        segments[axis] = &shifted;
        Some(Path::from_segments(segments))
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Path {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl From<&str> for Path {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for Path {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

impl From<&Path> for Path {
    fn from(path: &Path) -> Self {
        path.clone()
    }
}

impl From<usize> for Path {
    fn from(index: usize) -> Self {
        Self(index.to_string())
    }
}

impl From<Path> for String {
    fn from(path: Path) -> Self {
        path.0
    }
}

impl AsRef<str> for Path {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
