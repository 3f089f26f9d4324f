//! Dirty Tracking
//!
//! A [`DirtySet`] records which addresses of a derived node's output are
//! stale. The address space is unbounded, so the set keeps one of two
//! representations:
//!
//! - **Positive**: the listed paths are dirty, everything else is clean.
//!   This is the state after a full clean sweep, when dirt is sparse.
//! - **Negative**: the listed paths are clean, everything else is dirty.
//!   This is the state after a full invalidation, when cleanliness is sparse.
//!
//! Only the two bulk operations switch representation.
//!
//! # Nesting
//!
//! Staleness is inherited downwards: a path is dirty when it, or any of its
//! ancestors, is dirty. Marking a path dirty in negative mode therefore
//! drops the clean marks of its ancestors and descendants, and marking a
//! path clean in positive mode drops the dirty marks below it.

use indexmap::IndexSet;

use crate::path::Path;

/// Per-node record of stale output addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirtySet {
    /// Listed paths are dirty.
    Positive { dirty: IndexSet<Path> },
    /// Listed paths are clean.
    Negative { clean: IndexSet<Path> },
}

impl Default for DirtySet {
    /// A fresh set marks everything dirty.
    fn default() -> Self {
        Self::all_dirty()
    }
}

impl DirtySet {
    /// Everything dirty, nothing known clean.
    pub fn all_dirty() -> Self {
        Self::Negative {
            clean: IndexSet::new(),
        }
    }

    /// Everything clean, nothing known dirty.
    pub fn all_clean() -> Self {
        Self::Positive {
            dirty: IndexSet::new(),
        }
    }

    pub fn mark_all_dirty(&mut self) {
        *self = Self::all_dirty();
    }

    pub fn mark_all_clean(&mut self) {
        *self = Self::all_clean();
    }

    pub fn mark_dirty(&mut self, path: &Path) {
        match self {
            Self::Positive { dirty } => {
                dirty.insert(path.clone());
            }
            Self::Negative { clean } => {
                clean.retain(|p| !p.is_ancestor_or_self_of(path) && !p.is_sub_path_of(path));
            }
        }
    }

    pub fn mark_clean(&mut self, path: &Path) {
        match self {
            Self::Positive { dirty } => {
                dirty.retain(|p| !path.is_ancestor_or_self_of(p));
            }
            Self::Negative { clean } => {
                clean.retain(|p| !p.is_sub_path_of(path));
                clean.insert(path.clone());
            }
        }
    }

    /// True when `path` or one of its ancestors is stale.
    pub fn is_dirty(&self, path: &Path) -> bool {
        match self {
            Self::Positive { dirty } => {
                dirty.contains(path) || path.ancestors().any(|a| dirty.contains(&a))
            }
            Self::Negative { clean } => {
                !clean.contains(path) && !path.ancestors().any(|a| clean.contains(&a))
            }
        }
    }

    /// Known dirty paths in marking order, or `None` in negative mode.
    pub fn list_dirty(&self) -> Option<Vec<Path>> {
        match self {
            Self::Positive { dirty } => Some(dirty.iter().cloned().collect()),
            Self::Negative { .. } => None,
        }
    }

    /// Known clean paths in marking order, or `None` in positive mode.
    pub fn list_clean(&self) -> Option<Vec<Path>> {
        match self {
            Self::Positive { .. } => None,
            Self::Negative { clean } => Some(clean.iter().cloned().collect()),
        }
    }

    /// Negative mode with nothing marked clean.
    pub fn is_all_dirty(&self) -> bool {
        matches!(self, Self::Negative { clean } if clean.is_empty())
    }

    /// Positive mode with nothing marked dirty.
    pub fn is_all_clean(&self) -> bool {
        matches!(self, Self::Positive { dirty } if dirty.is_empty())
    }

    /// The outermost stale ancestor-or-self of `path`, if `path` is stale.
    ///
    /// Recomputing that address covers `path`. In negative mode no dirty
    /// ancestor is enumerable, so `path` itself is returned.
    pub fn dirty_root(&self, path: &Path) -> Option<Path> {
        match self {
            Self::Positive { dirty } => {
                let outermost = path.ancestors().filter(|a| dirty.contains(a)).last();
                outermost.or_else(|| dirty.contains(path).then(|| path.clone()))
            }
            Self::Negative { .. } => self.is_dirty(path).then(|| path.clone()),
        }
    }

    /// Listed dirty paths strictly below `path`.
    ///
    /// Always empty in negative mode: below a clean path nothing can be
    /// dirty, and below a dirty path [`Self::dirty_root`] covers everything.
    pub fn dirty_below(&self, path: &Path) -> Vec<Path> {
        match self {
            Self::Positive { dirty } => dirty
                .iter()
                .filter(|p| p.is_sub_path_of(path))
                .cloned()
                .collect(),
            Self::Negative { .. } => Vec::new(),
        }
    }

    /// Shift every tracked address that an insertion at `insert` moves.
    ///
    /// After this the set describes the same elements at their new indices;
    /// the inserted slot itself carries no mark and its state is decided by
    /// the representation (dirty in negative mode, clean in positive mode).
    pub fn rebase_for_insert(&mut self, insert: &Path) {
        let tracked = match self {
            Self::Positive { dirty } => dirty,
            Self::Negative { clean } => clean,
        };
        if !tracked.iter().any(|p| p.shift_for_insert(insert).is_some()) {
            return;
        }
        *tracked = tracked
            .iter()
            .map(|p| p.shift_for_insert(insert).unwrap_or_else(|| p.clone()))
            .collect();
    }
}
