use std::{
    cmp::max,
    ops::{BitOr, BitOrAssign},
};

use parse_display::Display;

#[cfg(test)]
mod tests;

/// Invalidation state of an effect, from "known valid" to "known stale".
///
/// The two in-between levels support lazy recomputation through computed
/// values: a `MaybeDirty*` effect defers the decision to rerun until its
/// upstream computeds are refreshed. `Querying` exists only while that
/// resolution is in progress and is never observable from outside it.
#[derive(Debug, Display, Clone, Copy, Eq, PartialEq, Ord, PartialOrd)]
pub enum Dirty {
    Clean,
    Querying,
    /// Possibly stale because a computed dependency was re-evaluated as a
    /// side effect of something else. Not scheduled until escalated.
    MaybeDirtyComputed,
    /// Possibly stale because a computed dependency was invalidated.
    MaybeDirty,
    Dirty,
}

impl Dirty {
    pub fn from_is_dirty(is_dirty: bool) -> Self {
        if is_dirty {
            Dirty::Dirty
        } else {
            Dirty::Clean
        }
    }
    pub fn is_clean(self) -> bool {
        self == Dirty::Clean
    }
    pub fn is_dirty(self) -> bool {
        self >= Dirty::Dirty
    }
    pub fn is_maybe_dirty(self) -> bool {
        self == Dirty::MaybeDirty || self == Dirty::MaybeDirtyComputed
    }
}

impl BitOr for Dirty {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        max(self, rhs)
    }
}
impl BitOrAssign for Dirty {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = *self | rhs;
    }
}

/// The kind of mutation reported when a container changes.
///
/// `Set` invalidates only the written key; the other kinds change the shape
/// of the container and additionally invalidate iteration dependencies.
#[derive(Debug, Display, Clone, Copy, Eq, PartialEq, Hash)]
pub enum TriggerKind {
    Set,
    Add,
    Delete,
    Clear,
}

impl TriggerKind {
    pub fn affects_iteration(self) -> bool {
        !matches!(self, TriggerKind::Set)
    }
}
