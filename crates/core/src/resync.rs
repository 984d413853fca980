//! The shared resync result shape.
//!
//! Every component of the parameter-space tree reports changes against its
//! previously observed state in this form; combinators translate child
//! indices into their own index space and union the results.

use std::collections::BTreeSet;

/// The outcome of reconciling a component with its new upstream state.
///
/// `redo` holds indices whose content materially changed and whose jobs
/// must run again; `disable` holds indices that may no longer be
/// submitted. After [`normalize`](Self::normalize) the two sets are
/// disjoint: a newly inactive index is only reported in `disable`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResyncResult {
    pub redo: BTreeSet<usize>,
    pub disable: BTreeSet<usize>,
    pub size_changed: bool,
}

impl ResyncResult {
    pub fn empty() -> Self {
        Self::default()
    }

    /// A result that only reports a size change.
    pub fn size_change() -> Self {
        Self {
            size_changed: true,
            ..Self::default()
        }
    }

    /// True if nothing changed at all.
    pub fn is_empty(&self) -> bool {
        self.redo.is_empty() && self.disable.is_empty() && !self.size_changed
    }

    /// Union another result into this one.
    pub fn merge(&mut self, other: ResyncResult) {
        self.redo.extend(other.redo);
        self.disable.extend(other.disable);
        self.size_changed |= other.size_changed;
    }

    /// Union a child result into this one, mapping each child index to the
    /// global indices it occupies via `translate`.
    pub fn merge_translated<F, I>(&mut self, other: &ResyncResult, mut translate: F)
    where
        F: FnMut(usize) -> I,
        I: IntoIterator<Item = usize>,
    {
        for &index in &other.redo {
            self.redo.extend(translate(index));
        }
        for &index in &other.disable {
            self.disable.extend(translate(index));
        }
        self.size_changed |= other.size_changed;
    }

    /// Enforce the `redo ∩ disable = ∅` invariant: disabling wins.
    pub fn normalize(&mut self) {
        for index in &self.disable {
            self.redo.remove(index);
        }
    }
}
