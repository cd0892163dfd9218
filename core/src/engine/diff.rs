//! Value comparison of child collections.
//!
//! A reload that fetches byte-identical data must not notify observers, so
//! collections are compared attribute-wise rather than by reference.

use std::ops::Deref;

/// Returns `true` when `new` differs from `old` in length or in the value of
/// any position.
pub fn collections_differ<P, T>(old: &[P], new: &[P]) -> bool
where
    P: Deref<Target = T>,
    T: PartialEq + ?Sized,
{
    old.len() != new.len()
        || old
            .iter()
            .zip(new.iter())
            .any(|(before, after)| **before != **after)
}

/// Outcome of comparing two generations of a child collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeSummary {
    pub changed: bool,
    pub added: usize,
    pub removed: usize,
    pub modified: usize,
}

/// Compares two keyed generations, counting what a reload added, removed or
/// modified. `changed` agrees with [`collections_differ`], so a pure reorder
/// counts as a change even when every count is zero.
pub fn summarize<P, T, K, F>(old: &[P], new: &[P], key: F) -> ChangeSummary
where
    P: Deref<Target = T>,
    T: PartialEq + ?Sized,
    K: PartialEq,
    F: Fn(&T) -> K,
{
    let mut summary = ChangeSummary {
        changed: collections_differ(old, new),
        ..ChangeSummary::default()
    };
    if !summary.changed {
        return summary;
    }
    let old_values: Vec<&T> = old.iter().map(|item| &**item).collect();
    let new_values: Vec<&T> = new.iter().map(|item| &**item).collect();
    for item in new_values.iter().copied() {
        let item_key = key(item);
        match old_values
            .iter()
            .copied()
            .find(|previous| key(*previous) == item_key)
        {
            Some(previous) if previous != item => summary.modified += 1,
            Some(_) => {}
            None => summary.added += 1,
        }
    }
    summary.removed = old_values
        .iter()
        .copied()
        .filter(|previous| {
            let previous_key = key(*previous);
            !new_values.iter().copied().any(|item| key(item) == previous_key)
        })
        .count();
    summary
}
