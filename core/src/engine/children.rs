//! Lazily loaded child collections.
//!
//! A [`Children`] collection starts `Unloaded`. The first request runs the
//! owner's fetch routine inside a [`ScopedTransaction`] while the owner is
//! pinned by a [`ReferenceLock`]. The fetched generation is built off to the
//! side and only replaces the cached one when it differs by value, in which
//! case the owner's observers are notified once the lock is released.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use common::ident::Identifier;

use crate::engine::diff::{self, ChangeSummary};
use crate::engine::loader::{MetadataLoader, ScopedTransaction};
use crate::engine::lock::{Lockable, ReferenceLock};
use crate::error::{CatalogError, CatalogResult};

/// Load state of a child collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Unloaded,
    Loading,
    Loaded,
}

/// A node that lives in a [`Children`] collection.
///
/// Equality must compare the node's key and attributes only, never its lock
/// count or observers.
pub trait ChildNode: Lockable + PartialEq {
    /// Identity of the node within its parent collection.
    fn key(&self) -> Identifier;
}

pub struct Children<T> {
    state: Mutex<LoadState>,
    items: RwLock<Vec<Arc<T>>>,
}

/// Resets the state to `Unloaded` unless the load reached its end.
struct LoadingGuard<'a> {
    state: &'a Mutex<LoadState>,
    finished: bool,
}

impl LoadingGuard<'_> {
    fn finish(&mut self) {
        set_state(self.state, LoadState::Loaded);
        self.finished = true;
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            set_state(self.state, LoadState::Unloaded);
        }
    }
}

fn set_state(state: &Mutex<LoadState>, value: LoadState) {
    match state.lock() {
        Ok(mut guard) => *guard = value,
        Err(poisoned) => *poisoned.into_inner() = value,
    }
}

impl<T> Default for Children<T> {
    fn default() -> Self {
        Self {
            state: Mutex::new(LoadState::Unloaded),
            items: RwLock::new(Vec::new()),
        }
    }
}

impl<T: ChildNode> Children<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn state_guard(&self) -> MutexGuard<'_, LoadState> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn state(&self) -> LoadState {
        *self.state_guard()
    }

    pub fn is_loaded(&self) -> bool {
        self.state() == LoadState::Loaded
    }

    /// Current generation, without loading.
    pub fn snapshot(&self) -> Vec<Arc<T>> {
        match self.items.read() {
            Ok(items) => items.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.read().map(|items| items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Looks up a cached child by key, without loading.
    pub fn find(&self, key: &str) -> Option<Arc<T>> {
        self.snapshot()
            .into_iter()
            .find(|child| child.key().as_str() == key)
    }

    /// Marks a loaded collection stale so the next request fetches again.
    pub fn invalidate(&self) {
        let mut state = self.state_guard();
        if *state == LoadState::Loaded {
            *state = LoadState::Unloaded;
        }
    }

    pub fn lock_all(&self) {
        for child in self.snapshot() {
            child.lock_subject();
        }
    }

    pub fn unlock_all(&self) {
        for child in self.snapshot() {
            child.unlock_subject();
        }
    }

    /// Returns the cached generation, loading it first if needed.
    pub fn ensure_loaded<F>(
        &self,
        owner: &dyn Lockable,
        loader: &MetadataLoader,
        fetch: F,
    ) -> CatalogResult<Vec<Arc<T>>>
    where
        F: FnOnce(&MetadataLoader) -> CatalogResult<Vec<T>>,
    {
        if !self.is_loaded() {
            self.load(owner, loader, fetch)?;
        }
        Ok(self.snapshot())
    }

    fn begin_loading(&self, owner: &dyn Lockable) -> CatalogResult<LoadingGuard<'_>> {
        let mut state = self.state_guard();
        if *state == LoadState::Loading {
            return Err(CatalogError::LoadInProgress(owner.subject().name().to_string()));
        }
        *state = LoadState::Loading;
        Ok(LoadingGuard {
            state: &self.state,
            finished: false,
        })
    }

    /// Fetches a fresh generation and swaps it in when it differs.
    ///
    /// `fetch` runs inside an active transaction and returns candidate
    /// children in catalog order. Candidates equal to a cached child with the
    /// same key are replaced by that cached instance; new or changed ones get
    /// the owner's current lock depth. On error the collection is left
    /// `Unloaded` and the cached generation untouched.
    pub fn load<F>(
        &self,
        owner: &dyn Lockable,
        loader: &MetadataLoader,
        fetch: F,
    ) -> CatalogResult<ChangeSummary>
    where
        F: FnOnce(&MetadataLoader) -> CatalogResult<Vec<T>>,
    {
        let mut loading = self.begin_loading(owner)?;
        let transaction = ScopedTransaction::begin(loader)?;
        let _lock = ReferenceLock::new(owner);

        let owner_name = owner.subject().name();
        log::debug!("loading children of {} {}", owner.subject().kind(), owner_name);

        let candidates = fetch(transaction.loader())?;
        let previous = self.snapshot();
        let next = self.merge(owner, &previous, candidates);

        let summary = diff::summarize(&previous, &next, |child: &T| child.key());
        if summary.changed {
            self.replace(owner, &previous, next)?;
            loading.finish();
            log::debug!(
                "children of {owner_name} changed: {} added, {} removed, {} modified",
                summary.added,
                summary.removed,
                summary.modified
            );
            owner.subject().notify_observers();
        } else {
            loading.finish();
            log::trace!("children of {owner_name} unchanged");
        }
        Ok(summary)
    }

    fn merge(
        &self,
        owner: &dyn Lockable,
        previous: &[Arc<T>],
        candidates: Vec<T>,
    ) -> Vec<Arc<T>> {
        let depth = owner.subject().lock_count();
        let mut next: Vec<Arc<T>> = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let key = candidate.key();
            if next.iter().any(|child| child.key() == key) {
                log::warn!(
                    "duplicate child {key} under {}; keeping the first",
                    owner.subject().name()
                );
                continue;
            }
            match previous.iter().find(|child| child.key() == key) {
                Some(existing) if **existing == candidate => next.push(Arc::clone(existing)),
                existing => {
                    if let Some(replaced) = existing {
                        candidate.subject().adopt_observers(replaced.subject());
                    }
                    for _ in 0..depth {
                        candidate.lock_subject();
                    }
                    next.push(Arc::new(candidate));
                }
            }
        }
        next
    }

    fn replace(
        &self,
        owner: &dyn Lockable,
        previous: &[Arc<T>],
        next: Vec<Arc<T>>,
    ) -> CatalogResult<()> {
        let depth = owner.subject().lock_count();
        {
            let mut items = self
                .items
                .write()
                .map_err(|_| CatalogError::LockPoisoned("children swap"))?;
            *items = next;
        }
        let current = self.snapshot();
        for retired in previous
            .iter()
            .filter(|old| !current.iter().any(|child| Arc::ptr_eq(child, old)))
        {
            for _ in 0..depth {
                retired.unlock_subject();
            }
        }
        Ok(())
    }
}

impl<T> fmt::Debug for Children<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock().map(|state| *state).ok();
        let len = self.items.read().map(|items| items.len()).ok();
        f.debug_struct("Children")
            .field("state", &state)
            .field("len", &len)
            .finish()
    }
}
