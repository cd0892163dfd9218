use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};

use common::ident::Identifier;
use common::node::NodeKind;

/// Receives "this node changed" notifications.
///
/// Observers re-read whatever state they need from the subject; the
/// notification itself carries nothing else.
pub trait Observer: Send + Sync {
    fn update(&self, subject: &Subject);
}

static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

#[derive(Default)]
struct LockState {
    count: usize,
    pending: bool,
}

/// Identity, lock counter and observer list shared by every node kind.
pub struct Subject {
    serial: u64,
    kind: NodeKind,
    name: RwLock<Identifier>,
    locks: Mutex<LockState>,
    observers: Mutex<Vec<Weak<dyn Observer>>>,
}

impl Subject {
    pub fn new(kind: NodeKind, name: Identifier) -> Self {
        Self {
            serial: NEXT_SERIAL.fetch_add(1, Ordering::Relaxed),
            kind,
            name: RwLock::new(name),
            locks: Mutex::new(LockState::default()),
            observers: Mutex::new(Vec::new()),
        }
    }

    /// Process-unique handle, assigned once at construction.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn name(&self) -> Identifier {
        match self.name.read() {
            Ok(name) => name.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn set_name(&self, name: Identifier) {
        match self.name.write() {
            Ok(mut guard) => *guard = name,
            Err(poisoned) => *poisoned.into_inner() = name,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, LockState> {
        match self.locks.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn observer_list(&self) -> MutexGuard<'_, Vec<Weak<dyn Observer>>> {
        match self.observers.lock() {
            Ok(list) => list,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn lock_count(&self) -> usize {
        self.lock_state().count
    }

    /// A locked node must not be destroyed or reloaded concurrently.
    pub fn is_locked(&self) -> bool {
        self.lock_count() > 0
    }

    pub(crate) fn lock(&self) {
        self.lock_state().count += 1;
    }

    /// Releases one lock level; a notification deferred while locked fires
    /// when the last level goes.
    pub(crate) fn unlock(&self) {
        let fire = {
            let mut state = self.lock_state();
            if state.count == 0 {
                log::warn!("unbalanced unlock on {} {}", self.kind, self.name());
                return;
            }
            state.count -= 1;
            let fire = state.count == 0 && state.pending;
            if fire {
                state.pending = false;
            }
            fire
        };
        if fire {
            self.fire();
        }
    }

    /// Notifies observers now, or once the subject is fully unlocked.
    pub fn notify_observers(&self) {
        {
            let mut state = self.lock_state();
            if state.count > 0 {
                state.pending = true;
                return;
            }
        }
        self.fire();
    }

    pub fn has_pending_notification(&self) -> bool {
        self.lock_state().pending
    }

    fn fire(&self) {
        let live: Vec<Arc<dyn Observer>> = {
            let mut observers = self.observer_list();
            observers.retain(|observer| observer.strong_count() > 0);
            observers.iter().filter_map(Weak::upgrade).collect()
        };
        log::trace!(
            "{} {} changed, notifying {} observer(s)",
            self.kind,
            self.name(),
            live.len()
        );
        for observer in live {
            observer.update(self);
        }
    }

    /// Registers a non-owning observer. Subscribing the same observer twice
    /// is a no-op.
    pub fn subscribe<O: Observer + 'static>(&self, observer: &Arc<O>) {
        let target = Arc::as_ptr(observer) as *const ();
        let mut observers = self.observer_list();
        if observers
            .iter()
            .any(|existing| Weak::as_ptr(existing) as *const () == target)
        {
            return;
        }
        let weak: Weak<O> = Arc::downgrade(observer);
        observers.push(weak);
    }

    pub fn unsubscribe<O: Observer + 'static>(&self, observer: &Arc<O>) {
        let target = Arc::as_ptr(observer) as *const ();
        self.observer_list()
            .retain(|existing| Weak::as_ptr(existing) as *const () != target);
    }

    /// Number of observers that are still alive.
    pub fn observer_count(&self) -> usize {
        self.observer_list()
            .iter()
            .filter(|observer| observer.strong_count() > 0)
            .count()
    }

    /// Moves the observers of a replaced node onto its replacement.
    pub(crate) fn adopt_observers(&self, previous: &Subject) {
        let moved: Vec<Weak<dyn Observer>> = previous.observer_list().drain(..).collect();
        if moved.is_empty() {
            return;
        }
        self.observer_list().extend(moved);
    }
}

impl fmt::Debug for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subject")
            .field("serial", &self.serial)
            .field("kind", &self.kind)
            .field("name", &self.name())
            .field("locks", &self.lock_count())
            .finish()
    }
}
