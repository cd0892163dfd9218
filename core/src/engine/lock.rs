use crate::engine::subject::Subject;

/// Anything carrying a [`Subject`] that can be pinned by a [`ReferenceLock`].
///
/// Locking a node also locks its currently loaded children, recursively, so
/// that a lock taken before a load still protects what the load exposes.
pub trait Lockable: Send + Sync {
    fn subject(&self) -> &Subject;

    fn lock_children(&self) {}

    fn unlock_children(&self) {}

    fn lock_subject(&self) {
        self.subject().lock();
        self.lock_children();
    }

    fn unlock_subject(&self) {
        self.unlock_children();
        self.subject().unlock();
    }

    fn is_locked(&self) -> bool {
        self.subject().is_locked()
    }
}

/// Holds one lock level on each node for its lifetime.
///
/// The borrow keeps the nodes alive while the guard exists; dropping the
/// guard releases the levels in reverse order, on every exit path.
#[must_use = "the nodes are unlocked when the guard is dropped"]
pub struct ReferenceLock<'a> {
    nodes: Vec<&'a dyn Lockable>,
}

impl<'a> ReferenceLock<'a> {
    pub fn new(node: &'a dyn Lockable) -> Self {
        Self::over([node])
    }

    pub fn over<I>(nodes: I) -> Self
    where
        I: IntoIterator<Item = &'a dyn Lockable>,
    {
        let nodes: Vec<&'a dyn Lockable> = nodes.into_iter().collect();
        for node in &nodes {
            node.lock_subject();
        }
        Self { nodes }
    }
}

impl Drop for ReferenceLock<'_> {
    fn drop(&mut self) {
        for node in self.nodes.iter().rev() {
            node.unlock_subject();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ident::Identifier;
    use common::node::NodeKind;

    struct Leaf {
        subject: Subject,
    }

    impl Leaf {
        fn new(name: &str) -> Self {
            Self {
                subject: Subject::new(NodeKind::Parameter, Identifier::from_catalog(name)),
            }
        }
    }

    impl Lockable for Leaf {
        fn subject(&self) -> &Subject {
            &self.subject
        }
    }

    struct Branch {
        subject: Subject,
        leaves: Vec<Leaf>,
    }

    impl Lockable for Branch {
        fn subject(&self) -> &Subject {
            &self.subject
        }

        fn lock_children(&self) {
            self.leaves.iter().for_each(Lockable::lock_subject);
        }

        fn unlock_children(&self) {
            self.leaves.iter().for_each(Lockable::unlock_subject);
        }
    }

    #[test]
    fn guard_locks_for_its_lifetime() {
        let leaf = Leaf::new("A");
        {
            let _lock = ReferenceLock::new(&leaf);
            assert!(leaf.is_locked());
            let _again = ReferenceLock::new(&leaf);
            assert_eq!(leaf.subject().lock_count(), 2);
        }
        assert!(!leaf.is_locked());
    }

    #[test]
    fn guard_covers_several_nodes() {
        let a = Leaf::new("A");
        let b = Leaf::new("B");
        {
            let _lock = ReferenceLock::over([&a as &dyn Lockable, &b as &dyn Lockable]);
            assert!(a.is_locked() && b.is_locked());
        }
        assert!(!a.is_locked() && !b.is_locked());
    }

    #[test]
    fn locking_a_branch_locks_its_children() {
        let branch = Branch {
            subject: Subject::new(NodeKind::Procedure, Identifier::from_catalog("P")),
            leaves: vec![Leaf::new("X"), Leaf::new("Y")],
        };
        {
            let _lock = ReferenceLock::new(&branch);
            assert!(branch.leaves.iter().all(Lockable::is_locked));
        }
        assert!(branch.leaves.iter().all(|leaf| !leaf.is_locked()));
    }

    #[test]
    fn guard_releases_on_early_return() {
        fn failing(leaf: &Leaf) -> Result<(), ()> {
            let _lock = ReferenceLock::new(leaf);
            Err(())
        }

        let leaf = Leaf::new("A");
        assert!(failing(&leaf).is_err());
        assert_eq!(leaf.subject().lock_count(), 0);
    }
}
