//! Generic machinery shared by every node kind: transactions, locks,
//! observers, lazily loaded child collections and their comparison.

pub mod children;
pub mod diff;
pub mod grouping;
pub mod loader;
pub mod lock;
pub mod subject;

pub use children::{ChildNode, Children, LoadState};
pub use diff::{collections_differ, summarize, ChangeSummary};
pub use grouping::fold_sorted;
pub use loader::{
    CatalogConnection, CatalogVersion, MetadataLoader, ScopedTransaction, Statement,
    StatementHandle,
};
pub use lock::{Lockable, ReferenceLock};
pub use subject::{Observer, Subject};
