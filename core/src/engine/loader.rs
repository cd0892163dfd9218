//! Per-connection metadata loader and the scoped read transaction.
//!
//! Nodes never talk to a connection directly. They open a
//! [`ScopedTransaction`] on the database's [`MetadataLoader`], ask it for a
//! prepared statement and fetch rows through the returned handle. Nested
//! scopes share one underlying transaction, which commits when the outermost
//! scope ends.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use common::value::{Row, Value};

use crate::error::{CatalogError, CatalogResult};

/// On-disk structure version reported by the connected catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CatalogVersion {
    pub major: u16,
    pub minor: u16,
}

impl CatalogVersion {
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    pub fn at_least(&self, major: u16, minor: u16) -> bool {
        *self >= CatalogVersion::new(major, minor)
    }
}

impl fmt::Display for CatalogVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Wire-level access to a remote catalog, supplied by the embedding
/// application.
pub trait CatalogConnection: Send + Sync {
    /// Starts a read-only transaction.
    fn begin_read(&self) -> CatalogResult<()>;
    fn commit(&self) -> CatalogResult<()>;
    fn prepare(&self, sql: &str) -> CatalogResult<Box<dyn Statement>>;
    fn version(&self) -> CatalogVersion;
}

/// A prepared catalog statement. Rows come back in the order the catalog
/// produced them.
pub trait Statement: Send {
    fn execute(&mut self, params: &[Value]) -> CatalogResult<Vec<Row>>;
}

/// Shared handle to a cached prepared statement.
#[derive(Clone)]
pub struct StatementHandle {
    sql: Arc<str>,
    inner: Arc<Mutex<Box<dyn Statement>>>,
}

impl StatementHandle {
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn execute(&self, params: &[Value]) -> CatalogResult<Vec<Row>> {
        let mut statement = self
            .inner
            .lock()
            .map_err(|_| CatalogError::LockPoisoned("statement execute"))?;
        statement.execute(params)
    }

    /// Executes and returns the first row, failing with `NotFound` when the
    /// statement produced nothing.
    pub fn fetch_one(&self, params: &[Value], what: &str) -> CatalogResult<Row> {
        self.execute(params)?
            .into_iter()
            .next()
            .ok_or_else(|| CatalogError::NotFound(what.to_owned()))
    }
}

impl fmt::Debug for StatementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatementHandle")
            .field("sql", &self.sql)
            .finish()
    }
}

struct LoaderState {
    depth: usize,
    statements: HashMap<String, StatementHandle>,
}

/// Per-connection façade preparing and caching catalog statements.
pub struct MetadataLoader {
    connection: Arc<dyn CatalogConnection>,
    state: Mutex<LoaderState>,
}

impl MetadataLoader {
    pub fn new(connection: Arc<dyn CatalogConnection>) -> Self {
        Self {
            connection,
            state: Mutex::new(LoaderState {
                depth: 0,
                statements: HashMap::new(),
            }),
        }
    }

    fn state(&self, op: &'static str) -> CatalogResult<MutexGuard<'_, LoaderState>> {
        self.state
            .lock()
            .map_err(|_| CatalogError::LockPoisoned(op))
    }

    /// Returns a prepared statement for `sql`, preparing it on first use.
    /// Only valid while a [`ScopedTransaction`] is active.
    pub fn statement(&self, sql: &str) -> CatalogResult<StatementHandle> {
        let mut state = self.state("loader statement")?;
        if state.depth == 0 {
            return Err(CatalogError::LoaderUnavailable(
                "no metadata transaction is active".into(),
            ));
        }
        if let Some(handle) = state.statements.get(sql) {
            return Ok(handle.clone());
        }

        let statement = self.connection.prepare(sql)?;
        let handle = StatementHandle {
            sql: Arc::from(sql),
            inner: Arc::new(Mutex::new(statement)),
        };
        state.statements.insert(sql.to_owned(), handle.clone());
        log::trace!("prepared catalog statement: {sql}");
        Ok(handle)
    }

    pub fn version(&self) -> CatalogVersion {
        self.connection.version()
    }

    pub fn version_at_least(&self, major: u16, minor: u16) -> bool {
        self.connection.version().at_least(major, minor)
    }

    pub fn in_transaction(&self) -> bool {
        self.state
            .lock()
            .map(|state| state.depth > 0)
            .unwrap_or(false)
    }

    pub fn transaction_depth(&self) -> usize {
        self.state.lock().map(|state| state.depth).unwrap_or(0)
    }

    pub fn cached_statements(&self) -> usize {
        self.state
            .lock()
            .map(|state| state.statements.len())
            .unwrap_or(0)
    }

    fn enter(&self) -> CatalogResult<()> {
        let mut state = self.state("transaction begin")?;
        if state.depth == 0 {
            self.connection.begin_read().map_err(|err| match err {
                CatalogError::LoaderUnavailable(reason) => CatalogError::LoaderUnavailable(reason),
                other => CatalogError::LoaderUnavailable(other.to_string()),
            })?;
            log::trace!("metadata transaction started");
        }
        state.depth += 1;
        Ok(())
    }

    fn leave(&self) {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.depth = state.depth.saturating_sub(1);
        if state.depth > 0 {
            return;
        }
        state.statements.clear();
        drop(state);
        match self.connection.commit() {
            Ok(()) => log::trace!("metadata transaction committed"),
            Err(err) => log::warn!("metadata transaction commit failed: {err}"),
        }
    }
}

impl fmt::Debug for MetadataLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataLoader")
            .field("version", &self.version())
            .field("depth", &self.transaction_depth())
            .finish()
    }
}

/// Keeps a read transaction open on a loader for its lifetime.
///
/// Scopes nest: only the first begins the transaction and only the last
/// commits it.
#[must_use = "the transaction ends when the scope is dropped"]
pub struct ScopedTransaction<'a> {
    loader: &'a MetadataLoader,
}

impl<'a> ScopedTransaction<'a> {
    pub fn begin(loader: &'a MetadataLoader) -> CatalogResult<Self> {
        loader.enter()?;
        Ok(Self { loader })
    }

    pub fn loader(&self) -> &'a MetadataLoader {
        self.loader
    }
}

impl Drop for ScopedTransaction<'_> {
    fn drop(&mut self) {
        self.loader.leave();
    }
}
