//! `DuckDB` connection pool management.
//!
//! Every pooled connection is cloned from a single root database handle, so a
//! file-backed and an in-memory store behave identically: all connections see
//! the same catalog and DuckDB's MVCC arbitrates concurrent writers.

use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use ::duckdb::Connection;

/// Access mode for database connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Read-only access.
    ReadOnly,
    /// Read-write access.
    ReadWrite,
}

struct PoolState {
    read_only: Vec<Connection>,
    read_write: Vec<Connection>,
}

struct PoolInner {
    db_path: Option<PathBuf>,
    max_pool_size: usize,
    root: Mutex<Connection>,
    state: Mutex<PoolState>,
}

/// A connection pool manager for `DuckDB` connections.
#[derive(Clone)]
pub struct DuckDbConnectionManager {
    inner: Arc<PoolInner>,
}

impl DuckDbConnectionManager {
    /// Open the database and create a pool around it.
    ///
    /// `None` opens a private in-memory database that lives as long as the pool.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or configured.
    pub fn open(path: Option<PathBuf>, max_pool_size: usize) -> Result<Self, ::duckdb::Error> {
        let root = match path.as_deref() {
            Some(path) => Connection::open(path)?,
            None => Connection::open_in_memory()?,
        };
        configure_connection(&root, AccessMode::ReadWrite)?;

        Ok(Self {
            inner: Arc::new(PoolInner {
                db_path: path,
                max_pool_size: max_pool_size.max(1),
                root: Mutex::new(root),
                state: Mutex::new(PoolState {
                    read_only: Vec::new(),
                    read_write: Vec::new(),
                }),
            }),
        })
    }

    /// Acquire a connection from the pool, cloning a new one from the root
    /// handle when the pool is empty.
    ///
    /// # Errors
    /// Returns an error if a new connection cannot be created or configured.
    ///
    /// # Panics
    /// Panics if the pool mutex is poisoned.
    pub fn acquire(&self, mode: AccessMode) -> Result<PooledConnection, ::duckdb::Error> {
        let mut state = self
            .inner
            .state
            .lock()
            .expect("duckdb connection pool mutex poisoned");
        let connection = match mode {
            AccessMode::ReadOnly => state.read_only.pop(),
            AccessMode::ReadWrite => state.read_write.pop(),
        };
        drop(state);

        let connection = match connection {
            Some(connection) => connection,
            None => self.clone_root(mode)?,
        };

        Ok(PooledConnection {
            mode,
            pool: Arc::clone(&self.inner),
            connection: Some(connection),
        })
    }

    /// Path of the database file, `None` for in-memory stores.
    #[must_use]
    pub fn db_path(&self) -> Option<&Path> {
        self.inner.db_path.as_deref()
    }

    fn clone_root(&self, mode: AccessMode) -> Result<Connection, ::duckdb::Error> {
        let root = self
            .inner
            .root
            .lock()
            .expect("duckdb root connection mutex poisoned");
        let connection = root.try_clone()?;
        drop(root);
        configure_connection(&connection, mode)?;
        Ok(connection)
    }
}

/// A pooled connection that returns to the pool when dropped.
pub struct PooledConnection {
    mode: AccessMode,
    pool: Arc<PoolInner>,
    connection: Option<Connection>,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        self.connection
            .as_ref()
            .expect("pooled connection unexpectedly missing")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.connection
            .as_mut()
            .expect("pooled connection unexpectedly missing")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };

        let mut state = match self.pool.state.lock() {
            Ok(state) => state,
            Err(_) => return,
        };
        let slot = match self.mode {
            AccessMode::ReadOnly => &mut state.read_only,
            AccessMode::ReadWrite => &mut state.read_write,
        };
        if slot.len() < self.pool.max_pool_size {
            slot.push(connection);
        }
    }
}

fn configure_connection(connection: &Connection, mode: AccessMode) -> Result<(), ::duckdb::Error> {
    connection.execute_batch("PRAGMA disable_progress_bar;")?;
    if mode == AccessMode::ReadOnly {
        // access_mode is fixed once the database is open; query code never
        // writes through read-only handles regardless.
        let _ = connection.execute_batch("SET access_mode = 'READ_ONLY';");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connections_share_one_in_memory_catalog() {
        let manager = DuckDbConnectionManager::open(None, 2).expect("open in-memory pool");

        let writer = manager.acquire(AccessMode::ReadWrite).expect("writer");
        writer
            .execute_batch("CREATE TABLE t (v INTEGER); INSERT INTO t VALUES (7);")
            .expect("create table");
        drop(writer);

        let reader = manager.acquire(AccessMode::ReadOnly).expect("reader");
        let value: i64 = reader
            .query_row("SELECT v FROM t", [], |row| row.get(0))
            .expect("select");
        assert_eq!(value, 7);
        assert!(manager.db_path().is_none());
    }

    #[test]
    fn released_connections_are_reused() {
        let manager = DuckDbConnectionManager::open(None, 1).expect("open in-memory pool");
        drop(manager.acquire(AccessMode::ReadWrite).expect("first"));

        let state = manager.inner.state.lock().expect("state");
        assert_eq!(state.read_write.len(), 1);
    }
}
