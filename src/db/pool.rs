//! Bounded pool of SQLite handles.
//!
//! SQLite serializes writers, so opening more handles than the workload can
//! use only adds lock contention. The pool caps the number of handles that
//! may be checked out at once. `acquire` fails fast when the cap is reached;
//! `acquire_timeout` queues behind releases instead.

use std::collections::HashMap;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_rusqlite::Connection;

use crate::error::{AppError, Result};

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

struct PoolState {
    next_id: u64,
    /// Checked-out handles. `None` marks a slot reserved while its
    /// connection is still opening.
    outstanding: HashMap<u64, Option<Connection>>,
    closed: bool,
}

struct PoolInner {
    db_path: PathBuf,
    max_connections: usize,
    state: Mutex<PoolState>,
    released: Notify,
}

#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    pub fn new(db_path: impl Into<PathBuf>, max_connections: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                db_path: db_path.into(),
                max_connections,
                state: Mutex::new(PoolState {
                    next_id: 0,
                    outstanding: HashMap::new(),
                    closed: false,
                }),
                released: Notify::new(),
            }),
        }
    }

    pub fn max_connections(&self) -> usize {
        self.inner.max_connections
    }

    /// Number of handles currently checked out (including ones still opening).
    pub fn outstanding(&self) -> usize {
        self.lock().outstanding.len()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        // The state is plain bookkeeping; a panic elsewhere cannot leave it torn.
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn reserve(&self) -> Result<u64> {
        let mut state = self.lock();
        if state.closed {
            return Err(AppError::PoolClosed);
        }
        if state.outstanding.len() >= self.inner.max_connections {
            return Err(AppError::PoolExhausted {
                max: self.inner.max_connections,
            });
        }
        let id = state.next_id;
        state.next_id += 1;
        state.outstanding.insert(id, None);
        Ok(id)
    }

    fn forget(&self, id: u64) {
        let removed = self.lock().outstanding.remove(&id);
        if removed.is_some() {
            self.inner.released.notify_one();
        }
    }

    /// Checks out a handle, failing with `PoolExhausted` if every slot is taken.
    pub async fn acquire(&self) -> Result<PooledConnection> {
        let id = self.reserve()?;

        let conn = match open_connection(&self.inner.db_path).await {
            Ok(conn) => conn,
            Err(e) => {
                self.forget(id);
                return Err(e);
            }
        };

        let attached = {
            let mut state = self.lock();
            match state.outstanding.get_mut(&id) {
                Some(slot) => {
                    *slot = Some(conn.clone());
                    true
                }
                None => false,
            }
        };

        if !attached {
            // close_all ran while this connection was opening
            let _ = conn.close().await;
            return Err(AppError::PoolClosed);
        }

        tracing::trace!(id, "acquired pooled connection");
        Ok(PooledConnection {
            id,
            conn,
            pool: self.clone(),
        })
    }

    /// Checks out a handle, waiting up to `timeout` for another holder to
    /// release one.
    pub async fn acquire_timeout(&self, timeout: Duration) -> Result<PooledConnection> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.acquire().await {
                Err(AppError::PoolExhausted { .. }) => {}
                other => return other,
            }

            if Instant::now() >= deadline {
                return Err(AppError::PoolTimeout {
                    max: self.inner.max_connections,
                    waited: timeout,
                });
            }
            let _ = tokio::time::timeout_at(deadline, self.inner.released.notified()).await;
        }
    }

    /// Returns a handle to the pool. A handle this pool does not track is
    /// left alone; dropping it hands it back to whichever pool owns it.
    pub fn release(&self, conn: PooledConnection) {
        if !Arc::ptr_eq(&self.inner, &conn.pool.inner) {
            tracing::debug!(id = conn.id, "release of a handle owned by another pool");
        }
        drop(conn);
    }

    /// Closes every outstanding handle and marks the pool closed. Handles
    /// still held by callers fail on their next call; later `acquire` calls
    /// return `PoolClosed`.
    pub async fn close_all(&self) {
        let connections: Vec<Connection> = {
            let mut state = self.lock();
            state.closed = true;
            state
                .outstanding
                .drain()
                .filter_map(|(_, conn)| conn)
                .collect()
        };

        let count = connections.len();
        for conn in connections {
            if let Err(e) = conn.close().await {
                tracing::warn!("Failed to close pooled connection: {}", e);
            }
        }
        self.inner.released.notify_waiters();
        tracing::debug!(count, "connection pool closed");
    }
}

async fn open_connection(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path).await?;
    conn.call(|conn| {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        Ok(())
    })
    .await?;
    Ok(conn)
}

/// A checked-out handle. Dropping it releases the slot on every exit path.
pub struct PooledConnection {
    id: u64,
    conn: Connection,
    pool: ConnectionPool,
}

impl PooledConnection {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.pool.forget(self.id);
    }
}
