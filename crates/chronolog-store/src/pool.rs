//! Bounded connection pool with reconnect-on-failure.
//!
//! Slots are queued in a bounded crossbeam channel: acquiring blocks until a
//! slot frees, releasing happens on every exit path. A slot holds `None`
//! when its connection was discarded after a failed reconnect; the next
//! acquirer re-establishes it. Each scoped use runs inside one transaction;
//! `dry` mode always rolls back, giving callers a zero-side-effect
//! validation pass.

use crate::error::{Error, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use rusqlite::{Connection, Transaction};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Pool sizing and database location.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Database file path.
    pub path: PathBuf,
    /// Reconnect attempts before an acquisition fails.
    pub min_conns: usize,
    /// Total connections held by the pool.
    pub max_conns: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/chronolog.db"),
            min_conns: 2,
            max_conns: 8,
        }
    }
}

/// Bounded pool of database connections.
pub struct ConnectionPool {
    slots: Receiver<Option<Connection>>,
    returns: Sender<Option<Connection>>,
    config: PoolConfig,
}

impl ConnectionPool {
    /// Open the pool, eagerly establishing every connection.
    pub fn open(config: PoolConfig) -> Result<Self> {
        let (returns, slots) = bounded(config.max_conns);

        for _ in 0..config.max_conns {
            let conn = Self::establish(&config.path)?;
            returns
                .send(Some(conn))
                .expect("pool channel sized to max_conns");
        }

        debug!(
            path = %config.path.display(),
            connections = config.max_conns,
            "connection pool ready"
        );

        Ok(Self {
            slots,
            returns,
            config,
        })
    }

    fn establish(path: &Path) -> Result<Connection> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_millis(5_000))?;
        // journal_mode reports the resulting mode as a row
        conn.query_row("pragma journal_mode = WAL", [], |_row| Ok(()))?;
        conn.execute_batch("pragma synchronous = NORMAL; pragma foreign_keys = ON;")?;
        Ok(conn)
    }

    /// Scoped transactional access.
    ///
    /// Acquires a connection (reconnecting up to `min_conns` times if the
    /// health check fails; exhausting retries is fatal), runs `f` inside a
    /// transaction, commits on success unless `dry`, rolls back on any error
    /// before propagating it, and returns the slot unconditionally.
    pub fn with_conn<T, F>(&self, dry: bool, error_message: &str, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.acquire()?;
        let result = Self::run_transaction(&mut conn, dry, f);

        if let Err(err) = &result {
            if !error_message.is_empty() {
                warn!(error = %err, "{}", error_message);
            }
        }

        // Release the slot on all exit paths.
        let _ = self.returns.send(Some(conn));

        result
    }

    /// Read-only convenience: full validation, nothing durable.
    pub fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        self.with_conn(true, "", f)
    }

    fn acquire(&self) -> Result<Connection> {
        let mut slot = self
            .slots
            .recv()
            .expect("pool channel closed while pool alive");

        // Cap reconnect attempts at the configured minimum size, so a dead
        // database fails fast rather than spinning.
        let attempts = self.config.min_conns.max(1);
        let mut retries = attempts;

        loop {
            if let Some(conn) = slot {
                if Self::healthy(&conn) {
                    return Ok(conn);
                }
                // Discard the bad connection before retrying.
                drop(conn);
                slot = None;
            }

            if retries == 0 {
                // Return the empty slot so pool capacity is conserved; the
                // next acquirer starts a fresh retry budget.
                let _ = self.returns.send(None);
                return Err(Error::ConnectRetriesExhausted { attempts });
            }

            retries -= 1;
            warn!(
                path = %self.config.path.display(),
                remaining = retries,
                "database connection lost, reconnecting"
            );

            match Self::establish(&self.config.path) {
                Ok(fresh) => slot = Some(fresh),
                Err(err) => {
                    debug!(error = %err, "reconnect attempt failed");
                    slot = None;
                }
            }
        }
    }

    fn healthy(conn: &Connection) -> bool {
        conn.query_row("select 1", [], |row| row.get::<_, i64>(0))
            .is_ok()
    }

    fn run_transaction<T, F>(conn: &mut Connection, dry: bool, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let tx = conn.transaction()?;

        match f(&tx) {
            Ok(value) => {
                if dry {
                    tx.rollback()?;
                } else {
                    tx.commit()?;
                }
                Ok(value)
            }
            Err(err) => {
                let _ = tx.rollback();
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn pool_in(dir: &TempDir) -> ConnectionPool {
        ConnectionPool::open(PoolConfig {
            path: dir.path().join("test.db"),
            min_conns: 2,
            max_conns: 2,
        })
        .unwrap()
    }

    #[test]
    fn test_commit_persists() {
        let dir = TempDir::new().unwrap();
        let pool = pool_in(&dir);

        pool.with_conn(false, "", |tx| {
            tx.execute_batch("create table t (n integer)")?;
            tx.execute("insert into t values (1)", [])?;
            Ok(())
        })
        .unwrap();

        let count: i64 = pool
            .read(|tx| Ok(tx.query_row("select count(*) from t", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_dry_mode_rolls_back() {
        let dir = TempDir::new().unwrap();
        let pool = pool_in(&dir);

        pool.with_conn(false, "", |tx| {
            tx.execute_batch("create table t (n integer)")?;
            Ok(())
        })
        .unwrap();

        pool.with_conn(true, "", |tx| {
            tx.execute("insert into t values (1)", [])?;
            Ok(())
        })
        .unwrap();

        let count: i64 = pool
            .read(|tx| Ok(tx.query_row("select count(*) from t", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_error_rolls_back_and_releases_slot() {
        let dir = TempDir::new().unwrap();
        let pool = pool_in(&dir);

        pool.with_conn(false, "", |tx| {
            tx.execute_batch("create table t (n integer)")?;
            Ok(())
        })
        .unwrap();

        let result: Result<()> = pool.with_conn(false, "rolled back test changes", |tx| {
            tx.execute("insert into t values (1)", [])?;
            Err(Error::MissingEventId("nope".to_string()))
        });
        assert!(result.is_err());

        // Insert rolled back, and both slots still usable.
        for _ in 0..3 {
            let count: i64 = pool
                .read(|tx| Ok(tx.query_row("select count(*) from t", [], |r| r.get(0))?))
                .unwrap();
            assert_eq!(count, 0);
        }
    }
}
