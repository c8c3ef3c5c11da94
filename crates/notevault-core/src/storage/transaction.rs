//! Transactions and the coordinator that hands them out.

use std::ops::Bound;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::engine::{StorageEngine, WriteTicket};
use super::scan::{Scan, ScanDirection};
use super::snapshot::Snapshot;
use crate::error::Result;

/// Default bounded wait for the write lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// How `begin_with_retry` reacts to lock contention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Added to the sleep after every failed attempt.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(50),
        }
    }
}

/// Hands out write and read transactions against one engine.
#[derive(Debug, Clone)]
pub struct TransactionCoordinator {
    engine: Arc<StorageEngine>,
    lock_timeout: Duration,
    retry: RetryPolicy,
}

impl TransactionCoordinator {
    pub fn new(engine: Arc<StorageEngine>) -> Self {
        Self {
            engine,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn engine(&self) -> &Arc<StorageEngine> {
        &self.engine
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    /// Start a write transaction, waiting at most the lock timeout.
    ///
    /// Called on a thread that already holds the write transaction, this
    /// returns a nested handle onto it.
    pub fn begin(&self) -> Result<Transaction> {
        let ticket = self.engine.begin_write(self.lock_timeout)?;
        if !ticket.nested {
            tracing::trace!(generation = ticket.generation, "Began write transaction");
        }
        Ok(Transaction {
            engine: Arc::clone(&self.engine),
            ticket,
            finished: false,
        })
    }

    /// Like [`begin`](Self::begin), retrying lock timeouts with linear backoff.
    pub fn begin_with_retry(&self) -> Result<Transaction> {
        let attempts = self.retry.attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.begin() {
                Err(err) if err.is_retryable() && attempt < attempts => {
                    let delay = self.retry.backoff * attempt;
                    tracing::warn!(
                        attempt,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Write lock busy, retrying"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Start a read-only transaction over the current committed snapshot.
    pub fn begin_read(&self) -> Result<ReadTransaction> {
        Ok(ReadTransaction {
            snapshot: self.engine.snapshot()?,
        })
    }

    /// Run `f` in a write transaction: commit on `Ok`, roll back on `Err`.
    pub fn run<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction) -> Result<T>,
    {
        let mut tx = self.begin_with_retry()?;
        match f(&mut tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                tx.rollback();
                Err(err)
            }
        }
    }
}

/// Exclusive write transaction.
///
/// Reads see the transaction's own pending writes. Dropping an unfinished
/// transaction rolls it back.
#[derive(Debug)]
pub struct Transaction {
    engine: Arc<StorageEngine>,
    ticket: WriteTicket,
    finished: bool,
}

impl Transaction {
    /// Whether this handle joined an outer transaction.
    pub fn is_nested(&self) -> bool {
        self.ticket.nested
    }

    pub fn read(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.engine.read_in(self.ticket.generation, key)
    }

    pub fn write(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Result<()> {
        self.engine
            .write_in(self.ticket.generation, key.into(), value.into())
    }

    /// Delete `key`; returns whether it existed.
    pub fn delete(&mut self, key: &[u8]) -> Result<bool> {
        self.engine.delete_in(self.ticket.generation, key)
    }

    /// Scan all keys matching `predicate`, in key order.
    pub fn scan<F>(&self, predicate: F) -> Result<Scan>
    where
        F: FnMut(&[u8]) -> bool + Send + 'static,
    {
        Ok(Scan::new(
            self.view()?,
            Bound::Unbounded,
            Bound::Unbounded,
            ScanDirection::Forward,
        )
        .filter_keys(predicate))
    }

    pub fn scan_prefix(&self, prefix: &[u8], direction: ScanDirection) -> Result<Scan> {
        Ok(Scan::prefix(self.view()?, prefix, direction))
    }

    pub fn scan_range(
        &self,
        lower: Bound<Vec<u8>>,
        upper: Bound<Vec<u8>>,
        direction: ScanDirection,
    ) -> Result<Scan> {
        Ok(Scan::new(self.view()?, lower, upper, direction))
    }

    /// Snapshot of committed state plus this transaction's pending writes.
    pub fn view(&self) -> Result<Arc<Snapshot>> {
        self.engine.view_in(self.ticket.generation)
    }

    /// Commit. For a nested handle this only closes the nested scope.
    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        self.engine.commit(self.ticket)
    }

    /// Discard pending writes. For a nested handle, the outer transaction
    /// becomes rollback-only.
    pub fn rollback(mut self) {
        self.finished = true;
        self.release();
    }

    fn release(&self) {
        if let Err(err) = self.engine.rollback(self.ticket) {
            tracing::error!(error = %err, "Rollback failed");
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finished {
            tracing::debug!(
                generation = self.ticket.generation,
                nested = self.ticket.nested,
                "Transaction dropped without commit; rolling back"
            );
            self.release();
        }
    }
}

/// Read-only view of one committed snapshot.
///
/// Never blocks writers and keeps its snapshot for as long as it lives.
#[derive(Debug, Clone)]
pub struct ReadTransaction {
    snapshot: Arc<Snapshot>,
}

impl ReadTransaction {
    pub fn read(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.snapshot.get(key).cloned())
    }

    pub fn scan<F>(&self, predicate: F) -> Result<Scan>
    where
        F: FnMut(&[u8]) -> bool + Send + 'static,
    {
        Ok(Scan::new(
            Arc::clone(&self.snapshot),
            Bound::Unbounded,
            Bound::Unbounded,
            ScanDirection::Forward,
        )
        .filter_keys(predicate))
    }

    pub fn scan_prefix(&self, prefix: &[u8], direction: ScanDirection) -> Result<Scan> {
        Ok(Scan::prefix(Arc::clone(&self.snapshot), prefix, direction))
    }

    pub fn scan_range(
        &self,
        lower: Bound<Vec<u8>>,
        upper: Bound<Vec<u8>>,
        direction: ScanDirection,
    ) -> Result<Scan> {
        Ok(Scan::new(Arc::clone(&self.snapshot), lower, upper, direction))
    }

    pub fn view(&self) -> Result<Arc<Snapshot>> {
        Ok(Arc::clone(&self.snapshot))
    }
}

/// Read access shared by write and read transactions.
///
/// Query code that only needs to look things up takes `&impl KeyRead` so it
/// works inside a caller's write transaction or over a read snapshot.
pub trait KeyRead {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;
    fn prefix(&self, prefix: &[u8], direction: ScanDirection) -> Result<Scan>;
    fn range(
        &self,
        lower: Bound<Vec<u8>>,
        upper: Bound<Vec<u8>>,
        direction: ScanDirection,
    ) -> Result<Scan>;
    fn snapshot(&self) -> Result<Arc<Snapshot>>;
}

impl KeyRead for Transaction {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.read(key)
    }

    fn prefix(&self, prefix: &[u8], direction: ScanDirection) -> Result<Scan> {
        self.scan_prefix(prefix, direction)
    }

    fn range(
        &self,
        lower: Bound<Vec<u8>>,
        upper: Bound<Vec<u8>>,
        direction: ScanDirection,
    ) -> Result<Scan> {
        self.scan_range(lower, upper, direction)
    }

    fn snapshot(&self) -> Result<Arc<Snapshot>> {
        self.view()
    }
}

impl KeyRead for ReadTransaction {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.read(key)
    }

    fn prefix(&self, prefix: &[u8], direction: ScanDirection) -> Result<Scan> {
        self.scan_prefix(prefix, direction)
    }

    fn range(
        &self,
        lower: Bound<Vec<u8>>,
        upper: Bound<Vec<u8>>,
        direction: ScanDirection,
    ) -> Result<Scan> {
        self.scan_range(lower, upper, direction)
    }

    fn snapshot(&self) -> Result<Arc<Snapshot>> {
        self.view()
    }
}
