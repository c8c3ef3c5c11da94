//! Encrypted storage engine.
//!
//! An ordered map of byte keys to byte values, persisted as a single
//! page-encrypted container file. All access goes through transactions:
//! [`Transaction`] for writes (one at a time) and [`ReadTransaction`] for
//! snapshot reads that never block.

mod container;
mod engine;
mod scan;
mod snapshot;
mod transaction;

pub use container::{
    read_header, ContainerHeader, DEFAULT_PAGE_SIZE, FORMAT_VERSION, MAX_PAGE_SIZE, MIN_PAGE_SIZE,
};
pub use engine::{EngineOptions, StorageEngine};
pub use scan::{Scan, ScanDirection};
pub use snapshot::Snapshot;
pub use transaction::{
    KeyRead, ReadTransaction, RetryPolicy, Transaction, TransactionCoordinator,
    DEFAULT_LOCK_TIMEOUT,
};

pub(crate) use container::validate_page_size;
pub(crate) use scan::prefix_upper_bound;
