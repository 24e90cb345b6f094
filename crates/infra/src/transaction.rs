//! Transaction boundary used by the merge executors.

use crate::error::StoreError;

/// A store that can run a unit of work atomically.
///
/// The closure's writes are committed when it returns `Ok` and discarded when
/// it returns `Err`; the error is passed through unchanged. Transactions are
/// not nestable.
pub trait Transactional: Send + Sync {
    fn with_transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: From<StoreError>;
}
