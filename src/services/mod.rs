pub mod access;
pub mod bookings;
pub mod expiry;
pub mod notify;
pub mod payments;
pub mod slots;

use rusqlite::{Transaction, TransactionBehavior};

use crate::db::{self, Db};
use crate::errors::EngineError;

/// Runs `f` inside `BEGIN IMMEDIATE`, which takes the write lock before the
/// first read. Commits on `Ok`; any `Err` drops the transaction and rolls
/// every write back.
pub(crate) fn atomically<T>(
    db: &Db,
    f: impl FnOnce(&Transaction<'_>) -> Result<T, EngineError>,
) -> Result<T, EngineError> {
    let mut conn = db::lock(db);
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let value = f(&tx)?;
    tx.commit()?;
    Ok(value)
}
