//! Multi-version concurrency control.
//!
//! Every logical key maps to a [`VersionedRecord`]: an ordered list of [`VersionInfo`] entries,
//! each naming the transaction that created it and the one that expired it. A [`Snapshot`] taken
//! when a transaction begins decides which of those transactions count as committed, and so which
//! version the transaction reads. Ids come from the [`TransactionInventory`], which is persisted
//! with the store and rolls back anything left in flight when it is reloaded.

mod inventory;
mod txn;
mod version;

pub use inventory::{InventoryStats, TransactionInventory, FIRST_TXN_ID};
pub use txn::{Snapshot, Transaction, TransactionState, TxnId};
pub use version::{ExpireOutcome, VacuumHorizon, VersionInfo, VersionedRecord, VERSION_INFO_LEN};
