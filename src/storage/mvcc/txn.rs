use std::collections::BTreeSet;
use std::sync::Arc;

use super::version::VersionInfo;

/// Transaction identifier. Issued in increasing order and never reused.
pub type TxnId = u64;

/// Lifecycle state of a transaction.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Serialize)]
pub enum TransactionState {
    /// Accepting reads and writes.
    Active,
    /// Writes are durable; waiting for commit or rollback.
    Prepared,
    /// Writes are visible to transactions that begin afterwards.
    Committed,
    /// Writes are discarded.
    RolledBack,
}

/// Immutable view of which transactions count as committed for one transaction.
#[derive(Clone, Debug)]
pub struct Snapshot {
    txn: TxnId,
    upper: TxnId,
    active: BTreeSet<TxnId>,
    rolled_back: Arc<BTreeSet<TxnId>>,
}

impl Snapshot {
    pub(crate) fn new(
        txn: TxnId,
        active: BTreeSet<TxnId>,
        rolled_back: Arc<BTreeSet<TxnId>>,
    ) -> Self {
        Self {
            txn,
            upper: txn,
            active,
            rolled_back,
        }
    }

    /// Transaction the snapshot belongs to.
    pub fn txn(&self) -> TxnId {
        self.txn
    }

    /// Ids at or above this bound began after the snapshot.
    pub fn upper(&self) -> TxnId {
        self.upper
    }

    /// `true` when `id` had committed before the snapshot was taken.
    pub fn is_committed(&self, id: TxnId) -> bool {
        id < self.upper && !self.active.contains(&id) && !self.rolled_back.contains(&id)
    }

    /// `true` when `id` is committed in this snapshot or is the owning transaction.
    pub(crate) fn is_committed_or_own(&self, id: TxnId) -> bool {
        id == self.txn || self.is_committed(id)
    }

    /// Oldest transaction whose commit state this snapshot depends on.
    pub fn xmin(&self) -> TxnId {
        self.active.iter().next().copied().unwrap_or(self.upper)
    }

    /// Visibility rule for one version.
    pub fn sees(&self, version: &VersionInfo) -> bool {
        if version.created == self.txn {
            return version.expired.is_none();
        }
        if !self.is_committed(version.created) {
            return false;
        }
        match version.expired {
            None => true,
            Some(expired) => expired != self.txn && !self.is_committed(expired),
        }
    }
}

/// Handle passed to every versioned call.
///
/// The handle carries the transaction id and its snapshot; lifecycle changes go through the
/// storage that issued it.
#[derive(Debug)]
pub struct Transaction {
    id: TxnId,
    snapshot: Arc<Snapshot>,
}

impl Transaction {
    pub(crate) fn new(id: TxnId, snapshot: Arc<Snapshot>) -> Self {
        Self { id, snapshot }
    }

    /// Transaction id.
    pub fn id(&self) -> TxnId {
        self.id
    }

    /// Snapshot taken when the transaction began.
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }
}
