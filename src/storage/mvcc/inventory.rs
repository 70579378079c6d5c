use std::collections::{BTreeMap, BTreeSet};
use std::convert::TryInto;
use std::sync::Arc;

use tracing::{debug, error};

use crate::types::{Result, StoreError};

use super::txn::{Snapshot, Transaction, TransactionState, TxnId};
use super::version::VacuumHorizon;

const INVENTORY_MAGIC: [u8; 4] = *b"TINV";
const INVENTORY_VERSION: u16 = 1;
const INVENTORY_HEADER_LEN: usize = 4 + 2 + 8 + 4;

/// First id handed out by a fresh inventory.
pub const FIRST_TXN_ID: TxnId = 1;

#[derive(Clone, Copy, Debug)]
struct LiveTxn {
    state: TransactionState,
    xmin: TxnId,
}

/// Summary of the inventory for diagnostics.
#[derive(Clone, Debug, Default, serde::Serialize)]
pub struct InventoryStats {
    /// Next id to be issued.
    pub next_id: TxnId,
    /// Active or prepared transactions.
    pub live: usize,
    /// Rolled-back ids still remembered.
    pub rolled_back: usize,
}

/// Issues transaction ids and tracks which ones are live or rolled back.
///
/// Committed transactions are not tracked: an id below `next_id` that is neither live nor
/// rolled back is committed.
#[derive(Clone, Debug)]
pub struct TransactionInventory {
    next_id: TxnId,
    limit: TxnId,
    live: BTreeMap<TxnId, LiveTxn>,
    rolled_back: Arc<BTreeSet<TxnId>>,
}

impl TransactionInventory {
    /// Fresh inventory issuing ids up to and including `limit`.
    pub fn new(limit: TxnId) -> Self {
        Self {
            next_id: FIRST_TXN_ID,
            limit,
            live: BTreeMap::new(),
            rolled_back: Arc::new(BTreeSet::new()),
        }
    }

    /// Starts a transaction with a snapshot of the current commit state.
    pub fn begin(&mut self) -> Result<Transaction> {
        let id = self.next_id;
        if id > self.limit {
            error!(limit = self.limit, "transaction ids exhausted");
            return Err(StoreError::TransactionIdsExhausted);
        }
        self.next_id += 1;
        let active: BTreeSet<TxnId> = self.live.keys().copied().collect();
        let snapshot = Snapshot::new(id, active, Arc::clone(&self.rolled_back));
        self.live.insert(
            id,
            LiveTxn {
                state: TransactionState::Active,
                xmin: snapshot.xmin(),
            },
        );
        debug!(txn = id, "transaction began");
        Ok(Transaction::new(id, Arc::new(snapshot)))
    }

    /// Current state of `id`.
    pub fn state(&self, id: TxnId) -> TransactionState {
        if let Some(live) = self.live.get(&id) {
            live.state
        } else if self.rolled_back.contains(&id) || id >= self.next_id {
            TransactionState::RolledBack
        } else {
            TransactionState::Committed
        }
    }

    /// Fails unless `id` accepts writes.
    pub fn require_active(&self, id: TxnId) -> Result<()> {
        match self.live.get(&id) {
            Some(live) if live.state == TransactionState::Active => Ok(()),
            _ => Err(StoreError::TransactionState("transaction is not active")),
        }
    }

    /// Fails unless `id` is active or prepared.
    pub fn require_live(&self, id: TxnId) -> Result<()> {
        if self.live.contains_key(&id) {
            Ok(())
        } else {
            Err(StoreError::TransactionState("transaction already finished"))
        }
    }

    /// Active to Prepared.
    pub fn prepare(&mut self, id: TxnId) -> Result<()> {
        let live = self
            .live
            .get_mut(&id)
            .ok_or(StoreError::TransactionState("transaction already finished"))?;
        if live.state != TransactionState::Active {
            return Err(StoreError::TransactionState("transaction is not active"));
        }
        live.state = TransactionState::Prepared;
        Ok(())
    }

    /// Prepared to Committed.
    pub fn commit(&mut self, id: TxnId) -> Result<()> {
        match self.live.get(&id) {
            Some(live) if live.state == TransactionState::Prepared => {
                self.live.remove(&id);
                debug!(txn = id, "transaction committed");
                Ok(())
            }
            Some(_) => Err(StoreError::TransactionState("transaction is not prepared")),
            None => Err(StoreError::TransactionState("transaction already finished")),
        }
    }

    /// Active or Prepared to RolledBack.
    pub fn rollback(&mut self, id: TxnId) -> Result<()> {
        if self.live.remove(&id).is_none() {
            return Err(StoreError::TransactionState("transaction already finished"));
        }
        Arc::make_mut(&mut self.rolled_back).insert(id);
        debug!(txn = id, "transaction rolled back");
        Ok(())
    }

    /// Rolled-back ids as currently known.
    pub fn rolled_back(&self) -> &BTreeSet<TxnId> {
        &self.rolled_back
    }

    /// `true` when some transaction is active or prepared.
    pub fn has_live(&self) -> bool {
        !self.live.is_empty()
    }

    /// Commit state vacuum may rely on.
    pub fn vacuum_horizon(&self) -> VacuumHorizon {
        VacuumHorizon {
            rolled_back: BTreeSet::clone(&self.rolled_back),
            live: self.live.keys().copied().collect(),
            oldest_xmin: self
                .live
                .values()
                .map(|live| live.xmin)
                .min()
                .unwrap_or(self.next_id),
        }
    }

    /// Forgets rolled-back ids whose versions have all been reclaimed.
    pub fn forget_rolled_back(&mut self, reclaimed: &BTreeSet<TxnId>) {
        if reclaimed.is_empty() {
            return;
        }
        Arc::make_mut(&mut self.rolled_back).retain(|id| !reclaimed.contains(id));
    }

    /// Counters for diagnostics.
    pub fn stats(&self) -> InventoryStats {
        InventoryStats {
            next_id: self.next_id,
            live: self.live.len(),
            rolled_back: self.rolled_back.len(),
        }
    }

    /// Serialized form. Live transactions are written as rolled back.
    pub fn encode(&self) -> Vec<u8> {
        let ids: BTreeSet<TxnId> = self
            .rolled_back
            .iter()
            .chain(self.live.keys())
            .copied()
            .collect();
        let mut out = Vec::with_capacity(INVENTORY_HEADER_LEN + ids.len() * 8);
        out.extend_from_slice(&INVENTORY_MAGIC);
        out.extend_from_slice(&INVENTORY_VERSION.to_be_bytes());
        out.extend_from_slice(&self.next_id.to_be_bytes());
        out.extend_from_slice(&(ids.len() as u32).to_be_bytes());
        for id in ids {
            out.extend_from_slice(&id.to_be_bytes());
        }
        out
    }

    /// Restores an inventory. Transactions that were live when it was written are rolled back.
    pub fn decode(src: &[u8], limit: TxnId) -> Result<Self> {
        if src.len() < INVENTORY_HEADER_LEN || src[..4] != INVENTORY_MAGIC {
            return Err(StoreError::Corruption("invalid transaction inventory"));
        }
        let version = u16::from_be_bytes(src[4..6].try_into().unwrap());
        if version != INVENTORY_VERSION {
            return Err(StoreError::Corruption("unsupported transaction inventory version"));
        }
        let next_id = u64::from_be_bytes(src[6..14].try_into().unwrap());
        let count = u32::from_be_bytes(src[14..18].try_into().unwrap()) as usize;
        let body = &src[INVENTORY_HEADER_LEN..];
        if body.len() != count * 8 {
            return Err(StoreError::Corruption("transaction inventory length mismatch"));
        }
        let rolled_back: BTreeSet<TxnId> = body
            .chunks_exact(8)
            .map(|chunk| u64::from_be_bytes(chunk.try_into().unwrap()))
            .collect();
        if rolled_back.iter().any(|&id| id >= next_id) {
            return Err(StoreError::Corruption("rolled-back id beyond issued range"));
        }
        Ok(Self {
            next_id,
            limit,
            live: BTreeMap::new(),
            rolled_back: Arc::new(rolled_back),
        })
    }
}
