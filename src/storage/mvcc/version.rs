use std::collections::BTreeSet;
use std::convert::TryInto;

use crate::storage::alloc::DbItemReference;
use crate::types::{Result, StoreError};

use super::txn::{Snapshot, TxnId};

const NONE_TXN: u64 = u64::MAX;

/// Length of one encoded [`VersionInfo`].
pub const VERSION_INFO_LEN: usize = 8 + 8 + DbItemReference::ENCODED_LEN;

/// One version of a value.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct VersionInfo {
    /// Transaction that created the version.
    pub created: TxnId,
    /// Transaction that expired it, if any.
    pub expired: Option<TxnId>,
    /// Blob holding the encoded value.
    pub body: DbItemReference,
}

impl VersionInfo {
    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.created.to_be_bytes());
        out.extend_from_slice(&self.expired.unwrap_or(NONE_TXN).to_be_bytes());
        out.extend_from_slice(&self.body.encode());
    }

    fn decode(src: &[u8]) -> Result<Self> {
        let created = u64::from_be_bytes(src[0..8].try_into().unwrap());
        let expired = u64::from_be_bytes(src[8..16].try_into().unwrap());
        Ok(Self {
            created,
            expired: (expired != NONE_TXN).then_some(expired),
            body: DbItemReference::decode(&src[16..VERSION_INFO_LEN])?,
        })
    }
}

/// Result of [`VersionedRecord::expire`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ExpireOutcome {
    /// `true` when a version was removed or expired.
    pub removed: bool,
    /// Body blob that is no longer referenced.
    pub freed_body: Option<DbItemReference>,
}

/// Commit state used when reclaiming versions nobody can see anymore.
#[derive(Clone, Debug, Default)]
pub struct VacuumHorizon {
    /// Transactions known to have rolled back.
    pub rolled_back: BTreeSet<TxnId>,
    /// Transactions still active or prepared.
    pub live: BTreeSet<TxnId>,
    /// Every id below this is settled for all live snapshots.
    pub oldest_xmin: TxnId,
}

impl VacuumHorizon {
    fn committed_for_everyone(&self, id: TxnId) -> bool {
        id < self.oldest_xmin && !self.live.contains(&id) && !self.rolled_back.contains(&id)
    }
}

/// Every version stored under one key, oldest first.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct VersionedRecord {
    /// Versions in creation order.
    pub versions: Vec<VersionInfo>,
}

impl VersionedRecord {
    /// Serialized form: `[count u32]` then fixed-size versions.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.versions.len() * VERSION_INFO_LEN);
        out.extend_from_slice(&(self.versions.len() as u32).to_be_bytes());
        for version in &self.versions {
            version.encode_into(&mut out);
        }
        out
    }

    /// Parses [`VersionedRecord::encode`] output.
    pub fn decode(src: &[u8]) -> Result<Self> {
        if src.len() < 4 {
            return Err(StoreError::Corruption("versioned record truncated"));
        }
        let count = u32::from_be_bytes(src[..4].try_into().unwrap()) as usize;
        let body = &src[4..];
        if body.len() != count * VERSION_INFO_LEN {
            return Err(StoreError::Corruption("versioned record length mismatch"));
        }
        let versions = body
            .chunks_exact(VERSION_INFO_LEN)
            .map(VersionInfo::decode)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { versions })
    }

    /// Position of the version visible to `snapshot`.
    pub fn visible_index(&self, snapshot: &Snapshot) -> Option<usize> {
        self.versions.iter().rposition(|v| snapshot.sees(v))
    }

    /// Version visible to `snapshot`.
    pub fn visible(&self, snapshot: &Snapshot) -> Option<&VersionInfo> {
        self.visible_index(snapshot).map(|at| &self.versions[at])
    }

    fn is_dead(version: &VersionInfo, snapshot: &Snapshot, rolled_back: &BTreeSet<TxnId>) -> bool {
        if rolled_back.contains(&version.created) {
            return true;
        }
        match version.expired {
            Some(expired) if !rolled_back.contains(&expired) => {
                snapshot.is_committed_or_own(version.created)
                    && snapshot.is_committed_or_own(expired)
            }
            _ => false,
        }
    }

    /// `true` when some version still blocks a fresh insert.
    pub fn has_live(&self, snapshot: &Snapshot, rolled_back: &BTreeSet<TxnId>) -> bool {
        self.versions
            .iter()
            .any(|v| !Self::is_dead(v, snapshot, rolled_back))
    }

    /// Writes `body` as the value seen by `snapshot`'s transaction.
    ///
    /// Returns the body blob the write replaced in place, which the caller frees.
    pub fn update(
        &mut self,
        snapshot: &Snapshot,
        rolled_back: &BTreeSet<TxnId>,
        body: DbItemReference,
    ) -> Result<Option<DbItemReference>> {
        let txn = snapshot.txn();
        let Some(at) = self.visible_index(snapshot) else {
            if self.has_live(snapshot, rolled_back) {
                return Err(StoreError::WriteConflict);
            }
            self.versions.push(VersionInfo {
                created: txn,
                expired: None,
                body,
            });
            return Ok(None);
        };
        let visible = &mut self.versions[at];
        if visible.created == txn {
            return Ok(Some(std::mem::replace(&mut visible.body, body)));
        }
        if let Some(expired) = visible.expired {
            if expired != txn && !rolled_back.contains(&expired) {
                return Err(StoreError::WriteConflict);
            }
        }
        visible.expired = Some(txn);
        self.versions.push(VersionInfo {
            created: txn,
            expired: None,
            body,
        });
        Ok(None)
    }

    /// Removes the value seen by `snapshot`'s transaction.
    pub fn expire(
        &mut self,
        snapshot: &Snapshot,
        rolled_back: &BTreeSet<TxnId>,
    ) -> Result<ExpireOutcome> {
        let txn = snapshot.txn();
        let Some(at) = self.visible_index(snapshot) else {
            if self.has_live(snapshot, rolled_back) {
                return Err(StoreError::WriteConflict);
            }
            return Ok(ExpireOutcome::default());
        };
        if self.versions[at].created == txn {
            let dropped = self.versions.remove(at);
            return Ok(ExpireOutcome {
                removed: true,
                freed_body: Some(dropped.body),
            });
        }
        let visible = &mut self.versions[at];
        if let Some(expired) = visible.expired {
            if expired != txn && !rolled_back.contains(&expired) {
                return Err(StoreError::WriteConflict);
            }
        }
        visible.expired = Some(txn);
        Ok(ExpireOutcome {
            removed: true,
            freed_body: None,
        })
    }

    /// Drops versions no transaction can see and clears void expirations.
    ///
    /// Returns the body blobs of dropped versions.
    pub fn vacuum(&mut self, horizon: &VacuumHorizon) -> Vec<DbItemReference> {
        let mut freed = Vec::new();
        self.versions.retain_mut(|v| {
            if horizon.rolled_back.contains(&v.created) {
                freed.push(v.body);
                return false;
            }
            if let Some(expired) = v.expired {
                if horizon.rolled_back.contains(&expired) {
                    v.expired = None;
                } else if horizon.committed_for_everyone(expired) {
                    freed.push(v.body);
                    return false;
                }
            }
            true
        });
        freed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PageId;
    use std::sync::Arc;

    fn body(n: u64) -> DbItemReference {
        DbItemReference::new(PageId(100 + n), 0)
    }

    fn snapshot(txn: TxnId, active: &[TxnId]) -> Snapshot {
        Snapshot::new(txn, active.iter().copied().collect(), Arc::new(BTreeSet::new()))
    }

    #[test]
    fn encoding_is_fixed_width() {
        let record = VersionedRecord {
            versions: vec![
                VersionInfo {
                    created: 1,
                    expired: Some(2),
                    body: body(1),
                },
                VersionInfo {
                    created: 2,
                    expired: None,
                    body: body(2),
                },
            ],
        };
        let bytes = record.encode();
        assert_eq!(bytes.len(), 4 + 2 * VERSION_INFO_LEN);
        assert_eq!(VersionedRecord::decode(&bytes).unwrap(), record);
        assert!(VersionedRecord::decode(&bytes[..10]).is_err());
    }

    #[test]
    fn own_version_is_replaced_in_place() {
        let none = BTreeSet::new();
        let snap = snapshot(5, &[]);
        let mut record = VersionedRecord::default();
        assert_eq!(record.update(&snap, &none, body(1)).unwrap(), None);
        assert_eq!(record.update(&snap, &none, body(2)).unwrap(), Some(body(1)));
        assert_eq!(record.versions.len(), 1);
        assert_eq!(record.visible(&snap).unwrap().body, body(2));
    }

    #[test]
    fn update_of_committed_version_appends() {
        let none = BTreeSet::new();
        let mut record = VersionedRecord::default();
        record.update(&snapshot(1, &[]), &none, body(1)).unwrap();
        let later = snapshot(3, &[]);
        assert_eq!(record.update(&later, &none, body(3)).unwrap(), None);
        assert_eq!(record.versions.len(), 2);
        assert_eq!(record.versions[0].expired, Some(3));
        assert_eq!(record.visible(&later).unwrap().body, body(3));
        // a concurrent transaction still sees the old value but may not overwrite it
        let concurrent = snapshot(4, &[3]);
        assert_eq!(record.visible(&concurrent).unwrap().body, body(1));
        assert!(matches!(
            record.update(&concurrent, &none, body(4)),
            Err(StoreError::WriteConflict)
        ));
    }

    #[test]
    fn uncommitted_insert_blocks_other_inserts() {
        let none = BTreeSet::new();
        let mut record = VersionedRecord::default();
        record.update(&snapshot(7, &[]), &none, body(7)).unwrap();
        let other = snapshot(8, &[7]);
        assert!(record.visible(&other).is_none());
        assert!(matches!(
            record.update(&other, &none, body(8)),
            Err(StoreError::WriteConflict)
        ));
        let rolled_back: BTreeSet<TxnId> = [7].into_iter().collect();
        assert_eq!(record.update(&other, &rolled_back, body(8)).unwrap(), None);
    }

    #[test]
    fn expire_drops_own_and_marks_foreign_versions() {
        let none = BTreeSet::new();
        let mut record = VersionedRecord::default();
        record.update(&snapshot(1, &[]), &none, body(1)).unwrap();
        let own = snapshot(2, &[]);
        let outcome = record.expire(&own, &none).unwrap();
        assert!(outcome.removed);
        assert_eq!(outcome.freed_body, None);
        assert_eq!(record.versions[0].expired, Some(2));
        assert!(record.visible(&own).is_none());
        assert_eq!(record.expire(&own, &none).unwrap(), ExpireOutcome::default());

        let mut fresh = VersionedRecord::default();
        let snap = snapshot(9, &[]);
        fresh.update(&snap, &none, body(9)).unwrap();
        let outcome = fresh.expire(&snap, &none).unwrap();
        assert_eq!(outcome.freed_body, Some(body(9)));
        assert!(fresh.versions.is_empty());
    }

    #[test]
    fn vacuum_reclaims_dead_versions() {
        let mut record = VersionedRecord {
            versions: vec![
                VersionInfo {
                    created: 1,
                    expired: Some(2),
                    body: body(1),
                },
                VersionInfo {
                    created: 2,
                    expired: Some(4),
                    body: body(2),
                },
                VersionInfo {
                    created: 3,
                    expired: None,
                    body: body(3),
                },
            ],
        };
        let horizon = VacuumHorizon {
            rolled_back: [3, 4].into_iter().collect(),
            live: BTreeSet::new(),
            oldest_xmin: 10,
        };
        let freed = record.vacuum(&horizon);
        assert_eq!(freed, vec![body(1), body(3)]);
        assert_eq!(
            record.versions,
            vec![VersionInfo {
                created: 2,
                expired: None,
                body: body(2),
            }]
        );
    }
}
