//! Net-change compaction for one entry type.
//!
//! A [`ChangeCompactor`] folds every change to the same entry within a
//! window into a single change: the earliest pre-image and the latest
//! post-image. An entry created and removed inside the window has no net
//! effect and is dropped as soon as the removal arrives.
//!
//! Changes must be added in chronological order (see
//! [`LedgerChangeReader`](crate::LedgerChangeReader)). A compactor belongs to
//! the one loop that drains it.

use std::collections::HashMap;

use stellar_xdr::curr::LedgerEntryType;
use tracing::trace;

use crate::change::{sort_changes, Change};
use crate::identity::EntryIdentity;
use crate::{IngestError, Result};

/// Accumulates the net change per entry of one entry type.
#[derive(Debug)]
pub struct ChangeCompactor {
    entry_type: LedgerEntryType,
    changes: HashMap<EntryIdentity, Change>,
    cancelled: u64,
}

impl ChangeCompactor {
    pub fn new(entry_type: LedgerEntryType) -> Self {
        Self {
            entry_type,
            changes: HashMap::new(),
            cancelled: 0,
        }
    }

    pub fn entry_type(&self) -> LedgerEntryType {
        self.entry_type
    }

    /// Number of entries with a pending net change.
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Entries created and removed within the current window so far.
    pub fn cancelled(&self) -> u64 {
        self.cancelled
    }

    /// Merge a change into the window.
    ///
    /// The merged change keeps the cause of the latest change.
    ///
    /// # Errors
    ///
    /// [`IngestError::TypeMismatch`] if the change is for another entry type.
    pub fn add_change(&mut self, change: Change) -> Result<()> {
        if change.entry_type() != self.entry_type {
            return Err(IngestError::TypeMismatch {
                expected: self.entry_type,
                actual: change.entry_type(),
            });
        }

        match self.changes.remove(change.identity()) {
            None => {
                self.changes.insert(change.identity().clone(), change);
            }
            Some(existing) => match existing.absorb(change) {
                Some(net) => {
                    self.changes.insert(net.identity().clone(), net);
                }
                None => {
                    self.cancelled += 1;
                    trace!(entry_type = ?self.entry_type, "Entry created and removed within window");
                }
            },
        }
        Ok(())
    }

    /// Take every net change, in no particular order, and reset the window.
    pub fn drain(&mut self) -> Vec<Change> {
        self.cancelled = 0;
        self.changes.drain().map(|(_, change)| change).collect()
    }

    /// [`ChangeCompactor::drain`] followed by the deterministic sort.
    pub fn drain_sorted(&mut self) -> Vec<Change> {
        let mut changes = self.drain();
        sort_changes(&mut changes);
        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::{ChangeCause, ChangeReason, EntryDelta};
    use crate::test_utils::{account_entry, meta_v2, transaction, ttl_entry};
    use stellar_xdr::curr::{LedgerEntry, LedgerEntryData, TransactionResultResult, VecM};

    fn created(entry: LedgerEntry) -> Change {
        Change::new(EntryDelta::Created(entry), ChangeCause::Unattributed).unwrap()
    }

    fn updated(pre: LedgerEntry, post: LedgerEntry) -> Change {
        Change::new(
            EntryDelta::Updated {
                pre,
                post: Box::new(post),
            },
            ChangeCause::Unattributed,
        )
        .unwrap()
    }

    fn removed(pre: LedgerEntry) -> Change {
        Change::new(EntryDelta::Removed(pre), ChangeCause::Unattributed).unwrap()
    }

    #[test]
    fn test_create_then_update_nets_to_create() {
        let mut compactor = ChangeCompactor::new(LedgerEntryType::Ttl);
        compactor.add_change(created(ttl_entry(1, 10))).unwrap();
        compactor
            .add_change(updated(ttl_entry(1, 10), ttl_entry(1, 20)))
            .unwrap();

        let drained = compactor.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].pre(), None);
        assert_eq!(drained[0].post(), Some(&ttl_entry(1, 20)));
        assert!(compactor.is_empty());
    }

    #[test]
    fn test_create_then_remove_cancels() {
        let mut compactor = ChangeCompactor::new(LedgerEntryType::Ttl);
        compactor.add_change(created(ttl_entry(1, 10))).unwrap();
        assert_eq!(compactor.len(), 1);
        compactor.add_change(removed(ttl_entry(1, 10))).unwrap();

        // Dropped immediately, not at drain time.
        assert_eq!(compactor.len(), 0);
        assert_eq!(compactor.cancelled(), 1);
        assert!(compactor.drain().is_empty());
        assert_eq!(compactor.cancelled(), 0);
    }

    #[test]
    fn test_update_chain_keeps_earliest_pre() {
        let mut compactor = ChangeCompactor::new(LedgerEntryType::Account);
        compactor
            .add_change(updated(account_entry(1, 100), account_entry(1, 90)))
            .unwrap();
        compactor
            .add_change(updated(account_entry(1, 90), account_entry(1, 80)))
            .unwrap();
        compactor.add_change(removed(account_entry(1, 80))).unwrap();

        let drained = compactor.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].pre(), Some(&account_entry(1, 100)));
        assert_eq!(drained[0].post(), None);
        assert!(drained[0].deleted());
    }

    #[test]
    fn test_remove_then_recreate_is_update() {
        let mut compactor = ChangeCompactor::new(LedgerEntryType::Ttl);
        compactor.add_change(removed(ttl_entry(1, 10))).unwrap();
        compactor.add_change(created(ttl_entry(1, 30))).unwrap();

        let drained = compactor.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].pre(), Some(&ttl_entry(1, 10)));
        assert_eq!(drained[0].post(), Some(&ttl_entry(1, 30)));
    }

    #[test]
    fn test_type_mismatch() {
        let mut compactor = ChangeCompactor::new(LedgerEntryType::Account);
        let err = compactor.add_change(created(ttl_entry(1, 10))).unwrap_err();
        assert!(matches!(
            err,
            IngestError::TypeMismatch {
                expected: LedgerEntryType::Account,
                actual: LedgerEntryType::Ttl,
            }
        ));
        assert!(compactor.is_empty());
    }

    #[test]
    fn test_latest_cause_wins() {
        let tx = transaction(
            3,
            meta_v2(vec![], vec![], vec![]),
            TransactionResultResult::TxSuccess(VecM::default()),
            20,
        );
        let mut compactor = ChangeCompactor::new(LedgerEntryType::Ttl);
        compactor.add_change(created(ttl_entry(1, 10))).unwrap();
        compactor
            .add_change(
                updated(ttl_entry(1, 10), ttl_entry(1, 11)).with_cause(ChangeCause::Operation {
                    transaction: tx,
                    index: 2,
                }),
            )
            .unwrap();

        let drained = compactor.drain();
        assert_eq!(drained[0].reason(), ChangeReason::Operation);
        assert_eq!(drained[0].operation_index(), Some(2));
    }

    #[test]
    fn test_drain_sorted_and_reuse() {
        let mut compactor = ChangeCompactor::new(LedgerEntryType::Ttl);
        for byte in [9u8, 3, 7, 1] {
            compactor.add_change(created(ttl_entry(byte, 1))).unwrap();
        }
        let drained = compactor.drain_sorted();
        let bytes: Vec<u8> = drained
            .iter()
            .map(|c| match &c.entry().data {
                LedgerEntryData::Ttl(ttl) => ttl.key_hash.0[0],
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(bytes, vec![1, 3, 7, 9]);

        compactor.add_change(created(ttl_entry(5, 1))).unwrap();
        assert_eq!(compactor.drain().len(), 1);
    }
}
