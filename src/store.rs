//! In-flight transaction records, keyed by queue id.
//!
//! The store is owned by the driver loop and consumed by a single writer;
//! it holds every transaction currently being assembled plus the set of ids
//! already written out during this store lifetime, so re-delivered terminal
//! lines stay idempotent.

use crate::extract::LineEvent;
use std::collections::{HashMap, HashSet};

/// One in-flight or completed delivery transaction.
///
/// Fields start empty and fill monotonically as lines arrive; a later line
/// only overwrites a field when it carries a value for that field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionRecord {
    pub transaction_id: String,
    pub sender_address: String,
    pub recipient_address: String,
    pub correlation_tag: String,
    pub status: String,
    pub initiated_at: String,
    pub completed_at: String,
}

impl TransactionRecord {
    fn new(transaction_id: &str) -> Self {
        Self {
            transaction_id: transaction_id.to_string(),
            ..Default::default()
        }
    }

    /// Merge one extracted fragment into this record.
    pub fn apply(&mut self, event: &LineEvent) {
        match event {
            LineEvent::Origin { initiated_at } => {
                self.initiated_at = initiated_at.clone();
            }
            LineEvent::Tag {
                tag,
                sender,
                recipient,
            } => {
                self.correlation_tag = tag.clone();
                self.sender_address = sender.clone();
                self.recipient_address = recipient.clone();
            }
            LineEvent::Status {
                status,
                completed_at,
            } => {
                self.status = status.clone();
                self.completed_at = completed_at.clone();
            }
            LineEvent::Removal => {}
            LineEvent::Denial => {
                self.status = "denied".to_string();
            }
        }
    }
}

/// Mapping from transaction id to its in-progress record.
#[derive(Debug, Default)]
pub struct CorrelationStore {
    entries: HashMap<String, TransactionRecord>,
    completed: HashSet<String>,
}

impl CorrelationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the record for `transaction_id`, creating and registering an
    /// empty one on first sighting.
    pub fn upsert(&mut self, transaction_id: &str) -> &mut TransactionRecord {
        self.entries
            .entry(transaction_id.to_string())
            .or_insert_with(|| TransactionRecord::new(transaction_id))
    }

    /// Remove a record after terminal processing, remembering its id so a
    /// re-delivered terminal line for it is a no-op.
    pub fn remove(&mut self, transaction_id: &str) -> Option<TransactionRecord> {
        let record = self.entries.remove(transaction_id);
        if record.is_some() {
            self.completed.insert(transaction_id.to_string());
        }
        record
    }

    /// Whether this id was already removed via terminal processing during
    /// the current store lifetime.
    pub fn is_completed(&self, transaction_id: &str) -> bool {
        self.completed.contains(transaction_id)
    }

    /// Drop every in-flight record without emitting, along with the
    /// completed-id set. Invoked by the driver at the end of each poll
    /// cycle; any transaction that never reached a terminal line within
    /// the cycle is lost here.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.completed.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
