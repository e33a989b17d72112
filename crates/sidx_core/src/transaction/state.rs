//! Transaction state.

use crate::error::{CoreError, CoreResult};
use crate::record::{RecordId, RecordWrite};
use crate::transaction::IndexBuffer;
use crate::types::{SequenceNumber, TransactionId};
use std::collections::{BTreeMap, HashMap};

/// State of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is active and can perform operations.
    Active,
    /// Transaction has been committed.
    Committed,
    /// Transaction has been rolled back, explicitly or by a failed commit.
    RolledBack,
}

/// An active transaction.
///
/// Record writes and the index operations they imply are buffered here and
/// become visible to other readers only at commit.
#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    /// Commit sequence visible when the transaction began.
    snapshot_seq: SequenceNumber,
    state: TransactionState,
    /// Pending record writes, last write per record wins.
    writes: BTreeMap<RecordId, RecordWrite>,
    /// Record versions observed before the first write to each record.
    observed: HashMap<RecordId, Option<SequenceNumber>>,
    buffer: IndexBuffer,
    /// Index registry generation the buffer was staged against.
    generation: u64,
}

impl Transaction {
    pub(crate) fn new(id: TransactionId, snapshot_seq: SequenceNumber, generation: u64) -> Self {
        Self {
            id,
            snapshot_seq,
            state: TransactionState::Active,
            writes: BTreeMap::new(),
            observed: HashMap::new(),
            buffer: IndexBuffer::new(),
            generation,
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns the snapshot sequence number.
    #[must_use]
    pub fn snapshot_seq(&self) -> SequenceNumber {
        self.snapshot_seq
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Checks if the transaction is still active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Returns the pending write for a record.
    #[must_use]
    pub fn pending_write(&self, rid: RecordId) -> Option<&RecordWrite> {
        self.writes.get(&rid)
    }

    /// Returns all pending record writes in id order.
    pub fn pending_writes(&self) -> impl Iterator<Item = (&RecordId, &RecordWrite)> {
        self.writes.iter()
    }

    /// Returns the number of records written.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.len()
    }

    /// Returns the staged index operations.
    #[must_use]
    pub fn index_buffer(&self) -> &IndexBuffer {
        &self.buffer
    }

    pub(crate) fn buffer_mut(&mut self) -> &mut IndexBuffer {
        &mut self.buffer
    }

    pub(crate) fn replace_buffer(&mut self, buffer: IndexBuffer, generation: u64) {
        self.buffer = buffer;
        self.generation = generation;
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Buffers a record write.
    ///
    /// `observed` is the committed version of the record at the time of the
    /// first write; later writes to the same record keep the first one.
    pub(crate) fn record_write(
        &mut self,
        rid: RecordId,
        write: RecordWrite,
        observed: Option<SequenceNumber>,
    ) -> CoreResult<()> {
        self.ensure_active()?;
        self.observed.entry(rid).or_insert(observed);
        self.writes.insert(rid, write);
        Ok(())
    }

    /// Returns the versions observed per written record.
    pub(crate) fn observed(&self) -> impl Iterator<Item = (&RecordId, &Option<SequenceNumber>)> {
        self.observed.iter()
    }

    pub(crate) fn mark_committed(&mut self) {
        self.state = TransactionState::Committed;
    }

    pub(crate) fn mark_rolled_back(&mut self) {
        self.state = TransactionState::RolledBack;
        self.buffer.clear();
        self.writes.clear();
    }

    /// Fails unless the transaction is active.
    pub fn ensure_active(&self) -> CoreResult<()> {
        match self.state {
            TransactionState::Active => Ok(()),
            TransactionState::Committed => {
                Err(CoreError::transaction_state("transaction already committed"))
            }
            TransactionState::RolledBack => {
                Err(CoreError::transaction_state("transaction already rolled back"))
            }
        }
    }
}
