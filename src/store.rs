use crate::engine::{ParticipantId, TransactionId};
use crate::errors::{LedgerError, LedgerResult};
use crate::participant::{ParticipantRecord, ParticipantRef, StaffUser, Student};
use crate::resolver::resolve_record;
use crate::transactions::Transaction;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::debug;

/// Participant tables and the transaction log, guarded together.
#[derive(Debug, Default)]
pub struct LedgerState {
    /// Participants in order of registration
    participants: Vec<ParticipantRecord>,
    participant_index: HashMap<ParticipantId, usize>,
    /// Append-only, in commit order
    transactions: Vec<Transaction>,
    transaction_index: HashMap<TransactionId, usize>,
    /// spent transaction -> the refund that reversed it
    refunds: HashMap<TransactionId, TransactionId>,
}

impl LedgerState {
    pub fn participants(&self) -> &[ParticipantRecord] {
        &self.participants
    }

    pub fn participant(&self, id: &ParticipantId) -> Option<&ParticipantRecord> {
        self.participant_index.get(id).map(|&i| &self.participants[i])
    }

    pub fn students(&self) -> impl Iterator<Item = &Student> {
        self.participants.iter().filter_map(ParticipantRecord::as_student)
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn transaction(&self, id: &TransactionId) -> Option<&Transaction> {
        self.transaction_index.get(id).map(|&i| &self.transactions[i])
    }

    pub fn refund_of(&self, spent_id: &TransactionId) -> Option<TransactionId> {
        self.refunds.get(spent_id).copied()
    }

    fn register(&mut self, record: ParticipantRecord) -> LedgerResult<()> {
        let id = record.id();
        if self.participant_index.contains_key(&id) {
            return Err(LedgerError::validation(format!(
                "participant {} already exists",
                id
            )));
        }
        self.participant_index.insert(id, self.participants.len());
        self.participants.push(record);
        Ok(())
    }
}

/// Shared handle to the ledger's storage.
///
/// Writers take the lock for a whole unit of work; waiting longer than the
/// configured timeout fails fast with a storage error.
#[derive(Clone, Debug)]
pub struct LedgerStore {
    state: Arc<RwLock<LedgerState>>,
    timeout: Duration,
}

impl LedgerStore {
    pub fn new(timeout: Duration) -> Self {
        LedgerStore {
            state: Arc::new(Default::default()),
            timeout,
        }
    }

    pub async fn insert_student(&self, student: Student) -> LedgerResult<()> {
        self.write().await?.register(ParticipantRecord::Student(student))
    }

    pub async fn insert_staff(&self, staff: StaffUser) -> LedgerResult<()> {
        self.write().await?.register(ParticipantRecord::Staff(staff))
    }

    /// Soft-deletes or restores a participant. Balances are left untouched.
    pub async fn set_active(&self, participant: ParticipantRef, active: bool) -> LedgerResult<()> {
        let mut state = self.write().await?;
        let index = match state.participant_index.get(&participant.id) {
            Some(&i) if state.participants[i].kind() == participant.kind => i,
            _ => {
                return Err(LedgerError::ParticipantNotFound {
                    id: participant.id,
                    kind: participant.kind,
                })
            }
        };
        state.participants[index].set_active(active);
        Ok(())
    }

    pub async fn read(&self) -> LedgerResult<OwnedRwLockReadGuard<LedgerState>> {
        tokio::time::timeout(self.timeout, self.state.clone().read_owned())
            .await
            .map_err(|_| LedgerError::Storage("timed out waiting for ledger read lock".to_string()))
    }

    async fn write(&self) -> LedgerResult<OwnedRwLockWriteGuard<LedgerState>> {
        tokio::time::timeout(self.timeout, self.state.clone().write_owned())
            .await
            .map_err(|_| LedgerError::Storage("timed out waiting for ledger write lock".to_string()))
    }

    /// Opens an exclusive unit of work. Nothing it stages is visible until commit.
    pub async fn begin(&self) -> LedgerResult<UnitOfWork> {
        Ok(UnitOfWork {
            state: self.write().await?,
            staged: HashMap::new(),
        })
    }
}

/// Staged balance changes plus one transaction insert, applied together.
///
/// Dropping a unit of work without committing discards everything staged.
pub struct UnitOfWork {
    state: OwnedRwLockWriteGuard<LedgerState>,
    staged: HashMap<ParticipantId, ParticipantRecord>,
}

impl UnitOfWork {
    pub fn state(&self) -> &LedgerState {
        &self.state
    }

    /// Returns a staged copy of the participant for mutation.
    pub fn participant_mut(&mut self, participant: ParticipantRef) -> LedgerResult<&mut ParticipantRecord> {
        match self.staged.entry(participant.id) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let record = resolve_record(&self.state, participant)?.clone();
                Ok(entry.insert(record))
            }
        }
    }

    pub fn commit(mut self, transaction: Transaction) -> LedgerResult<Transaction> {
        let state = &mut *self.state;
        if state.transaction_index.contains_key(&transaction.id) {
            return Err(LedgerError::Storage(format!(
                "transaction {} already exists",
                transaction.id
            )));
        }
        let mut writes = Vec::with_capacity(self.staged.len());
        for (id, record) in self.staged.drain() {
            match state.participant_index.get(&id) {
                Some(&i) => writes.push((i, record)),
                None => {
                    return Err(LedgerError::Storage(format!(
                        "participant {} vanished during commit",
                        id
                    )))
                }
            }
        }
        for (i, record) in writes {
            state.participants[i] = record;
        }
        if let Some(original) = transaction.refund_of {
            state.refunds.insert(original, transaction.id);
        }
        state
            .transaction_index
            .insert(transaction.id, state.transactions.len());
        state.transactions.push(transaction.clone());
        debug!(tx_id = %transaction.id, "transaction committed");
        Ok(transaction)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::participant::BalanceHolder;
    use crate::transactions::{TransactionDirection, TransactionType};
    use uuid::Uuid;

    fn store() -> LedgerStore {
        LedgerStore::new(Duration::from_millis(100))
    }

    #[tokio::test]
    async fn duplicate_participants_are_rejected() {
        let store = store();
        let id = Uuid::new_v4();
        store.insert_student(Student::new(id, "Ana", Uuid::new_v4(), 0)).await.unwrap();
        assert!(store.insert_staff(StaffUser::new(id, "Ana")).await.is_err());
    }

    #[tokio::test]
    async fn dropped_unit_of_work_changes_nothing() {
        let store = store();
        let id = Uuid::new_v4();
        store.insert_student(Student::new(id, "Ana", Uuid::new_v4(), 10)).await.unwrap();
        {
            let mut uow = store.begin().await.unwrap();
            uow.participant_mut(ParticipantRef::student(id)).unwrap().credit(5).unwrap();
        }
        let state = store.read().await.unwrap();
        assert_eq!(state.participant(&id).unwrap().balance(), 10);
        assert!(state.transactions().is_empty());
    }

    #[tokio::test]
    async fn commit_applies_balance_and_record_together() {
        let store = store();
        let id = Uuid::new_v4();
        store.insert_student(Student::new(id, "Ana", Uuid::new_v4(), 10)).await.unwrap();
        let mut uow = store.begin().await.unwrap();
        uow.participant_mut(ParticipantRef::student(id)).unwrap().credit(5).unwrap();
        let tx = Transaction::new(
            TransactionType::Earned,
            TransactionDirection::SystemToParticipant(ParticipantRef::student(id)),
            5,
            None,
            Uuid::new_v4(),
            None,
        )
        .unwrap();
        uow.commit(tx.clone()).unwrap();
        let state = store.read().await.unwrap();
        assert_eq!(state.participant(&id).unwrap().balance(), 15);
        assert_eq!(state.transaction(&tx.id), Some(&tx));
    }

    #[tokio::test]
    async fn held_lock_fails_fast() {
        let store = store();
        let _held = store.begin().await.unwrap();
        let err = store.begin().await.err().unwrap();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn deactivating_checks_kind() {
        let store = store();
        let id = Uuid::new_v4();
        store.insert_student(Student::new(id, "Ana", Uuid::new_v4(), 0)).await.unwrap();
        assert!(store.set_active(ParticipantRef::staff(id), false).await.is_err());
        store.set_active(ParticipantRef::student(id), false).await.unwrap();
        assert!(!store.read().await.unwrap().participant(&id).unwrap().is_active());
    }
}
