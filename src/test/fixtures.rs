use crate::auth::{CredentialVerifier, StaffDirectory, VerifiedOperator};
use crate::config::LedgerConfig;
use crate::engine::{Adcoin, BranchId, LedgerEngine};
use crate::participant::{BalanceHolder, ParticipantRef, StaffUser, Student};
use crate::store::LedgerStore;
use std::sync::Arc;
use uuid::Uuid;

pub const OPERATOR_PASSWORD: &str = "correct horse";

/// A ledger seeded with one verified operator and one branch.
pub struct Fixture {
    pub engine: Arc<LedgerEngine>,
    pub directory: Arc<StaffDirectory>,
    pub operator: VerifiedOperator,
    pub branch: BranchId,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_config(LedgerConfig::default()).await
    }

    pub async fn with_config(config: LedgerConfig) -> Self {
        let store = LedgerStore::new(config.store_timeout());
        let engine = Arc::new(LedgerEngine::new(store, config));
        let directory = Arc::new(StaffDirectory::new());
        let operator_id = Uuid::new_v4();
        engine
            .store()
            .insert_staff(StaffUser::new(operator_id, "Front Desk"))
            .await
            .unwrap();
        directory.set_password(operator_id, OPERATOR_PASSWORD).await;
        let operator = directory.verify(operator_id, OPERATOR_PASSWORD).await.unwrap();
        Fixture {
            engine,
            directory,
            operator,
            branch: Uuid::new_v4(),
        }
    }

    pub async fn student(&self, name: &str, balance: Adcoin) -> ParticipantRef {
        self.student_in(self.branch, name, balance).await
    }

    pub async fn student_in(&self, branch: BranchId, name: &str, balance: Adcoin) -> ParticipantRef {
        let id = Uuid::new_v4();
        self.engine
            .store()
            .insert_student(Student::new(id, name, branch, balance))
            .await
            .unwrap();
        ParticipantRef::student(id)
    }

    pub async fn staff(&self, name: &str) -> ParticipantRef {
        let id = Uuid::new_v4();
        self.engine
            .store()
            .insert_staff(StaffUser::new(id, name))
            .await
            .unwrap();
        ParticipantRef::staff(id)
    }

    pub async fn balance(&self, participant: ParticipantRef) -> Adcoin {
        let state = self.engine.store().read().await.unwrap();
        state.participant(&participant.id).unwrap().balance()
    }

    pub async fn transaction_count(&self) -> usize {
        self.engine.store().read().await.unwrap().transactions().len()
    }
}
