use crate::auth::VerifiedOperator;
use crate::config::LedgerConfig;
use crate::errors::{LedgerError, LedgerResult};
use crate::participant::{BalanceHolder, ParticipantKind, ParticipantRef};
use crate::resolver::resolve_record;
use crate::store::{LedgerStore, UnitOfWork};
use crate::transactions::{Transaction, TransactionDirection, TransactionType};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{info, warn};
use uuid::Uuid;

pub type ParticipantId = Uuid;
pub type StaffId = Uuid;
pub type TransactionId = Uuid;
pub type BranchId = Uuid;
pub type Adcoin = u64;
pub type SignedAdcoin = i64;

/// The only writer of balances and transaction records.
///
/// Each operation runs as one unit of work on the store: the record and the
/// balance changes are committed together or not at all.
#[derive(Clone, Debug)]
pub struct LedgerEngine {
    store: LedgerStore,
    config: LedgerConfig,
}

impl LedgerEngine {
    pub fn new(store: LedgerStore, config: LedgerConfig) -> Self {
        LedgerEngine { store, config }
    }

    pub fn store(&self) -> &LedgerStore {
        &self.store
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub async fn transfer(
        &self,
        sender: ParticipantRef,
        receiver: ParticipantRef,
        amount: Adcoin,
        description: Option<String>,
        operator: &VerifiedOperator,
    ) -> LedgerResult<Transaction> {
        let result = async {
            if sender.id == receiver.id {
                return Err(LedgerError::validation("sender and receiver must be different"));
            }
            self.check_amount(amount)?;
            let mut uow = self.begin(operator).await?;
            uow.participant_mut(sender)?.ensure_active()?;
            uow.participant_mut(receiver)?.ensure_active()?;
            uow.participant_mut(sender)?.try_debit(amount)?;
            uow.participant_mut(receiver)?.credit(amount)?;
            let tx = Transaction::new(
                TransactionType::Transferred,
                TransactionDirection::ParticipantToParticipant { sender, receiver },
                amount,
                description,
                operator.staff_id(),
                None,
            )?;
            uow.commit(tx)
        }
        .await;
        finish("transfer", result)
    }

    /// System-sourced credit.
    pub async fn award(
        &self,
        receiver: ParticipantRef,
        amount: Adcoin,
        description: Option<String>,
        operator: &VerifiedOperator,
    ) -> LedgerResult<Transaction> {
        let result = async {
            self.check_amount(amount)?;
            let mut uow = self.begin(operator).await?;
            let record = uow.participant_mut(receiver)?;
            record.ensure_active()?;
            record.credit(amount)?;
            let tx = Transaction::new(
                TransactionType::Earned,
                TransactionDirection::SystemToParticipant(receiver),
                amount,
                description,
                operator.staff_id(),
                None,
            )?;
            uow.commit(tx)
        }
        .await;
        finish("award", result)
    }

    /// A student redeems Adcoin. Produces the `spent` records refunds reverse.
    pub async fn spend(
        &self,
        student: ParticipantRef,
        amount: Adcoin,
        description: Option<String>,
        operator: &VerifiedOperator,
    ) -> LedgerResult<Transaction> {
        let result = async {
            if student.kind != ParticipantKind::Student {
                return Err(LedgerError::validation("only students can spend adcoin"));
            }
            self.check_amount(amount)?;
            let mut uow = self.begin(operator).await?;
            let record = uow.participant_mut(student)?;
            record.ensure_active()?;
            record.try_debit(amount)?;
            let tx = Transaction::new(
                TransactionType::Spent,
                TransactionDirection::ParticipantToSystem(student),
                amount,
                description,
                operator.staff_id(),
                None,
            )?;
            uow.commit(tx)
        }
        .await;
        finish("spend", result)
    }

    /// Signed correction. Debits floor the balance at zero; the record keeps
    /// the requested magnitude.
    pub async fn adjust(
        &self,
        participant: ParticipantRef,
        amount: SignedAdcoin,
        description: Option<String>,
        operator: &VerifiedOperator,
    ) -> LedgerResult<Transaction> {
        let result = async {
            let magnitude = amount.unsigned_abs();
            self.check_amount(magnitude)?;
            let mut uow = self.begin(operator).await?;
            let record = uow.participant_mut(participant)?;
            record.ensure_active()?;
            let direction = if amount > 0 {
                record.credit(magnitude)?;
                TransactionDirection::SystemToParticipant(participant)
            } else {
                record.debit_floored(magnitude);
                TransactionDirection::ParticipantToSystem(participant)
            };
            let tx = Transaction::new(
                TransactionType::Adjusted,
                direction,
                magnitude,
                description,
                operator.staff_id(),
                None,
            )?;
            uow.commit(tx)
        }
        .await;
        finish("adjust", result)
    }

    /// Reverses a student's `spent` record, at most once.
    pub async fn refund(
        &self,
        original_id: TransactionId,
        operator: &VerifiedOperator,
    ) -> LedgerResult<Transaction> {
        let result = async {
            let mut uow = self.begin(operator).await?;
            let original = uow
                .state()
                .transaction(&original_id)
                .cloned()
                .ok_or(LedgerError::TransactionNotFound(original_id))?;
            if original.tx_type != TransactionType::Spent {
                return Err(LedgerError::invalid_state(format!(
                    "transaction {} is {}; only spent transactions can be refunded",
                    original_id, original.tx_type
                )));
            }
            let student = match original.direction {
                TransactionDirection::ParticipantToSystem(p) if p.kind == ParticipantKind::Student => p,
                _ => {
                    return Err(LedgerError::invalid_state(format!(
                        "transaction {} has no student sender",
                        original_id
                    )))
                }
            };
            if let Some(refund) = uow.state().refund_of(&original_id) {
                return Err(LedgerError::invalid_state(format!(
                    "transaction {} was already refunded by {}",
                    original_id, refund
                )));
            }
            let record = uow.participant_mut(student)?;
            record.ensure_active()?;
            record.credit(original.amount)?;
            let tx = Transaction::new(
                TransactionType::Refunded,
                TransactionDirection::SystemToParticipant(student),
                original.amount,
                Some(format!("refund of {}", original_id)),
                operator.staff_id(),
                Some(original_id),
            )?;
            uow.commit(tx)
        }
        .await;
        finish("refund", result)
    }

    /// Replays the log per student from their opening balance and reports
    /// every stored balance that disagrees with the replay.
    pub async fn audit(&self) -> LedgerResult<Vec<AuditDiscrepancy>> {
        let state = self.store.read().await?;
        let mut replayed: HashMap<ParticipantId, i128> = state
            .students()
            .map(|s| (s.id, s.opening_balance as i128))
            .collect();
        for tx in state.transactions() {
            let amount = tx.amount as i128;
            if let Some(balance) = tx.sender().and_then(|p| replayed.get_mut(&p.id)) {
                *balance -= amount;
                if tx.tx_type == TransactionType::Adjusted && *balance < 0 {
                    *balance = 0;
                }
            }
            if let Some(balance) = tx.receiver().and_then(|p| replayed.get_mut(&p.id)) {
                *balance += amount;
            }
        }
        let discrepancies: Vec<AuditDiscrepancy> = state
            .students()
            .filter_map(|s| {
                let replayed = replayed.get(&s.id).copied().unwrap_or_default();
                (replayed != s.balance as i128).then(|| AuditDiscrepancy {
                    student: s.id,
                    stored: s.balance,
                    replayed: i64::try_from(replayed)
                        .unwrap_or(if replayed < 0 { i64::MIN } else { i64::MAX }),
                })
            })
            .collect();
        if !discrepancies.is_empty() {
            warn!(count = discrepancies.len(), "ledger audit found mismatched balances");
        }
        Ok(discrepancies)
    }

    fn check_amount(&self, amount: Adcoin) -> LedgerResult<()> {
        if amount == 0 {
            return Err(LedgerError::validation("amount must be greater than zero"));
        }
        if amount > self.config.max_amount {
            return Err(LedgerError::validation(format!(
                "amount {} exceeds the maximum of {}",
                amount, self.config.max_amount
            )));
        }
        Ok(())
    }

    /// Opens a unit of work once the operator is known to be an active staff member.
    async fn begin(&self, operator: &VerifiedOperator) -> LedgerResult<UnitOfWork> {
        let uow = self.store.begin().await?;
        let active = matches!(
            resolve_record(uow.state(), ParticipantRef::staff(operator.staff_id())),
            Ok(staff) if staff.is_active()
        );
        if !active {
            return Err(LedgerError::Unauthorized(format!(
                "operator {} is not an active staff member",
                operator.staff_id()
            )));
        }
        Ok(uow)
    }
}

fn finish(op: &'static str, result: LedgerResult<Transaction>) -> LedgerResult<Transaction> {
    match &result {
        Ok(tx) => info!(
            op,
            tx_id = %tx.id,
            tx_type = %tx.tx_type,
            amount = tx.amount,
            "adcoin transaction committed"
        ),
        Err(e) => warn!(op, error = %e, "adcoin operation rejected"),
    }
    result
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AuditDiscrepancy {
    pub student: ParticipantId,
    pub stored: Adcoin,
    /// Clamped to the `i64` range.
    pub replayed: i64,
}
