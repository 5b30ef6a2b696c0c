use crate::engine::{Adcoin, ParticipantId, StaffId, TransactionId};
use crate::errors::{LedgerError, LedgerResult};
use crate::participant::{ParticipantKind, ParticipantRef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Earned,
    Spent,
    Transferred,
    Adjusted,
    Refunded,
}

impl TransactionType {
    pub const ALL: [TransactionType; 5] = [
        TransactionType::Earned,
        TransactionType::Spent,
        TransactionType::Transferred,
        TransactionType::Adjusted,
        TransactionType::Refunded,
    ];
}

impl Display for TransactionType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TransactionType::Earned => "earned",
            TransactionType::Spent => "spent",
            TransactionType::Transferred => "transferred",
            TransactionType::Adjusted => "adjusted",
            TransactionType::Refunded => "refunded",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for TransactionType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        TransactionType::ALL
            .into_iter()
            .find(|t| t.to_string() == name)
            .ok_or_else(|| LedgerError::validation(format!("unknown transaction type: {}", s)))
    }
}

/// Which ends of a transaction are participants; the other end is the system.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionDirection {
    SystemToParticipant(ParticipantRef),
    ParticipantToSystem(ParticipantRef),
    ParticipantToParticipant {
        sender: ParticipantRef,
        receiver: ParticipantRef,
    },
}

impl TransactionDirection {
    pub fn sender(&self) -> Option<ParticipantRef> {
        match *self {
            TransactionDirection::SystemToParticipant(_) => None,
            TransactionDirection::ParticipantToSystem(sender) => Some(sender),
            TransactionDirection::ParticipantToParticipant { sender, .. } => Some(sender),
        }
    }

    pub fn receiver(&self) -> Option<ParticipantRef> {
        match *self {
            TransactionDirection::SystemToParticipant(receiver) => Some(receiver),
            TransactionDirection::ParticipantToSystem(_) => None,
            TransactionDirection::ParticipantToParticipant { receiver, .. } => Some(receiver),
        }
    }

    pub fn involves(&self, id: ParticipantId) -> bool {
        self.sender().map(|p| p.id) == Some(id) || self.receiver().map(|p| p.id) == Some(id)
    }

    fn allowed_for(&self, tx_type: TransactionType) -> bool {
        use TransactionDirection::*;
        match tx_type {
            TransactionType::Earned | TransactionType::Refunded => {
                matches!(self, SystemToParticipant(_))
            }
            TransactionType::Spent => {
                matches!(self, ParticipantToSystem(p) if p.kind == ParticipantKind::Student)
            }
            TransactionType::Transferred => matches!(self, ParticipantToParticipant { .. }),
            TransactionType::Adjusted => {
                matches!(self, SystemToParticipant(_) | ParticipantToSystem(_))
            }
        }
    }
}

/// Immutable ledger record. Only the engine creates these.
#[derive(Clone, Debug, PartialEq)]
pub struct Transaction {
    pub id: TransactionId,
    pub tx_type: TransactionType,
    pub direction: TransactionDirection,
    pub amount: Adcoin,
    pub description: Option<String>,
    pub verified_by: StaffId,
    /// Set on `refunded` records: the `spent` record being reversed.
    pub refund_of: Option<TransactionId>,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    pub(crate) fn new(
        tx_type: TransactionType,
        direction: TransactionDirection,
        amount: Adcoin,
        description: Option<String>,
        verified_by: StaffId,
        refund_of: Option<TransactionId>,
    ) -> LedgerResult<Self> {
        if amount == 0 {
            return Err(LedgerError::validation("amount must be greater than zero"));
        }
        if !direction.allowed_for(tx_type) {
            return Err(LedgerError::validation(format!(
                "{:?} is not a valid shape for a {} transaction",
                direction, tx_type
            )));
        }
        if (tx_type == TransactionType::Refunded) != refund_of.is_some() {
            return Err(LedgerError::validation(
                "only refunded transactions reference another transaction",
            ));
        }
        Ok(Transaction {
            id: Uuid::new_v4(),
            tx_type,
            direction,
            amount,
            description: description.filter(|d| !d.trim().is_empty()),
            verified_by,
            refund_of,
            created_at: Utc::now(),
        })
    }

    pub fn sender(&self) -> Option<ParticipantRef> {
        self.direction.sender()
    }

    pub fn receiver(&self) -> Option<ParticipantRef> {
        self.direction.receiver()
    }

    pub fn to_row(&self) -> TransactionRow {
        TransactionRow {
            id: self.id,
            sender_id: self.sender().map(|p| p.id),
            sender_type: self.sender().map(|p| p.kind),
            receiver_id: self.receiver().map(|p| p.id),
            receiver_type: self.receiver().map(|p| p.kind),
            transaction_type: self.tx_type,
            amount: self.amount,
            description: self.description.clone(),
            verified_by: self.verified_by,
            refund_of: self.refund_of,
            created_at: self.created_at,
        }
    }
}

/// Flat encoding of a transaction: nullable sender/receiver columns.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransactionRow {
    pub id: TransactionId,
    pub sender_id: Option<ParticipantId>,
    pub sender_type: Option<ParticipantKind>,
    pub receiver_id: Option<ParticipantId>,
    pub receiver_type: Option<ParticipantKind>,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub amount: Adcoin,
    pub description: Option<String>,
    pub verified_by: StaffId,
    pub refund_of: Option<TransactionId>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod test {
    use super::*;

    fn student() -> ParticipantRef {
        ParticipantRef::student(Uuid::new_v4())
    }

    #[test]
    fn types_parse_by_name() {
        assert_eq!("Spent".parse::<TransactionType>().unwrap(), TransactionType::Spent);
        assert_eq!(" refunded".parse::<TransactionType>().unwrap(), TransactionType::Refunded);
        assert!("gifted".parse::<TransactionType>().is_err());
    }

    #[test]
    fn zero_amount_is_rejected() {
        let result = Transaction::new(
            TransactionType::Earned,
            TransactionDirection::SystemToParticipant(student()),
            0,
            None,
            Uuid::new_v4(),
            None,
        );
        assert!(matches!(result, Err(LedgerError::Validation(_))));
    }

    #[test]
    fn shape_must_match_type() {
        let transfer_shape = TransactionDirection::ParticipantToParticipant {
            sender: student(),
            receiver: student(),
        };
        assert!(Transaction::new(
            TransactionType::Earned,
            transfer_shape,
            5,
            None,
            Uuid::new_v4(),
            None
        )
        .is_err());
        let staff_spend = TransactionDirection::ParticipantToSystem(ParticipantRef::staff(Uuid::new_v4()));
        assert!(Transaction::new(
            TransactionType::Spent,
            staff_spend,
            5,
            None,
            Uuid::new_v4(),
            None
        )
        .is_err());
    }

    #[test]
    fn row_keeps_nullable_sender() {
        let receiver = student();
        let tx = Transaction::new(
            TransactionType::Earned,
            TransactionDirection::SystemToParticipant(receiver),
            50,
            Some("quiz bonus".to_string()),
            Uuid::new_v4(),
            None,
        )
        .unwrap();
        let row = tx.to_row();
        assert_eq!(row.sender_id, None);
        assert_eq!(row.receiver_id, Some(receiver.id));
        assert_eq!(row.description.as_deref(), Some("quiz bonus"));
        assert!(tx.direction.involves(receiver.id));
    }

    #[test]
    fn blank_description_is_dropped() {
        let tx = Transaction::new(
            TransactionType::Earned,
            TransactionDirection::SystemToParticipant(student()),
            1,
            Some("   ".to_string()),
            Uuid::new_v4(),
            None,
        )
        .unwrap();
        assert_eq!(tx.description, None);
    }
}
