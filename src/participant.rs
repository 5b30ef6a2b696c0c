use crate::engine::{Adcoin, BranchId, ParticipantId, StaffId};
use crate::errors::{LedgerError, LedgerResult};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantKind {
    Student,
    Staff,
}

impl Display for ParticipantKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ParticipantKind::Student => write!(f, "student"),
            ParticipantKind::Staff => write!(f, "staff"),
        }
    }
}

impl FromStr for ParticipantKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "student" => Ok(ParticipantKind::Student),
            "staff" | "user" => Ok(ParticipantKind::Staff),
            other => Err(LedgerError::validation(format!(
                "unknown participant type: {}",
                other
            ))),
        }
    }
}

/// An id together with the table it must be found in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParticipantRef {
    pub id: ParticipantId,
    pub kind: ParticipantKind,
}

impl ParticipantRef {
    pub fn student(id: ParticipantId) -> Self {
        ParticipantRef {
            id,
            kind: ParticipantKind::Student,
        }
    }

    pub fn staff(id: StaffId) -> Self {
        ParticipantRef {
            id,
            kind: ParticipantKind::Staff,
        }
    }
}

/// Balance mutation capability shared by every participant.
///
/// Staff carry no tracked balance: every method succeeds and reports 0.
pub trait BalanceHolder {
    fn balance(&self) -> Adcoin;
    fn try_debit(&mut self, amount: Adcoin) -> LedgerResult<Adcoin>;
    /// Fails without touching the balance if it would overflow.
    fn credit(&mut self, amount: Adcoin) -> LedgerResult<Adcoin>;
    /// Debits down to a floor of zero instead of failing.
    fn debit_floored(&mut self, amount: Adcoin) -> Adcoin;
}

#[derive(Clone, Debug, PartialEq)]
pub struct Student {
    pub id: ParticipantId,
    pub name: String,
    pub branch: BranchId,
    pub balance: Adcoin,
    /// Balance the student was registered with, before any ledger activity.
    pub opening_balance: Adcoin,
    pub photo_url: Option<String>,
    pub active: bool,
}

impl Student {
    pub fn new(id: ParticipantId, name: impl Into<String>, branch: BranchId, balance: Adcoin) -> Self {
        Student {
            id,
            name: name.into(),
            branch,
            balance,
            opening_balance: balance,
            photo_url: None,
            active: true,
        }
    }

    pub fn with_photo(mut self, photo_url: impl Into<String>) -> Self {
        self.photo_url = Some(photo_url.into());
        self
    }
}

impl BalanceHolder for Student {
    fn balance(&self) -> Adcoin {
        self.balance
    }

    fn try_debit(&mut self, amount: Adcoin) -> LedgerResult<Adcoin> {
        if self.balance < amount {
            return Err(LedgerError::InsufficientBalance {
                id: self.id,
                available: self.balance,
                requested: amount,
            });
        }
        self.balance -= amount;
        Ok(self.balance)
    }

    fn credit(&mut self, amount: Adcoin) -> LedgerResult<Adcoin> {
        self.balance = self.balance.checked_add(amount).ok_or_else(|| {
            LedgerError::invalid_state(format!(
                "crediting {} would overflow the balance of student {}",
                amount, self.id
            ))
        })?;
        Ok(self.balance)
    }

    fn debit_floored(&mut self, amount: Adcoin) -> Adcoin {
        self.balance = self.balance.saturating_sub(amount);
        self.balance
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct StaffUser {
    pub id: StaffId,
    pub name: String,
    pub photo_url: Option<String>,
    pub active: bool,
}

impl StaffUser {
    pub fn new(id: StaffId, name: impl Into<String>) -> Self {
        StaffUser {
            id,
            name: name.into(),
            photo_url: None,
            active: true,
        }
    }
}

impl BalanceHolder for StaffUser {
    fn balance(&self) -> Adcoin {
        0
    }

    fn try_debit(&mut self, _amount: Adcoin) -> LedgerResult<Adcoin> {
        Ok(0)
    }

    fn credit(&mut self, _amount: Adcoin) -> LedgerResult<Adcoin> {
        Ok(0)
    }

    fn debit_floored(&mut self, _amount: Adcoin) -> Adcoin {
        0
    }
}

/// A stored participant of either kind.
#[derive(Clone, Debug, PartialEq)]
pub enum ParticipantRecord {
    Student(Student),
    Staff(StaffUser),
}

impl ParticipantRecord {
    pub fn id(&self) -> ParticipantId {
        match self {
            ParticipantRecord::Student(s) => s.id,
            ParticipantRecord::Staff(s) => s.id,
        }
    }

    pub fn kind(&self) -> ParticipantKind {
        match self {
            ParticipantRecord::Student(_) => ParticipantKind::Student,
            ParticipantRecord::Staff(_) => ParticipantKind::Staff,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ParticipantRecord::Student(s) => &s.name,
            ParticipantRecord::Staff(s) => &s.name,
        }
    }

    pub fn photo_url(&self) -> Option<&str> {
        match self {
            ParticipantRecord::Student(s) => s.photo_url.as_deref(),
            ParticipantRecord::Staff(s) => s.photo_url.as_deref(),
        }
    }

    pub fn is_active(&self) -> bool {
        match self {
            ParticipantRecord::Student(s) => s.active,
            ParticipantRecord::Staff(s) => s.active,
        }
    }

    pub fn set_active(&mut self, active: bool) {
        match self {
            ParticipantRecord::Student(s) => s.active = active,
            ParticipantRecord::Staff(s) => s.active = active,
        }
    }

    pub fn as_student(&self) -> Option<&Student> {
        match self {
            ParticipantRecord::Student(s) => Some(s),
            ParticipantRecord::Staff(_) => None,
        }
    }

    pub fn ensure_active(&self) -> LedgerResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(LedgerError::invalid_state(format!(
                "{} {} is inactive",
                self.kind(),
                self.id()
            )))
        }
    }

    pub fn view(&self) -> Participant {
        Participant {
            id: self.id(),
            kind: self.kind(),
            display_name: self.name().to_string(),
            balance: self.balance(),
            active: self.is_active(),
        }
    }
}

impl BalanceHolder for ParticipantRecord {
    fn balance(&self) -> Adcoin {
        match self {
            ParticipantRecord::Student(s) => s.balance(),
            ParticipantRecord::Staff(s) => s.balance(),
        }
    }

    fn try_debit(&mut self, amount: Adcoin) -> LedgerResult<Adcoin> {
        match self {
            ParticipantRecord::Student(s) => s.try_debit(amount),
            ParticipantRecord::Staff(s) => s.try_debit(amount),
        }
    }

    fn credit(&mut self, amount: Adcoin) -> LedgerResult<Adcoin> {
        match self {
            ParticipantRecord::Student(s) => s.credit(amount),
            ParticipantRecord::Staff(s) => s.credit(amount),
        }
    }

    fn debit_floored(&mut self, amount: Adcoin) -> Adcoin {
        match self {
            ParticipantRecord::Student(s) => s.debit_floored(amount),
            ParticipantRecord::Staff(s) => s.debit_floored(amount),
        }
    }
}

/// Uniform read-only view handed out by the resolver.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub kind: ParticipantKind,
    pub display_name: String,
    pub balance: Adcoin,
    pub active: bool,
}
