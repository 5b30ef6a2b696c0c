use crate::auth::CredentialVerifier;
use crate::engine::{Adcoin, LedgerEngine, ParticipantId, SignedAdcoin, StaffId};
use crate::errors::{LedgerError, LedgerResult};
use crate::participant::{ParticipantKind, ParticipantRef};
use crate::transactions::Transaction;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    Transfer,
    Earned,
    Adjusted,
}

/// Body of `POST /adcoin/transfer`. Every field is optional here so a
/// missing one becomes a readable 400 rather than a parse failure.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub sender_id: Option<ParticipantId>,
    pub receiver_id: Option<ParticipantId>,
    pub sender_type: Option<ParticipantKind>,
    pub receiver_type: Option<ParticipantKind>,
    pub transaction_type: Option<RequestKind>,
    pub amount: Option<f64>,
    pub message: Option<String>,
    pub password: Option<String>,
}

struct ValidRequest {
    sender: ParticipantRef,
    receiver: ParticipantRef,
    kind: RequestKind,
    amount: Adcoin,
    message: Option<String>,
    password: String,
}

fn required<T>(value: Option<T>, field: &str) -> LedgerResult<T> {
    value.ok_or_else(|| LedgerError::validation(format!("{} is required", field)))
}

impl TransferRequest {
    fn validate(self) -> LedgerResult<ValidRequest> {
        let sender = ParticipantRef {
            id: required(self.sender_id, "senderId")?,
            kind: required(self.sender_type, "senderType")?,
        };
        let receiver = ParticipantRef {
            id: required(self.receiver_id, "receiverId")?,
            kind: required(self.receiver_type, "receiverType")?,
        };
        let kind = required(self.transaction_type, "transactionType")?;
        let amount = required(self.amount, "amount")?;
        let password = required(self.password, "password")?;
        if sender.id == receiver.id {
            return Err(LedgerError::validation("Sender and receiver cannot be the same"));
        }
        if !amount.is_finite() || amount <= 0.0 {
            return Err(LedgerError::validation("Amount must be greater than 0"));
        }
        if amount.fract() != 0.0 {
            return Err(LedgerError::validation("Amount must be a whole number"));
        }
        if amount >= SignedAdcoin::MAX as f64 {
            return Err(LedgerError::validation("Amount is too large"));
        }
        Ok(ValidRequest {
            sender,
            receiver,
            kind,
            amount: amount as Adcoin,
            message: self.message,
            password,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    fn ok(tx: &Transaction) -> Self {
        match serde_json::to_value(tx.to_row()) {
            Ok(transaction) => ApiResponse {
                status: 200,
                body: json!({ "success": true, "transaction": transaction }),
            },
            Err(e) => LedgerError::Storage(e.to_string()).into(),
        }
    }
}

impl From<LedgerError> for ApiResponse {
    fn from(err: LedgerError) -> Self {
        let status = match &err {
            LedgerError::Validation(_) | LedgerError::InsufficientBalance { .. } => 400,
            LedgerError::Unauthorized(_) => 401,
            LedgerError::ParticipantNotFound { .. } | LedgerError::TransactionNotFound(_) => 404,
            LedgerError::InvalidState(_) => 409,
            LedgerError::Storage(_) => 500,
        };
        let body = match &err {
            LedgerError::Storage(details) => {
                json!({ "error": "Internal server error", "details": details })
            }
            other => json!({ "error": other.to_string() }),
        };
        ApiResponse { status, body }
    }
}

/// The mutating HTTP surface, independent of any particular server.
pub struct AdcoinApi {
    engine: Arc<LedgerEngine>,
    gate: Arc<dyn CredentialVerifier>,
}

impl AdcoinApi {
    pub fn new(engine: Arc<LedgerEngine>, gate: Arc<dyn CredentialVerifier>) -> Self {
        AdcoinApi { engine, gate }
    }

    /// `session` is the logged-in operator, if any. The password in the body
    /// is re-checked against that operator before the engine is called.
    pub async fn transfer(&self, session: Option<StaffId>, body: &str) -> ApiResponse {
        match self.handle_transfer(session, body).await {
            Ok(tx) => ApiResponse::ok(&tx),
            Err(e) => {
                if e.is_retryable() {
                    error!(error = %e, "adcoin transfer failed");
                }
                e.into()
            }
        }
    }

    async fn handle_transfer(&self, session: Option<StaffId>, body: &str) -> LedgerResult<Transaction> {
        let staff_id = session.ok_or_else(|| LedgerError::Unauthorized("Unauthorized".to_string()))?;
        let request: TransferRequest = serde_json::from_str(body)
            .map_err(|e| LedgerError::validation(format!("invalid request body: {}", e)))?;
        let request = request.validate()?;
        let operator = self.gate.verify(staff_id, &request.password).await?;
        match request.kind {
            RequestKind::Transfer => {
                self.engine
                    .transfer(request.sender, request.receiver, request.amount, request.message, &operator)
                    .await
            }
            RequestKind::Earned => {
                self.engine
                    .award(request.receiver, request.amount, request.message, &operator)
                    .await
            }
            RequestKind::Adjusted => {
                self.engine
                    .adjust(request.receiver, request.amount as SignedAdcoin, request.message, &operator)
                    .await
            }
        }
    }
}
