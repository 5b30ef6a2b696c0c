use crate::auth::CredentialVerifier;
use crate::engine::{Adcoin, LedgerEngine, SignedAdcoin, StaffId, TransactionId};
use crate::errors::{LedgerError, LedgerResult};
use crate::participant::ParticipantRef;
use crate::transactions::Transaction;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{info, warn};

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Transfer {
        sender: ParticipantRef,
        receiver: ParticipantRef,
        amount: Adcoin,
        description: Option<String>,
    },
    Award {
        receiver: ParticipantRef,
        amount: Adcoin,
        description: Option<String>,
    },
    Spend {
        student: ParticipantRef,
        amount: Adcoin,
        description: Option<String>,
    },
    Adjust {
        participant: ParticipantRef,
        amount: SignedAdcoin,
        description: Option<String>,
    },
    /// Refers to an earlier command by its label.
    Refund { reference: String },
}

/// One operator-submitted command, as it arrives from the input file.
#[derive(Clone, Debug)]
pub struct Envelope {
    pub line: usize,
    pub label: Option<String>,
    pub actor: StaffId,
    pub password: String,
    pub command: Command,
}

#[derive(Debug, Default)]
pub struct ReplayReport {
    pub applied: usize,
    pub rejected: Vec<(usize, LedgerError)>,
}

/// Drains commands from a channel and applies them through the engine in
/// arrival order. Each command is authorized on its own.
pub struct Replayer {
    incoming: UnboundedReceiver<Envelope>,
    engine: Arc<LedgerEngine>,
    gate: Arc<dyn CredentialVerifier>,
    labels: HashMap<String, TransactionId>,
}

impl Replayer {
    pub fn new(engine: Arc<LedgerEngine>, gate: Arc<dyn CredentialVerifier>) -> (Self, UnboundedSender<Envelope>) {
        let (sender, receiver) = unbounded_channel();
        (
            Replayer {
                incoming: receiver,
                engine,
                gate,
                labels: Default::default(),
            },
            sender,
        )
    }

    pub async fn process(mut self) -> ReplayReport {
        let mut report = ReplayReport::default();
        while let Some(envelope) = self.incoming.recv().await {
            let line = envelope.line;
            match self.handle(envelope).await {
                Ok(_) => report.applied += 1,
                Err(e) => {
                    warn!(line, error = %e, "command skipped");
                    report.rejected.push((line, e));
                }
            }
        }
        info!(
            applied = report.applied,
            rejected = report.rejected.len(),
            "replay finished"
        );
        report
    }

    async fn handle(&mut self, envelope: Envelope) -> LedgerResult<Transaction> {
        let operator = self.gate.verify(envelope.actor, &envelope.password).await?;
        let tx = match envelope.command {
            Command::Transfer {
                sender,
                receiver,
                amount,
                description,
            } => {
                self.engine
                    .transfer(sender, receiver, amount, description, &operator)
                    .await?
            }
            Command::Award {
                receiver,
                amount,
                description,
            } => self.engine.award(receiver, amount, description, &operator).await?,
            Command::Spend {
                student,
                amount,
                description,
            } => self.engine.spend(student, amount, description, &operator).await?,
            Command::Adjust {
                participant,
                amount,
                description,
            } => {
                self.engine
                    .adjust(participant, amount, description, &operator)
                    .await?
            }
            Command::Refund { reference } => {
                let original = self.labels.get(&reference).copied().ok_or_else(|| {
                    LedgerError::validation(format!("unknown command label: {}", reference))
                })?;
                self.engine.refund(original, &operator).await?
            }
        };
        if let Some(label) = envelope.label {
            self.labels.insert(label, tx.id);
        }
        Ok(tx)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test::fixtures::{Fixture, OPERATOR_PASSWORD};

    fn envelope(f: &Fixture, line: usize, label: Option<&str>, command: Command) -> Envelope {
        Envelope {
            line,
            label: label.map(str::to_string),
            actor: f.operator.staff_id(),
            password: OPERATOR_PASSWORD.to_string(),
            command,
        }
    }

    #[tokio::test]
    async fn commands_apply_in_order() {
        let f = Fixture::new().await;
        let a = f.student("A", 0).await;
        let (replayer, sender) = Replayer::new(f.engine.clone(), f.directory.clone());
        let handle = tokio::spawn(replayer.process());
        let commands = [
            (Some("bonus"), Command::Award { receiver: a, amount: 40, description: None }),
            (Some("shop"), Command::Spend { student: a, amount: 25, description: None }),
            (None, Command::Refund { reference: "shop".into() }),
            (None, Command::Refund { reference: "bonus".into() }),
            (None, Command::Refund { reference: "nope".into() }),
        ];
        for (line, (label, command)) in commands.into_iter().enumerate() {
            sender.send(envelope(&f, line + 1, label, command)).unwrap();
        }
        drop(sender);
        let report = handle.await.unwrap();
        assert_eq!(report.applied, 3);
        let lines: Vec<_> = report.rejected.iter().map(|(line, _)| *line).collect();
        assert_eq!(lines, vec![4, 5]);
        assert!(matches!(report.rejected[0].1, LedgerError::InvalidState(_)));
        assert_eq!(f.balance(a).await, 40);
    }

    #[tokio::test]
    async fn wrong_password_is_skipped() {
        let f = Fixture::new().await;
        let a = f.student("A", 0).await;
        let (replayer, sender) = Replayer::new(f.engine.clone(), f.directory.clone());
        let mut bad = envelope(&f, 1, None, Command::Award { receiver: a, amount: 5, description: None });
        bad.password = "wrong".into();
        sender.send(bad).unwrap();
        drop(sender);
        let report = replayer.process().await;
        assert_eq!(report.applied, 0);
        assert!(matches!(report.rejected[0].1, LedgerError::Unauthorized(_)));
        assert_eq!(f.transaction_count().await, 0);
    }
}
