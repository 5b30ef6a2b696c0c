use crate::api::{AdcoinApi, ApiResponse};
use crate::auth::{CredentialVerifier, StaffDirectory};
use crate::config::LedgerConfig;
use crate::engine::{Adcoin, BranchId, LedgerEngine, ParticipantId, SignedAdcoin, StaffId};
use crate::history::{HistoryQuery, TransactionHistory};
use crate::participant::{BalanceHolder, ParticipantKind, ParticipantRef, StaffUser, Student};
use crate::replay::{Command, Envelope, ReplayReport, Replayer};
use crate::resolver::ParticipantResolver;
use crate::store::LedgerStore;
use crate::transactions::TransactionType;
use crate::views::LedgerViews;
use chrono::{DateTime, Utc};
use clap::{Parser, ValueEnum};
use serde::Serialize;
use serde_json::json;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

mod api;
mod auth;
mod config;
mod engine;
mod errors;
mod history;
mod participant;
mod replay;
mod resolver;
mod store;
#[cfg(test)]
mod test;
mod transactions;
mod views;

/// Replays Adcoin ledger commands over a participant roster and prints a view.
#[derive(Parser, Debug)]
#[command(version)]
struct Cli {
    /// Participant roster CSV: kind,id,name,branch,balance,photo,password,active
    participants: PathBuf,
    /// Command CSV: op,label,actor,password,sender_kind,sender,receiver_kind,receiver,amount,description,reference
    commands: Option<PathBuf>,
    /// `POST /adcoin/transfer` bodies, one JSON object per line, submitted after the commands
    #[arg(long)]
    requests: Option<PathBuf>,
    /// Logged-in staff id the requests are submitted under
    #[arg(long)]
    session: Option<StaffId>,
    #[arg(long, value_enum, default_value_t = View::Balances)]
    view: View,
    /// Participant to summarize; also filters the history and feed views
    #[arg(long, required_if_eq("view", "summary"))]
    participant: Option<ParticipantId>,
    /// Kind the participant is resolved as
    #[arg(long, default_value = "student")]
    kind: ParticipantKind,
    #[arg(long = "type")]
    tx_type: Option<TransactionType>,
    /// Inclusive lower bound on creation time (RFC 3339)
    #[arg(long)]
    from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on creation time (RFC 3339)
    #[arg(long)]
    to: Option<DateTime<Utc>>,
    #[arg(long)]
    limit: Option<usize>,
    /// Config file name, without extension
    #[arg(long, default_value = "adcoin")]
    config: String,
}

impl Cli {
    fn history_query(&self) -> HistoryQuery {
        HistoryQuery {
            participant: self.participant,
            tx_type: self.tx_type,
            from: self.from,
            to: self.to,
            limit: self.limit,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum View {
    Balances,
    Ranking,
    Pools,
    History,
    Feed,
    Summary,
    Stats,
    Audit,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = LedgerConfig::load(&cli.config)?;
    let store = LedgerStore::new(config.store_timeout());
    let engine = Arc::new(LedgerEngine::new(store.clone(), config));
    let directory = Arc::new(StaffDirectory::new());

    let loaded = load_participants(&cli.participants, &store, &directory).await?;
    info!(participants = loaded, "roster loaded");
    if let Some(commands) = &cli.commands {
        let report = replay_commands(commands, engine.clone(), directory.clone()).await?;
        if !report.rejected.is_empty() {
            warn!(rejected = report.rejected.len(), "some commands were not applied");
        }
    }
    if let Some(requests) = &cli.requests {
        let api = AdcoinApi::new(engine.clone(), directory.clone());
        submit_requests(requests, &api, cli.session).await?;
    }

    let views = LedgerViews::new(engine.store().clone(), engine.config().clone());
    let mut wtr = csv::Writer::from_writer(std::io::stdout());
    match cli.view {
        View::Balances => {
            let state = store.read().await?;
            for record in state.participants() {
                wtr.serialize(BalanceOutput {
                    id: record.id(),
                    kind: record.kind(),
                    name: record.name().to_string(),
                    balance: record.balance(),
                    active: record.is_active(),
                })?;
            }
        }
        View::Ranking => {
            for entry in views.ranking().await?.iter() {
                wtr.serialize(entry)?;
            }
        }
        View::Pools => {
            for pool in views.branch_pools().await?.iter() {
                wtr.serialize(pool)?;
            }
        }
        View::History => {
            let history = TransactionHistory::new(engine.store().clone());
            for tx in history.query(&cli.history_query()).await? {
                wtr.serialize(tx.to_row())?;
            }
        }
        View::Feed => {
            for entry in views.feed(&cli.history_query()).await? {
                println!("{}", serde_json::to_string(&entry)?);
            }
        }
        View::Summary => {
            let id = cli.participant.ok_or("--participant is required for the summary view")?;
            let resolver = ParticipantResolver::new(engine.store().clone());
            let participant = resolver.resolve(id, cli.kind).await?;
            let level = match cli.kind {
                ParticipantKind::Student => Some(views.level_of(id).await?),
                ParticipantKind::Staff => None,
            };
            let summary = views.summary(ParticipantRef { id, kind: cli.kind }).await?;
            let out = json!({ "participant": participant, "level": level, "summary": summary });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        View::Stats => {
            println!("{}", serde_json::to_string_pretty(&*views.stats().await?)?);
            println!("{}", serde_json::to_string_pretty(&views.progress().await?)?);
        }
        View::Audit => {
            for discrepancy in engine.audit().await? {
                wtr.serialize(discrepancy)?;
            }
        }
    }
    wtr.flush()?;
    Ok(())
}

pub(crate) async fn load_participants(
    path: &Path,
    store: &LedgerStore,
    directory: &StaffDirectory,
) -> Result<usize, Box<dyn Error>> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_path(path)?;
    let mut loaded = 0;
    for entry in reader.deserialize() {
        let record: ParticipantInput = entry?;
        let participant = match record.kind {
            ParticipantKind::Student => {
                let mut student = Student::new(
                    record.id,
                    record.name,
                    record.branch.unwrap_or_default(),
                    record.balance.unwrap_or_default(),
                );
                if let Some(photo) = record.photo {
                    student = student.with_photo(photo);
                }
                store.insert_student(student).await?;
                ParticipantRef::student(record.id)
            }
            ParticipantKind::Staff => {
                let mut staff = StaffUser::new(record.id, record.name);
                staff.photo_url = record.photo;
                store.insert_staff(staff).await?;
                if let Some(password) = record.password {
                    directory.set_password(record.id, &password).await;
                }
                ParticipantRef::staff(record.id)
            }
        };
        if record.active == Some(false) {
            store.set_active(participant, false).await?;
        }
        loaded += 1;
    }
    Ok(loaded)
}

pub(crate) async fn replay_commands(
    path: &Path,
    engine: Arc<LedgerEngine>,
    gate: Arc<dyn CredentialVerifier>,
) -> Result<ReplayReport, Box<dyn Error>> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_path(path)?;
    let (replayer, sender) = Replayer::new(engine, gate);
    let handle = tokio::spawn(replayer.process());
    for (i, entry) in reader.deserialize().enumerate() {
        // header is line 1
        let line = i + 2;
        let record: CommandInput = match entry {
            Ok(record) => record,
            Err(e) => {
                warn!(line, error = %e, "unreadable command row");
                continue;
            }
        };
        match convert_input(line, record) {
            Some(envelope) => sender.send(envelope)?,
            None => warn!(line, "incomplete command row"),
        }
    }
    drop(sender);
    Ok(handle.await?)
}

/// Runs each non-blank line through the transfer endpoint, in file order.
pub(crate) async fn submit_requests(
    path: &Path,
    api: &AdcoinApi,
    session: Option<StaffId>,
) -> Result<Vec<ApiResponse>, Box<dyn Error>> {
    let contents = tokio::fs::read_to_string(path).await?;
    let mut responses = Vec::new();
    for (i, body) in contents.lines().enumerate() {
        if body.trim().is_empty() {
            continue;
        }
        let line = i + 1;
        let response = api.transfer(session, body).await;
        if response.status == 200 {
            info!(line, "request applied");
        } else {
            warn!(line, status = response.status, body = %response.body, "request refused");
        }
        responses.push(response);
    }
    Ok(responses)
}

fn participant(kind: Option<ParticipantKind>, id: Option<ParticipantId>) -> Option<ParticipantRef> {
    Some(ParticipantRef { id: id?, kind: kind? })
}

fn magnitude(amount: Option<SignedAdcoin>) -> Option<Adcoin> {
    amount.filter(|a| *a > 0).map(|a| a as Adcoin)
}

fn convert_input(line: usize, entry: CommandInput) -> Option<Envelope> {
    let sender = participant(entry.sender_kind, entry.sender);
    let receiver = participant(entry.receiver_kind, entry.receiver);
    let description = entry.description;
    let command = match entry.op.as_str() {
        "transfer" => Command::Transfer {
            sender: sender?,
            receiver: receiver?,
            amount: magnitude(entry.amount)?,
            description,
        },
        "award" | "earned" => Command::Award {
            receiver: receiver?,
            amount: magnitude(entry.amount)?,
            description,
        },
        "spend" | "spent" => Command::Spend {
            student: sender?,
            amount: magnitude(entry.amount)?,
            description,
        },
        "adjust" | "adjusted" => Command::Adjust {
            participant: receiver.or(sender)?,
            amount: entry.amount?,
            description,
        },
        "refund" | "refunded" => Command::Refund {
            reference: entry.reference?,
        },
        _ => return None,
    };
    Some(Envelope {
        line,
        label: entry.label,
        actor: entry.actor,
        password: entry.password,
        command,
    })
}

#[derive(Debug, serde::Deserialize)]
pub struct ParticipantInput {
    kind: ParticipantKind,
    id: ParticipantId,
    name: String,
    branch: Option<BranchId>,
    balance: Option<Adcoin>,
    photo: Option<String>,
    password: Option<String>,
    active: Option<bool>,
}

#[derive(Debug, serde::Deserialize)]
pub struct CommandInput {
    op: String,
    label: Option<String>,
    actor: StaffId,
    password: String,
    sender_kind: Option<ParticipantKind>,
    sender: Option<ParticipantId>,
    receiver_kind: Option<ParticipantKind>,
    receiver: Option<ParticipantId>,
    amount: Option<SignedAdcoin>,
    description: Option<String>,
    reference: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BalanceOutput {
    id: ParticipantId,
    kind: ParticipantKind,
    name: String,
    balance: Adcoin,
    active: bool,
}
