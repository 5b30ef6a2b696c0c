use crate::engine::ParticipantId;
use crate::errors::LedgerResult;
use crate::store::LedgerStore;
use crate::transactions::{Transaction, TransactionType};
use chrono::{DateTime, Utc};

/// Filters over the transaction log. Unset fields match everything.
#[derive(Clone, Debug, Default)]
pub struct HistoryQuery {
    pub participant: Option<ParticipantId>,
    pub tx_type: Option<TransactionType>,
    /// Inclusive
    pub from: Option<DateTime<Utc>>,
    /// Exclusive
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl HistoryQuery {
    fn matches(&self, tx: &Transaction) -> bool {
        self.participant.map_or(true, |id| tx.direction.involves(id))
            && self.tx_type.map_or(true, |t| tx.tx_type == t)
            && self.from.map_or(true, |from| tx.created_at >= from)
            && self.to.map_or(true, |to| tx.created_at < to)
    }
}

/// Read side of the append-only transaction log.
#[derive(Clone, Debug)]
pub struct TransactionHistory {
    store: LedgerStore,
}

impl TransactionHistory {
    pub fn new(store: LedgerStore) -> Self {
        TransactionHistory { store }
    }

    /// Matching transactions, newest first.
    pub async fn query(&self, query: &HistoryQuery) -> LedgerResult<Vec<Transaction>> {
        let state = self.store.read().await?;
        Ok(select(state.transactions(), query))
    }
}

/// Log order is commit order, so ties on `created_at` fall back to the later commit first.
pub(crate) fn select(log: &[Transaction], query: &HistoryQuery) -> Vec<Transaction> {
    let mut selected: Vec<Transaction> = log.iter().rev().filter(|tx| query.matches(tx)).cloned().collect();
    selected.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    if let Some(limit) = query.limit {
        selected.truncate(limit);
    }
    selected
}
