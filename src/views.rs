use crate::config::LedgerConfig;
use crate::engine::{Adcoin, BranchId, ParticipantId, TransactionId};
use crate::errors::{LedgerError, LedgerResult};
use crate::history::{select, HistoryQuery};
use crate::participant::{BalanceHolder, ParticipantKind, ParticipantRecord, ParticipantRef};
use crate::store::{LedgerState, LedgerStore};
use crate::transactions::TransactionType;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

pub fn level(balance: Adcoin, level_step: Adcoin) -> u64 {
    balance / level_step.max(1) + 1
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RankEntry {
    pub rank: usize,
    pub student: ParticipantId,
    pub name: String,
    pub branch: BranchId,
    pub balance: Adcoin,
    pub level: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BranchPool {
    pub branch: BranchId,
    pub students: usize,
    pub total: Adcoin,
    pub display_value: Decimal,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Progress {
    pub current_total: Adcoin,
    pub limit: Adcoin,
    pub percent: Decimal,
    pub remaining: Adcoin,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FeedParty {
    pub id: ParticipantId,
    pub kind: ParticipantKind,
    pub name: String,
    pub photo_url: Option<String>,
    /// Students only
    pub level: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FeedEntry {
    pub id: TransactionId,
    pub tx_type: TransactionType,
    pub amount: Adcoin,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sender: Option<FeedParty>,
    pub receiver: Option<FeedParty>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ParticipantSummary {
    pub balance: Adcoin,
    pub earned: Adcoin,
    pub spent: Adcoin,
    pub sent: Adcoin,
    pub received: Adcoin,
    pub adjusted_in: Adcoin,
    pub adjusted_out: Adcoin,
    pub refunded: Adcoin,
    pub transactions: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct LedgerStats {
    pub circulating: Adcoin,
    pub awarded: Adcoin,
    pub spent: Adcoin,
    pub refunded: Adcoin,
    pub transactions_by_type: BTreeMap<String, usize>,
}

/// Active students, richest first; equal balances keep registration order.
pub fn ranking(state: &LedgerState, level_step: Adcoin) -> Vec<RankEntry> {
    let mut students: Vec<_> = state.students().filter(|s| s.active).collect();
    students.sort_by(|a, b| b.balance.cmp(&a.balance));
    students
        .into_iter()
        .enumerate()
        .map(|(i, s)| RankEntry {
            rank: i + 1,
            student: s.id,
            name: s.name.clone(),
            branch: s.branch,
            balance: s.balance,
            level: level(s.balance, level_step),
        })
        .collect()
}

pub fn branch_pools(state: &LedgerState, rate: Decimal) -> Vec<BranchPool> {
    let mut pools: BTreeMap<BranchId, (usize, Adcoin)> = BTreeMap::new();
    for student in state.students().filter(|s| s.active) {
        let pool = pools.entry(student.branch).or_default();
        pool.0 += 1;
        pool.1 = pool.1.saturating_add(student.balance);
    }
    pools
        .into_iter()
        .map(|(branch, (students, total))| BranchPool {
            branch,
            students,
            total,
            display_value: Decimal::from(total) * rate,
        })
        .collect()
}

pub fn progress(state: &LedgerState, limit: Adcoin) -> Progress {
    let current_total = circulating(state);
    let percent = if limit == 0 {
        Decimal::ZERO
    } else {
        (Decimal::from(current_total) * Decimal::ONE_HUNDRED / Decimal::from(limit)).round_dp(2)
    };
    Progress {
        current_total,
        limit,
        percent,
        remaining: limit.saturating_sub(current_total),
    }
}

fn circulating(state: &LedgerState) -> Adcoin {
    state
        .students()
        .filter(|s| s.active)
        .fold(0, |sum: Adcoin, s| sum.saturating_add(s.balance))
}

pub fn summary(state: &LedgerState, participant: ParticipantRef) -> LedgerResult<ParticipantSummary> {
    let record = crate::resolver::resolve_record(state, participant)?;
    let mut summary = ParticipantSummary {
        balance: record.balance(),
        ..Default::default()
    };
    for tx in state.transactions().iter().filter(|tx| tx.direction.involves(participant.id)) {
        summary.transactions += 1;
        let incoming = tx.receiver().map(|p| p.id) == Some(participant.id);
        let total = match (tx.tx_type, incoming) {
            (TransactionType::Earned, _) => &mut summary.earned,
            (TransactionType::Spent, _) => &mut summary.spent,
            (TransactionType::Refunded, _) => &mut summary.refunded,
            (TransactionType::Transferred, true) => &mut summary.received,
            (TransactionType::Transferred, false) => &mut summary.sent,
            (TransactionType::Adjusted, true) => &mut summary.adjusted_in,
            (TransactionType::Adjusted, false) => &mut summary.adjusted_out,
        };
        *total = total.saturating_add(tx.amount);
    }
    Ok(summary)
}

pub fn stats(state: &LedgerState) -> LedgerStats {
    let mut stats = LedgerStats {
        circulating: circulating(state),
        transactions_by_type: TransactionType::ALL.iter().map(|t| (t.to_string(), 0)).collect(),
        ..Default::default()
    };
    for tx in state.transactions() {
        *stats.transactions_by_type.entry(tx.tx_type.to_string()).or_default() += 1;
        let total = match tx.tx_type {
            TransactionType::Earned => &mut stats.awarded,
            TransactionType::Spent => &mut stats.spent,
            TransactionType::Refunded => &mut stats.refunded,
            TransactionType::Transferred | TransactionType::Adjusted => continue,
        };
        *total = total.saturating_add(tx.amount);
    }
    stats
}

fn party(state: &LedgerState, participant: Option<ParticipantRef>, level_step: Adcoin) -> Option<FeedParty> {
    let record = state.participant(&participant?.id)?;
    Some(FeedParty {
        id: record.id(),
        kind: record.kind(),
        name: record.name().to_string(),
        photo_url: record.photo_url().map(str::to_string),
        level: match record {
            ParticipantRecord::Student(s) => Some(level(s.balance, level_step)),
            ParticipantRecord::Staff(_) => None,
        },
    })
}

/// Recent transactions with both ends' display details filled in.
pub fn feed(state: &LedgerState, query: &HistoryQuery, level_step: Adcoin) -> Vec<FeedEntry> {
    select(state.transactions(), query)
        .into_iter()
        .map(|tx| FeedEntry {
            sender: party(state, tx.sender(), level_step),
            receiver: party(state, tx.receiver(), level_step),
            id: tx.id,
            tx_type: tx.tx_type,
            amount: tx.amount,
            created_at: tx.created_at,
            description: tx.description,
        })
        .collect()
}

struct TtlCache<T> {
    ttl: Duration,
    slot: Mutex<Option<(Instant, Arc<T>)>>,
}

impl<T> TtlCache<T> {
    fn new(ttl: Duration) -> Self {
        TtlCache {
            ttl,
            slot: Mutex::new(None),
        }
    }

    async fn get_or_refresh<F, Fut>(&self, refresh: F) -> LedgerResult<Arc<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = LedgerResult<T>>,
    {
        let mut slot = self.slot.lock().await;
        if let Some((at, value)) = slot.as_ref() {
            if at.elapsed() < self.ttl {
                return Ok(value.clone());
            }
        }
        let value = Arc::new(refresh().await?);
        *slot = Some((Instant::now(), value.clone()));
        Ok(value)
    }
}

/// Read-only aggregates over the ledger. Rankings, pools and stats are cached
/// for the configured TTL; nothing pushes invalidations.
pub struct LedgerViews {
    store: LedgerStore,
    config: LedgerConfig,
    ranking: TtlCache<Vec<RankEntry>>,
    pools: TtlCache<Vec<BranchPool>>,
    stats: TtlCache<LedgerStats>,
}

impl LedgerViews {
    pub fn new(store: LedgerStore, config: LedgerConfig) -> Self {
        let ttl = config.view_ttl();
        LedgerViews {
            store,
            config,
            ranking: TtlCache::new(ttl),
            pools: TtlCache::new(ttl),
            stats: TtlCache::new(ttl),
        }
    }

    pub async fn ranking(&self) -> LedgerResult<Arc<Vec<RankEntry>>> {
        self.ranking
            .get_or_refresh(|| async move {
                let state = self.store.read().await?;
                Ok::<_, LedgerError>(ranking(&state, self.config.level_step))
            })
            .await
    }

    pub async fn branch_pools(&self) -> LedgerResult<Arc<Vec<BranchPool>>> {
        self.pools
            .get_or_refresh(|| async move {
                let state = self.store.read().await?;
                Ok::<_, LedgerError>(branch_pools(&state, self.config.pool_rate))
            })
            .await
    }

    pub async fn stats(&self) -> LedgerResult<Arc<LedgerStats>> {
        self.stats
            .get_or_refresh(|| async move {
                let state = self.store.read().await?;
                Ok::<_, LedgerError>(stats(&state))
            })
            .await
    }

    pub async fn progress(&self) -> LedgerResult<Progress> {
        let state = self.store.read().await?;
        Ok(progress(&state, self.config.adcoin_limit))
    }

    pub async fn feed(&self, query: &HistoryQuery) -> LedgerResult<Vec<FeedEntry>> {
        let state = self.store.read().await?;
        Ok(feed(&state, query, self.config.level_step))
    }

    pub async fn summary(&self, participant: ParticipantRef) -> LedgerResult<ParticipantSummary> {
        let state = self.store.read().await?;
        summary(&state, participant)
    }

    pub async fn level_of(&self, student: ParticipantId) -> LedgerResult<u64> {
        let state = self.store.read().await?;
        match state.participant(&student).and_then(ParticipantRecord::as_student) {
            Some(s) => Ok(level(s.balance, self.config.level_step)),
            None => Err(LedgerError::ParticipantNotFound {
                id: student,
                kind: ParticipantKind::Student,
            }),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test::fixtures::Fixture;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    #[test]
    fn level_steps() {
        assert_eq!(level(0, 100), 1);
        assert_eq!(level(99, 100), 1);
        assert_eq!(level(100, 100), 2);
        assert_eq!(level(250, 100), 3);
    }

    #[tokio::test]
    async fn ranking_sorts_by_balance_then_registration() {
        let f = Fixture::new().await;
        let a = f.student("A", 50).await;
        let b = f.student("B", 120).await;
        let c = f.student("C", 50).await;
        let gone = f.student("Gone", 500).await;
        f.engine.store().set_active(gone, false).await.unwrap();
        let state = f.engine.store().read().await.unwrap();
        let ranked = ranking(&state, 100);
        let order: Vec<_> = ranked.iter().map(|r| (r.rank, r.student)).collect();
        assert_eq!(order, vec![(1, b.id), (2, a.id), (3, c.id)]);
        assert_eq!(ranked[0].level, 2);
    }

    #[tokio::test]
    async fn pools_sum_per_branch() {
        let f = Fixture::new().await;
        let other = Uuid::new_v4();
        f.student("A", 40).await;
        f.student("B", 60).await;
        f.student_in(other, "C", 5).await;
        let views = LedgerViews::new(f.engine.store().clone(), f.engine.config().clone());
        let pools = views.branch_pools().await.unwrap();
        let pool = |branch: Uuid| pools.iter().find(|p| p.branch == branch);
        let home = pool(f.branch).unwrap();
        assert_eq!(home.total, 100);
        assert_eq!(home.students, 2);
        assert_eq!(home.display_value, dec!(10.0));
        assert_eq!(pool(other).unwrap().total, 5);
        assert!(pool(Uuid::new_v4()).is_none());
    }

    #[tokio::test]
    async fn progress_is_display_only() {
        let f = Fixture::with_config(LedgerConfig {
            adcoin_limit: 100,
            ..Default::default()
        })
        .await;
        let a = f.student("A", 90).await;
        f.engine.award(a, 60, None, &f.operator).await.unwrap();
        let views = LedgerViews::new(f.engine.store().clone(), f.engine.config().clone());
        let progress = views.progress().await.unwrap();
        assert_eq!(progress.current_total, 150);
        assert_eq!(progress.percent, dec!(150));
        assert_eq!(progress.remaining, 0);
    }

    #[tokio::test]
    async fn cached_ranking_waits_for_ttl() {
        let f = Fixture::new().await;
        let a = f.student("A", 10).await;
        let views = LedgerViews::new(f.engine.store().clone(), f.engine.config().clone());
        assert_eq!(views.ranking().await.unwrap()[0].balance, 10);
        f.engine.award(a, 5, None, &f.operator).await.unwrap();
        assert_eq!(views.ranking().await.unwrap()[0].balance, 10);
        let fresh = LedgerViews::new(f.engine.store().clone(), f.engine.config().clone());
        assert_eq!(fresh.ranking().await.unwrap()[0].balance, 15);
    }

    #[tokio::test]
    async fn zero_ttl_always_recomputes() {
        let f = Fixture::with_config(LedgerConfig {
            view_ttl_secs: 0,
            ..Default::default()
        })
        .await;
        let a = f.student("A", 10).await;
        let views = LedgerViews::new(f.engine.store().clone(), f.engine.config().clone());
        assert_eq!(views.stats().await.unwrap().circulating, 10);
        f.engine.award(a, 5, None, &f.operator).await.unwrap();
        let stats = views.stats().await.unwrap();
        assert_eq!(stats.circulating, 15);
        assert_eq!(stats.awarded, 5);
        assert_eq!(stats.transactions_by_type["earned"], 1);
        assert_eq!(stats.transactions_by_type["refunded"], 0);
    }

    #[tokio::test]
    async fn feed_is_enriched() {
        let f = Fixture::new().await;
        let a = f.student("Ana", 250).await;
        let coach = f.staff("Coach").await;
        f.engine.transfer(coach, a, 10, None, &f.operator).await.unwrap();
        f.engine.award(a, 1, None, &f.operator).await.unwrap();
        let views = LedgerViews::new(f.engine.store().clone(), f.engine.config().clone());
        let feed = views.feed(&HistoryQuery::default()).await.unwrap();
        assert_eq!(feed.len(), 2);
        assert_eq!(feed[0].tx_type, TransactionType::Earned);
        assert!(feed[0].sender.is_none());
        let transfer = &feed[1];
        assert_eq!(transfer.sender.as_ref().unwrap().name, "Coach");
        assert_eq!(transfer.sender.as_ref().unwrap().level, None);
        assert_eq!(transfer.receiver.as_ref().unwrap().level, Some(3));
    }

    #[tokio::test]
    async fn summary_splits_by_direction() {
        let f = Fixture::new().await;
        let a = f.student("A", 100).await;
        let b = f.student("B", 0).await;
        f.engine.transfer(a, b, 30, None, &f.operator).await.unwrap();
        f.engine.transfer(b, a, 10, None, &f.operator).await.unwrap();
        f.engine.adjust(a, -5, None, &f.operator).await.unwrap();
        let spent = f.engine.spend(a, 15, None, &f.operator).await.unwrap();
        f.engine.refund(spent.id, &f.operator).await.unwrap();
        let views = LedgerViews::new(f.engine.store().clone(), f.engine.config().clone());
        let summary = views.summary(a).await.unwrap();
        assert_eq!(summary.sent, 30);
        assert_eq!(summary.received, 10);
        assert_eq!(summary.adjusted_out, 5);
        assert_eq!(summary.spent, 15);
        assert_eq!(summary.refunded, 15);
        assert_eq!(summary.transactions, 5);
        assert_eq!(summary.balance, 75);
        assert_eq!(views.level_of(a.id).await.unwrap(), 1);
        assert!(views.level_of(Uuid::new_v4()).await.is_err());
    }
}
