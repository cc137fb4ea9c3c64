//! In-memory collaborator implementations.

use agentflow_compiler::{AgentRepository, MasterAgent};
use agentflow_context::Session;
use agentflow_core::{
    AggregatedStats, QuotaCheck, QuotaDecision, QuotaService, ResultRecord, ResultRepository,
    SessionRepository, SessionUsage, StatKey, StatsRepository, UsageStat,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct MemoryAgentRepository {
    agents: RwLock<HashMap<String, MasterAgent>>,
}

impl MemoryAgentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, agent: MasterAgent) {
        self.agents.write().await.insert(agent.id.clone(), agent);
    }
}

#[async_trait]
impl AgentRepository for MemoryAgentRepository {
    async fn find(&self, agent_id: &str) -> anyhow::Result<Option<MasterAgent>> {
        Ok(self.agents.read().await.get(agent_id).cloned())
    }
}

#[derive(Default)]
pub struct MemorySessionRepository {
    sessions: RwLock<HashMap<String, Session>>,
}

impl MemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionRepository for MemorySessionRepository {
    async fn find(&self, session_id: &str) -> anyhow::Result<Option<Session>> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }

    async fn record_usage(&self, usage: &SessionUsage) -> anyhow::Result<Session> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(usage.session_id.clone())
            .or_insert_with(|| Session::new(&usage.session_id, &usage.agent_id, usage.at));
        session.apply(usage.delta, usage.at);
        Ok(session.clone())
    }

    async fn finalize(
        &self,
        session_id: &str,
        at: DateTime<Utc>,
    ) -> anyhow::Result<Option<Session>> {
        let mut sessions = self.sessions.write().await;
        Ok(sessions.get_mut(session_id).map(|session| {
            session.finalize(at);
            session.clone()
        }))
    }
}

/// Usage stats merged per `(event, hour)` bucket.
#[derive(Default)]
pub struct MemoryStatsRepository {
    stats: RwLock<HashMap<StatKey, UsageStat>>,
}

impl MemoryStatsRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a record, e.g. usage from earlier in the month.
    pub async fn seed(&self, stat: UsageStat) {
        if let Err(e) = self.aggregate(stat).await {
            tracing::warn!(error = %e, "failed to seed usage stat");
        }
    }

    pub async fn records(&self) -> Vec<UsageStat> {
        let mut records: Vec<UsageStat> = self.stats.read().await.values().cloned().collect();
        records.sort_by(|a, b| a.key().cmp(&b.key()));
        records
    }
}

#[async_trait]
impl StatsRepository for MemoryStatsRepository {
    async fn aggregate(&self, stat: UsageStat) -> anyhow::Result<()> {
        let mut stats = self.stats.write().await;
        match stats.get_mut(&stat.key()) {
            Some(existing) => existing.merge(&stat),
            None => {
                stats.insert(stat.key(), stat);
            }
        }
        Ok(())
    }

    async fn summary(&self, now: DateTime<Utc>) -> anyhow::Result<AggregatedStats> {
        let stats = self.stats.read().await;
        Ok(AggregatedStats::from_stats(stats.values(), now))
    }
}

#[derive(Default)]
pub struct MemoryResultRepository {
    results: RwLock<Vec<ResultRecord>>,
}

impl MemoryResultRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResultRepository for MemoryResultRepository {
    async fn save(&self, record: ResultRecord) -> anyhow::Result<()> {
        self.results.write().await.push(record);
        Ok(())
    }

    async fn find(&self, agent_id: &str, session_id: &str) -> anyhow::Result<Vec<ResultRecord>> {
        Ok(self
            .results
            .read()
            .await
            .iter()
            .filter(|r| r.agent_id == agent_id && r.session_id == session_id)
            .cloned()
            .collect())
    }
}

/// Monthly token budget: denies once used tokens reach the allowance.
#[derive(Debug, Clone)]
pub struct TokenBudgetQuota {
    allowed_tokens: u64,
}

impl TokenBudgetQuota {
    pub fn new(allowed_tokens: u64) -> Self {
        Self { allowed_tokens }
    }

    pub fn unlimited() -> Self {
        Self::new(u64::MAX)
    }
}

#[async_trait]
impl QuotaService for TokenBudgetQuota {
    async fn check(&self, check: &QuotaCheck) -> anyhow::Result<QuotaDecision> {
        let used = check.usage.overall_tokens;
        if used >= self.allowed_tokens {
            Ok(QuotaDecision::deny(
                used,
                self.allowed_tokens,
                "monthly token budget exhausted",
            ))
        } else {
            Ok(QuotaDecision::allow(used, self.allowed_tokens))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentflow_context::TokenUsage;
    use agentflow_core::UsageTotals;
    use std::sync::Arc;

    fn usage(p: u64, c: u64) -> SessionUsage {
        SessionUsage {
            session_id: "s1".into(),
            agent_id: "a1".into(),
            delta: TokenUsage::new(p, c),
            at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_concurrent_usage_is_additive() {
        let repo = Arc::new(MemorySessionRepository::new());
        let mut handles = Vec::new();
        for i in 0..20u64 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move {
                repo.record_usage(&usage(i, 1)).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let session = repo.find("s1").await.unwrap().unwrap();
        assert_eq!(session.usage(), TokenUsage::new(190, 20));
        assert!(session.finalized_at.is_none());

        let finalized = repo.finalize("s1", Utc::now()).await.unwrap().unwrap();
        assert!(finalized.finalized_at.is_some());
        assert!(repo.finalize("missing", Utc::now()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stats_merge_by_bucket() {
        let repo = MemoryStatsRepository::new();
        let now = Utc::now();
        repo.aggregate(UsageStat::new("flow", TokenUsage::new(1, 2), Some("stop"), now))
            .await
            .unwrap();
        repo.aggregate(UsageStat::new("flow", TokenUsage::new(3, 4), Some("stop"), now))
            .await
            .unwrap();

        let records = repo.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].counter, 2);

        let summary = repo.summary(now).await.unwrap();
        assert_eq!(summary.this_month.overall_tokens, 10);
        assert_eq!(summary.today.requests, 2);
    }

    #[tokio::test]
    async fn test_seed_merges_into_existing_bucket() {
        let repo = MemoryStatsRepository::new();
        let now = Utc::now();
        repo.seed(UsageStat::new("flow", TokenUsage::new(80, 40), Some("stop"), now))
            .await;
        repo.seed(UsageStat::new("flow", TokenUsage::new(5, 5), Some("stop"), now))
            .await;

        let records = repo.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].counter, 2);
        assert_eq!(repo.summary(now).await.unwrap().this_month.overall_tokens, 130);
    }

    #[tokio::test]
    async fn test_token_budget_quota() {
        let quota = TokenBudgetQuota::new(100);
        let mut check = QuotaCheck {
            agent_id: "a".into(),
            session_id: "s".into(),
            usage: UsageTotals {
                overall_tokens: 99,
                ..UsageTotals::default()
            },
        };
        assert!(quota.check(&check).await.unwrap().allowed);
        check.usage.overall_tokens = 100;
        let decision = quota.check(&check).await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.budget, 100);
    }
}
