use agentflow_context::{Session, TokenUsage};
use agentflow_core::{
    BillingService, FlowError, FlowResult, QuotaCheck, QuotaExceededError, QuotaService,
    SessionRepository, SessionUsage, StatsRepository, UsageStat,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Records the token usage of completed model calls for one execution.
///
/// Session counters are merged additively by the repository, so branch
/// completions may arrive in any order.
#[derive(Clone)]
pub struct UsageAccountant {
    sessions: Arc<dyn SessionRepository>,
    stats: Arc<dyn StatsRepository>,
    billing: Option<Arc<dyn BillingService>>,
    event_name: String,
    session_id: String,
    agent_id: String,
}

impl UsageAccountant {
    pub fn new(
        sessions: Arc<dyn SessionRepository>,
        stats: Arc<dyn StatsRepository>,
        event_name: impl Into<String>,
        session_id: impl Into<String>,
        agent_id: impl Into<String>,
    ) -> Self {
        Self {
            sessions,
            stats,
            billing: None,
            event_name: event_name.into(),
            session_id: session_id.into(),
            agent_id: agent_id.into(),
        }
    }

    pub fn with_billing(mut self, billing: Option<Arc<dyn BillingService>>) -> Self {
        self.billing = billing;
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Refuses to start when the caller's monthly usage is over quota.
    #[tracing::instrument(level = "debug", skip(self, quota), fields(session_id = %self.session_id))]
    pub async fn check_quota(
        &self,
        quota: &dyn QuotaService,
        now: DateTime<Utc>,
    ) -> FlowResult<()> {
        let summary = self.stats.summary(now).await?;
        let check = QuotaCheck {
            agent_id: self.agent_id.clone(),
            session_id: self.session_id.clone(),
            usage: summary.this_month,
        };
        let decision = quota.check(&check).await?;
        if decision.allowed {
            return Ok(());
        }

        tracing::warn!(used = decision.used, budget = decision.budget, "quota exceeded");
        Err(FlowError::QuotaExceeded(QuotaExceededError {
            reason: decision
                .reason
                .unwrap_or_else(|| "token budget exhausted".to_string()),
            used: decision.used,
            allowed: decision.budget,
        }))
    }

    /// Adds one model call's usage to the session.
    pub async fn record_session(
        &self,
        delta: TokenUsage,
        at: DateTime<Utc>,
    ) -> anyhow::Result<(Session, SessionUsage)> {
        let usage = SessionUsage {
            session_id: self.session_id.clone(),
            agent_id: self.agent_id.clone(),
            delta,
            at,
        };
        let session = self.sessions.record_usage(&usage).await?;
        Ok((session, usage))
    }

    /// Appends the stat record and forwards it to billing. Failures are logged.
    pub async fn record_stat(&self, usage: &SessionUsage, finish_reason: &str) {
        let stat = UsageStat::new(&self.event_name, usage.delta, Some(finish_reason), usage.at);
        if let Err(e) = self.stats.aggregate(stat.clone()).await {
            tracing::warn!(session_id = %self.session_id, error = %e, "failed to aggregate usage stat");
        }
        if let Some(billing) = &self.billing {
            if let Err(e) = billing.report(usage, &stat).await {
                tracing::warn!(session_id = %self.session_id, error = %e, "failed to report usage to billing");
            }
        }
    }

    /// Marks the session finished. Failures are logged.
    pub async fn finalize(&self, at: DateTime<Utc>) -> Option<Session> {
        match self.sessions.finalize(&self.session_id, at).await {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(session_id = %self.session_id, error = %e, "failed to finalize session");
                None
            }
        }
    }
}
