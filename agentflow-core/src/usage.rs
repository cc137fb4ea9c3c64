use agentflow_context::TokenUsage;
use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Per-event usage record bucketed by UTC hour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageStat {
    pub event_name: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub finish_reasons: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub created_year: i32,
    pub created_month: u32,
    pub created_day: u32,
    pub created_hour: u32,
    pub counter: u64,
}

/// Aggregation key: event name plus hour bucket.
pub type StatKey = (String, i32, u32, u32, u32);

impl UsageStat {
    pub fn new(
        event_name: impl Into<String>,
        usage: TokenUsage,
        finish_reason: Option<&str>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_name: event_name.into(),
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            finish_reasons: finish_reason.map(|r| vec![r.to_string()]).unwrap_or_default(),
            created_at: at,
            created_year: at.year(),
            created_month: at.month(),
            created_day: at.day(),
            created_hour: at.hour(),
            counter: 1,
        }
    }

    pub fn key(&self) -> StatKey {
        (
            self.event_name.clone(),
            self.created_year,
            self.created_month,
            self.created_day,
            self.created_hour,
        )
    }

    pub fn usage(&self) -> TokenUsage {
        TokenUsage::new(self.prompt_tokens, self.completion_tokens)
    }

    /// Folds another record of the same bucket into this one.
    pub fn merge(&mut self, other: &UsageStat) {
        let total = self.usage() + other.usage();
        self.prompt_tokens = total.prompt_tokens;
        self.completion_tokens = total.completion_tokens;
        self.counter = self.counter.saturating_add(other.counter);
        for reason in &other.finish_reasons {
            if !self.finish_reasons.contains(reason) {
                self.finish_reasons.push(reason.clone());
            }
        }
        if other.created_at < self.created_at {
            self.created_at = other.created_at;
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageTotals {
    pub overall_tokens: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub requests: u64,
}

impl UsageTotals {
    fn add(&mut self, stat: &UsageStat) {
        self.prompt_tokens += stat.prompt_tokens;
        self.completion_tokens += stat.completion_tokens;
        self.overall_tokens += stat.prompt_tokens + stat.completion_tokens;
        self.requests += stat.counter;
    }
}

/// Usage totals for the windows a quota is usually judged on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedStats {
    pub this_month: UsageTotals,
    pub last_month: UsageTotals,
    pub today: UsageTotals,
}

impl AggregatedStats {
    pub fn from_stats<'a, I>(stats: I, now: DateTime<Utc>) -> Self
    where
        I: IntoIterator<Item = &'a UsageStat>,
    {
        let last = last_month_of(now);
        let mut out = AggregatedStats::default();
        for stat in stats {
            let month = (stat.created_year, stat.created_month);
            if month == (now.year(), now.month()) {
                out.this_month.add(stat);
                if stat.created_day == now.day() {
                    out.today.add(stat);
                }
            } else if month == last {
                out.last_month.add(stat);
            }
        }
        out
    }
}

fn last_month_of(now: DateTime<Utc>) -> (i32, u32) {
    let first = Utc
        .with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(now);
    let prev = first - Duration::days(1);
    (prev.year(), prev.month())
}
