use chrono::{DateTime, Local, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Wall-clock information supplied by the caller of one execution.
///
/// Agents see these values through the `{{currentDateTimeIso}}`,
/// `{{currentLocalDateTime}}` and `{{currentTimezone}}` placeholders of
/// their system prompts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestClock {
    pub current_date_time_iso: String,
    pub current_local_date_time: String,
    pub current_timezone: String,
}

impl RequestClock {
    pub fn new(
        current_date_time_iso: impl Into<String>,
        current_local_date_time: impl Into<String>,
        current_timezone: impl Into<String>,
    ) -> Self {
        Self {
            current_date_time_iso: current_date_time_iso.into(),
            current_local_date_time: current_local_date_time.into(),
            current_timezone: current_timezone.into(),
        }
    }

    /// Clock read from the server when the caller sent none.
    pub fn utc_now() -> Self {
        Self::at(Utc::now())
    }

    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            current_date_time_iso: now.to_rfc3339_opts(SecondsFormat::Millis, true),
            current_local_date_time: now
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
            current_timezone: "UTC".to_string(),
        }
    }

    /// Placeholder name/value pairs exposed to system prompts.
    pub fn variables(&self) -> [(&'static str, &str); 3] {
        [
            ("currentDateTimeIso", self.current_date_time_iso.as_str()),
            ("currentLocalDateTime", self.current_local_date_time.as_str()),
            ("currentTimezone", self.current_timezone.as_str()),
        ]
    }
}

impl Default for RequestClock {
    fn default() -> Self {
        Self::utc_now()
    }
}
