use chrono::{DateTime, Utc};
use db::models::usage::UsageCounters;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct CurrentUsage {
    /// `None` when the user has no period yet and a free view is returned.
    pub period_id: Option<Uuid>,
    pub plan_type: String,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub usage: UsageCounters,
}

#[derive(Debug, Serialize)]
pub struct UsageHistoryEntry {
    pub period_id: Uuid,
    pub subscription_id: Option<Uuid>,
    pub plan_type: String,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub usage: UsageCounters,
}
