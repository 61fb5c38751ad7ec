use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::usage::UsageCounters;

pub struct UsagePeriodCreateRequest {
    pub user_id: Uuid,
    pub subscription_id: Option<Uuid>,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub counters: UsageCounters,
}
