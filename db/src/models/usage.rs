use chrono::{DateTime, Utc};
use common::{
    error::{AppError, Res},
    plans::QuotaAction,
};
use serde::Serialize;
use uuid::Uuid;

/// Layout version of the usage counters stored with each period.
pub const USAGE_VERSION: i16 = 1;

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct UsagePeriod {
    pub id: Uuid,
    pub user_id: Uuid,
    /// `None` for free-tier periods.
    pub subscription_id: Option<Uuid>,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub usage_version: i16,
    pub schedule_count: i32,
    pub public_join_count: i32,
    pub created_at: DateTime<Utc>,
}

impl UsagePeriod {
    /// The window is half-open: `[valid_from, valid_until)`.
    pub fn is_current(&self, now: DateTime<Utc>) -> bool {
        self.valid_from <= now && now < self.valid_until
    }

    pub fn has_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.valid_until <= now
    }

    /// Decodes the counter columns, refusing rows written under another
    /// layout version or holding negative counts.
    pub fn counters(&self) -> Res<UsageCounters> {
        if self.usage_version != USAGE_VERSION {
            return Err(AppError::Decode(format!(
                "usage period {} has unsupported usage version {}",
                self.id, self.usage_version
            )));
        }
        let decode = |value: i32, field: &str| {
            u32::try_from(value).map_err(|_| {
                AppError::Decode(format!(
                    "usage period {} has negative {} ({})",
                    self.id, field, value
                ))
            })
        };
        Ok(UsageCounters {
            version: USAGE_VERSION as u16,
            schedule: decode(self.schedule_count, "schedule_count")?,
            public_join: decode(self.public_join_count, "public_join_count")?,
        })
    }
}

/// Consumed quota within one period. Rows are decoded through
/// [`UsagePeriod::counters`]; this is the only serialized form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UsageCounters {
    pub version: u16,
    #[serde(rename = "room_schedule_quota")]
    pub schedule: u32,
    #[serde(rename = "public_room_quota")]
    pub public_join: u32,
}

impl UsageCounters {
    pub fn zero() -> Self {
        UsageCounters {
            version: USAGE_VERSION as u16,
            schedule: 0,
            public_join: 0,
        }
    }

    /// Counters of a period opened by consuming one `action`.
    pub fn seeded(action: QuotaAction) -> Self {
        let mut counters = Self::zero();
        match action {
            QuotaAction::ScheduleRoom => counters.schedule = 1,
            QuotaAction::JoinPublicRoom => counters.public_join = 1,
        }
        counters
    }

    pub fn get(&self, action: QuotaAction) -> u32 {
        match action {
            QuotaAction::ScheduleRoom => self.schedule,
            QuotaAction::JoinPublicRoom => self.public_join,
        }
    }
}
