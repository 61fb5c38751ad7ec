use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::error::{AppError, Res};

/// Currency every plan is priced in.
pub const CURRENCY: &str = "INR";

/// Length of every usage period and subscription window.
pub const PERIOD_DAYS: i64 = 30;

/// A quota ceiling. Serialized as an integer, `-1` meaning unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    Capped(u32),
    Unlimited,
}

impl Limit {
    /// What is left after `used` units have been consumed.
    pub fn remaining(&self, used: u32) -> Limit {
        match self {
            Limit::Capped(max) => Limit::Capped(max.saturating_sub(used)),
            Limit::Unlimited => Limit::Unlimited,
        }
    }

    pub fn allows(&self, used: u32) -> bool {
        match self {
            Limit::Capped(max) => used < *max,
            Limit::Unlimited => true,
        }
    }

    pub fn as_i64(&self) -> i64 {
        match self {
            Limit::Capped(max) => i64::from(*max),
            Limit::Unlimited => -1,
        }
    }
}

impl Serialize for Limit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.as_i64())
    }
}

impl<'de> Deserialize<'de> for Limit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = i64::deserialize(deserializer)?;
        match raw {
            -1 => Ok(Limit::Unlimited),
            n => u32::try_from(n).map(Limit::Capped).map_err(|_| {
                serde::de::Error::custom(format!("limit must be -1 or a non-negative u32, got {}", n))
            }),
        }
    }
}

/// The two quota-limited operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaAction {
    ScheduleRoom,
    JoinPublicRoom,
}

impl QuotaAction {
    /// Reason attached to a denial for this action.
    pub fn exhausted_reason(&self) -> &'static str {
        match self {
            QuotaAction::ScheduleRoom => "room scheduling quota exhausted",
            QuotaAction::JoinPublicRoom => "public room join quota exhausted",
        }
    }
}

impl FromStr for QuotaAction {
    type Err = AppError;

    fn from_str(s: &str) -> Res<Self> {
        match s.trim().to_lowercase().as_str() {
            "schedule_room" | "schedule" => Ok(QuotaAction::ScheduleRoom),
            "join_public_room" | "join_room" => Ok(QuotaAction::JoinPublicRoom),
            "" => Err(AppError::BadRequest("access_request is required".to_string())),
            other => Err(AppError::BadRequest(format!("invalid access_request '{}'", other))),
        }
    }
}

impl fmt::Display for QuotaAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuotaAction::ScheduleRoom => write!(f, "schedule_room"),
            QuotaAction::JoinPublicRoom => write!(f, "join_public_room"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanLimits {
    pub room_duration: Limit,
    pub room_schedule_limit: Limit,
    pub public_room_join_limit: Limit,
}

impl PlanLimits {
    pub fn for_action(&self, action: QuotaAction) -> Limit {
        match action {
            QuotaAction::ScheduleRoom => self.room_schedule_limit,
            QuotaAction::JoinPublicRoom => self.public_room_join_limit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub description: String,
    /// Price in minor units (paise).
    pub price: i64,
    /// `None` for the free plan, which never expires by itself.
    pub valid_months: Option<u32>,
    pub features: Vec<String>,
    pub limits: PlanLimits,
}

impl Plan {
    pub fn is_free(&self) -> bool {
        self.price == 0
    }
}

/// Plan ids, the only part of the catalog that varies per deployment.
#[derive(Debug, Clone)]
pub struct PlanIds {
    pub free: Uuid,
    pub basic: Uuid,
    pub pro: Uuid,
}

/// Static plan table, loaded once per process.
#[derive(Debug, Clone)]
pub struct PlanCatalog {
    free: Plan,
    basic: Plan,
    pro: Plan,
}

impl PlanCatalog {
    pub fn new(ids: PlanIds) -> Self {
        let features = |n: usize| (1..=n).map(|i| format!("Feature {}", i)).collect();

        PlanCatalog {
            free: Plan {
                id: ids.free,
                slug: "free".to_string(),
                name: "Free".to_string(),
                description: "Free plan".to_string(),
                price: 0,
                valid_months: None,
                features: features(2),
                limits: PlanLimits {
                    room_duration: Limit::Capped(45),
                    room_schedule_limit: Limit::Capped(3),
                    public_room_join_limit: Limit::Capped(5),
                },
            },
            basic: Plan {
                id: ids.basic,
                slug: "basic".to_string(),
                name: "Basic".to_string(),
                description: "Basic plan".to_string(),
                price: 149_00,
                valid_months: Some(1),
                features: features(3),
                limits: PlanLimits {
                    room_duration: Limit::Capped(75),
                    room_schedule_limit: Limit::Capped(10),
                    public_room_join_limit: Limit::Capped(25),
                },
            },
            pro: Plan {
                id: ids.pro,
                slug: "pro".to_string(),
                name: "Pro".to_string(),
                description: "Pro plan".to_string(),
                price: 399_00,
                valid_months: Some(1),
                features: features(3),
                limits: PlanLimits {
                    room_duration: Limit::Capped(120),
                    room_schedule_limit: Limit::Capped(20),
                    public_room_join_limit: Limit::Unlimited,
                },
            },
        }
    }

    pub fn free(&self) -> &Plan {
        &self.free
    }

    pub fn all(&self) -> [&Plan; 3] {
        [&self.free, &self.basic, &self.pro]
    }

    /// Resolves the plan a subscription's `plan_type` refers to.
    /// Anything other than basic or pro falls back to free.
    pub fn for_plan_type(&self, plan_type: &str) -> &Plan {
        match plan_type.to_lowercase().as_str() {
            "basic" => &self.basic,
            "pro" => &self.pro,
            _ => &self.free,
        }
    }

    /// Looks a plan up by slug (case-insensitive) or by id.
    pub fn find(&self, plan_id: &str) -> Option<&Plan> {
        let plan_id = plan_id.trim();
        if let Ok(id) = Uuid::parse_str(plan_id) {
            return self.all().into_iter().find(|plan| plan.id == id);
        }
        let slug = plan_id.to_lowercase();
        self.all().into_iter().find(|plan| plan.slug == slug)
    }

    /// Like `find`, but only plans that can be bought.
    pub fn purchasable(&self, plan_id: &str) -> Res<&Plan> {
        match self.find(plan_id) {
            Some(plan) if !plan.is_free() => Ok(plan),
            Some(plan) => Err(AppError::InvalidPlan(format!(
                "plan '{}' cannot be purchased",
                plan.slug
            ))),
            None => Err(AppError::InvalidPlan(format!("unknown plan '{}'", plan_id))),
        }
    }
}
