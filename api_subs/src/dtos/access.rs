use common::{
    error::{AppError, Res},
    plans::{Limit, Plan, QuotaAction},
};
use db::models::usage::UsageCounters;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct AccessQuery {
    #[serde(alias = "userId")]
    pub user_id: Option<String>,
    pub access_request: Option<String>,
}

impl AccessQuery {
    /// Checks the query before any I/O happens.
    pub fn validate(&self) -> Res<(Uuid, QuotaAction)> {
        let raw_user = self
            .user_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AppError::BadRequest("user_id is required".to_string()))?;
        let user_id = Uuid::parse_str(raw_user)
            .map_err(|_| AppError::BadRequest(format!("invalid user_id '{}'", raw_user)))?;
        if user_id.is_nil() {
            return Err(AppError::BadRequest("user_id must not be nil".to_string()));
        }
        let action = self.access_request.as_deref().unwrap_or("").parse()?;
        Ok((user_id, action))
    }
}

/// Outcome of a quota check.
#[derive(Debug, Clone, Serialize)]
pub struct AccessDecision {
    pub plan: Plan,
    pub allowed: bool,
    pub limit_left: Limit,
    pub plan_expired: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub usage: UsageCounters,
}
