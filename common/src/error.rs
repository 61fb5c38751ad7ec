use actix_web::{HttpResponse, http::StatusCode};
use thiserror::Error;

pub type Res<T> = std::result::Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    // === CONVERSION ERRORS ===
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),

    // === VALIDATION ERRORS ===
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    // === DOMAIN OUTCOMES ===
    #[error("{0}")]
    QuotaExceeded(String),

    #[error("Payment signature mismatch")]
    SignatureMismatch,

    #[error("Payment already settled: {0}")]
    AlreadySettled(String),

    #[error("Resource conflict: {0}")]
    Conflict(String),

    // === STORAGE / GATEWAY FAILURES ===
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Payment gateway error: {0}")]
    Gateway(String),

    #[error("{0}")]
    Internal(String),
}

impl AppError {
    /// Maps an insert failure, turning a unique-key violation into `Conflict`.
    pub fn from_insert(error: sqlx::Error, what: &str) -> Self {
        if let sqlx::Error::Database(db_error) = &error {
            if db_error.is_unique_violation() {
                return AppError::Conflict(format!("{} already exists", what));
            }
        }
        AppError::Database(error)
    }

    /// Whether the details of this error stay internal (logged, not returned).
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            AppError::Database(_)
                | AppError::Reqwest(_)
                | AppError::TransactionFailed(_)
                | AppError::Decode(_)
                | AppError::Gateway(_)
                | AppError::Internal(_)
        )
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) | AppError::InvalidPlan(_) | AppError::SignatureMismatch => {
                StatusCode::BAD_REQUEST
            }
            AppError::QuotaExceeded(_) => StatusCode::FORBIDDEN,
            AppError::AlreadySettled(_) | AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Reqwest(_) | AppError::Gateway(_) => StatusCode::BAD_GATEWAY,
            AppError::Database(_)
            | AppError::TransactionFailed(_)
            | AppError::Decode(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn to_http_response(&self) -> HttpResponse {
        let is_dev = cfg!(debug_assertions);

        if self.is_internal() {
            log::error!("{}", self);
            let body = if is_dev {
                serde_json::json!({ "error": self.to_string() })
            } else {
                serde_json::json!({ "error": "Internal server error" })
            };
            return HttpResponse::build(self.status()).json(body);
        }

        HttpResponse::build(self.status()).json(serde_json::json!({ "error": self.to_string() }))
    }
}

impl actix_web::ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        self.status()
    }

    fn error_response(&self) -> HttpResponse {
        self.to_http_response()
    }
}
