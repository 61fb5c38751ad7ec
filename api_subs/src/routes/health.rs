use actix_web::{Responder, get};
use common::{error::Res, http::Success};

#[get("/health")]
pub async fn get_health() -> Res<impl Responder> {
    Success::text("OK")
}
