use actix_web::{HttpResponse, Responder};
use serde::Serialize;

use super::error::Res;

/// Shorthands for the success responses every route returns.
pub struct Success;
impl Success {
    /// 201 with a JSON body, used when a handler persisted a new record.
    pub fn created<T: Serialize>(body: T) -> Res<impl Responder> {
        Result::Ok(HttpResponse::Created().json(body))
    }
    pub fn ok<T: Serialize>(body: T) -> Res<impl Responder> {
        Result::Ok(HttpResponse::Ok().json(body))
    }
    pub fn text(body: &'static str) -> Res<impl Responder> {
        Result::Ok(HttpResponse::Ok().content_type("text/plain").body(body))
    }
}
