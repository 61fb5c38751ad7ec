use async_trait::async_trait;
use common::{
    env_config::GatewayConfig,
    error::{AppError, Res},
};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// An order created at the gateway, handed to the client to start checkout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderHandle {
    pub id: String,
    /// Minor units.
    pub amount: i64,
    pub currency: String,
    pub receipt: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundHandle {
    pub id: String,
    pub payment_id: String,
    pub amount: i64,
    pub status: String,
}

/// The capabilities the service needs from the payment gateway. Signature
/// verification is not part of it; callbacks are verified locally.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_order(&self, amount: i64, currency: &str, receipt: &str) -> Res<OrderHandle>;

    async fn refund(&self, payment_id: &str, amount: i64) -> Res<RefundHandle>;
}

#[derive(Deserialize)]
struct GatewayErrorBody {
    error: GatewayErrorDetail,
}

#[derive(Deserialize)]
struct GatewayErrorDetail {
    code: Option<String>,
    description: Option<String>,
}

/// Razorpay REST client.
pub struct RazorpayGateway {
    client: reqwest::Client,
    config: GatewayConfig,
}

impl RazorpayGateway {
    pub fn new(config: GatewayConfig) -> Res<Self> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn post<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Res<T> {
        let response = self
            .client
            .post(self.url(path))
            .basic_auth(&self.config.api_key, Some(&self.config.api_secret))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let description = serde_json::from_str::<GatewayErrorBody>(&text)
                .ok()
                .map(|body| {
                    format!(
                        "{}: {}",
                        body.error.code.unwrap_or_default(),
                        body.error.description.unwrap_or_default()
                    )
                })
                .unwrap_or(text);
            return Err(AppError::Gateway(format!(
                "POST {} failed with {}: {}",
                path, status, description
            )));
        }

        response.json::<T>().await.map_err(AppError::from)
    }
}

#[async_trait]
impl PaymentGateway for RazorpayGateway {
    async fn create_order(&self, amount: i64, currency: &str, receipt: &str) -> Res<OrderHandle> {
        log::info!("Creating gateway order of {} {} (receipt {})", amount, currency, receipt);
        self.post(
            "orders",
            json!({
                "amount": amount,
                "currency": currency,
                "receipt": receipt,
            }),
        )
        .await
    }

    async fn refund(&self, payment_id: &str, amount: i64) -> Res<RefundHandle> {
        log::info!("Requesting refund of {} for payment {}", amount, payment_id);
        self.post(
            &format!("payments/{}/refund", payment_id),
            json!({
                "amount": amount,
                "speed": "normal",
                "notes": {},
            }),
        )
        .await
    }
}
