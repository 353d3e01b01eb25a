//! Payment gateway client.
//!
//! The HTTP implementation speaks the Zarinpal v4 JSON protocol: a payment
//! request yields an `authority`, the customer is sent to the start-pay page,
//! and the callback is confirmed with a verify call.

use crate::{config::PaymentGatewayConfig, errors::ServiceError};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Success codes of the verify call: verified now, or verified earlier.
const VERIFIED_CODES: [i64; 2] = [100, 101];
const REQUEST_OK_CODE: i64 = 100;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("payment gateway unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("payment gateway rejected the request (code {code})")]
    Rejected { code: i64, message: Option<String> },

    #[error("unexpected payment gateway response: {0}")]
    InvalidResponse(String),
}

impl From<GatewayError> for ServiceError {
    fn from(err: GatewayError) -> Self {
        warn!(error = %err, "payment gateway call failed");
        ServiceError::GatewayError("Payment gateway is unavailable".to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    pub amount: i64,
    pub description: String,
    pub callback_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationOutcome {
    Confirmed { ref_id: String },
    Rejected { code: i64 },
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Opens a transaction and returns its authority.
    async fn request_payment(&self, request: &PaymentRequest) -> Result<String, GatewayError>;

    /// Asks the gateway whether the transaction was paid in full.
    async fn verify_payment(
        &self,
        authority: &str,
        amount: i64,
    ) -> Result<VerificationOutcome, GatewayError>;

    /// Page the customer is redirected to for this authority.
    fn redirect_url(&self, authority: &str) -> String;
}

pub struct HttpPaymentGateway {
    client: reqwest::Client,
    config: PaymentGatewayConfig,
}

impl HttpPaymentGateway {
    pub fn new(config: PaymentGatewayConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_base_url.trim_end_matches('/'), path)
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, GatewayError> {
        let response = self.client.post(self.endpoint(path)).json(body).send().await?;
        let status = response.status();
        let envelope: Envelope = response.json().await.map_err(|e| {
            GatewayError::InvalidResponse(format!("status {status}, unreadable body: {e}"))
        })?;
        debug!(%status, "gateway response");
        envelope.into_data()
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    data: Value,
    #[serde(default)]
    errors: Value,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: i64,
    #[serde(default)]
    message: Option<String>,
}

impl Envelope {
    /// `errors` is an object on failure and an empty array otherwise; `data`
    /// the other way round.
    fn into_data<T: DeserializeOwned>(self) -> Result<T, GatewayError> {
        if self.errors.is_object() {
            let err: ErrorBody = serde_json::from_value(self.errors)
                .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
            return Err(GatewayError::Rejected {
                code: err.code,
                message: err.message,
            });
        }
        serde_json::from_value(self.data).map_err(|e| GatewayError::InvalidResponse(e.to_string()))
    }
}

#[derive(Debug, Serialize)]
struct RequestBody<'a> {
    merchant_id: &'a str,
    amount: i64,
    description: &'a str,
    callback_url: &'a str,
}

#[derive(Debug, Deserialize)]
struct RequestData {
    code: i64,
    #[serde(default)]
    authority: Option<String>,
}

#[derive(Debug, Serialize)]
struct VerifyBody<'a> {
    merchant_id: &'a str,
    amount: i64,
    authority: &'a str,
}

#[derive(Debug, Deserialize)]
struct VerifyData {
    code: i64,
    #[serde(default)]
    ref_id: Option<Value>,
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self))]
    async fn request_payment(&self, request: &PaymentRequest) -> Result<String, GatewayError> {
        let body = RequestBody {
            merchant_id: &self.config.merchant_id,
            amount: request.amount,
            description: &request.description,
            callback_url: &request.callback_url,
        };
        let data: RequestData = self.post("payment/request.json", &body).await?;

        match data.authority {
            Some(authority) if data.code == REQUEST_OK_CODE && !authority.is_empty() => {
                Ok(authority)
            }
            _ => Err(GatewayError::Rejected {
                code: data.code,
                message: None,
            }),
        }
    }

    #[instrument(skip(self))]
    async fn verify_payment(
        &self,
        authority: &str,
        amount: i64,
    ) -> Result<VerificationOutcome, GatewayError> {
        let body = VerifyBody {
            merchant_id: &self.config.merchant_id,
            amount,
            authority,
        };
        let data: VerifyData = match self.post("payment/verify.json", &body).await {
            Ok(data) => data,
            // A definitive "no" from the gateway is an outcome, not a failure.
            Err(GatewayError::Rejected { code, .. }) => {
                return Ok(VerificationOutcome::Rejected { code })
            }
            Err(err) => return Err(err),
        };

        if !VERIFIED_CODES.contains(&data.code) {
            return Ok(VerificationOutcome::Rejected { code: data.code });
        }
        let ref_id = match data.ref_id {
            Some(Value::String(s)) => s,
            Some(Value::Number(n)) => n.to_string(),
            _ => {
                return Err(GatewayError::InvalidResponse(
                    "verified payment without ref_id".to_string(),
                ))
            }
        };
        Ok(VerificationOutcome::Confirmed { ref_id })
    }

    fn redirect_url(&self, authority: &str) -> String {
        format!(
            "{}/{}",
            self.config.start_pay_url.trim_end_matches('/'),
            authority
        )
    }
}
