//! payment.rs
//!
//! Payment collaborator contract and its adapters.
//!
//! Key components:
//! 1.  **PaymentGateway**: the only payment surface the engine talks to
//!     (`create_intent`, `confirm_payment`, `refund_payment`).
//! 2.  **CircuitBreaker**: stops hammering a gateway that keeps failing.
//! 3.  **PaymentGatewayClient**: HTTP adapter for the merchant gateway; every
//!     request is signed with a SHA-256 token and goes through the breaker.
//! 4.  **MockPaymentGateway**: offline adapter for development and tests.

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{CircuitBreakerConfig, PaymentConfig};
use crate::error::{AppError, AppResult};

/// What the engine hands the gateway to open a payment.
#[derive(Debug, Clone)]
pub struct PaymentIntentRequest {
    pub order_id: Uuid,
    pub order_number: String,
    pub amount: Decimal,
    pub currency: String,
    pub user_id: Uuid,
    pub user_email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntent {
    pub intent_id: String,
    pub client_secret: String,
}

/// Where a payment stands after the buyer returns from the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Money is captured.
    Captured,
    /// Terminal decline; the order may be failed.
    Declined,
    /// Still processing or unknown; ask again later.
    Unsettled,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Name recorded as the order's payment method.
    fn provider(&self) -> &'static str;

    async fn create_intent(&self, request: &PaymentIntentRequest) -> AppResult<PaymentIntent>;

    /// A client secret that does not belong to the intent is a BadRequest.
    async fn confirm_payment(
        &self,
        intent_id: &str,
        client_secret: &str,
    ) -> AppResult<Settlement>;

    /// Reverses a captured payment; `None` refunds the full amount.
    async fn refund_payment(&self, payment_id: &str, amount: Option<Decimal>) -> AppResult<bool>;
}

// --- Circuit breaker ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests flow normally.
    Closed,
    /// Requests are refused until the cool-down elapses.
    Open,
    /// One probe request is allowed through.
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    opened_at: Option<Instant>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    failure_count: AtomicU32,
    failure_threshold: u32,
    timeout_duration: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(BreakerInner { state: CircuitState::Closed, opened_at: None }),
            failure_count: AtomicU32::new(0),
            failure_threshold: failure_threshold.max(1),
            timeout_duration: timeout,
        }
    }

    fn inner(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn can_execute(&self) -> bool {
        let mut inner = self.inner();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let cooled_down = inner
                    .opened_at
                    .is_some_and(|at| at.elapsed() >= self.timeout_duration);
                if cooled_down {
                    inner.state = CircuitState::HalfOpen;
                    info!("Circuit breaker transitioning to HalfOpen state");
                }
                cooled_down
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner();
        if inner.state == CircuitState::HalfOpen {
            info!("Circuit breaker recovered - transitioning to Closed state");
        }
        inner.state = CircuitState::Closed;
        inner.opened_at = None;
        self.failure_count.store(0, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        let failures = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;
        let mut inner = self.inner();
        match inner.state {
            CircuitState::Closed if failures >= self.failure_threshold => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                error!(
                    failures,
                    threshold = self.failure_threshold,
                    "Circuit breaker OPENED"
                );
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                warn!("Circuit breaker probe failed - returning to Open state");
            }
            _ => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner().state
    }
}

// --- Gateway wire models ---

#[derive(Debug, Serialize)]
struct PaymentInitRequest {
    #[serde(rename = "teamSlug")]
    team_slug: String,
    token: String,
    amount: i64,
    #[serde(rename = "orderId")]
    order_id: String,
    currency: String,
    description: String,
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PaymentInitResponse {
    success: bool,
    #[serde(rename = "paymentId")]
    payment_id: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Serialize)]
struct PaymentCheckRequest {
    #[serde(rename = "teamSlug")]
    team_slug: String,
    token: String,
    #[serde(rename = "paymentId")]
    payment_id: String,
}

#[derive(Debug, Deserialize)]
struct PaymentCheckResponse {
    success: bool,
    status: Option<String>,
}

#[derive(Debug, Serialize)]
struct PaymentActionRequest {
    #[serde(rename = "teamSlug")]
    team_slug: String,
    token: String,
    #[serde(rename = "paymentId")]
    payment_id: String,
    amount: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct PaymentActionResponse {
    success: bool,
    message: Option<String>,
}

/// Decimal amount to gateway minor units (cents).
fn to_minor_units(amount: Decimal) -> AppResult<i64> {
    (amount * Decimal::ONE_HUNDRED)
        .round()
        .to_i64()
        .ok_or_else(|| AppError::bad_request(format!("amount {amount} out of range")))
}

// --- HTTP adapter ---

#[derive(Clone)]
pub struct PaymentGatewayClient {
    team_slug: String,
    password: String,
    base_url: String,
    http_client: reqwest::Client,
    circuit_breaker: std::sync::Arc<CircuitBreaker>,
}

impl PaymentGatewayClient {
    pub fn from_config(config: &PaymentConfig, breaker: &CircuitBreakerConfig) -> AppResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| AppError::Internal(format!("payment http client: {e}")))?;

        Ok(Self {
            team_slug: config.merchant_id.clone(),
            password: config.merchant_password.clone(),
            base_url: config.gateway_url.trim_end_matches('/').to_string(),
            http_client,
            circuit_breaker: std::sync::Arc::new(CircuitBreaker::new(
                breaker.failure_threshold,
                Duration::from_secs(breaker.timeout_seconds),
            )),
        })
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.state()
    }

    fn sign(&self, parts: &[&str]) -> String {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part.as_bytes());
        }
        hasher.update(self.password.as_bytes());
        hasher.update(self.team_slug.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Secret handed to the buyer's client; binds the intent to this merchant.
    fn client_secret_for(&self, intent_id: &str) -> String {
        self.sign(&["client-secret", intent_id])
    }

    async fn post<Req, Resp>(&self, path: &str, body: &Req) -> AppResult<Resp>
    where
        Req: Serialize + Sync,
        Resp: serde::de::DeserializeOwned + Send,
    {
        if !self.circuit_breaker.can_execute() {
            warn!("Circuit breaker is OPEN - blocking payment gateway request");
            return Err(AppError::PaymentGateway(
                "payment gateway temporarily unavailable".to_string(),
            ));
        }

        let result = async {
            self.http_client
                .post(format!("{}{}", self.base_url, path))
                .json(body)
                .send()
                .await?
                .error_for_status()?
                .json::<Resp>()
                .await
        }
        .await;

        match result {
            Ok(response) => {
                self.circuit_breaker.record_success();
                Ok(response)
            }
            Err(e) => {
                error!(path, error = ?e, "Payment gateway request failed");
                self.circuit_breaker.record_failure();
                Err(AppError::PaymentGateway(format!("payment gateway error: {e}")))
            }
        }
    }

    async fn check_status(&self, payment_id: &str) -> AppResult<Option<String>> {
        let request = PaymentCheckRequest {
            team_slug: self.team_slug.clone(),
            token: self.sign(&[payment_id]),
            payment_id: payment_id.to_string(),
        };
        let response: PaymentCheckResponse =
            self.post("/api/v1/PaymentCheck/check", &request).await?;
        Ok(if response.success { response.status } else { None })
    }

    async fn action(&self, path: &str, payment_id: &str, amount: Option<i64>) -> AppResult<bool> {
        let amount_part = amount.map(|a| a.to_string()).unwrap_or_default();
        let request = PaymentActionRequest {
            team_slug: self.team_slug.clone(),
            token: self.sign(&[payment_id, &amount_part]),
            payment_id: payment_id.to_string(),
            amount,
        };
        let response: PaymentActionResponse = self.post(path, &request).await?;
        if !response.success {
            warn!(
                payment_id,
                path,
                message = response.message.as_deref().unwrap_or("unknown"),
                "Payment gateway refused the request"
            );
        }
        Ok(response.success)
    }
}

#[async_trait]
impl PaymentGateway for PaymentGatewayClient {
    fn provider(&self) -> &'static str {
        "gateway"
    }

    async fn create_intent(&self, request: &PaymentIntentRequest) -> AppResult<PaymentIntent> {
        let amount = to_minor_units(request.amount)?;
        let order_id = request.order_id.to_string();
        let body = PaymentInitRequest {
            team_slug: self.team_slug.clone(),
            token: self.sign(&[&amount.to_string(), &request.currency, &order_id]),
            amount,
            order_id,
            currency: request.currency.clone(),
            description: format!("Order {}", request.order_number),
            email: request.user_email.clone(),
        };

        info!(order_number = %request.order_number, amount, currency = %request.currency, "Creating payment intent");

        let response: PaymentInitResponse = self.post("/api/v1/PaymentInit/init", &body).await?;
        match (response.success, response.payment_id) {
            (true, Some(intent_id)) => Ok(PaymentIntent {
                client_secret: self.client_secret_for(&intent_id),
                intent_id,
            }),
            _ => Err(AppError::PaymentGateway(
                response.message.unwrap_or_else(|| "payment could not be initiated".to_string()),
            )),
        }
    }

    async fn confirm_payment(
        &self,
        intent_id: &str,
        client_secret: &str,
    ) -> AppResult<Settlement> {
        if client_secret != self.client_secret_for(intent_id) {
            warn!(intent_id, "Client secret does not match payment intent");
            return Err(AppError::bad_request("client secret does not match the payment"));
        }

        match self.check_status(intent_id).await?.as_deref() {
            Some("CONFIRMED") => Ok(Settlement::Captured),
            // Authorized but not captured yet: capture now, otherwise try again later.
            Some("AUTHORIZED") => {
                if self.action("/api/v1/PaymentConfirm/confirm", intent_id, None).await? {
                    Ok(Settlement::Captured)
                } else {
                    warn!(intent_id, "Could not capture authorized payment, leaving it unsettled");
                    Ok(Settlement::Unsettled)
                }
            }
            Some("CANCELLED" | "FAILED" | "REJECTED" | "EXPIRED" | "REFUNDED") => {
                Ok(Settlement::Declined)
            }
            Some("NEW") => Ok(Settlement::Unsettled),
            other => {
                warn!(intent_id, status = ?other, "Unknown payment status");
                Ok(Settlement::Unsettled)
            }
        }
    }

    async fn refund_payment(&self, payment_id: &str, amount: Option<Decimal>) -> AppResult<bool> {
        let amount = amount.map(to_minor_units).transpose()?;
        self.action("/api/v1/PaymentCancel/cancel", payment_id, amount).await
    }
}

// --- Offline adapter ---

/// Captures every payment whose client secret matches, unless built with
/// [`MockPaymentGateway::declining`] or [`MockPaymentGateway::unsettled`].
#[derive(Debug, Default)]
pub struct MockPaymentGateway {
    decline: bool,
    unsettled: bool,
    refunds: tokio::sync::Mutex<Vec<(String, Option<Decimal>)>>,
}

impl MockPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declining() -> Self {
        Self { decline: true, ..Self::default() }
    }

    pub fn unsettled() -> Self {
        Self { unsettled: true, ..Self::default() }
    }

    pub fn secret_for(intent_id: &str) -> String {
        format!("{intent_id}_secret")
    }

    pub async fn refunds(&self) -> Vec<(String, Option<Decimal>)> {
        self.refunds.lock().await.clone()
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    fn provider(&self) -> &'static str {
        "mock"
    }

    async fn create_intent(&self, request: &PaymentIntentRequest) -> AppResult<PaymentIntent> {
        let intent_id = format!("pi_mock_{}", request.order_id.simple());
        Ok(PaymentIntent { client_secret: Self::secret_for(&intent_id), intent_id })
    }

    async fn confirm_payment(
        &self,
        intent_id: &str,
        client_secret: &str,
    ) -> AppResult<Settlement> {
        if client_secret != Self::secret_for(intent_id) {
            return Err(AppError::bad_request("client secret does not match the payment"));
        }
        Ok(if self.decline {
            Settlement::Declined
        } else if self.unsettled {
            Settlement::Unsettled
        } else {
            Settlement::Captured
        })
    }

    async fn refund_payment(&self, payment_id: &str, amount: Option<Decimal>) -> AppResult<bool> {
        self.refunds.lock().await.push((payment_id.to_string(), amount));
        Ok(!self.decline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn breaker_opens_after_threshold_and_probes_after_cooldown() {
        let breaker = CircuitBreaker::new(2, Duration::from_millis(0));
        assert!(breaker.can_execute());
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        // zero cool-down: the next call is the probe
        assert!(breaker.can_execute());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn open_breaker_blocks_until_cooldown() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(3600));
        breaker.record_failure();
        assert!(!breaker.can_execute());
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn failed_probe_reopens() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(0));
        breaker.record_failure();
        assert!(breaker.can_execute());
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn minor_units() {
        assert_eq!(to_minor_units(Decimal::from_str("283.5").unwrap()).unwrap(), 28350);
        assert_eq!(to_minor_units(Decimal::from_str("0.01").unwrap()).unwrap(), 1);
    }

    #[tokio::test]
    async fn mock_gateway_checks_client_secret() {
        let gateway = MockPaymentGateway::new();
        let intent = gateway
            .create_intent(&PaymentIntentRequest {
                order_id: Uuid::new_v4(),
                order_number: "ORD-20300101-ABCDEF".to_string(),
                amount: Decimal::ONE_HUNDRED,
                currency: "USD".to_string(),
                user_id: Uuid::new_v4(),
                user_email: None,
            })
            .await
            .unwrap();

        assert_eq!(
            gateway.confirm_payment(&intent.intent_id, &intent.client_secret).await.unwrap(),
            Settlement::Captured
        );
        assert!(matches!(
            gateway.confirm_payment(&intent.intent_id, "wrong").await,
            Err(AppError::BadRequest(_))
        ));
        assert_eq!(
            MockPaymentGateway::declining()
                .confirm_payment(&intent.intent_id, &intent.client_secret)
                .await
                .unwrap(),
            Settlement::Declined
        );
    }
}
