//! HTTP client for the external payment gateway, wrapped in the resilience
//! stack.
//!
//! Composition, outer to inner: per-request timeout (on the HTTP client) →
//! circuit breaker (failure rate over a sliding call window, shared
//! process-wide for this target) → bulkhead (semaphore) → retry.
//!
//! Retry is method-specific:
//!
//! - [`PaymentGateway::request_payment`] is the user-facing path and never
//!   retries; a failure leaves the order Pending for the recovery loop.
//! - The two query methods are scheduler-driven and retry transient failures
//!   (5xx, timeouts, connection errors) three attempts deep with jittered
//!   exponential backoff. A 4xx is permanent and never retried.
//!
//! When the circuit is open or retries are exhausted the client returns the
//! [`GatewayReply::Unavailable`] marker instead of an error: payment state is
//! unknown and nothing downstream may cancel an order over it.

use commerce_core::config::GatewayConfig;
use commerce_core::error::CommerceError;
use commerce_core::ids::OrderId;
use commerce_core::store::{GatewayReply, GatewayTransaction, PaymentGateway, PaymentRequest};
use commerce_runtime::bulkhead::{Bulkhead, BulkheadError};
use commerce_runtime::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};
use commerce_runtime::retry::{retry_with_predicate, RetryPolicy};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Header carrying the caller's external user id.
const USER_HEADER: &str = "X-USER-ID";

/// The gateway client could not be constructed.
#[derive(Error, Debug)]
#[error("failed to build gateway client: {0}")]
pub struct GatewayInitError(String);

/// One raw call's failure, classified for retry and disposition.
#[derive(Error, Debug)]
enum CallError {
    /// 5xx, timeout, or connection failure; worth retrying on scheduler
    /// paths.
    #[error("transient gateway failure: {0}")]
    Transient(String),
    /// 4xx; a permanent client error, never retried.
    #[error("gateway rejected the request with status {0}")]
    Permanent(u16),
}

impl CallError {
    const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// HTTP [`PaymentGateway`] with the full resilience stack.
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: String,
    breaker: CircuitBreaker,
    bulkhead: Bulkhead,
    query_retry: RetryPolicy,
}

impl HttpPaymentGateway {
    /// Build the client from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayInitError`] when the underlying HTTP client cannot
    /// be constructed.
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayInitError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayInitError(e.to_string()))?;

        let breaker = CircuitBreaker::new(
            CircuitBreakerConfig::builder()
                .failure_rate_threshold(config.circuit_failure_threshold)
                .window(config.circuit_window)
                .open_duration(config.circuit_open_duration)
                .build(),
        );

        // 3 attempts total: base 500ms, doubling, capped at 5s, jittered.
        let query_retry = RetryPolicy::builder()
            .max_retries(2)
            .initial_delay(Duration::from_millis(500))
            .multiplier(2.0)
            .max_delay(Duration::from_secs(5))
            .jitter(true)
            .build();

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            breaker,
            bulkhead: Bulkhead::new(config.bulkhead),
            query_retry,
        })
    }

    /// The shared circuit breaker, exposed for health reporting.
    #[must_use]
    pub const fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    async fn parse<T: DeserializeOwned>(
        response: Result<reqwest::Response, reqwest::Error>,
    ) -> Result<T, CallError> {
        let response = response.map_err(|e| CallError::Transient(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            response
                .json::<T>()
                .await
                .map_err(|e| CallError::Transient(format!("malformed gateway response: {e}")))
        } else if status.is_client_error() {
            Err(CallError::Permanent(status.as_u16()))
        } else {
            Err(CallError::Transient(format!("gateway returned {status}")))
        }
    }

    /// Run one operation through breaker → bulkhead → (optional) retry and
    /// map the outcome onto the fallback contract.
    async fn guarded<T, F, Fut>(
        &self,
        retry: Option<&RetryPolicy>,
        operation: F,
    ) -> Result<GatewayReply<T>, CommerceError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let outcome = self
            .breaker
            .call(|| {
                self.bulkhead.call(|| async {
                    match retry {
                        Some(policy) => {
                            retry_with_predicate(policy.clone(), &operation, CallError::is_transient)
                                .await
                        }
                        None => operation().await,
                    }
                })
            })
            .await;

        match outcome {
            Ok(value) => Ok(GatewayReply::Answered(value)),
            Err(CircuitBreakerError::Open) => {
                tracing::warn!("payment gateway circuit open, reporting unavailable");
                Ok(GatewayReply::Unavailable)
            }
            Err(CircuitBreakerError::Inner(BulkheadError::Closed)) => {
                Ok(GatewayReply::Unavailable)
            }
            Err(CircuitBreakerError::Inner(BulkheadError::Inner(CallError::Transient(reason)))) => {
                tracing::warn!(%reason, "payment gateway unreachable, reporting unavailable");
                Ok(GatewayReply::Unavailable)
            }
            Err(CircuitBreakerError::Inner(BulkheadError::Inner(CallError::Permanent(status)))) => {
                Err(CommerceError::GatewayRejected { status })
            }
        }
    }
}

impl PaymentGateway for HttpPaymentGateway {
    fn request_payment(
        &self,
        user_external_id: &str,
        request: &PaymentRequest,
    ) -> Pin<Box<dyn Future<Output = Result<GatewayReply<GatewayTransaction>, CommerceError>> + Send + '_>>
    {
        let user = user_external_id.to_owned();
        let request = request.clone();
        Box::pin(async move {
            let url = format!("{}/api/v1/payments", self.base_url);
            // User path: no retry, fail fast.
            self.guarded(None, || {
                let call = self
                    .client
                    .post(&url)
                    .header(USER_HEADER, &user)
                    .json(&request)
                    .send();
                async move { Self::parse::<GatewayTransaction>(call.await).await }
            })
            .await
        })
    }

    fn transactions_by_order(
        &self,
        user_external_id: &str,
        order_id: OrderId,
    ) -> Pin<Box<dyn Future<Output = Result<GatewayReply<Vec<GatewayTransaction>>, CommerceError>> + Send + '_>>
    {
        let user = user_external_id.to_owned();
        Box::pin(async move {
            let url = format!("{}/api/v1/payments", self.base_url);
            self.guarded(Some(&self.query_retry), || {
                let call = self
                    .client
                    .get(&url)
                    .query(&[("orderId", order_id.0)])
                    .header(USER_HEADER, &user)
                    .send();
                async move { Self::parse::<Vec<GatewayTransaction>>(call.await).await }
            })
            .await
        })
    }

    fn transaction(
        &self,
        user_external_id: &str,
        transaction_key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<GatewayReply<GatewayTransaction>, CommerceError>> + Send + '_>>
    {
        let user = user_external_id.to_owned();
        let key = transaction_key.to_owned();
        Box::pin(async move {
            let url = format!("{}/api/v1/payments/{key}", self.base_url);
            self.guarded(Some(&self.query_retry), || {
                let call = self.client.get(&url).header(USER_HEADER, &user).send();
                async move { Self::parse::<GatewayTransaction>(call.await).await }
            })
            .await
        })
    }
}
