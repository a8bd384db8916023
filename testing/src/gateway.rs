//! Scriptable payment gateway for tests.

use commerce_core::error::CommerceError;
use commerce_core::ids::OrderId;
use commerce_core::store::{
    GatewayReply, GatewayStatus, GatewayTransaction, PaymentGateway, PaymentRequest,
};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// What the mock gateway should answer for a payment request.
#[derive(Debug, Clone)]
pub enum ScriptedPayment {
    /// Synchronous success with the given transaction key.
    Success {
        /// Transaction key to report.
        transaction_key: String,
    },
    /// Synchronous decline.
    Failed {
        /// Transaction key to report.
        transaction_key: String,
        /// Decline reason.
        reason: String,
    },
    /// Gateway accepted the request but left it pending.
    Pending {
        /// Transaction key to report.
        transaction_key: String,
    },
    /// Circuit open / timeout: the unavailable marker.
    Unavailable,
    /// Permanent 4xx rejection.
    Rejected {
        /// HTTP status to report.
        status: u16,
    },
}

impl ScriptedPayment {
    fn reply(&self) -> Result<GatewayReply<GatewayTransaction>, CommerceError> {
        match self {
            Self::Success { transaction_key } => Ok(GatewayReply::Answered(GatewayTransaction {
                transaction_key: transaction_key.clone(),
                status: GatewayStatus::Success,
                reason: None,
            })),
            Self::Failed { transaction_key, reason } => {
                Ok(GatewayReply::Answered(GatewayTransaction {
                    transaction_key: transaction_key.clone(),
                    status: GatewayStatus::Failed,
                    reason: Some(reason.clone()),
                }))
            }
            Self::Pending { transaction_key } => Ok(GatewayReply::Answered(GatewayTransaction {
                transaction_key: transaction_key.clone(),
                status: GatewayStatus::Pending,
                reason: None,
            })),
            Self::Unavailable => Ok(GatewayReply::Unavailable),
            Self::Rejected { status } => Err(CommerceError::GatewayRejected { status: *status }),
        }
    }
}

/// Scriptable in-memory payment gateway.
///
/// Per-order scripts override the default; query responses are scripted
/// separately so recovery tests can steer them independently of the original
/// request path.
pub struct MockPaymentGateway {
    default: Mutex<ScriptedPayment>,
    per_order: Mutex<HashMap<OrderId, ScriptedPayment>>,
    query_results: Mutex<HashMap<OrderId, GatewayReply<Vec<GatewayTransaction>>>>,
    request_calls: AtomicUsize,
    query_calls: AtomicUsize,
}

impl Default for MockPaymentGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPaymentGateway {
    /// Create a gateway that leaves every payment pending with key
    /// `"tx-{order}"`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            default: Mutex::new(ScriptedPayment::Pending { transaction_key: "tx-default".into() }),
            per_order: Mutex::new(HashMap::new()),
            query_results: Mutex::new(HashMap::new()),
            request_calls: AtomicUsize::new(0),
            query_calls: AtomicUsize::new(0),
        }
    }

    /// Shared handle.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Set the default script for all orders.
    pub async fn script_default(&self, script: ScriptedPayment) {
        *self.default.lock().await = script;
    }

    /// Script one order's payment request.
    pub async fn script_order(&self, order_id: OrderId, script: ScriptedPayment) {
        self.per_order.lock().await.insert(order_id, script);
    }

    /// Script the reply of `transactions_by_order` for one order.
    pub async fn script_query(
        &self,
        order_id: OrderId,
        reply: GatewayReply<Vec<GatewayTransaction>>,
    ) {
        self.query_results.lock().await.insert(order_id, reply);
    }

    /// How many payment requests were made.
    #[must_use]
    pub fn request_calls(&self) -> usize {
        self.request_calls.load(Ordering::SeqCst)
    }

    /// How many transaction queries were made.
    #[must_use]
    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }
}

impl PaymentGateway for MockPaymentGateway {
    fn request_payment(
        &self,
        _user_external_id: &str,
        request: &PaymentRequest,
    ) -> Pin<Box<dyn Future<Output = Result<GatewayReply<GatewayTransaction>, CommerceError>> + Send + '_>>
    {
        let order_id = request.order_id;
        Box::pin(async move {
            self.request_calls.fetch_add(1, Ordering::SeqCst);
            let script = self
                .per_order
                .lock()
                .await
                .get(&order_id)
                .cloned();
            match script {
                Some(script) => script.reply(),
                None => self.default.lock().await.reply(),
            }
        })
    }

    fn transactions_by_order(
        &self,
        _user_external_id: &str,
        order_id: OrderId,
    ) -> Pin<Box<dyn Future<Output = Result<GatewayReply<Vec<GatewayTransaction>>, CommerceError>> + Send + '_>>
    {
        Box::pin(async move {
            self.query_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .query_results
                .lock()
                .await
                .get(&order_id)
                .cloned()
                .unwrap_or(GatewayReply::Answered(Vec::new())))
        })
    }

    fn transaction(
        &self,
        _user_external_id: &str,
        transaction_key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<GatewayReply<GatewayTransaction>, CommerceError>> + Send + '_>>
    {
        let key = transaction_key.to_owned();
        Box::pin(async move {
            self.query_calls.fetch_add(1, Ordering::SeqCst);
            let results = self.query_results.lock().await;
            for reply in results.values() {
                if let GatewayReply::Answered(transactions) = reply {
                    if let Some(found) = transactions.iter().find(|t| t.transaction_key == key) {
                        return Ok(GatewayReply::Answered(found.clone()));
                    }
                }
            }
            Ok(GatewayReply::Unavailable)
        })
    }
}
