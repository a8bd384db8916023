//! # Commerce Purchasing
//!
//! The write side of the platform:
//!
//! - [`orchestrator`]: the purchasing saga: one transaction for points,
//!   stock, coupon, order, payment, and the outbox append
//! - [`handlers`]: after-commit payment kickoff and outcome application,
//!   including compensation
//! - [`gateway`]: HTTP payment-gateway client with timeout, circuit
//!   breaker, bulkhead, and method-specific retry
//! - [`recovery`]: the periodic reconciler converging Pending orders
//!
//! # Wiring
//!
//! ```no_run
//! use commerce_core::bus::EventHub;
//! use commerce_core::config::CommerceConfig;
//! use commerce_purchasing::gateway::HttpPaymentGateway;
//! use commerce_purchasing::handlers::{PaymentKickoffHandler, PaymentOutcomeHandler};
//! use commerce_purchasing::orchestrator::PurchasingOrchestrator;
//! use commerce_purchasing::recovery::PaymentRecovery;
//! use std::sync::Arc;
//!
//! # async fn wire(store: Arc<commerce_testing::InMemoryCommerceStore>) -> Result<(), Box<dyn std::error::Error>> {
//! let config = CommerceConfig::from_env()?;
//! let gateway = Arc::new(HttpPaymentGateway::new(&config.gateway)?);
//!
//! let mut hub = EventHub::with_default_workers();
//! hub.subscribe(Arc::new(PaymentKickoffHandler::new(
//!     Arc::clone(&store),
//!     gateway.clone(),
//!     config.gateway.callback_url.clone(),
//! )));
//! hub.subscribe(Arc::new(PaymentOutcomeHandler::new(Arc::clone(&store))));
//! let hub = Arc::new(hub);
//!
//! let orchestrator = PurchasingOrchestrator::new(Arc::clone(&store), Arc::clone(&hub));
//! let recovery = Arc::new(PaymentRecovery::new(
//!     store,
//!     gateway,
//!     hub,
//!     config.recovery.interval,
//! ));
//! # let _ = (orchestrator, recovery);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod gateway;
pub mod handlers;
pub mod orchestrator;
pub mod recovery;

pub use gateway::HttpPaymentGateway;
pub use orchestrator::{OrderInfo, PurchaseCommand, PurchaseItem, PurchasingOrchestrator};
pub use recovery::{PaymentRecovery, RecoveryStats};
