//! Delivery transactions, policy, and per-recipient results.

mod agent;
mod config;
mod future;
mod result;
mod transaction;

pub use agent::DeliveryAgent;
pub use config::{Credentials, DeliveryConfig, PipeliningMode, TlsMode};
pub use future::DeliveryFuture;
pub use result::{DeliveryResult, RecipientOutcome, RecipientStatus};
pub use transaction::Transaction;
