//! TxSentinel
//!
//! Streaming fraud/MEV monitor: consumes blockchain transaction events,
//! evaluates each against stateful risk heuristics backed by a shared
//! key-value store, and emits deduplicated alerts.

pub mod config;
pub mod metrics;
pub mod rules;
pub mod server;
pub mod store;
pub mod stream;
pub mod transaction;

// Re-export commonly used types
pub use metrics::Metrics;
pub use rules::{evaluate_rules, suppression_key};
pub use store::{MemoryStore, RedisStore, StateStore, StoreError};
pub use stream::{MockMempoolFeed, StreamProcessor, TransactionFeed};
pub use transaction::{Direction, Transaction, TxKind};
