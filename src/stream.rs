//! Stream Processor
//!
//! Consumes a lazy, unbounded feed of transactions and passes each through
//! the rule engine. A single transaction's failure is logged and never
//! halts the stream; all cross-transaction state lives in the shared store.
//!
//! The bundled `MockMempoolFeed` is a placeholder generator (~20 tx/s). Any
//! source implementing `TransactionFeed` is substitutable.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Instrument};

use crate::metrics::Metrics;
use crate::rules::evaluate_rules;
use crate::store::StateStore;
use crate::transaction::{Direction, Transaction, TxKind};

/// Default pacing between synthetic transactions (~20 tx/s)
pub const DEFAULT_FEED_INTERVAL_MS: u64 = 50;

/// Probability that a synthetic transfer targets a fresh recipient,
/// producing fan-out patterns for the transfer rule to catch
pub const DEFAULT_FANOUT_PROBABILITY: f64 = 0.05;

/// Address pool for synthetic transactions; the first entry doubles as a
/// risky token so the approval rule fires in demo runs
const MOCK_ADDRESSES: &[&str] = &[
    "0x1234567890abcdef1234567890abcdef12345678",
    "0x742637a99b4b5a1a7c0b7c6b4ae6e8b8b73c7d8e",
    "0xa1b2c3d4e5f6789012345678901234567890abcd",
    "0xdeadbeefcafebabe1234567890123456789012ef",
];

const MOCK_TOKEN_PAIRS: &[&str] = &["WETH/USDC", "WETH/DAI", "USDC/DAI", "WBTC/WETH"];

/// A lazy, non-restartable source of transactions
///
/// `next_tx` returning `None` ends the stream.
#[async_trait]
pub trait TransactionFeed: Send {
    async fn next_tx(&mut self) -> Option<Transaction>;
}

/// Configuration for the synthetic feed
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Delay between emitted transactions
    pub interval: Duration,
    /// Chance a transfer goes to a previously unseen recipient
    pub fanout_probability: f64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_FEED_INTERVAL_MS),
            fanout_probability: DEFAULT_FANOUT_PROBABILITY,
        }
    }
}

/// Synthetic mempool feed emitting random transactions indefinitely
pub struct MockMempoolFeed {
    config: FeedConfig,
    rng: StdRng,
}

impl MockMempoolFeed {
    pub fn new(config: FeedConfig) -> Self {
        Self {
            config,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_default_config() -> Self {
        Self::new(FeedConfig::default())
    }

    /// Seeded constructor for reproducible output
    pub fn with_seed(config: FeedConfig, seed: u64) -> Self {
        Self {
            config,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Generate one synthetic transaction without pacing
    pub fn generate(&mut self) -> Transaction {
        let mut hash_bytes = [0u8; 32];
        self.rng.fill(&mut hash_bytes[..]);
        let hash = format!("0x{}", hex::encode(hash_bytes));

        let kind = match self.rng.gen_range(0..3u8) {
            0 => {
                // Half normal allowances, half large enough to trigger
                let allowance = if self.rng.gen_bool(0.5) {
                    self.rng.gen_range(1..1_000u128)
                } else {
                    self.rng.gen_range(1_000..100_000u128) * 10u128.pow(18)
                };
                TxKind::Approve {
                    token_address: self.pick_address(),
                    allowance,
                }
            }
            1 => TxKind::Swap {
                token_pair: MOCK_TOKEN_PAIRS[self.rng.gen_range(0..MOCK_TOKEN_PAIRS.len())]
                    .to_string(),
                direction: if self.rng.gen_bool(0.5) {
                    Direction::Buy
                } else {
                    Direction::Sell
                },
            },
            _ => {
                let to = if self.rng.gen_bool(self.config.fanout_probability) {
                    let mut addr_bytes = [0u8; 20];
                    self.rng.fill(&mut addr_bytes[..]);
                    format!("0x{}", hex::encode(addr_bytes))
                } else {
                    self.pick_address()
                };
                TxKind::Transfer {
                    from: self.pick_address(),
                    to,
                }
            }
        };

        Transaction { hash, kind }
    }

    fn pick_address(&mut self) -> String {
        MOCK_ADDRESSES[self.rng.gen_range(0..MOCK_ADDRESSES.len())].to_string()
    }
}

#[async_trait]
impl TransactionFeed for MockMempoolFeed {
    async fn next_tx(&mut self) -> Option<Transaction> {
        sleep(self.config.interval).await;
        Some(self.generate())
    }
}

/// Pulls transactions from a feed and runs the rule engine on each
///
/// Holds no transaction-to-transaction state of its own.
pub struct StreamProcessor {
    store: Arc<dyn StateStore>,
    metrics: Arc<Metrics>,
}

impl StreamProcessor {
    pub fn new(store: Arc<dyn StateStore>, metrics: Arc<Metrics>) -> Self {
        Self { store, metrics }
    }

    /// Consume the feed until it ends or the token is cancelled
    ///
    /// Cancellation is checked between transactions; an evaluation already
    /// in flight runs to completion, and every store write is
    /// self-contained, so shutdown cannot corrupt store state.
    pub async fn run(&self, feed: &mut dyn TransactionFeed, cancel: CancellationToken) {
        info!("starting stream processor");

        loop {
            let tx = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("stream processor shutting down");
                    break;
                }
                maybe_tx = feed.next_tx() => match maybe_tx {
                    Some(tx) => tx,
                    None => {
                        info!("feed exhausted, stream processor stopping");
                        break;
                    }
                },
            };

            self.process_one(&tx).await;
        }
    }

    async fn process_one(&self, tx: &Transaction) {
        let span = tracing::info_span!(
            "process_transaction",
            tx_hash = %tx.hash,
            tx_type = tx.kind.name(),
        );

        async {
            match evaluate_rules(tx, self.store.as_ref(), &self.metrics).await {
                Ok(()) => {
                    self.metrics
                        .tx_processed_total
                        .with_label_values(&[tx.kind.name()])
                        .inc();
                }
                Err(e) => {
                    error!(tx_hash = %tx.hash, error = %e, "error processing transaction");
                }
            }
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::LARGE_ALLOWANCE_THRESHOLD;
    use crate::store::MemoryStore;
    use std::collections::VecDeque;

    /// Feed backed by a fixed script of transactions
    struct ScriptedFeed {
        transactions: VecDeque<Transaction>,
    }

    impl ScriptedFeed {
        fn new(transactions: Vec<Transaction>) -> Self {
            Self {
                transactions: transactions.into(),
            }
        }
    }

    #[async_trait]
    impl TransactionFeed for ScriptedFeed {
        async fn next_tx(&mut self) -> Option<Transaction> {
            self.transactions.pop_front()
        }
    }

    fn approve_tx(hash: &str, allowance: u128) -> Transaction {
        Transaction {
            hash: hash.to_string(),
            kind: TxKind::Approve {
                token_address: "0xclean".to_string(),
                allowance,
            },
        }
    }

    // ==================== MockMempoolFeed tests ====================

    #[test]
    fn test_generated_hash_is_hex_with_prefix() {
        let mut feed = MockMempoolFeed::with_seed(FeedConfig::default(), 7);
        let tx = feed.generate();

        assert!(tx.hash.starts_with("0x"));
        assert_eq!(tx.hash.len(), 66); // "0x" + 64 hex chars
    }

    #[test]
    fn test_generated_kinds_are_well_formed() {
        let mut feed = MockMempoolFeed::with_seed(FeedConfig::default(), 42);

        for _ in 0..200 {
            let tx = feed.generate();
            match tx.kind {
                TxKind::Approve {
                    token_address,
                    allowance,
                } => {
                    assert!(!token_address.is_empty());
                    assert!(allowance > 0);
                }
                TxKind::Swap {
                    token_pair,
                    direction: _,
                } => {
                    assert!(token_pair.contains('/'));
                }
                TxKind::Transfer { from, to } => {
                    assert!(from.starts_with("0x"));
                    assert!(to.starts_with("0x"));
                }
            }
        }
    }

    #[test]
    fn test_generated_hashes_are_unique() {
        let mut feed = MockMempoolFeed::with_seed(FeedConfig::default(), 1);
        let hashes: std::collections::HashSet<String> =
            (0..100).map(|_| feed.generate().hash).collect();
        assert_eq!(hashes.len(), 100);
    }

    #[tokio::test]
    async fn test_feed_yields_transactions() {
        let config = FeedConfig {
            interval: Duration::from_millis(1),
            ..Default::default()
        };
        let mut feed = MockMempoolFeed::with_seed(config, 3);
        assert!(feed.next_tx().await.is_some());
    }

    // ==================== StreamProcessor tests ====================

    #[tokio::test]
    async fn test_processor_counts_processed_transactions() {
        let store = Arc::new(MemoryStore::new());
        let metrics = Arc::new(Metrics::new().unwrap());
        let processor = StreamProcessor::new(store, metrics.clone());

        let mut feed = ScriptedFeed::new(vec![
            approve_tx("0x1", 1),
            approve_tx("0x2", 2),
            approve_tx("0x3", 3),
        ]);

        processor.run(&mut feed, CancellationToken::new()).await;

        assert_eq!(
            metrics
                .tx_processed_total
                .with_label_values(&["approve"])
                .get(),
            3
        );
    }

    #[tokio::test]
    async fn test_processor_continues_past_failed_transaction() {
        let store = Arc::new(MemoryStore::new());
        let metrics = Arc::new(Metrics::new().unwrap());
        let processor = StreamProcessor::new(store.clone(), metrics.clone());

        let mut feed = ScriptedFeed::new(vec![
            approve_tx("0x1", LARGE_ALLOWANCE_THRESHOLD + 1),
            approve_tx("0x2", LARGE_ALLOWANCE_THRESHOLD + 1),
            approve_tx("0x3", LARGE_ALLOWANCE_THRESHOLD + 1),
        ]);

        // First store call of the first transaction fails; the stream must
        // keep going
        store.fail_next(1);
        processor.run(&mut feed, CancellationToken::new()).await;

        assert_eq!(
            metrics
                .tx_processed_total
                .with_label_values(&["approve"])
                .get(),
            2
        );
    }

    #[tokio::test]
    async fn test_processor_failed_transaction_fires_no_alert() {
        let store = Arc::new(MemoryStore::new());
        let metrics = Arc::new(Metrics::new().unwrap());
        let processor = StreamProcessor::new(store.clone(), metrics.clone());

        let mut feed = ScriptedFeed::new(vec![approve_tx("0x1", LARGE_ALLOWANCE_THRESHOLD + 1)]);
        store.fail_next(1);
        processor.run(&mut feed, CancellationToken::new()).await;

        assert_eq!(
            metrics
                .alerts_total
                .with_label_values(&["suspicious_approval"])
                .get(),
            0
        );
    }

    #[tokio::test]
    async fn test_processor_stops_on_cancellation() {
        let store = Arc::new(MemoryStore::new());
        let metrics = Arc::new(Metrics::new().unwrap());
        let processor = StreamProcessor::new(store, metrics);

        let config = FeedConfig {
            interval: Duration::from_millis(5),
            ..Default::default()
        };
        let mut feed = MockMempoolFeed::with_seed(config, 9);

        let cancel = CancellationToken::new();
        cancel.cancel();

        let run = processor.run(&mut feed, cancel);
        tokio::time::timeout(Duration::from_secs(1), run)
            .await
            .expect("processor should stop promptly after cancellation");
    }
}
