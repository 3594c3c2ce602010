//! Detection Rules
//!
//! The three stateful fraud/risk heuristics and the dispatcher that runs
//! them per transaction. Each rule self-filters on transaction type, keeps
//! its sliding-window state in the shared store, and dedups its alerts
//! through a short-TTL suppression key derived from `(rule_id, tx_hash)`.
//!
//! Suppression is best-effort: the check and the write are two store calls,
//! so concurrent duplicates of the same hash can double-fire. Accepted
//! trade-off; a compare-and-set would close it at the cost of changing the
//! store traffic shape.

use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};
use tracing::warn;

use crate::metrics::{Metrics, RuleTimer};
use crate::store::{StateStore, StoreError};
use crate::transaction::{Transaction, TxKind};

pub const RULE_SUSPICIOUS_APPROVAL: &str = "suspicious_approval";
pub const RULE_SANDWICH_RISK: &str = "sandwich_risk";
pub const RULE_ANOMALOUS_TRANSFER: &str = "anomalous_transfer";

/// Allowance above which an approval is flagged (~1000 native-token units
/// in base units)
pub const LARGE_ALLOWANCE_THRESHOLD: u128 = 1_000 * 10u128.pow(18);

/// Seconds a fired alert suppresses re-fires for the same rule + tx hash
pub const SUPPRESSION_TTL_SECS: u64 = 60;

/// Sliding window for swaps on one token pair
pub const SWAP_WINDOW_SECS: i64 = 30;

/// Minimum swaps in the window before a sandwich pattern is considered
pub const SANDWICH_MIN_SWAPS: usize = 3;

/// Sliding window for a sender's recipient set
pub const TRANSFER_WINDOW_SECS: i64 = 5;

/// Distinct recipients a sender may reach within the window before the
/// fan-out is flagged
pub const MAX_FANOUT_RECIPIENTS: u64 = 10;

/// Token addresses treated as risky regardless of allowance (mock data,
/// compared case-insensitively, not runtime-mutable)
static RISKY_TOKENS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    HashSet::from([
        "0x1234567890abcdef1234567890abcdef12345678",
        "0xabcdef1234567890abcdef1234567890abcdef12",
    ])
});

/// Deterministic suppression key for a rule + transaction pair
///
/// First 16 hex characters of sha256("{rule_id}:{tx_hash}").
pub fn suppression_key(rule_id: &str, tx_hash: &str) -> String {
    let digest = Sha256::digest(format!("{rule_id}:{tx_hash}"));
    hex::encode(digest)[..16].to_string()
}

/// Current unix time in seconds
fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_secs() as i64
}

/// Run all rules against a transaction
///
/// Rules are keyed on disjoint transaction types; order is insignificant.
/// The first store error propagates — per-transaction isolation is the
/// stream processor's job.
pub async fn evaluate_rules(
    tx: &Transaction,
    store: &dyn StateStore,
    metrics: &Metrics,
) -> Result<(), StoreError> {
    approval_rule(tx, store, metrics).await?;
    sandwich_risk_rule(tx, store, metrics).await?;
    anomalous_transfer_rule(tx, store, metrics).await?;
    Ok(())
}

/// Fire an alert when an unusually large or risky-token approval is seen
pub async fn approval_rule(
    tx: &Transaction,
    store: &dyn StateStore,
    metrics: &Metrics,
) -> Result<(), StoreError> {
    let TxKind::Approve {
        token_address,
        allowance,
    } = &tx.kind
    else {
        return Ok(());
    };

    let mut timer = RuleTimer::new(metrics, RULE_SUSPICIOUS_APPROVAL);

    let alert_id = suppression_key(RULE_SUSPICIOUS_APPROVAL, &tx.hash);
    if store.get(&alert_id).await?.is_some() {
        timer.set_result("duplicate");
        return Ok(());
    }

    let mut reasons = Vec::new();
    if *allowance > LARGE_ALLOWANCE_THRESHOLD {
        reasons.push(format!("large_allowance:{allowance}"));
    }
    if RISKY_TOKENS.contains(token_address.to_lowercase().as_str()) {
        reasons.push(format!("risky_token:{token_address}"));
    }

    if reasons.is_empty() {
        timer.set_result("no_alert");
        return Ok(());
    }

    warn!(
        alert_id = %alert_id,
        rule_id = RULE_SUSPICIOUS_APPROVAL,
        tx_hash = %tx.hash,
        reasons = ?reasons,
        "suspicious approval"
    );
    metrics
        .alerts_total
        .with_label_values(&[RULE_SUSPICIOUS_APPROVAL])
        .inc();
    store
        .set_ex(&alert_id, "1", SUPPRESSION_TTL_SECS)
        .await?;
    timer.set_result("alert_fired");
    Ok(())
}

/// Detect potential sandwich attack patterns on a token pair
///
/// Coarse heuristic: 3+ swaps on the same pair inside the window with more
/// than one distinct direction. Directions are compared by set distinctness
/// only, not sequence order.
pub async fn sandwich_risk_rule(
    tx: &Transaction,
    store: &dyn StateStore,
    metrics: &Metrics,
) -> Result<(), StoreError> {
    let TxKind::Swap {
        token_pair,
        direction,
    } = &tx.kind
    else {
        return Ok(());
    };
    if token_pair.is_empty() {
        return Ok(());
    }

    let mut timer = RuleTimer::new(metrics, RULE_SANDWICH_RISK);

    let swap_key = format!("swaps:{token_pair}");
    let now = unix_now();
    let member = format!("{}:{}:{}", tx.hash, direction.as_str(), now);

    store.zadd(&swap_key, &member, now).await?;
    // Global TTL reset on the whole window, not per member
    store.expire(&swap_key, SWAP_WINDOW_SECS).await?;

    let recent = store
        .zrange_by_score(&swap_key, now - SWAP_WINDOW_SECS, now)
        .await?;

    if recent.len() >= SANDWICH_MIN_SWAPS {
        let directions: HashSet<&str> = recent
            .iter()
            .filter_map(|entry| entry.split(':').nth(1))
            .collect();

        if directions.len() > 1 {
            let alert_id = suppression_key(RULE_SANDWICH_RISK, &tx.hash);
            if store.get(&alert_id).await?.is_none() {
                warn!(
                    alert_id = %alert_id,
                    rule_id = RULE_SANDWICH_RISK,
                    tx_hash = %tx.hash,
                    swap_count = recent.len(),
                    window_secs = SWAP_WINDOW_SECS,
                    "potential sandwich attack pattern"
                );
                metrics
                    .alerts_total
                    .with_label_values(&[RULE_SANDWICH_RISK])
                    .inc();
                store
                    .set_ex(&alert_id, "1", SUPPRESSION_TTL_SECS)
                    .await?;
                timer.set_result("alert_fired");
                return Ok(());
            }
            timer.set_result("duplicate");
            return Ok(());
        }
    }

    timer.set_result("no_alert");
    Ok(())
}

/// Detect anomalous fan-out: one sender reaching many distinct recipients
/// within a short window
pub async fn anomalous_transfer_rule(
    tx: &Transaction,
    store: &dyn StateStore,
    metrics: &Metrics,
) -> Result<(), StoreError> {
    let TxKind::Transfer { from, to } = &tx.kind else {
        return Ok(());
    };
    if from.is_empty() || to.is_empty() {
        return Ok(());
    }

    let mut timer = RuleTimer::new(metrics, RULE_ANOMALOUS_TRANSFER);

    let sender_key = format!("transfers:{from}");
    store.sadd(&sender_key, to).await?;
    store.expire(&sender_key, TRANSFER_WINDOW_SECS).await?;

    let recipient_count = store.scard(&sender_key).await?;

    if recipient_count > MAX_FANOUT_RECIPIENTS {
        let alert_id = suppression_key(RULE_ANOMALOUS_TRANSFER, &tx.hash);
        if store.get(&alert_id).await?.is_none() {
            warn!(
                alert_id = %alert_id,
                rule_id = RULE_ANOMALOUS_TRANSFER,
                tx_hash = %tx.hash,
                sender = %from,
                recipient_count,
                window_secs = TRANSFER_WINDOW_SECS,
                "anomalous transfer pattern"
            );
            metrics
                .alerts_total
                .with_label_values(&[RULE_ANOMALOUS_TRANSFER])
                .inc();
            store
                .set_ex(&alert_id, "1", SUPPRESSION_TTL_SECS)
                .await?;
            timer.set_result("alert_fired");
            return Ok(());
        }
        timer.set_result("duplicate");
        return Ok(());
    }

    timer.set_result("no_alert");
    Ok(())
}
