//! Transaction Data Model
//!
//! Defines the transaction schema consumed by the rule engine. Payloads are
//! validated at the feed/ingestion boundary; missing optional fields default
//! to `0` / `""` so malformed events never error inside a rule.

use serde::{Deserialize, Serialize};

/// Trade direction for swap transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    /// Returns the wire-format string for this direction
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Buy => "buy",
            Direction::Sell => "sell",
        }
    }
}

/// Type-specific transaction payload
///
/// Tagged on the `type` field in the wire format. Unknown types are rejected
/// at deserialization; they never reach the rule engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TxKind {
    Approve {
        /// Token contract being approved, empty string if absent
        #[serde(default)]
        token_address: String,
        /// Approved allowance in base units (wei-scale)
        #[serde(default)]
        allowance: u128,
    },
    Swap {
        /// Canonical pair name, e.g. "WETH/USDC"
        #[serde(default)]
        token_pair: String,
        direction: Direction,
    },
    Transfer {
        #[serde(default)]
        from: String,
        #[serde(default)]
        to: String,
    },
}

impl TxKind {
    /// Returns the transaction type name as used in metric labels
    pub fn name(&self) -> &'static str {
        match self {
            TxKind::Approve { .. } => "approve",
            TxKind::Swap { .. } => "swap",
            TxKind::Transfer { .. } => "transfer",
        }
    }
}

/// A single transaction event from the feed
///
/// Immutable input record; `hash` is the only identity. Created by the feed
/// and consumed exactly once by the stream processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction hash with 0x prefix
    pub hash: String,
    #[serde(flatten)]
    pub kind: TxKind,
}

impl Transaction {
    /// Serialize the transaction to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize a transaction from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Direction tests ====================

    #[test]
    fn test_direction_as_str() {
        assert_eq!(Direction::Buy.as_str(), "buy");
        assert_eq!(Direction::Sell.as_str(), "sell");
    }

    #[test]
    fn test_direction_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Direction::Buy).unwrap(), "\"buy\"");
        assert_eq!(serde_json::to_string(&Direction::Sell).unwrap(), "\"sell\"");
    }

    // ==================== TxKind tests ====================

    #[test]
    fn test_kind_name() {
        let approve = TxKind::Approve {
            token_address: String::new(),
            allowance: 0,
        };
        let swap = TxKind::Swap {
            token_pair: String::new(),
            direction: Direction::Buy,
        };
        let transfer = TxKind::Transfer {
            from: String::new(),
            to: String::new(),
        };

        assert_eq!(approve.name(), "approve");
        assert_eq!(swap.name(), "swap");
        assert_eq!(transfer.name(), "transfer");
    }

    // ==================== Wire format tests ====================

    #[test]
    fn test_approve_round_trip() {
        let tx = Transaction {
            hash: "0xabc123".to_string(),
            kind: TxKind::Approve {
                token_address: "0x1234567890abcdef1234567890abcdef12345678".to_string(),
                allowance: 1_000_000_000_000_000_000_000u128,
            },
        };

        let json = tx.to_json().unwrap();
        assert!(json.contains("\"type\":\"approve\""));

        let parsed = Transaction::from_json(&json).unwrap();
        assert_eq!(parsed, tx);
    }

    #[test]
    fn test_swap_round_trip() {
        let tx = Transaction {
            hash: "0xdef456".to_string(),
            kind: TxKind::Swap {
                token_pair: "WETH/USDC".to_string(),
                direction: Direction::Sell,
            },
        };

        let json = tx.to_json().unwrap();
        assert!(json.contains("\"type\":\"swap\""));
        assert!(json.contains("\"direction\":\"sell\""));

        let parsed = Transaction::from_json(&json).unwrap();
        assert_eq!(parsed, tx);
    }

    #[test]
    fn test_transfer_round_trip() {
        let tx = Transaction {
            hash: "0x789".to_string(),
            kind: TxKind::Transfer {
                from: "0xaaaa".to_string(),
                to: "0xbbbb".to_string(),
            },
        };

        let parsed = Transaction::from_json(&tx.to_json().unwrap()).unwrap();
        assert_eq!(parsed, tx);
    }

    // ==================== Missing-field defaults ====================

    #[test]
    fn test_approve_missing_fields_default() {
        let json = r#"{"hash": "0x1", "type": "approve"}"#;
        let tx = Transaction::from_json(json).unwrap();

        match tx.kind {
            TxKind::Approve {
                token_address,
                allowance,
            } => {
                assert_eq!(token_address, "");
                assert_eq!(allowance, 0);
            }
            _ => panic!("expected approve"),
        }
    }

    #[test]
    fn test_transfer_missing_fields_default() {
        let json = r#"{"hash": "0x2", "type": "transfer"}"#;
        let tx = Transaction::from_json(json).unwrap();

        match tx.kind {
            TxKind::Transfer { from, to } => {
                assert_eq!(from, "");
                assert_eq!(to, "");
            }
            _ => panic!("expected transfer"),
        }
    }

    #[test]
    fn test_swap_missing_pair_defaults_to_empty() {
        let json = r#"{"hash": "0x3", "type": "swap", "direction": "buy"}"#;
        let tx = Transaction::from_json(json).unwrap();

        match tx.kind {
            TxKind::Swap {
                token_pair,
                direction,
            } => {
                assert_eq!(token_pair, "");
                assert_eq!(direction, Direction::Buy);
            }
            _ => panic!("expected swap"),
        }
    }

    // ==================== Rejection tests ====================

    #[test]
    fn test_unknown_type_rejected() {
        let json = r#"{"hash": "0x4", "type": "mint"}"#;
        assert!(Transaction::from_json(json).is_err());
    }

    #[test]
    fn test_missing_type_rejected() {
        let json = r#"{"hash": "0x5"}"#;
        assert!(Transaction::from_json(json).is_err());
    }

    #[test]
    fn test_invalid_direction_rejected() {
        let json = r#"{"hash": "0x6", "type": "swap", "token_pair": "A/B", "direction": "hold"}"#;
        assert!(Transaction::from_json(json).is_err());
    }

    #[test]
    fn test_large_allowance_parses() {
        // 100000 * 10^18 exceeds u64, must parse into u128
        let json = r#"{"hash": "0x7", "type": "approve", "token_address": "0xab", "allowance": 100000000000000000000000}"#;
        let tx = Transaction::from_json(json).unwrap();

        match tx.kind {
            TxKind::Approve { allowance, .. } => {
                assert_eq!(allowance, 100_000_000_000_000_000_000_000u128);
            }
            _ => panic!("expected approve"),
        }
    }
}
