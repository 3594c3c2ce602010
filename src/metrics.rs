//! Prometheus Metrics
//!
//! Counters and timers updated by the rule engine and stream processor.
//! The registry lives inside `Metrics`, which is built once at bootstrap and
//! handed around as `Arc<Metrics>` so the core carries no global state; the
//! HTTP layer only calls `gather()` to serve the scrape endpoint.

use std::time::Instant;

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

/// Content type for the Prometheus text exposition format
pub const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Process metrics handle
pub struct Metrics {
    registry: Registry,
    /// Transactions processed, labeled by transaction type
    pub tx_processed_total: IntCounterVec,
    /// Alerts generated, labeled by rule id
    pub alerts_total: IntCounterVec,
    /// Time spent evaluating rules, labeled by rule id and outcome
    pub rule_evaluation_duration: HistogramVec,
}

impl Metrics {
    /// Create the metric families and register them on a fresh registry
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let tx_processed_total = IntCounterVec::new(
            Opts::new("tx_processed_total", "Total transactions processed"),
            &["tx_type"],
        )?;
        let alerts_total = IntCounterVec::new(
            Opts::new("alerts_total", "Total alerts generated"),
            &["rule"],
        )?;
        let rule_evaluation_duration = HistogramVec::new(
            HistogramOpts::new(
                "rule_evaluation_duration_seconds",
                "Time spent evaluating rules",
            ),
            &["rule", "result"],
        )?;

        registry.register(Box::new(tx_processed_total.clone()))?;
        registry.register(Box::new(alerts_total.clone()))?;
        registry.register(Box::new(rule_evaluation_duration.clone()))?;

        Ok(Self {
            registry,
            tx_processed_total,
            alerts_total,
            rule_evaluation_duration,
        })
    }

    /// Render all registered metrics in the Prometheus text format
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer).unwrap_or_default())
    }
}

/// Scoped timer for a single rule evaluation
///
/// Records the elapsed duration on drop, so every exit path of a rule body is
/// measured, including error propagation. The outcome label defaults to
/// "evaluated" and is narrowed by the rule as it resolves.
pub struct RuleTimer<'a> {
    metrics: &'a Metrics,
    rule: &'static str,
    result: &'static str,
    start: Instant,
}

impl<'a> RuleTimer<'a> {
    pub fn new(metrics: &'a Metrics, rule: &'static str) -> Self {
        Self {
            metrics,
            rule,
            result: "evaluated",
            start: Instant::now(),
        }
    }

    /// Record the evaluation outcome ("alert_fired", "duplicate", "no_alert")
    pub fn set_result(&mut self, result: &'static str) {
        self.result = result;
    }
}

impl Drop for RuleTimer<'_> {
    fn drop(&mut self) {
        self.metrics
            .rule_evaluation_duration
            .with_label_values(&[self.rule, self.result])
            .observe(self.start.elapsed().as_secs_f64());
    }
}
