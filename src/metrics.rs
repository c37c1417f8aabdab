//! Prometheus metrics for the risk engine.
//!
//! ## Usage
//!
//! Call [`init_metrics`] once at process startup. The helper functions
//! (`record_invocation`, `inc_attempt`, …) are no-ops if `init_metrics` was
//! never called, so assessments are always safe to run and observability
//! simply degrades gracefully.
//!
//! ## Metrics Exposed
//!
//! | Name | Type | Labels |
//! |------|------|--------|
//! | `risk_engine_invocations_total` | Counter | `outcome` |
//! | `risk_engine_attempts_total` | Counter | `model`, `outcome` |
//! | `risk_engine_rate_limit_rejections_total` | Counter |: |
//! | `risk_engine_invocation_duration_seconds` | Histogram | `use_case` |
//! | `risk_engine_assessments_total` | Counter | `tier` |
//! | `risk_engine_narrative_unavailable_total` | Counter |: |

use crate::EngineError;
use prometheus::{
    core::Collector, Counter, CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

// ── Internal metrics bundle ────────────────────────────────────────────────

/// All Prometheus metrics for the engine, stored in a single [`OnceLock`].
pub struct Metrics {
    /// Prometheus registry that owns all metric descriptors.
    pub registry: Registry,
    /// Finished invocations by outcome.
    pub invocations_total: CounterVec,
    /// Individual model attempts by model and outcome.
    pub attempts_total: CounterVec,
    /// Requests refused because the rate-limit wait exceeded its budget.
    pub rate_limit_rejections: Counter,
    /// End-to-end invocation latency.
    pub invocation_duration: HistogramVec,
    /// Deterministic assessments by tier.
    pub assessments_total: CounterVec,
    /// Reports returned without a narrative.
    pub narrative_unavailable: Counter,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

fn register<C>(registry: &Registry, collector: Result<C, prometheus::Error>) -> Result<C, EngineError>
where
    C: Collector + Clone + 'static,
{
    let collector =
        collector.map_err(|e| EngineError::Other(format!("metrics init failed: {e}")))?;
    registry
        .register(Box::new(collector.clone()))
        .map_err(|e| EngineError::Other(format!("metrics registration failed: {e}")))?;
    Ok(collector)
}

fn build(registry: Registry, prefix: &str) -> Result<Metrics, EngineError> {
    let name = |suffix: &str| format!("{prefix}_{suffix}");

    let invocations_total = register(
        &registry,
        CounterVec::new(
            Opts::new(name("invocations_total"), "Finished model invocations"),
            &["outcome"],
        ),
    )?;
    let attempts_total = register(
        &registry,
        CounterVec::new(
            Opts::new(name("attempts_total"), "Model attempts by model and outcome"),
            &["model", "outcome"],
        ),
    )?;
    let rate_limit_rejections = register(
        &registry,
        Counter::new(
            name("rate_limit_rejections_total"),
            "Invocations refused after exceeding the queue wait budget",
        ),
    )?;
    let invocation_duration = register(
        &registry,
        HistogramVec::new(
            HistogramOpts::new(
                name("invocation_duration_seconds"),
                "End-to-end invocation duration",
            ),
            &["use_case"],
        ),
    )?;
    let assessments_total = register(
        &registry,
        CounterVec::new(
            Opts::new(name("assessments_total"), "Deterministic assessments by tier"),
            &["tier"],
        ),
    )?;
    let narrative_unavailable = register(
        &registry,
        Counter::new(
            name("narrative_unavailable_total"),
            "Reports returned with the deterministic score only",
        ),
    )?;

    Ok(Metrics {
        registry,
        invocations_total,
        attempts_total,
        rate_limit_rejections,
        invocation_duration,
        assessments_total,
        narrative_unavailable,
    })
}

// ── Initialisation ─────────────────────────────────────────────────────────

/// Initialise all Prometheus metrics and register them with a private registry.
///
/// Calling it a second time is a no-op (returns `Ok(())`).
///
/// # Errors
///
/// Returns [`EngineError::Other`] if metric construction or registry
/// registration fails.
///
/// # Panics
///
/// This function never panics.
pub fn init_metrics() -> Result<(), EngineError> {
    if METRICS.get().is_some() {
        return Ok(());
    }
    let bundle = build(Registry::new(), "risk_engine")?;
    // A racing initialiser builds identical descriptors; first one wins.
    let _ = METRICS.set(bundle);
    Ok(())
}

fn metrics() -> Option<&'static Metrics> {
    METRICS.get()
}

// ── Public helper functions ────────────────────────────────────────────────

/// Record a finished invocation and its duration.
///
/// No-op if metrics have not been initialised.
pub fn record_invocation(use_case: &str, outcome: &str, d: Duration) {
    if let Some(m) = metrics() {
        if let Ok(c) = m.invocations_total.get_metric_with_label_values(&[outcome]) {
            c.inc();
        }
        if let Ok(h) = m.invocation_duration.get_metric_with_label_values(&[use_case]) {
            h.observe(d.as_secs_f64());
        }
    }
}

/// Count one model attempt.
///
/// No-op if metrics have not been initialised.
pub fn inc_attempt(model: &str, outcome: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m.attempts_total.get_metric_with_label_values(&[model, outcome]) {
            c.inc();
        }
    }
}

/// Count a queue-wait rejection.
///
/// No-op if metrics have not been initialised.
pub fn inc_rate_limit_rejection() {
    if let Some(m) = metrics() {
        m.rate_limit_rejections.inc();
    }
}

/// Count a deterministic assessment.
///
/// No-op if metrics have not been initialised.
pub fn inc_assessment(tier: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m.assessments_total.get_metric_with_label_values(&[tier]) {
            c.inc();
        }
    }
}

/// Count a report returned without a narrative.
///
/// No-op if metrics have not been initialised.
pub fn inc_narrative_unavailable() {
    if let Some(m) = metrics() {
        m.narrative_unavailable.inc();
    }
}

/// Gather and encode all metrics in the Prometheus text exposition format.
///
/// Returns an empty string if metrics have not been initialised or if
/// encoding fails.
///
/// # Panics
///
/// This function never panics.
pub fn gather_metrics() -> String {
    let Some(m) = metrics() else {
        return String::new();
    };
    let families = m.registry.gather();
    let mut buffer = Vec::new();
    if TextEncoder::new().encode(&families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Counter values keyed by label.
#[derive(Debug, Default)]
pub struct MetricsSummary {
    /// Invocations keyed by outcome.
    pub invocations_total: HashMap<String, u64>,
    /// Attempts keyed by `"model:outcome"`.
    pub attempts_total: HashMap<String, u64>,
    /// Queue-wait rejections.
    pub rate_limit_rejections: u64,
}

fn label<'a>(metric: &'a prometheus::proto::Metric, name: &str) -> &'a str {
    metric
        .get_label()
        .iter()
        .find(|l| l.get_name() == name)
        .map_or("unknown", |l| l.get_value())
}

fn summarize(m: &Metrics) -> MetricsSummary {
    let mut summary = MetricsSummary {
        rate_limit_rejections: m.rate_limit_rejections.get() as u64,
        ..MetricsSummary::default()
    };

    for family in m.invocations_total.collect() {
        for metric in family.get_metric() {
            summary.invocations_total.insert(
                label(metric, "outcome").to_string(),
                metric.get_counter().get_value() as u64,
            );
        }
    }
    for family in m.attempts_total.collect() {
        for metric in family.get_metric() {
            let key = format!("{}:{}", label(metric, "model"), label(metric, "outcome"));
            summary
                .attempts_total
                .insert(key, metric.get_counter().get_value() as u64);
        }
    }
    summary
}

/// Current counter values.
///
/// Returns a zeroed [`MetricsSummary`] if metrics have not been initialised.
pub fn get_metrics_summary() -> MetricsSummary {
    metrics().map(summarize).unwrap_or_default()
}
