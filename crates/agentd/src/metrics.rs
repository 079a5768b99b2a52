//! Prometheus metrics for the node process, in the same
//! lazy_static-plus-`prometheus` shape every worker binary in the
//! workspace uses. Only wired where a real hook exists — dispatch
//! outcomes via `EventObserver`, bgtask lifecycle via `BgtaskObserver`
//! — rather than pre-registering gauges nothing ever updates.

use std::sync::Arc;
use std::time::Duration;

use clusterbus_bgtask::BgtaskObserver;
use clusterbus_dispatcher::EventObserver;
use clusterbus_events::TaskStatus;
use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramVec, IntCounterVec, TextEncoder, opts, register_histogram_vec,
    register_int_counter_vec,
};

lazy_static! {
    static ref EVENTS_DISPATCHED_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!("clusterbus_events_dispatched_total", "Total handler invocations by event and outcome"),
        &["event", "outcome"]
    )
    .expect("metric can be created");

    static ref DISPATCH_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "clusterbus_dispatch_duration_seconds",
        "Handler invocation duration in seconds",
        &["event"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
    )
    .expect("metric can be created");

    static ref BGTASKS_STARTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!("clusterbus_bgtasks_started_total", "Total background tasks started"),
        &["task_name"]
    )
    .expect("metric can be created");

    static ref BGTASKS_FINISHED_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!("clusterbus_bgtasks_finished_total", "Total background tasks reaching a terminal state"),
        &["task_name", "status"]
    )
    .expect("metric can be created");

    static ref BGTASK_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "clusterbus_bgtask_duration_seconds",
        "Background task wall-clock duration in seconds",
        &["task_name"],
        vec![0.1, 0.5, 1.0, 5.0, 30.0, 60.0, 300.0, 1800.0]
    )
    .expect("metric can be created");
}

/// Renders the process registry in Prometheus text exposition format.
pub fn render() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// [`EventObserver`] that records every handler invocation into the
/// process' Prometheus registry.
pub struct PrometheusEventObserver;

impl PrometheusEventObserver {
    pub fn arc() -> Arc<dyn EventObserver> {
        Arc::new(Self)
    }
}

impl EventObserver for PrometheusEventObserver {
    fn observe_event_success(&self, event_name: &str, duration: Duration) {
        EVENTS_DISPATCHED_TOTAL.with_label_values(&[event_name, "success"]).inc();
        DISPATCH_DURATION_SECONDS.with_label_values(&[event_name]).observe(duration.as_secs_f64());
    }

    fn observe_event_failure(&self, event_name: &str, duration: Duration) {
        EVENTS_DISPATCHED_TOTAL.with_label_values(&[event_name, "failure"]).inc();
        DISPATCH_DURATION_SECONDS.with_label_values(&[event_name]).observe(duration.as_secs_f64());
    }
}

/// [`BgtaskObserver`] that records task starts/terminal transitions
/// into the process' Prometheus registry.
pub struct PrometheusBgtaskObserver;

impl PrometheusBgtaskObserver {
    pub fn arc() -> Arc<dyn BgtaskObserver> {
        Arc::new(Self)
    }
}

impl BgtaskObserver for PrometheusBgtaskObserver {
    fn observe_started(&self, task_name: &str) {
        BGTASKS_STARTED_TOTAL.with_label_values(&[task_name]).inc();
    }

    fn observe_done(&self, task_name: &str, status: TaskStatus, duration: Duration) {
        BGTASKS_FINISHED_TOTAL.with_label_values(&[task_name, status.as_str()]).inc();
        BGTASK_DURATION_SECONDS.with_label_values(&[task_name]).observe(duration.as_secs_f64());
    }
}
