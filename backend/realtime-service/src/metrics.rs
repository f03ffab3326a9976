use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, TextEncoder};

pub static WS_CONNECTIONS: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new(
        "realtime_ws_connections",
        "Live WebSocket connections on this instance",
    )
    .expect("failed to create realtime_ws_connections");
    prometheus::default_registry()
        .register(Box::new(gauge.clone()))
        .expect("failed to register realtime_ws_connections");
    gauge
});

pub static ONLINE_USERS: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new(
        "realtime_online_users",
        "Users with at least one live connection on this instance",
    )
    .expect("failed to create realtime_online_users");
    prometheus::default_registry()
        .register(Box::new(gauge.clone()))
        .expect("failed to register realtime_online_users");
    gauge
});

/// Messages persisted, labelled by entry point (`ws` or `rest`)
pub static MESSAGES_SENT_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new("realtime_messages_sent_total", "Messages accepted by the send path"),
        &["origin"],
    )
    .expect("failed to create realtime_messages_sent_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register realtime_messages_sent_total");
    counter
});

pub static STATUS_TRANSITIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "realtime_message_status_transitions_total",
            "Message status transitions applied",
        ),
        &["status"],
    )
    .expect("failed to create realtime_message_status_transitions_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register realtime_message_status_transitions_total");
    counter
});

pub static NOTIFICATIONS_CREATED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new("realtime_notifications_created_total", "Notifications persisted"),
        &["type"],
    )
    .expect("failed to create realtime_notifications_created_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register realtime_notifications_created_total");
    counter
});

pub static NOTIFICATIONS_SUPPRESSED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "realtime_notifications_suppressed_total",
            "Notifications dropped as no-ops",
        ),
        &["reason"],
    )
    .expect("failed to create realtime_notifications_suppressed_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register realtime_notifications_suppressed_total");
    counter
});

/// Failures swallowed by detached work (fan-out, delivery timer, push)
pub static BACKGROUND_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "realtime_background_failures_total",
            "Errors logged and swallowed by background tasks",
        ),
        &["task"],
    )
    .expect("failed to create realtime_background_failures_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register realtime_background_failures_total");
    counter
});

pub static NOTIFICATIONS_PURGED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "realtime_notifications_purged_total",
        "Notifications removed by retention cleanup",
    )
    .expect("failed to create realtime_notifications_purged_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register realtime_notifications_purged_total");
    counter
});

pub async fn metrics_handler() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
