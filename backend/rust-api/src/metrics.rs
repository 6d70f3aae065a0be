use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, Encoder, HistogramVec,
    IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    // HTTP Metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap();

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    // Business Metrics
    pub static ref QUIZ_SESSIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "quiz_sessions_total",
        "Quiz session lifecycle events by mode",
        &["mode", "event"]
    )
    .unwrap();

    pub static ref QUIZ_SESSIONS_ACTIVE: IntGauge = register_int_gauge!(
        "quiz_sessions_active",
        "Number of currently active quiz sessions"
    )
    .unwrap();

    pub static ref ANSWERS_SUBMITTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "answers_submitted_total",
        "Total number of answers submitted",
        &["mode", "correct"]
    )
    .unwrap();

    pub static ref POOL_SHORTFALLS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "pool_shortfalls_total",
        "Draws the question pool could not fully satisfy",
        &["mode"]
    )
    .unwrap();

    pub static ref OTP_EMAILS_SENT_TOTAL: IntCounterVec = register_int_counter_vec!(
        "otp_emails_sent_total",
        "Verification emails sent",
        &["status"]
    )
    .unwrap();

    pub static ref PAYMENT_ORDERS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "payment_orders_total",
        "Payment orders by lifecycle status",
        &["status"]
    )
    .unwrap();
}

/// Renders all metrics in Prometheus text format
pub fn render_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_metrics() {
        HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/test", "200"])
            .inc();

        let output = render_metrics().unwrap();
        assert!(output.contains("http_requests_total"));
    }

    #[test]
    fn test_business_metrics_registration() {
        QUIZ_SESSIONS_TOTAL
            .with_label_values(&["random", "created"])
            .inc();
        ANSWERS_SUBMITTED_TOTAL
            .with_label_values(&["timed", "true"])
            .inc();
        let output = render_metrics().unwrap();
        assert!(output.contains("quiz_sessions_total"));
    }
}
