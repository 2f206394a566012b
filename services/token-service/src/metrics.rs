//! Prometheus metrics exposition
//!
//! - `oauth_authorizations_total` (counter): label `outcome`
//! - `oauth_token_operations_total` (counter): labels `operation`, `outcome`
//! - `http_request_duration_seconds` (histogram): labels `route`, `status`

use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use token_manager::AttemptState;

const DURATION_METRIC: &str = "http_request_duration_seconds";

/// Bucket bounds from 5ms up to the longest provider timeout worth waiting on.
const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

fn builder() -> PrometheusBuilder {
    PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(DURATION_METRIC.to_string()), DURATION_BUCKETS)
        .expect("failed to set histogram buckets")
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// The request duration is configured with explicit buckets so it renders as
/// a histogram (`_bucket` lines) rather than the default summary.
pub fn install_recorder() -> PrometheusHandle {
    builder()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Handle backed by a recorder that is not installed globally.
#[cfg(test)]
pub fn test_handle() -> PrometheusHandle {
    builder().build_recorder().handle()
}

/// Record the terminal state of an authorization callback.
pub fn record_authorization(outcome: AttemptState) {
    metrics::counter!("oauth_authorizations_total", "outcome" => outcome.label()).increment(1);
}

/// Record a refresh or revoke attempt.
pub fn record_token_operation(operation: &'static str, success: bool) {
    let outcome = if success { "success" } else { "failure" };
    metrics::counter!(
        "oauth_token_operations_total",
        "operation" => operation,
        "outcome" => outcome
    )
    .increment(1);
}

/// Record a finished HTTP request against its matched route.
pub fn record_request(route: String, status: u16, duration_secs: f64) {
    metrics::histogram!(DURATION_METRIC, "route" => route, "status" => status.to_string())
        .record(duration_secs);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusRecorder;

    fn isolated_recorder() -> (PrometheusRecorder, PrometheusHandle) {
        let recorder = builder().build_recorder();
        let handle = recorder.handle();
        (recorder, handle)
    }

    #[test]
    fn record_functions_do_not_panic_without_recorder() {
        record_authorization(AttemptState::Completed);
        record_token_operation("refresh", true);
        record_request("/health".into(), 200, 0.001);
    }

    #[test]
    fn authorization_outcomes_are_labelled() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_authorization(AttemptState::Completed);
        record_authorization(AttemptState::Expired);

        let output = handle.render();
        assert!(output.contains("oauth_authorizations_total"));
        assert!(output.contains("outcome=\"completed\""));
        assert!(output.contains("outcome=\"expired\""));
    }

    #[test]
    fn token_operations_carry_operation_and_outcome() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_token_operation("revoke", false);

        let output = handle.render();
        assert!(output.contains("oauth_token_operations_total"));
        assert!(output.contains("operation=\"revoke\""));
        assert!(output.contains("outcome=\"failure\""));
    }

    #[test]
    fn request_duration_renders_as_histogram() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_request("/callback".into(), 200, 0.003);

        let output = handle.render();
        assert!(output.contains("http_request_duration_seconds_bucket"));
        assert!(output.contains("route=\"/callback\""));
        assert!(output.contains("le=\"0.005\""));
        assert!(output.contains("le=\"+Inf\""));
    }
}
