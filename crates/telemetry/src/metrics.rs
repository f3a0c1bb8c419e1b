use lazy_static::lazy_static;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ==== Form Session Metrics ====
    pub static ref COMPLAINT_ACTIVE_SESSIONS: IntGauge = {
        let metric = IntGauge::new("complaint_active_sessions", "Number of open form sessions")
            .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref COMPLAINT_SUBMISSIONS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "complaint_submissions_total",
                "Total number of submission attempts",
            ),
            &["status"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    // ==== Capture Metrics ====
    pub static ref COMPLAINT_CAPTURES: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "complaint_captures_total",
                "Total number of images added to drafts",
            ),
            &["source", "status"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref CAMERA_ACTIVE_STREAMS: IntGauge = {
        let metric = IntGauge::new("camera_active_streams", "Number of open camera streams")
            .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    // ==== Validation Metrics ====
    pub static ref COMPLAINT_VALIDATIONS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "complaint_validations_total",
                "Total number of validation runs by outcome",
            ),
            &["outcome"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref CLASSIFIER_INFERENCE_TIME: HistogramVec = {
        let metric = HistogramVec::new(
            HistogramOpts::new(
                "classifier_inference_seconds",
                "Per-image classifier inference time",
            )
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]),
            &["backend"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    // ==== Geocoding Metrics ====
    pub static ref GEOCODE_REQUESTS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "geocode_requests_total",
                "Total number of reverse geocoding requests",
            ),
            &["status"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };
}

/// Render every registered metric in the Prometheus text format
pub fn gather_text() -> Result<String, prometheus::Error> {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&REGISTRY.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_are_registered() {
        COMPLAINT_VALIDATIONS.with_label_values(&["allowed"]).inc();
        GEOCODE_REQUESTS.with_label_values(&["success"]).inc();

        let text = gather_text().unwrap();
        assert!(text.contains("complaint_validations_total"));
        assert!(text.contains("geocode_requests_total"));
    }
}
