use lazy_static::lazy_static;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ==== LPR Pipeline Metrics ====
    pub static ref LPR_FRAMES_PROCESSED: IntCounter = {
        let metric = IntCounter::new(
            "lpr_frames_processed_total",
            "Total number of frames run through the plate pipeline",
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref LPR_CANDIDATES: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "lpr_candidates_total",
                "Plate candidates by reconstruction and gate decision",
            ),
            &["decision"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref LPR_RECORDS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "lpr_records_total",
                "Persistence attempts by outcome",
            ),
            &["outcome"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref LPR_INFERENCE_TIME: HistogramVec = {
        let metric = HistogramVec::new(
            HistogramOpts::new(
                "lpr_inference_seconds",
                "Model inference latency",
            )
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]),
            &["stage"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref LPR_ACTIVE_FEEDS: IntGauge = {
        let metric = IntGauge::new("lpr_active_feeds", "Number of connected video feeds")
            .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };
}

/// Helper function to encode metrics for Prometheus scraping
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| {
        prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lpr_metrics_accessible() {
        LPR_ACTIVE_FEEDS.set(2);
        assert_eq!(LPR_ACTIVE_FEEDS.get(), 2);

        let before = LPR_CANDIDATES.with_label_values(&["accepted"]).get();
        LPR_CANDIDATES.with_label_values(&["accepted"]).inc();
        assert_eq!(LPR_CANDIDATES.with_label_values(&["accepted"]).get(), before + 1);
    }

    #[test]
    fn test_encode_metrics_succeeds() {
        LPR_FRAMES_PROCESSED.inc();
        let encoded = encode_metrics().expect("metrics should encode");
        assert!(encoded.contains("lpr_frames_processed_total"));
    }
}
