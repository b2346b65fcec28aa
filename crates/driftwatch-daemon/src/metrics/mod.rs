//! Prometheus metrics.
//!
//! All collectors are registered on a private registry and exported in
//! Prometheus text format by the metrics HTTP endpoint.

use chrono::{DateTime, Utc};
use prometheus::{
    CounterVec, Encoder, Gauge, GaugeVec, Histogram, HistogramOpts, IntCounter, Opts, Registry,
    TextEncoder,
};

/// Metrics failures; registration conflicts and encoding errors.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Collector registration failed.
    #[error("register metric: {0}")]
    Registration(#[from] prometheus::Error),

    /// Text encoding failed.
    #[error("encode metrics: {0}")]
    Encoding(String),
}

/// Collectors for the sentinel's observable signals.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    cycle_duration_seconds: Histogram,
    services_total: GaugeVec,
    alerts_total: CounterVec,
    docker_api_errors_total: IntCounter,
    last_successful_cycle: Gauge,
}

impl Metrics {
    /// Initializes a registry with all collectors registered.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Registration`] if a collector cannot be
    /// registered (duplicate names).
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let cycle_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "driftwatch_cycle_duration_seconds",
            "Duration of health evaluation cycles in seconds.",
        ))?;
        let services_total = GaugeVec::new(
            Opts::new(
                "driftwatch_services_total",
                "Total services by stack and status.",
            ),
            &["stack", "status"],
        )?;
        let alerts_total = CounterVec::new(
            Opts::new(
                "driftwatch_alerts_total",
                "Total alerts emitted by stack and severity.",
            ),
            &["stack", "severity"],
        )?;
        let docker_api_errors_total = IntCounter::new(
            "driftwatch_docker_api_errors_total",
            "Total Docker API errors after retries.",
        )?;
        let last_successful_cycle = Gauge::new(
            "driftwatch_last_successful_cycle_timestamp",
            "Unix timestamp of the last successful cycle.",
        )?;

        registry.register(Box::new(cycle_duration_seconds.clone()))?;
        registry.register(Box::new(services_total.clone()))?;
        registry.register(Box::new(alerts_total.clone()))?;
        registry.register(Box::new(docker_api_errors_total.clone()))?;
        registry.register(Box::new(last_successful_cycle.clone()))?;

        Ok(Self {
            registry,
            cycle_duration_seconds,
            services_total,
            alerts_total,
            docker_api_errors_total,
            last_successful_cycle,
        })
    }

    /// Records the duration of a completed cycle.
    pub fn observe_cycle_duration(&self, duration: std::time::Duration) {
        self.cycle_duration_seconds.observe(duration.as_secs_f64());
    }

    /// Sets the services gauge for the given stack and status.
    #[allow(clippy::cast_precision_loss)] // service counts are small
    pub fn set_services_total(&self, stack: &str, status: &str, value: usize) {
        self.services_total
            .with_label_values(&[stack, status])
            .set(value as f64);
    }

    /// Increments the alerts counter for the given stack and severity.
    pub fn inc_alerts_total(&self, stack: &str, severity: &str) {
        self.alerts_total.with_label_values(&[stack, severity]).inc();
    }

    /// Increments the Docker API error counter.
    pub fn inc_docker_api_errors(&self) {
        self.docker_api_errors_total.inc();
    }

    /// Sets the last successful cycle timestamp.
    #[allow(clippy::cast_precision_loss)] // unix seconds fit f64 exactly until year 285k
    pub fn set_last_successful_cycle(&self, at: DateTime<Utc>) {
        self.last_successful_cycle.set(at.timestamp() as f64);
    }

    /// Encodes all collectors in Prometheus text format.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Encoding`] when the encoder fails.
    pub fn encode_text(&self) -> Result<String, MetricsError> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|err| MetricsError::Encoding(err.to_string()))?;
        String::from_utf8(buffer).map_err(|err| MetricsError::Encoding(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_collectors_register_and_encode() {
        let metrics = Metrics::new().unwrap();
        metrics.observe_cycle_duration(std::time::Duration::from_millis(250));
        metrics.set_services_total("edge", "ok", 4);
        metrics.set_services_total("edge", "degraded", 1);
        metrics.inc_alerts_total("edge", "failed");
        metrics.inc_docker_api_errors();
        metrics.set_last_successful_cycle(Utc::now());

        let text = metrics.encode_text().unwrap();
        assert!(text.contains("driftwatch_cycle_duration_seconds"));
        assert!(text.contains("driftwatch_services_total{stack=\"edge\",status=\"ok\"} 4"));
        assert!(text.contains("driftwatch_alerts_total{stack=\"edge\",severity=\"failed\"} 1"));
        assert!(text.contains("driftwatch_docker_api_errors_total 1"));
        assert!(text.contains("driftwatch_last_successful_cycle_timestamp"));
    }

    #[test]
    fn alert_counter_accumulates() {
        let metrics = Metrics::new().unwrap();
        metrics.inc_alerts_total("edge", "degraded");
        metrics.inc_alerts_total("edge", "degraded");

        let text = metrics.encode_text().unwrap();
        assert!(text.contains("driftwatch_alerts_total{stack=\"edge\",severity=\"degraded\"} 2"));
    }
}
