use anyhow::{Context, Result};
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use std::fs;
use std::path::Path;

/// Counters and gauges describing renewal cycles
pub struct RenewalMetrics {
    registry: Registry,
    cycles: IntCounter,
    issuance_failures: IntCounter,
    domains_disabled: IntCounter,
    domains_enabled: IntCounter,
    valid_domains: IntGauge,
    last_cycle_status: IntGauge,
}

impl RenewalMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let cycles = IntCounter::new(
            "certbot_renewal_cycles_total",
            "Total number of renewal cycles"
        )?;
        let issuance_failures = IntCounter::new(
            "certbot_issuance_failures_total",
            "Total number of failed certificate requests"
        )?;
        let domains_disabled = IntCounter::new(
            "certbot_domains_disabled_total",
            "Total number of domain configurations disabled for missing key files"
        )?;
        let domains_enabled = IntCounter::new(
            "certbot_domains_enabled_total",
            "Total number of pending domain configurations enabled"
        )?;
        let valid_domains = IntGauge::new(
            "certbot_valid_domains",
            "Number of domains found eligible for renewal in the last cycle"
        )?;
        let last_cycle_status = IntGauge::new(
            "certbot_last_cycle_status",
            "Status code of the last renewal cycle, 0 on success"
        )?;

        registry.register(Box::new(cycles.clone()))?;
        registry.register(Box::new(issuance_failures.clone()))?;
        registry.register(Box::new(domains_disabled.clone()))?;
        registry.register(Box::new(domains_enabled.clone()))?;
        registry.register(Box::new(valid_domains.clone()))?;
        registry.register(Box::new(last_cycle_status.clone()))?;

        Ok(Self {
            registry,
            cycles,
            issuance_failures,
            domains_disabled,
            domains_enabled,
            valid_domains,
            last_cycle_status,
        })
    }

    pub fn record_cycle(&self, status: i32) {
        self.cycles.inc();
        self.last_cycle_status.set(i64::from(status));
    }

    pub fn record_issuance_failure(&self) {
        self.issuance_failures.inc();
    }

    pub fn record_disabled(&self, count: usize) {
        self.domains_disabled.inc_by(count as u64);
    }

    pub fn record_enabled(&self) {
        self.domains_enabled.inc();
    }

    pub fn set_valid_domains(&self, count: usize) {
        self.valid_domains.set(count as i64);
    }

    /// Render all metrics in the Prometheus text format
    pub fn export_metrics(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    /// Write the text format to `path` for a node exporter textfile collector
    ///
    /// The file is replaced atomically so a scrape never sees half of it.
    pub fn write_textfile(&self, path: &Path) -> Result<()> {
        let content = self.export_metrics()?;
        let mut tmp = path.as_os_str().to_os_string();
        tmp.push(".tmp");
        fs::write(&tmp, content)
            .with_context(|| format!("Failed to write metrics to {:?}", tmp))?;
        fs::rename(&tmp, path)
            .with_context(|| format!("Failed to move metrics into {}", path.display()))?;
        Ok(())
    }
}
