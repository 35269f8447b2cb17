//! Certificate renewal cycle

use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::certbot::{CertificateIssuer, IssuanceRequest};
use crate::config::{Config, Env};
use crate::domain::{
    disable_incomplete_domains, enable_domain, valid_domains, Domain, EnableOutcome, KeyFileRef,
};
use crate::nginx::WebServer;
use crate::observability::metrics::RenewalMetrics;
use crate::state::DomainCache;

/// Outcome of one renewal cycle
///
/// Only [`RenewalStatus::Success`] means the cycle went fine; the other
/// codes name the first reason it did not, they are not flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalStatus {
    Success,
    /// No contact address configured, nothing was attempted
    MissingContact,
    /// At least one certificate request failed
    IssuanceFailed,
    /// Server reload reported an error
    ReloadFailed,
}

impl RenewalStatus {
    pub fn code(self) -> i32 {
        match self {
            RenewalStatus::Success => 0,
            RenewalStatus::MissingContact => 1,
            RenewalStatus::IssuanceFailed => 2,
            RenewalStatus::ReloadFailed => 3,
        }
    }

    pub fn is_success(self) -> bool {
        self == RenewalStatus::Success
    }
}

/// Runs renewal cycles against the configured domain directory
pub struct RenewalOrchestrator {
    config: Config,
    env: Env,
    /// Issuance backend
    issuer: Arc<dyn CertificateIssuer>,
    /// Server to reload once certificates changed
    server: Arc<dyn WebServer>,
    /// Renewal set of the previous cycle
    cache: DomainCache,
    metrics: Option<Arc<RenewalMetrics>>,
}

impl RenewalOrchestrator {
    pub fn new(
        config: Config,
        env: Env,
        issuer: Arc<dyn CertificateIssuer>,
        server: Arc<dyn WebServer>,
    ) -> Self {
        Self {
            config,
            env,
            issuer,
            server,
            cache: DomainCache::new(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<RenewalMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &DomainCache {
        &self.cache
    }

    /// Run one cycle
    ///
    /// `force_renewal` is handed to every certificate request of this cycle
    /// only.
    pub async fn run_cycle(&self, force_renewal: bool) -> RenewalStatus {
        let status = self.renew(force_renewal).await;
        info!("End certificate renewal process with code {}", status.code());

        if let Some(metrics) = &self.metrics {
            metrics.record_cycle(status.code());
            if let Some(path) = &self.config.metrics.textfile_path {
                if let Err(e) = metrics.write_textfile(Path::new(path)) {
                    warn!("Failed to write metrics: {:#}", e);
                }
            }
        }

        status
    }

    async fn renew(&self, force_renewal: bool) -> RenewalStatus {
        info!(force_renewal, "Starting certificate renewal process");

        let Some(email) = self.env.certbot_email.as_deref() else {
            error!("CERTBOT_EMAIL environment variable undefined; certbot will do nothing!");
            return RenewalStatus::MissingContact;
        };

        let config_dir = Path::new(&self.config.nginx.config_path);

        let disabled = disable_incomplete_domains(config_dir);
        if disabled > 0 {
            info!("{} domains were disabled", disabled);
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_disabled(disabled);
        }

        let domains = valid_domains(config_dir, &self.config.cert);
        if let Some(metrics) = &self.metrics {
            metrics.set_valid_domains(domains.len());
        }
        self.log_changes(&domains).await;

        if domains.is_empty() {
            warn!("Found no domains to request certificates for");
            info!(
                "Make sure configurations are saved to {} with valid content - domain in filename and certificate name inside file must match!",
                self.config.nginx.user_config_path
            );
            return RenewalStatus::Success;
        }

        info!("Found {} domains to request certificates for", domains.len());

        let key_ref = KeyFileRef::from_config(&self.config.cert);
        let mut status = RenewalStatus::Success;

        for domain in &domains {
            let request = self.request_for(domain, email, force_renewal);
            let outcome = self.issuer.request_certificate(&request).await;
            if !outcome.success {
                warn!(
                    domain = %domain.primary,
                    issuer = self.issuer.issuer_name(),
                    "Certificate request failed"
                );
                status = RenewalStatus::IssuanceFailed;
                if let Some(metrics) = &self.metrics {
                    metrics.record_issuance_failure();
                }
            }

            let enabled = enable_domain(config_dir, &domain.primary, &key_ref);
            debug!(domain = %domain.primary, outcome = enabled.code(), "Enable pass done");
            if enabled == EnableOutcome::Enabled {
                if let Some(metrics) = &self.metrics {
                    metrics.record_enabled();
                }
            }
        }

        let diagnostic = self.server.reload().await;
        if !diagnostic.is_empty() {
            error!("ERROR: nginx reload failed");
            error!("{}", diagnostic);
            status = RenewalStatus::ReloadFailed;
        }

        status
    }

    /// Certificate request for a domain under the current environment
    pub fn request_for(&self, domain: &Domain, email: &str, force_renewal: bool) -> IssuanceRequest {
        let lets_encrypt = &self.config.lets_encrypt;
        IssuanceRequest {
            domain: domain.clone(),
            force_renewal,
            dry_run: self.env.dry_run,
            email: email.to_string(),
            server_url: lets_encrypt.server_url(&self.env).to_string(),
            rsa_key_size: lets_encrypt.rsa_key_size,
            web_root: lets_encrypt.web_root.clone(),
        }
    }

    async fn log_changes(&self, domains: &[Domain]) {
        let diff = self.cache.update(domains).await;
        for primary in &diff.added {
            info!(domain = %primary, "Domain added to renewal set");
        }
        for primary in &diff.changed {
            info!(domain = %primary, "Domain names changed");
        }
        for primary in &diff.removed {
            warn!(domain = %primary, "Domain no longer eligible for renewal");
        }
    }
}
