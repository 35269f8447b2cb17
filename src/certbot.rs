//! certbot as the certificate issuance backend

use async_trait::async_trait;
use tracing::{debug, error, info};

use crate::command::execute;
use crate::domain::Domain;

/// Everything needed to request one certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuanceRequest {
    pub domain: Domain,
    /// Renew even when the current certificate is not due
    pub force_renewal: bool,
    /// Talk to the ACME server without saving anything
    pub dry_run: bool,
    pub email: String,
    /// ACME directory URL
    pub server_url: String,
    pub rsa_key_size: u32,
    /// Directory served for HTTP-01 challenges
    pub web_root: String,
}

/// Result of a certificate request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuanceOutcome {
    pub success: bool,
    /// Diagnostic text from the issuance tool, empty when it had nothing to say
    pub diagnostic: String,
}

/// Requests or renews certificates
#[async_trait]
pub trait CertificateIssuer: Send + Sync {
    async fn request_certificate(&self, request: &IssuanceRequest) -> IssuanceOutcome;

    /// Issuer name for logging
    fn issuer_name(&self) -> &str;
}

/// Issues certificates by running `certbot certonly` with the webroot plugin
#[derive(Debug, Clone)]
pub struct Certbot {
    binary: String,
}

impl Certbot {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Command line arguments for a request
    ///
    /// The primary domain names the certificate and is always the first
    /// `-d` entry; optional domains follow in order.
    pub fn args(request: &IssuanceRequest) -> Vec<String> {
        let mut args: Vec<String> = [
            "certonly",
            "--agree-tos",
            "--keep",
            "-n",
            "--text",
            "-a",
            "webroot",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        args.push(format!("--webroot-path={}", request.web_root));
        args.push("--rsa-key-size".to_string());
        args.push(request.rsa_key_size.to_string());
        args.push("--preferred-challenges".to_string());
        args.push("http-01".to_string());
        args.push("--email".to_string());
        args.push(request.email.clone());
        args.push("--server".to_string());
        args.push(request.server_url.clone());
        args.push("--cert-name".to_string());
        args.push(request.domain.primary.clone());

        for name in request.domain.names() {
            args.push("-d".to_string());
            args.push(name.to_string());
        }

        if request.force_renewal {
            args.push("--force-renewal".to_string());
        }
        if request.dry_run {
            args.push("--dry-run".to_string());
        }

        args
    }
}

#[async_trait]
impl CertificateIssuer for Certbot {
    async fn request_certificate(&self, request: &IssuanceRequest) -> IssuanceOutcome {
        info!(
            domain = %request.domain.primary,
            optional = ?request.domain.optional,
            force_renewal = request.force_renewal,
            dry_run = request.dry_run,
            "Request certificate"
        );

        let output = execute(&self.binary, &Self::args(request)).await;
        if !output.stdout.is_empty() {
            debug!(domain = %request.domain.primary, "{}", output.stdout);
        }
        if !output.success {
            error!(domain = %request.domain.primary, "{}", output.stderr);
        }

        IssuanceOutcome {
            success: output.success,
            diagnostic: output.stderr,
        }
    }

    fn issuer_name(&self) -> &str {
        "certbot"
    }
}
