// Integration tests for the renewal cycle with in-test collaborators

use async_trait::async_trait;
use nginx_certbot::certbot::{CertificateIssuer, IssuanceOutcome, IssuanceRequest};
use nginx_certbot::config::{Config, Env};
use nginx_certbot::nginx::WebServer;
use nginx_certbot::observability::metrics::RenewalMetrics;
use nginx_certbot::renewal::{RenewalOrchestrator, RenewalStatus};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Records every request; fails for the listed primaries and writes
/// certificate files for the others when `live_dir` is set
#[derive(Default)]
struct RecordingIssuer {
    requests: Mutex<Vec<IssuanceRequest>>,
    fail_for: Vec<String>,
    live_dir: Option<PathBuf>,
}

impl RecordingIssuer {
    fn requests(&self) -> Vec<IssuanceRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CertificateIssuer for RecordingIssuer {
    async fn request_certificate(&self, request: &IssuanceRequest) -> IssuanceOutcome {
        self.requests.lock().unwrap().push(request.clone());

        if self.fail_for.contains(&request.domain.primary) {
            return IssuanceOutcome {
                success: false,
                diagnostic: "Challenge failed".to_string(),
            };
        }
        if let Some(live_dir) = &self.live_dir {
            let dir = live_dir.join(&request.domain.primary);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("fullchain.pem"), "cert").unwrap();
            fs::write(dir.join("privkey.pem"), "key").unwrap();
        }
        IssuanceOutcome {
            success: true,
            diagnostic: String::new(),
        }
    }

    fn issuer_name(&self) -> &str {
        "recording"
    }
}

#[derive(Default)]
struct CountingServer {
    reloads: AtomicUsize,
    diagnostic: String,
}

#[async_trait]
impl WebServer for CountingServer {
    async fn test_configuration(&self) -> bool {
        true
    }

    async fn reload(&self) -> String {
        self.reloads.fetch_add(1, Ordering::SeqCst);
        self.diagnostic.clone()
    }
}

struct Fixture {
    _dir: TempDir,
    conf_dir: PathBuf,
    live_dir: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let conf_dir = dir.path().join("conf.d");
        let live_dir = dir.path().join("live");
        fs::create_dir_all(&conf_dir).unwrap();
        Self {
            _dir: dir,
            conf_dir,
            live_dir,
        }
    }

    fn config(&self) -> Config {
        let mut config = Config::default();
        config.cert.domain_path = self.live_dir.to_string_lossy().to_string();
        config.nginx.config_path = self.conf_dir.to_string_lossy().to_string();
        config
    }

    fn site(&self, identity: &str) {
        let content = format!(
            "server {{\n    server_name {identity} www.{identity};\n    ssl_certificate {live}/{identity}/fullchain.pem;\n    ssl_certificate_key {live}/{identity}/privkey.pem;\n}}\n",
            live = self.live_dir.display(),
        );
        fs::write(self.conf_dir.join(format!("{}.conf", identity)), content).unwrap();
    }
}

fn env() -> Env {
    Env {
        certbot_email: Some("admin@a.com".to_string()),
        dry_run: false,
        environment: "staging".to_string(),
        renewal_interval_secs: None,
    }
}

fn orchestrator(
    fixture: &Fixture,
    env: Env,
    issuer: Arc<RecordingIssuer>,
    server: Arc<CountingServer>,
) -> RenewalOrchestrator {
    RenewalOrchestrator::new(fixture.config(), env, issuer, server)
}

#[tokio::test]
async fn test_missing_contact_does_nothing() {
    let fixture = Fixture::new();
    fixture.site("a.com");
    let issuer = Arc::new(RecordingIssuer::default());
    let server = Arc::new(CountingServer::default());
    let env = Env {
        certbot_email: None,
        ..env()
    };

    let status = orchestrator(&fixture, env, issuer.clone(), server.clone())
        .run_cycle(false)
        .await;

    assert_eq!(status, RenewalStatus::MissingContact);
    assert!(issuer.requests().is_empty());
    assert_eq!(server.reloads.load(Ordering::SeqCst), 0);
    // The disable pass did not run either
    assert!(fixture.conf_dir.join("a.com.conf").exists());
}

#[tokio::test]
async fn test_empty_set_succeeds_without_calls() {
    let fixture = Fixture::new();
    let issuer = Arc::new(RecordingIssuer::default());
    let server = Arc::new(CountingServer::default());

    let status = orchestrator(&fixture, env(), issuer.clone(), server.clone())
        .run_cycle(false)
        .await;

    assert_eq!(status, RenewalStatus::Success);
    assert!(issuer.requests().is_empty());
    assert_eq!(server.reloads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_one_failed_issuance_does_not_stop_the_others() {
    let fixture = Fixture::new();
    fixture.site("a.com");
    fixture.site("b.com");
    let issuer = Arc::new(RecordingIssuer {
        fail_for: vec!["a.com".to_string()],
        ..RecordingIssuer::default()
    });
    let server = Arc::new(CountingServer::default());

    let status = orchestrator(&fixture, env(), issuer.clone(), server.clone())
        .run_cycle(false)
        .await;

    assert_eq!(status, RenewalStatus::IssuanceFailed);
    let primaries: Vec<String> = issuer
        .requests()
        .into_iter()
        .map(|r| r.domain.primary)
        .collect();
    assert_eq!(primaries, vec!["a.com", "b.com"]);
    assert_eq!(server.reloads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_reload_failure() {
    let fixture = Fixture::new();
    fixture.site("a.com");
    let issuer = Arc::new(RecordingIssuer::default());
    let server = Arc::new(CountingServer {
        diagnostic: "nginx: [emerg] unknown directive".to_string(),
        ..CountingServer::default()
    });

    let status = orchestrator(&fixture, env(), issuer, server.clone())
        .run_cycle(false)
        .await;

    assert_eq!(status, RenewalStatus::ReloadFailed);
    assert_eq!(server.reloads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_requests_carry_names_and_flags() {
    let fixture = Fixture::new();
    fixture.site("a.com");
    let issuer = Arc::new(RecordingIssuer::default());
    let server = Arc::new(CountingServer::default());
    let env = Env {
        dry_run: true,
        ..env()
    };

    let status = orchestrator(&fixture, env, issuer.clone(), server)
        .run_cycle(true)
        .await;
    assert_eq!(status, RenewalStatus::Success);

    let requests = issuer.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.domain.primary, "a.com");
    assert_eq!(request.domain.optional, vec!["www.a.com"]);
    assert!(request.force_renewal);
    assert!(request.dry_run);
    assert_eq!(request.email, "admin@a.com");
    assert_eq!(request.server_url, Config::default().lets_encrypt.staging_site);
}

#[tokio::test]
async fn test_disabled_domain_is_enabled_after_issuance() {
    let fixture = Fixture::new();
    fixture.site("a.com");
    let issuer = Arc::new(RecordingIssuer {
        live_dir: Some(fixture.live_dir.clone()),
        ..RecordingIssuer::default()
    });
    let server = Arc::new(CountingServer::default());
    let metrics = Arc::new(RenewalMetrics::new().unwrap());

    let status = orchestrator(&fixture, env(), issuer.clone(), server)
        .with_metrics(metrics.clone())
        .run_cycle(false)
        .await;

    assert_eq!(status, RenewalStatus::Success);
    assert_eq!(issuer.requests().len(), 1);
    assert!(fixture.conf_dir.join("a.com.conf").exists());
    assert!(!fixture.conf_dir.join("a.com.conf.pending").exists());

    let text = metrics.export_metrics().unwrap();
    assert!(text.contains("certbot_domains_disabled_total 1"));
    assert!(text.contains("certbot_domains_enabled_total 1"));
    assert!(text.contains("certbot_last_cycle_status 0"));
}

#[tokio::test]
async fn test_failed_issuance_keeps_domain_disabled() {
    let fixture = Fixture::new();
    fixture.site("a.com");
    let issuer = Arc::new(RecordingIssuer {
        fail_for: vec!["a.com".to_string()],
        live_dir: Some(fixture.live_dir.clone()),
        ..RecordingIssuer::default()
    });
    let server = Arc::new(CountingServer::default());

    let status = orchestrator(&fixture, env(), issuer, server)
        .run_cycle(false)
        .await;

    assert_eq!(status, RenewalStatus::IssuanceFailed);
    assert!(fixture.conf_dir.join("a.com.conf.pending").exists());
    assert!(!fixture.conf_dir.join("a.com.conf").exists());
}

#[tokio::test]
async fn test_cache_tracks_renewal_set() {
    let fixture = Fixture::new();
    fixture.site("a.com");
    let issuer = Arc::new(RecordingIssuer::default());
    let server = Arc::new(CountingServer::default());
    let orchestrator = orchestrator(&fixture, env(), issuer, server);

    orchestrator.run_cycle(false).await;
    let primaries: Vec<String> = orchestrator
        .cache()
        .domains()
        .await
        .into_iter()
        .map(|d| d.primary)
        .collect();
    assert_eq!(primaries, vec!["a.com"]);
    assert!(orchestrator.cache().scanned_at().await.is_some());
}
