use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub cert: CertConfig,
    #[serde(default)]
    pub lets_encrypt: LetsEncryptConfig,
    #[serde(default)]
    pub nginx: NginxConfig,
    #[serde(default)]
    pub ssl: SslConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Where certbot keeps issued certificate material
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CertConfig {
    #[serde(default = "default_domain_path")]
    pub domain_path: String,
    #[serde(default = "default_private_key")]
    pub private_key: String,
}

fn default_domain_path() -> String { "/etc/letsencrypt/live".to_string() }
fn default_private_key() -> String { "privkey.pem".to_string() }

impl Default for CertConfig {
    fn default() -> Self {
        Self {
            domain_path: default_domain_path(),
            private_key: default_private_key(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LetsEncryptConfig {
    #[serde(default = "default_production_site")]
    pub production_site: String,
    #[serde(default = "default_staging_site")]
    pub staging_site: String,
    /// Seconds between two renewal cycles
    #[serde(default = "default_renewal_interval")]
    pub renewal_interval_secs: u64,
    #[serde(default = "default_rsa_key_size")]
    pub rsa_key_size: u32,
    #[serde(default = "default_web_root")]
    pub web_root: String,
    #[serde(default = "default_certbot_bin")]
    pub certbot_bin: String,
}

fn default_production_site() -> String { "https://acme-v02.api.letsencrypt.org/directory".to_string() }
fn default_staging_site() -> String { "https://acme-staging-v02.api.letsencrypt.org/directory".to_string() }
fn default_renewal_interval() -> u64 { 60 * 60 * 24 }
fn default_rsa_key_size() -> u32 { 2048 }
fn default_web_root() -> String { "/var/www/letsencrypt".to_string() }
fn default_certbot_bin() -> String { "certbot".to_string() }

impl Default for LetsEncryptConfig {
    fn default() -> Self {
        Self {
            production_site: default_production_site(),
            staging_site: default_staging_site(),
            renewal_interval_secs: default_renewal_interval(),
            rsa_key_size: default_rsa_key_size(),
            web_root: default_web_root(),
            certbot_bin: default_certbot_bin(),
        }
    }
}

impl LetsEncryptConfig {
    /// ACME directory for the given environment. Anything but `production`
    /// gets the staging directory.
    pub fn server_url(&self, env: &Env) -> &str {
        if env.is_production() {
            &self.production_site
        } else {
            &self.staging_site
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct NginxConfig {
    /// Directory nginx loads `*.conf` files from
    #[serde(default = "default_config_path")]
    pub config_path: String,
    /// Directory with user provided domain configurations
    #[serde(default = "default_user_config_path")]
    pub user_config_path: String,
    #[serde(default = "default_nginx_binary")]
    pub binary: String,
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

fn default_config_path() -> String { "/etc/nginx/conf.d".to_string() }
fn default_user_config_path() -> String { "/etc/nginx/user.conf.d".to_string() }
fn default_nginx_binary() -> String { "nginx".to_string() }
fn default_shutdown_grace() -> u64 { 10 }

impl Default for NginxConfig {
    fn default() -> Self {
        Self {
            config_path: default_config_path(),
            user_config_path: default_user_config_path(),
            binary: default_nginx_binary(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SslConfig {
    #[serde(default = "default_dhparam_file")]
    pub dhparam_file: String,
    #[serde(default = "default_dhparam_bits")]
    pub dhparam_bits: u32,
    #[serde(default = "default_openssl_bin")]
    pub openssl_bin: String,
}

fn default_dhparam_file() -> String { "/etc/nginx/ssl/dhparam.pem".to_string() }
fn default_dhparam_bits() -> u32 { 2048 }
fn default_openssl_bin() -> String { "openssl".to_string() }

impl Default for SslConfig {
    fn default() -> Self {
        Self {
            dhparam_file: default_dhparam_file(),
            dhparam_bits: default_dhparam_bits(),
            openssl_bin: default_openssl_bin(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default = "default_log_output")]
    pub output: String,
    #[serde(default)]
    pub file_path: Option<String>,
}

fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "text".to_string() }
fn default_log_output() -> String { "console".to_string() }

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            output: default_log_output(),
            file_path: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct MetricsConfig {
    /// Prometheus text file rewritten after every renewal cycle
    #[serde(default)]
    pub textfile_path: Option<String>,
}

/// Process environment the renewal cycle depends on
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Env {
    /// Contact address handed to the ACME server
    pub certbot_email: Option<String>,
    /// Run certbot with `--dry-run`
    pub dry_run: bool,
    /// Deployment environment, e.g. `development`, `staging`, `production`
    pub environment: String,
    /// Overrides `lets_encrypt.renewal_interval_secs`
    pub renewal_interval_secs: Option<u64>,
}

impl Env {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let certbot_email = lookup("CERTBOT_EMAIL")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        let dry_run = lookup("DRY_RUN")
            .map(|v| v.trim().eq_ignore_ascii_case("y"))
            .unwrap_or(false);
        let environment = lookup("ENVIRONMENT")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "development".to_string());
        let renewal_interval_secs = lookup("RENEWAL_INTERVAL")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|secs| *secs > 0);

        Self {
            certbot_email,
            dry_run,
            environment,
            renewal_interval_secs,
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

impl Config {
    /// Renewal interval after applying the environment override
    pub fn renewal_interval_secs(&self, env: &Env) -> u64 {
        env.renewal_interval_secs
            .unwrap_or(self.lets_encrypt.renewal_interval_secs)
    }
}

/// Load configuration from a TOML file. Without a path the built-in
/// defaults are used.
pub fn load_config(path: Option<&str>) -> Result<Config> {
    let config = match path {
        Some(path) => {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path))?
        }
        None => Config::default(),
    };
    validate_config(&config)?;
    Ok(config)
}

pub fn validate_config(config: &Config) -> Result<()> {
    if config.lets_encrypt.renewal_interval_secs == 0 {
        anyhow::bail!("lets_encrypt.renewal_interval_secs must be greater than zero");
    }
    if config.lets_encrypt.rsa_key_size < 2048 {
        anyhow::bail!(
            "lets_encrypt.rsa_key_size must be at least 2048, got {}",
            config.lets_encrypt.rsa_key_size
        );
    }

    let paths = [
        ("cert.domain_path", &config.cert.domain_path),
        ("cert.private_key", &config.cert.private_key),
        ("lets_encrypt.web_root", &config.lets_encrypt.web_root),
        ("nginx.config_path", &config.nginx.config_path),
        ("nginx.user_config_path", &config.nginx.user_config_path),
        ("ssl.dhparam_file", &config.ssl.dhparam_file),
    ];
    for (name, value) in paths {
        if value.trim().is_empty() {
            anyhow::bail!("{} must not be empty", name);
        }
    }

    if config.cert.private_key.contains('/') {
        anyhow::bail!("cert.private_key must be a file name, got {}", config.cert.private_key);
    }

    if config.logging.output == "file" && config.logging.file_path.is_none() {
        anyhow::bail!("logging.file_path is required when logging.output is \"file\"");
    }

    Ok(())
}

/// True when `path` exists, used to decide whether to fall back to defaults
pub fn config_file_exists(path: &str) -> bool {
    Path::new(path).is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> Env {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Env::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_env_defaults() {
        let env = env_of(&[]);
        assert_eq!(env.certbot_email, None);
        assert!(!env.dry_run);
        assert_eq!(env.environment, "development");
        assert_eq!(env.renewal_interval_secs, None);
    }

    #[test]
    fn test_env_blank_email_is_missing() {
        let env = env_of(&[("CERTBOT_EMAIL", "   ")]);
        assert_eq!(env.certbot_email, None);
    }

    #[test]
    fn test_env_dry_run_flag() {
        assert!(env_of(&[("DRY_RUN", "Y")]).dry_run);
        assert!(env_of(&[("DRY_RUN", "y")]).dry_run);
        assert!(!env_of(&[("DRY_RUN", "N")]).dry_run);
        assert!(!env_of(&[("DRY_RUN", "yes")]).dry_run);
    }

    #[test]
    fn test_server_url_defaults_to_staging() {
        let config = LetsEncryptConfig::default();
        for environment in ["development", "staging", "test", "Production", "prod"] {
            let env = env_of(&[("ENVIRONMENT", environment)]);
            assert_eq!(config.server_url(&env), config.staging_site);
        }

        let env = env_of(&[("ENVIRONMENT", "production")]);
        assert_eq!(config.server_url(&env), config.production_site);
    }

    #[test]
    fn test_renewal_interval_override() {
        let config = Config::default();
        assert_eq!(config.renewal_interval_secs(&env_of(&[])), 86400);
        assert_eq!(
            config.renewal_interval_secs(&env_of(&[("RENEWAL_INTERVAL", "3600")])),
            3600
        );
        // Zero and garbage fall back to the file value
        assert_eq!(
            config.renewal_interval_secs(&env_of(&[("RENEWAL_INTERVAL", "0")])),
            86400
        );
        assert_eq!(
            config.renewal_interval_secs(&env_of(&[("RENEWAL_INTERVAL", "daily")])),
            86400
        );
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_validate_rejects_small_key() {
        let mut config = Config::default();
        config.lets_encrypt.rsa_key_size = 1024;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_rejects_file_logging_without_path() {
        let mut config = Config::default();
        config.logging.output = "file".to_string();
        assert!(validate_config(&config).is_err());
    }
}
