use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use nginx_certbot::certbot::Certbot;
use nginx_certbot::config::{self, Config, Env};
use nginx_certbot::domain::{
    disable_incomplete_domains, enable_domain, transfer_user_config, valid_domains, EnableOutcome,
    KeyFileRef,
};
use nginx_certbot::nginx::{generate_dhparam, Nginx, WebServer};
use nginx_certbot::observability;
use nginx_certbot::observability::metrics::RenewalMetrics;
use nginx_certbot::renewal::RenewalOrchestrator;
use nginx_certbot::supervisor::{forward_os_signals, Supervisor};

const DEFAULT_CONFIG_PATH: &str = "nginx-certbot.toml";

#[derive(Parser)]
#[command(name = "nginx-certbot")]
#[command(about = "Run nginx and keep its Let's Encrypt certificates renewed", long_about = None)]
struct Cli {
    /// Config file path, defaults to ./nginx-certbot.toml when present
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start nginx and renew certificates periodically (default)
    Run,
    /// Run a single renewal cycle and exit with its status
    Renew {
        /// Renew certificates even when they are not due
        #[arg(long)]
        force: bool,
    },
    /// Copy user configurations and disable incomplete domains
    Prepare,
    /// List the domains eligible for renewal
    Domains {
        #[arg(long)]
        json: bool,
    },
    /// Generate the Diffie-Hellman parameters file
    Dhparam {
        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },
    /// Enable a pending domain configuration
    Enable {
        /// Primary domain name
        domain: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.or_else(|| {
        config::config_file_exists(DEFAULT_CONFIG_PATH).then(|| DEFAULT_CONFIG_PATH.to_string())
    });
    let config = config::load_config(config_path.as_deref())?;
    let guard = observability::logging::init_logging(&config.logging);
    let env = Env::from_env();

    let code = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config, env).await?,
        Commands::Renew { force } => {
            let orchestrator = build_orchestrator(config, env, None)?;
            orchestrator.run_cycle(force).await.code()
        }
        Commands::Prepare => {
            prepare(&config)?;
            0
        }
        Commands::Domains { json } => {
            list_domains(&config, json)?;
            0
        }
        Commands::Dhparam { force } => {
            if generate_dhparam(&config.ssl, force).await {
                0
            } else {
                1
            }
        }
        Commands::Enable { domain } => enable(&config, &domain),
    };

    // Flush the file writer before leaving without unwinding
    drop(guard);
    std::process::exit(code);
}

async fn run(config: Config, env: Env) -> Result<i32> {
    info!("Starting nginx-certbot");

    if !generate_dhparam(&config.ssl, false).await {
        error!("Diffie-Hellman parameters are required, exit with code 1");
        return Ok(1);
    }

    prepare(&config)?;

    let nginx = Arc::new(Nginx::new(config.nginx.binary.clone()));
    if !nginx.test_configuration().await {
        error!("nginx configuration test failed, exit with code 2");
        return Ok(2);
    }

    // Everything fallible happens before nginx is started
    let grace = Duration::from_secs(config.nginx.shutdown_grace_secs);
    let interval = Duration::from_secs(config.renewal_interval_secs(&env));
    let server: Arc<dyn WebServer> = nginx.clone();
    let orchestrator = Arc::new(build_orchestrator(config, env, Some(server))?);

    let (tx, rx) = mpsc::channel(8);
    let _signals = forward_os_signals(tx)?;

    let server = nginx.spawn(grace)?;

    Ok(Supervisor::new(orchestrator, interval)
        .with_server(server)
        .run(rx)
        .await)
}

fn build_orchestrator(
    config: Config,
    env: Env,
    server: Option<Arc<dyn WebServer>>,
) -> Result<RenewalOrchestrator> {
    let server = match server {
        Some(server) => server,
        None => Arc::new(Nginx::new(config.nginx.binary.clone())) as Arc<dyn WebServer>,
    };
    let issuer = Arc::new(Certbot::new(config.lets_encrypt.certbot_bin.clone()));
    let metrics = Arc::new(RenewalMetrics::new()?);
    Ok(RenewalOrchestrator::new(config, env, issuer, server).with_metrics(metrics))
}

fn prepare(config: &Config) -> Result<()> {
    let config_dir = Path::new(&config.nginx.config_path);
    let count = transfer_user_config(Path::new(&config.nginx.user_config_path), config_dir)?;
    info!("{} configuration files in {}", count, config_dir.display());

    let disabled = disable_incomplete_domains(config_dir);
    if disabled > 0 {
        warn!("{} domains were disabled until their certificates exist", disabled);
    }
    Ok(())
}

fn list_domains(config: &Config, json: bool) -> Result<()> {
    let domains = valid_domains(Path::new(&config.nginx.config_path), &config.cert);
    if json {
        println!("{}", serde_json::to_string_pretty(&domains)?);
    } else {
        for domain in &domains {
            println!("{}", domain.names().collect::<Vec<_>>().join(" "));
        }
    }
    Ok(())
}

fn enable(config: &Config, primary: &str) -> i32 {
    let key_ref = KeyFileRef::from_config(&config.cert);
    let outcome = enable_domain(Path::new(&config.nginx.config_path), primary, &key_ref);
    println!("{}: {}", primary, outcome.code());
    match outcome {
        EnableOutcome::RenameFailed(_) => 1,
        _ => 0,
    }
}
