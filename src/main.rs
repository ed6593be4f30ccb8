use clap::Parser;
use log::info;
use simple_network_relay::config::Config;
use simple_network_relay::logging::{self, CustomLogger};
use simple_network_relay::server::RelayServer;
use std::path::Path;
use tokio::signal;

#[derive(Parser)]
#[clap(
    version,
    about = "HTTP/3 CONNECT relay forwarding authenticated tunnels to TCP destinations"
)]
struct Args {
    #[clap(short, long, value_name = "ADDR", help = "Listen address (default: 0.0.0.0:443)")]
    listen: Option<String>,

    #[clap(short, long, value_name = "FILE", help = "Configuration file path")]
    config: Option<String>,

    #[clap(long, value_name = "FILE", help = "Certificate file path (PEM)")]
    certificate: Option<String>,

    #[clap(long, value_name = "FILE", help = "Private key file path (PEM)")]
    private_key: Option<String>,

    #[clap(long, value_name = "SECRET", help = "Shared secret expected in the auth header")]
    auth_secret: Option<String>,

    #[clap(long, value_name = "FILE", help = "Append TLS session keys to this file (NSS key log format)")]
    key_log_file: Option<String>,

    #[clap(long, value_name = "SECONDS", help = "QUIC idle timeout in seconds")]
    idle_timeout: Option<u64>,

    #[clap(long, value_name = "SECONDS", help = "DNS resolution timeout in seconds")]
    resolve_timeout: Option<u64>,

    #[clap(long, value_name = "SECONDS", help = "Destination connect timeout in seconds")]
    connect_timeout: Option<u64>,

    #[clap(long, value_name = "FILE", help = "Generate a sample configuration file")]
    generate_config: Option<String>,

    #[clap(long, value_name = "LEVEL", help = "Log level: trace, debug, info, warn, error")]
    log_level: Option<String>,

    #[clap(long, value_name = "FORMAT", help = "Log format: text or json")]
    log_format: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if let Some(config_file) = &args.generate_config {
        Config::default().to_file(config_file)?;
        println!("Sample configuration file generated: {}", config_file);
        return Ok(());
    }

    let mut config = match &args.config {
        Some(config_file) => {
            if !Path::new(config_file).exists() {
                return Err(format!("Configuration file not found: {}", config_file).into());
            }
            Config::from_file(config_file)?
        }
        None => Config::default(),
    };
    apply_args(&mut config, &args)?;

    init_logging(&config, &args)?;
    config.validate()?;

    let server = RelayServer::bind(&config)?;
    let shutdown = server.shutdown_token();
    let mut server_handle = tokio::spawn(server.run());

    let finished = tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            shutdown.cancel();
            None
        }
        result = &mut server_handle => Some(result),
    };

    let result = match finished {
        Some(result) => result,
        None => server_handle.await,
    };
    result??;
    Ok(())
}

/// Command line flags override the configuration file.
fn apply_args(config: &mut Config, args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(listen) = &args.listen {
        config.listen_addr = listen.parse()?;
    }
    if let Some(certificate) = &args.certificate {
        config.certificate = certificate.clone();
    }
    if let Some(private_key) = &args.private_key {
        config.private_key = private_key.clone();
    }
    if let Some(secret) = &args.auth_secret {
        config.auth_secret = secret.clone();
    }
    if args.key_log_file.is_some() {
        config.key_log_file = args.key_log_file.clone();
    }
    if args.idle_timeout.is_some() {
        config.idle_timeout_secs = args.idle_timeout;
    }
    if args.resolve_timeout.is_some() {
        config.resolve_timeout_secs = args.resolve_timeout;
    }
    if args.connect_timeout.is_some() {
        config.connect_timeout_secs = args.connect_timeout;
    }
    Ok(())
}

fn init_logging(config: &Config, args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let level = args
        .log_level
        .as_deref()
        .map(logging::parse_log_level)
        .transpose()?;
    let format = args
        .log_format
        .as_deref()
        .map(logging::parse_log_format)
        .transpose()?;

    match config.logging.clone() {
        Some(mut logging_config) => {
            if level.is_some() {
                logging_config.level = level;
            }
            if format.is_some() {
                logging_config.format = format;
            }
            CustomLogger::init(logging_config)
        }
        None => logging::init_fallback(level, format),
    }
}
