use crate::error::ProxyError;
use log::{debug, warn};
use rustls::ServerConfig;
use rustls::crypto::ring;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

pub const ALPN_H3: &[u8] = b"h3";

/// Create the TLS 1.3 server configuration for the HTTP/3 listener from PEM
/// certificate and private key files.
pub fn create_tls_config(
    private_key_path: &str,
    cert_path: &str,
    key_log_path: Option<&str>,
) -> Result<ServerConfig, ProxyError> {
    let mut private_key_file = BufReader::new(
        File::open(private_key_path)
            .map_err(|e| ProxyError::Config(format!("Failed to open private key file: {}", e)))?,
    );

    let mut cert_file = BufReader::new(
        File::open(cert_path)
            .map_err(|e| ProxyError::Config(format!("Failed to open certificate file: {}", e)))?,
    );

    let certs = rustls_pemfile::certs(&mut cert_file)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ProxyError::Config(format!("Failed to read certificate: {}", e)))?;

    if certs.is_empty() {
        return Err(ProxyError::Config("No valid certificate found".to_string()));
    }

    let private_key = rustls_pemfile::private_key(&mut private_key_file)
        .map_err(|e| ProxyError::Config(format!("Failed to read private key: {}", e)))?
        .ok_or_else(|| ProxyError::Config("No valid private key found".to_string()))?;

    let mut config = ServerConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|e| ProxyError::Tls(format!("Unsupported protocol versions: {}", e)))?
        .with_no_client_auth()
        .with_single_cert(certs, private_key)
        .map_err(|e| ProxyError::Tls(format!("Failed to create TLS config: {}", e)))?;

    config.alpn_protocols = vec![ALPN_H3.to_vec()];
    // No 0-RTT.
    config.max_early_data_size = 0;

    if let Some(path) = key_log_path {
        debug!("Writing TLS key log to {}", path);
        config.key_log = Arc::new(KeyLogWriter::create(Path::new(path))?);
    }

    Ok(config)
}

/// NSS key log sink for decrypting captured traffic.
#[derive(Debug)]
pub struct KeyLogWriter<W: Write + Send + std::fmt::Debug> {
    out: Mutex<W>,
}

impl KeyLogWriter<File> {
    pub fn create(path: &Path) -> Result<Self, ProxyError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| ProxyError::Config(format!("Failed to open key log file: {}", e)))?;
        Ok(Self::new(file))
    }
}

impl<W: Write + Send + std::fmt::Debug> KeyLogWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }
}

impl<W: Write + Send + std::fmt::Debug> rustls::KeyLog for KeyLogWriter<W> {
    fn log(&self, label: &str, client_random: &[u8], secret: &[u8]) {
        let line = format!(
            "{} {} {}\n",
            label,
            hex::encode(client_random),
            hex::encode(secret)
        );
        match self.out.lock() {
            Ok(mut out) => {
                if let Err(e) = out.write_all(line.as_bytes()).and_then(|_| out.flush()) {
                    warn!("Failed to write TLS key log: {}", e);
                }
            }
            Err(_) => warn!("TLS key log writer poisoned"),
        }
    }
}
