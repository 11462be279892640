//! Server-side TLS setup for STARTTLS and implicit-TLS connections.

use crate::config::Config;
use anyhow::{anyhow, Context, Result};
use log::info;
use rcgen::generate_simple_self_signed;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::ServerConfig as RustlsServerConfig;
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;

/// Builds the acceptor every connection of a listener shares.
///
/// Uses the configured PEM files when present, otherwise a self-signed
/// certificate for the server's hostname and `localhost`.
pub fn build_acceptor(config: &Config) -> Result<TlsAcceptor> {
    let (certs, key) = match (&config.tls_cert_path, &config.tls_key_path) {
        (Some(cert_path), Some(key_path)) => {
            info!("Loading TLS certificate from {}", cert_path);
            load_pem_files(cert_path, key_path)?
        }
        _ => {
            info!("No TLS certificate configured, generating a self-signed one");
            let (cert, key) = generate_self_signed_cert(&config.hostname)?;
            (vec![cert], key)
        }
    };

    let tls_config = RustlsServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| anyhow!("Failed to create rustls config: {}", e))?;

    Ok(TlsAcceptor::from(Arc::new(tls_config)))
}

fn load_pem_files(
    cert_path: &str,
    key_path: &str,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    let cert_file = File::open(cert_path)
        .with_context(|| format!("Failed to open TLS certificate {}", cert_path))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(cert_file))
        .collect::<std::result::Result<Vec<_>, _>>()
        .with_context(|| format!("Invalid PEM certificate in {}", cert_path))?;
    if certs.is_empty() {
        return Err(anyhow!("No certificates found in {}", cert_path));
    }

    let key_file = File::open(key_path)
        .with_context(|| format!("Failed to open TLS key {}", key_path))?;
    let key = rustls_pemfile::private_key(&mut BufReader::new(key_file))
        .with_context(|| format!("Invalid PEM key in {}", key_path))?
        .ok_or_else(|| anyhow!("No private key found in {}", key_path))?;

    Ok((certs, key))
}

fn generate_self_signed_cert(
    hostname: &str,
) -> Result<(CertificateDer<'static>, PrivateKeyDer<'static>)> {
    let mut subject_alt_names = vec!["localhost".to_string()];
    if hostname != "localhost" {
        subject_alt_names.push(hostname.to_string());
    }

    let certified_key = generate_simple_self_signed(subject_alt_names)
        .context("Failed to generate self-signed certificate using rcgen")?;

    let cert_der = certified_key.cert.der().to_vec();
    let key_der = certified_key.signing_key.serialize_der();

    Ok((
        CertificateDer::from(cert_der),
        PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_der)),
    ))
}
