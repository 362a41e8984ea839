//! Client-side mTLS configuration from PEM files on disk.

use anyhow::{Context, Result};
use rustls::{Certificate, ClientConfig, PrivateKey, RootCertStore};
use rustls_pemfile::{certs, ec_private_keys, pkcs8_private_keys, rsa_private_keys};
use std::fs::File;
use std::io::{BufReader, Cursor};
use std::path::Path;

/// Build a rustls client config trusting `ca_path` and presenting the
/// certificate/key pair for client auth. The server certificate is verified
/// against the CA bundle, including hostname checks.
pub fn build_client_config(ca_path: &Path, cert_path: &Path, key_path: &Path) -> Result<ClientConfig> {
    // Load CA certificates
    let ca_reader = &mut BufReader::new(
        File::open(ca_path).with_context(|| format!("open CA cert: {}", ca_path.display()))?,
    );
    let ca_der = certs(ca_reader).context("parse CA certificates")?;
    let ca_certs: Vec<Certificate> = ca_der.into_iter().map(Certificate).collect();
    let mut root_store = RootCertStore::empty();
    let (added, _) = root_store.add_parsable_certificates(&ca_certs);
    if added == 0 {
        anyhow::bail!("no CA certificates loaded from {}", ca_path.display());
    }

    // Load client certificate chain
    let chain_reader = &mut BufReader::new(
        File::open(cert_path)
            .with_context(|| format!("open client cert: {}", cert_path.display()))?,
    );
    let chain = certs(chain_reader).context("parse client certificate chain")?;
    if chain.is_empty() {
        anyhow::bail!("no certificates found in {}", cert_path.display());
    }
    let chain: Vec<Certificate> = chain.into_iter().map(Certificate).collect();

    // Load private key
    let key = load_private_key(key_path)?;

    let mut config = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(root_store)
        .with_client_auth_cert(chain, key)
        .context("build TLS client config")?;

    config.alpn_protocols.push(b"mqtt".to_vec());

    Ok(config)
}

fn load_private_key(path: &Path) -> Result<PrivateKey> {
    let bytes =
        std::fs::read(path).with_context(|| format!("read key file: {}", path.display()))?;
    let mut cursor = Cursor::new(&bytes);

    // Try PKCS#8 first
    if let Some(key) = pkcs8_private_keys(&mut cursor)
        .context("parse PKCS#8 private key")?
        .into_iter()
        .next()
    {
        return Ok(PrivateKey(key));
    }

    // Try RSA
    cursor.set_position(0);
    if let Some(key) = rsa_private_keys(&mut cursor)
        .context("parse RSA private key")?
        .into_iter()
        .next()
    {
        return Ok(PrivateKey(key));
    }

    // Try EC (SEC1)
    cursor.set_position(0);
    if let Some(key) = ec_private_keys(&mut cursor)
        .context("parse EC private key")?
        .into_iter()
        .next()
    {
        return Ok(PrivateKey(key));
    }

    anyhow::bail!("no supported private key found in {}", path.display());
}
