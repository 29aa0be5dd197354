//! Snapshot source: local file or HTTP(S) fetch of the statistics feed

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Client, Identity};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{AppError, Result};

/// Where snapshot bytes come from
pub struct SnapshotSource {
    uri: String,
    token: Option<String>,
    client: Client,
}

impl SnapshotSource {
    /// Build a source for `uri`.
    ///
    /// Without a token the client presents an X509 identity when one is
    /// configured through `X509_USER_PROXY` or `X509_USER_CERT`/`X509_USER_KEY`.
    pub fn new(uri: impl Into<String>, token: Option<String>, timeout: Option<Duration>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        // gzip responses are decoded by the client, which also sets Accept-Encoding.
        let mut builder = Client::builder()
            .default_headers(headers)
            .gzip(true)
            .user_agent(concat!("wmstats/", env!("CARGO_PKG_VERSION")));
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        if token.is_none() {
            if let Some(identity) = load_identity()? {
                info!("Using X509 client identity for upstream requests");
                builder = builder.identity(identity).danger_accept_invalid_certs(true);
            }
        }

        Ok(Self {
            uri: uri.into(),
            token,
            client: builder.build()?,
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Read the current document bytes.
    pub async fn fetch(&self) -> Result<Vec<u8>> {
        if tokio::fs::metadata(&self.uri).await.is_ok() {
            let data = tokio::fs::read(&self.uri).await?;
            debug!(uri = %self.uri, bytes = data.len(), "Read snapshot from file");
            return Ok(data);
        }

        let mut request = self.client.get(&self.uri);
        if let Some(token) = &self.token {
            request = request.header(AUTHORIZATION, format!("Bearer {}", read_token(token)?));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Fetch(format!("{} returned {}", self.uri, status)));
        }
        let data = response.bytes().await?.to_vec();
        debug!(uri = %self.uri, bytes = data.len(), "Fetched snapshot");
        Ok(data)
    }
}

/// A token value may name a file holding the token.
fn read_token(token: &str) -> Result<String> {
    if Path::new(token).is_file() {
        let contents = std::fs::read_to_string(token)?;
        return Ok(contents.replace('\n', ""));
    }
    Ok(token.to_string())
}

/// Default grid proxy location for the current user, `/tmp/x509up_u<uid>`.
#[cfg(unix)]
fn default_proxy() -> Option<PathBuf> {
    use std::os::unix::fs::MetadataExt;
    let uid = std::fs::metadata("/proc/self").ok()?.uid();
    Some(PathBuf::from(format!("/tmp/x509up_u{}", uid)))
}

#[cfg(not(unix))]
fn default_proxy() -> Option<PathBuf> {
    None
}

/// Certificate and key files: an explicit proxy, then a cert/key pair, then
/// the default proxy when it exists.
fn identity_paths(
    proxy: Option<String>,
    cert: Option<String>,
    key: Option<String>,
    fallback: Option<PathBuf>,
) -> Option<(PathBuf, PathBuf)> {
    match (proxy, cert, key) {
        // A proxy file carries certificate chain and key together.
        (Some(proxy), _, _) => Some((PathBuf::from(&proxy), PathBuf::from(proxy))),
        (None, Some(cert), Some(key)) => Some((PathBuf::from(cert), PathBuf::from(key))),
        _ => fallback
            .filter(|path| path.is_file())
            .map(|path| (path.clone(), path)),
    }
}

/// Only PKCS#8 keys are accepted by the native TLS backend; PKCS#1
/// (`BEGIN RSA PRIVATE KEY`) keys must be converted with
/// `openssl pkcs8 -topk8 -nocrypt` first.
fn identity_from_pem(cert: &Path, cert_pem: &[u8], key_pem: &[u8]) -> Result<Identity> {
    if String::from_utf8_lossy(key_pem).contains("BEGIN RSA PRIVATE KEY") {
        return Err(AppError::Config(format!(
            "{}: PKCS#1 private keys are not supported, convert the key to PKCS#8",
            cert.display()
        )));
    }
    Identity::from_pkcs8_pem(cert_pem, key_pem).map_err(|e| {
        warn!(cert = %cert.display(), error = %e, "Unable to load X509 identity");
        AppError::Config(format!("invalid X509 identity {}: {}", cert.display(), e))
    })
}

fn load_identity() -> Result<Option<Identity>> {
    let paths = identity_paths(
        std::env::var("X509_USER_PROXY").ok(),
        std::env::var("X509_USER_CERT").ok(),
        std::env::var("X509_USER_KEY").ok(),
        default_proxy(),
    );
    let Some((cert, key)) = paths else {
        return Ok(None);
    };

    let cert_pem = std::fs::read(&cert)?;
    let key_pem = std::fs::read(&key)?;
    identity_from_pem(&cert, &cert_pem, &key_pem).map(Some)
}
