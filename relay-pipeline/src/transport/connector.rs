//! TLS connector setup for the hyper transport.

use std::sync::Arc;

use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use rustls::ClientConfig;

use crate::PipelineError;

/// Default TLS configuration: ring crypto, system root certificates,
/// webpki roots as fallback when the system store yields nothing.
pub(crate) fn default_tls_config() -> Result<ClientConfig, PipelineError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| PipelineError::Config(format!("tls protocol versions: {e}")))?;

    let mut roots = rustls::RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    if !native.errors.is_empty() {
        tracing::debug!(errors = ?native.errors, "errors loading native certs");
    }
    roots.add_parsable_certificates(native.certs);
    if roots.is_empty() {
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }

    Ok(builder.with_root_certificates(roots).with_no_client_auth())
}

/// Build an HTTPS connector, falling back to the default TLS config when
/// none is provided. Plain `http://` endpoints stay supported.
pub(crate) fn build_https_connector(
    tls_config: Option<ClientConfig>,
) -> Result<HttpsConnector<HttpConnector>, PipelineError> {
    let config = match tls_config {
        Some(config) => config,
        None => default_tls_config()?,
    };
    Ok(HttpsConnectorBuilder::new()
        .with_tls_config(config)
        .https_or_http()
        .enable_http1()
        .enable_http2()
        .build())
}
