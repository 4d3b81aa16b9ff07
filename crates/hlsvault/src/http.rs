use std::sync::OnceLock;
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Client, redirect};
use tracing::debug;

use crate::DownloadError;
use crate::config::HttpConfig;

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Safe to ignore: can happen if another crate installed it first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Build the shared `reqwest::Client` used by every fetcher.
///
/// Headers are attached per request (media and image hosts expect
/// different ones), so the client itself only carries transport settings.
pub fn build_client(config: &HttpConfig) -> Result<Client, DownloadError> {
    install_rustls_provider();

    let mut builder = Client::builder()
        .connect_timeout(config.connect_timeout)
        .read_timeout(config.read_timeout)
        .redirect(redirect::Policy::limited(config.max_redirects))
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .tcp_keepalive(Duration::from_secs(20));

    if config.request_timeout > Duration::ZERO {
        builder = builder.timeout(config.request_timeout);
    }

    builder.build().map_err(DownloadError::from)
}

/// Adds `Authorization: Bearer <credential>` when a credential is present.
///
/// The credential only ever lives in request headers; it is not logged and
/// not persisted.
pub fn with_bearer(mut headers: HeaderMap, credential: Option<&str>) -> HeaderMap {
    if let Some(token) = credential.map(str::trim).filter(|t| !t.is_empty()) {
        match HeaderValue::from_str(&format!("Bearer {token}")) {
            Ok(mut value) => {
                value.set_sensitive(true);
                headers.insert(AUTHORIZATION, value);
            }
            Err(_) => debug!("Ignoring credential that is not a valid header value"),
        }
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_header_is_added_and_marked_sensitive() {
        let headers = with_bearer(HeaderMap::new(), Some("abc.def"));
        let value = headers.get(AUTHORIZATION).unwrap();
        assert_eq!(value, "Bearer abc.def");
        assert!(value.is_sensitive());
    }

    #[test]
    fn blank_credential_adds_nothing() {
        assert!(with_bearer(HeaderMap::new(), Some("  ")).is_empty());
        assert!(with_bearer(HeaderMap::new(), None).is_empty());
    }

    #[test]
    fn client_builds_with_defaults() {
        assert!(build_client(&HttpConfig::default()).is_ok());
    }
}
