//! rustls provider setup for the REST client and the push channel.

use std::sync::OnceLock;

use rustls::crypto::CryptoProvider;
use tracing::debug;
use url::Url;

/// Whether connections to `url` go through TLS.
pub fn is_secure(url: &Url) -> bool {
    matches!(url.scheme(), "https" | "wss")
}

/// Make sure a process-wide rustls provider exists before the first TLS
/// handshake.
///
/// Returns true if aws-lc-rs was installed by this crate, false if the
/// application had already chosen a provider.
pub fn ensure_crypto_provider() -> bool {
    static INSTALLED_HERE: OnceLock<bool> = OnceLock::new();
    *INSTALLED_HERE.get_or_init(|| {
        if CryptoProvider::get_default().is_some() {
            debug!("Keeping the application's rustls provider");
            return false;
        }
        match rustls::crypto::aws_lc_rs::default_provider().install_default() {
            Ok(()) => true,
            Err(existing) => {
                debug!(?existing, "rustls provider installed concurrently");
                false
            }
        }
    })
}
