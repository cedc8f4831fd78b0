//! # Secrets
//!
//! Transparent decryption of tagged secret values.
//!
//! A value is ciphertext if and only if it starts with `[ENC,`. The text after
//! the marker (minus one optional closing `]`) is handed to a [`Decryptor`];
//! every other value passes through unchanged.

pub mod kms;

use crate::constants::ENCRYPTED_MARKER;
use crate::observability::metrics;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info_span, Instrument};
use zeroize::Zeroizing;

pub use kms::KmsDecryptor;

/// Decryption oracle
#[async_trait]
pub trait Decryptor: Send + Sync {
    /// Decrypt the ciphertext portion of a tagged value
    async fn decrypt(&self, ciphertext: &str) -> anyhow::Result<String>;
}

/// Ciphertext portion of a tagged value, or `None` for plaintext
#[must_use]
pub fn ciphertext(value: &str) -> Option<&str> {
    let body = value.strip_prefix(ENCRYPTED_MARKER)?;
    Some(body.strip_suffix(']').unwrap_or(body))
}

/// Resolves secret values through a [`Decryptor`], caching plaintext per instance
///
/// Build one per reconciliation call; cached plaintext is zeroized when the
/// instance is dropped.
pub struct SecretDecryptor {
    decryptor: Arc<dyn Decryptor>,
    cache: Mutex<HashMap<String, Zeroizing<String>>>,
}

impl std::fmt::Debug for SecretDecryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretDecryptor").finish_non_exhaustive()
    }
}

impl SecretDecryptor {
    pub fn new(decryptor: Arc<dyn Decryptor>) -> Self {
        Self {
            decryptor,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn cached(&self, ciphertext: &str) -> Option<String> {
        self.cache
            .lock()
            .ok()
            .and_then(|cache| cache.get(ciphertext).map(|plaintext| plaintext.to_string()))
    }

    fn remember(&self, ciphertext: &str, plaintext: &str) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(ciphertext.to_string(), Zeroizing::new(plaintext.to_string()));
        }
    }

    /// Return the plaintext for `value`
    ///
    /// Untagged values are returned unchanged without consulting the oracle.
    #[allow(
        clippy::missing_errors_doc,
        reason = "Errors come from the decryption oracle and are propagated as-is"
    )]
    pub async fn resolve(&self, value: &str) -> anyhow::Result<String> {
        let Some(ciphertext) = ciphertext(value) else {
            return Ok(value.to_string());
        };

        if let Some(plaintext) = self.cached(ciphertext) {
            debug!("Using cached plaintext for encrypted value");
            return Ok(plaintext);
        }

        metrics::increment_secret_decryptions();
        let plaintext = self
            .decryptor
            .decrypt(ciphertext)
            .instrument(info_span!("secrets.decrypt"))
            .await
            .inspect_err(|_| metrics::increment_secret_decryption_errors())?;

        self.remember(ciphertext, &plaintext);
        Ok(plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ReversingDecryptor {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Decryptor for ReversingDecryptor {
        async fn decrypt(&self, ciphertext: &str) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if ciphertext == "bad" {
                anyhow::bail!("InvalidCiphertextException");
            }
            Ok(ciphertext.chars().rev().collect())
        }
    }

    fn decryptor() -> (Arc<ReversingDecryptor>, SecretDecryptor) {
        let oracle = Arc::new(ReversingDecryptor {
            calls: AtomicUsize::new(0),
        });
        let secrets = SecretDecryptor::new(Arc::clone(&oracle) as Arc<dyn Decryptor>);
        (oracle, secrets)
    }

    #[test]
    fn test_ciphertext_extraction() {
        assert_eq!(ciphertext("[ENC,abc=]"), Some("abc="));
        assert_eq!(ciphertext("[ENC,abc="), Some("abc="));
        assert_eq!(ciphertext("plain"), None);
        assert_eq!(ciphertext(" [ENC,abc]"), None);
        assert_eq!(ciphertext("ENC,abc"), None);
    }

    #[tokio::test]
    async fn test_plaintext_passes_through() {
        let (oracle, secrets) = decryptor();
        assert_eq!(secrets.resolve("hunter2").await.unwrap(), "hunter2");
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_encrypted_value_is_decrypted_once() {
        let (oracle, secrets) = decryptor();
        assert_eq!(secrets.resolve("[ENC,cba]").await.unwrap(), "abc");
        assert_eq!(secrets.resolve("[ENC,cba]").await.unwrap(), "abc");
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_decryption_failure_propagates() {
        let (_, secrets) = decryptor();
        let err = secrets.resolve("[ENC,bad]").await.unwrap_err();
        assert!(err.to_string().contains("InvalidCiphertextException"));
    }
}
