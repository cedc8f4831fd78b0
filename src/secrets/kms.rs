//! # KMS Decryptor
//!
//! [`Decryptor`] backed by AWS KMS. Ciphertext is base64-encoded KMS
//! ciphertext blob; the key is identified by the blob itself.

use super::Decryptor;
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_kms::error::DisplayErrorContext;
use aws_sdk_kms::primitives::Blob;
use aws_sdk_kms::Client as KmsClient;
use base64::{engine::general_purpose, Engine as _};
use tracing::info;

pub struct KmsDecryptor {
    client: KmsClient,
}

impl std::fmt::Debug for KmsDecryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KmsDecryptor").finish_non_exhaustive()
    }
}

impl KmsDecryptor {
    pub async fn new(region: Option<&str>) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region.to_string()));
        }
        let sdk_config = loader.load().await;
        Self::from_sdk_config(&sdk_config)
    }

    #[must_use]
    pub fn from_sdk_config(sdk_config: &SdkConfig) -> Self {
        info!("Using KMS for secret decryption");
        Self {
            client: KmsClient::new(sdk_config),
        }
    }
}

/// Decode the base64 ciphertext blob carried inside a tagged value
pub fn decode_ciphertext(ciphertext: &str) -> Result<Vec<u8>> {
    general_purpose::STANDARD
        .decode(ciphertext.trim())
        .context("Ciphertext is not valid base64")
}

#[async_trait]
impl Decryptor for KmsDecryptor {
    async fn decrypt(&self, ciphertext: &str) -> Result<String> {
        let blob = decode_ciphertext(ciphertext)?;

        let response = self
            .client
            .decrypt()
            .ciphertext_blob(Blob::new(blob))
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("KMS decrypt failed: {}", DisplayErrorContext(&e)))?;

        let plaintext = response
            .plaintext()
            .ok_or_else(|| anyhow::anyhow!("KMS decrypt returned no plaintext"))?;
        plaintext_to_string(plaintext.as_ref())
    }
}

/// Copy decrypted bytes into a `String` without leaving an unzeroized buffer behind
fn plaintext_to_string(bytes: &[u8]) -> Result<String> {
    let text = std::str::from_utf8(bytes).context("Decrypted secret is not valid UTF-8")?;
    Ok(text.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_ciphertext() {
        assert_eq!(decode_ciphertext("aGVsbG8=").unwrap(), b"hello");
        assert_eq!(decode_ciphertext(" aGVsbG8=\n").unwrap(), b"hello");
    }

    #[test]
    fn test_plaintext_to_string() {
        assert_eq!(plaintext_to_string(b"hunter2").unwrap(), "hunter2");
        assert!(plaintext_to_string(&[0xff, 0xfe]).is_err());
    }

    #[test]
    fn test_decode_ciphertext_rejects_garbage() {
        assert!(decode_ciphertext("not base64!").is_err());
    }
}
