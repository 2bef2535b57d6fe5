//! Local key backend for running pipelines outside a cloud KMS

use crate::core::error::SecretError;
use crate::secrets::KeyManagementService;
use async_trait::async_trait;
use std::collections::BTreeSet;
use tracing::debug;

/// Keyring that knows which key names are usable on this machine
///
/// No cipher is applied: the ciphertext is taken to be the base64 of the
/// plaintext, which is how secrets are handed to local runs. What the
/// keyring does enforce is key availability, so a pipeline can be
/// exercised against a partial set of keys.
#[derive(Debug, Clone, Default)]
pub struct LocalKeyring {
    /// `None` means every key is available
    keys: Option<BTreeSet<String>>,
}

impl LocalKeyring {
    /// Keyring where every key name is available
    pub fn permissive() -> Self {
        Self { keys: None }
    }

    /// Keyring limited to the given key names
    pub fn with_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: Some(keys.into_iter().map(Into::into).collect()),
        }
    }

    pub fn has_key(&self, key_name: &str) -> bool {
        self.keys
            .as_ref()
            .map_or(true, |keys| keys.contains(key_name))
    }
}

#[async_trait]
impl KeyManagementService for LocalKeyring {
    async fn decrypt(
        &self,
        secret: &str,
        key_name: &str,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, SecretError> {
        if !self.has_key(key_name) {
            return Err(SecretError::key_unavailable(
                secret,
                format!("key '{}' is not available in the local keyring", key_name),
            ));
        }
        debug!("Decrypting secret {} with key {}", secret, key_name);
        Ok(ciphertext.to_vec())
    }
}
