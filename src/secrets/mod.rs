//! Secret resolution for step environments
//!
//! Secrets are declared once per pipeline and resolved lazily, inside the
//! worker of the step that asked for them. Decrypted values live in
//! [`SecretMaterial`], which is zeroed when dropped and never printed.

pub mod local;
pub mod redact;

use crate::core::error::SecretError;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use secrecy::zeroize::Zeroize;
use secrecy::{ExposeSecret, SecretString};
use std::collections::BTreeMap;
use std::fmt;

pub use local::LocalKeyring;
pub use redact::Redactor;

/// An encrypted secret declared by the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretRef {
    /// Logical name used by `secretEnv`
    pub name: String,

    /// Key that can decrypt the ciphertext
    pub kms_key_name: String,

    /// Base64 ciphertext
    pub ciphertext: String,
}

/// All secrets declared by a pipeline, keyed by logical name
#[derive(Debug, Clone, Default)]
pub struct SecretCatalog {
    secrets: BTreeMap<String, SecretRef>,
}

impl SecretCatalog {
    pub fn insert(&mut self, secret: SecretRef) {
        self.secrets.insert(secret.name.clone(), secret);
    }

    pub fn get(&self, name: &str) -> Option<&SecretRef> {
        self.secrets.get(name)
    }

    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }
}

/// A decrypted secret value scoped to one step invocation
///
/// The plaintext is held in a [`SecretString`], which zeroizes it on drop.
pub struct SecretMaterial {
    name: String,
    value: SecretString,
}

impl SecretMaterial {
    /// Wrap decrypted bytes; they must be valid UTF-8 to be usable as env
    pub fn new(name: impl Into<String>, value: Vec<u8>) -> Result<Self, SecretError> {
        let name = name.into();
        match String::from_utf8(value) {
            Ok(text) => Ok(Self {
                name,
                value: SecretString::from(text),
            }),
            Err(e) => {
                let detail = e.utf8_error().to_string();
                e.into_bytes().zeroize();
                Err(SecretError::decrypt_failed(
                    name,
                    format!("plaintext is not UTF-8: {}", detail),
                ))
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// The plaintext. Callers must not log or persist it.
impl ExposeSecret<str> for SecretMaterial {
    fn expose_secret(&self) -> &str {
        self.value.expose_secret()
    }
}

impl fmt::Debug for SecretMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretMaterial")
            .field("name", &self.name)
            .field("value", &"[REDACTED]")
            .finish()
    }
}

/// Backend that turns ciphertext into plaintext for a named key
#[async_trait]
pub trait KeyManagementService: Send + Sync {
    /// Decrypt `ciphertext` with the key `key_name`
    ///
    /// Returns `KeyUnavailable` when the key cannot be used and
    /// `DecryptFailed` when the ciphertext is rejected.
    async fn decrypt(
        &self,
        secret: &str,
        key_name: &str,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, SecretError>;
}

/// Capability to obtain the plaintext of a declared secret
#[async_trait]
pub trait SecretResolver: Send + Sync {
    async fn resolve(&self, secret: &SecretRef) -> Result<SecretMaterial, SecretError>;
}

/// Resolver that decodes the base64 ciphertext and asks a KMS backend to decrypt it
#[derive(Debug, Clone)]
pub struct KmsSecretResolver<K> {
    kms: K,
}

impl<K: KeyManagementService> KmsSecretResolver<K> {
    pub fn new(kms: K) -> Self {
        Self { kms }
    }
}

#[async_trait]
impl<K: KeyManagementService> SecretResolver for KmsSecretResolver<K> {
    async fn resolve(&self, secret: &SecretRef) -> Result<SecretMaterial, SecretError> {
        let ciphertext = STANDARD
            .decode(secret.ciphertext.trim())
            .map_err(|e| SecretError::decrypt_failed(&secret.name, format!("invalid base64: {}", e)))?;
        let plaintext = self
            .kms
            .decrypt(&secret.name, &secret.kms_key_name, &ciphertext)
            .await?;
        SecretMaterial::new(&secret.name, plaintext)
    }
}
