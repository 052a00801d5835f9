// Secret encryption (encryption-at-rest)
//
// Secret configuration values (the database password) are stored in the state file as
// `ENCv1:<base64(nonce || ciphertext)>` using AES-256-GCM. The master key is generated lazily
// and kept in a base64 key file next to the state file, readable by the installer user only.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use anyhow::{Context, Result};
use base64::Engine;
use log::info;
use ring::rand::{SecureRandom, SystemRandom};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::OnceCell;

const ENC_PREFIX: &str = "ENCv1:";
const KEY_BYTES: usize = 32;
const NONCE_BYTES: usize = 12;

#[derive(Debug)]
pub struct SecretProtector {
    key_path: PathBuf,
    key: OnceCell<[u8; KEY_BYTES]>,
}

impl SecretProtector {
    pub fn new(key_path: PathBuf) -> Self {
        Self {
            key_path,
            key: OnceCell::new(),
        }
    }

    pub fn is_encrypted(&self, value: &str) -> bool {
        value.starts_with(ENC_PREFIX)
    }

    pub async fn encrypt(&self, plaintext: &str) -> Result<String> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }

        let cipher = self.cipher().await?;
        let mut nonce_bytes = [0u8; NONCE_BYTES];
        SystemRandom::new()
            .fill(&mut nonce_bytes)
            .map_err(|_| anyhow::anyhow!("Failed to generate nonce"))?;

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|_| anyhow::anyhow!("Secret encryption failed"))?;

        let mut blob = Vec::with_capacity(NONCE_BYTES + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);

        Ok(format!(
            "{}{}",
            ENC_PREFIX,
            base64::engine::general_purpose::STANDARD.encode(blob)
        ))
    }

    /// Plaintext values (written before encryption was enabled) pass through unchanged.
    pub async fn decrypt(&self, value: &str) -> Result<String> {
        let Some(encoded) = value.strip_prefix(ENC_PREFIX) else {
            return Ok(value.to_string());
        };
        if encoded.is_empty() {
            return Ok(String::new());
        }

        let blob = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .context("Failed to base64-decode encrypted secret")?;
        if blob.len() <= NONCE_BYTES {
            anyhow::bail!("Encrypted secret blob is too short");
        }

        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_BYTES);
        let plaintext = self
            .cipher()
            .await?
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| anyhow::anyhow!("Secret decryption failed (wrong key file?)"))?;
        String::from_utf8(plaintext).context("Decrypted secret is not valid UTF-8")
    }

    /// Encrypt the named entries of a config map in place.
    pub async fn seal_fields(&self, config: &mut BTreeMap<String, String>, keys: &[String]) -> Result<()> {
        for key in keys {
            if let Some(value) = config.get_mut(key) {
                if !self.is_encrypted(value) {
                    *value = self.encrypt(value).await?;
                }
            }
        }
        Ok(())
    }

    /// Decrypt the named entries of a config map in place.
    pub async fn open_fields(&self, config: &mut BTreeMap<String, String>, keys: &[String]) -> Result<()> {
        for key in keys {
            if let Some(value) = config.get_mut(key) {
                *value = self
                    .decrypt(value)
                    .await
                    .with_context(|| format!("Failed to decrypt stored field '{}'", key))?;
            }
        }
        Ok(())
    }

    async fn cipher(&self) -> Result<Aes256Gcm> {
        let key = self.get_or_init_key().await?;
        Aes256Gcm::new_from_slice(key)
            .map_err(|_| anyhow::anyhow!("Internal error: invalid AES-256 key length"))
    }

    async fn get_or_init_key(&self) -> Result<&[u8; KEY_BYTES]> {
        self.key
            .get_or_try_init(|| async {
                if tokio::fs::try_exists(&self.key_path).await.unwrap_or(false) {
                    return read_key_file(&self.key_path).await;
                }

                let mut key = [0u8; KEY_BYTES];
                SystemRandom::new()
                    .fill(&mut key)
                    .map_err(|_| anyhow::anyhow!("Failed to generate secret key"))?;

                let encoded = base64::engine::general_purpose::STANDARD.encode(key);
                crate::installation::files::write_file_atomic(
                    &self.key_path,
                    encoded.as_bytes(),
                    "secret_key",
                )
                .await
                .with_context(|| format!("Failed to write secret key file: {:?}", self.key_path))?;
                restrict_permissions(&self.key_path).await;

                info!(
                    "[PHASE: security] [STEP: secret_key] Generated new secret key (path={:?})",
                    self.key_path
                );
                Ok(key)
            })
            .await
    }
}

async fn read_key_file(path: &Path) -> Result<[u8; KEY_BYTES]> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read secret key file: {:?}", path))?;
    let text = String::from_utf8_lossy(&bytes);
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(text.trim())
        .context("Failed to decode secret key file (base64)")?;
    if decoded.len() != KEY_BYTES {
        anyhow::bail!("Secret key file has invalid length (expected {KEY_BYTES} bytes)");
    }
    let mut key = [0u8; KEY_BYTES];
    key.copy_from_slice(&decoded);
    Ok(key)
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let _ = tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await;
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) {}

/// Key file location for a given state file: `<state dir>/secrets/installer_master_key.b64`.
pub fn default_key_path(state_file: &Path) -> PathBuf {
    state_file
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join("secrets")
        .join("installer_master_key.b64")
}
