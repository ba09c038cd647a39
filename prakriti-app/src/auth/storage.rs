//! Durable key/value storage for credentials and the session snapshot

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, ensure, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Salt mixed into the machine id when deriving the storage key
const KEY_SALT: &[u8] = b"prakriti-session-storage-v1";

/// String key/value store surviving process restarts
pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// Process-local storage, used for ephemeral sessions and tests
#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// Map a storage key to a file in `dir`, refusing anything path-like
fn entry_path(dir: &Path, key: &str, extension: &str) -> Result<PathBuf> {
    ensure!(
        !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
        "invalid storage key: {:?}",
        key
    );
    Ok(dir.join(format!("{}.{}", key, extension)))
}

fn ensure_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
    }
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<()> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    Ok(())
}

/// Unencrypted JSON files, one per key
pub struct PlainFileStorage {
    dir: PathBuf,
}

impl PlainFileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        ensure_dir(&dir)?;
        Ok(Self { dir })
    }
}

impl Storage for PlainFileStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = entry_path(&self.dir, key, "json")?;
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(std::fs::read_to_string(path)?))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = entry_path(&self.dir, key, "json")?;
        std::fs::write(path, value)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        remove_if_exists(&entry_path(&self.dir, key, "json")?)
    }
}

/// Encrypted storage wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EncryptedData {
    /// Base64-encoded nonce
    nonce: String,
    /// Base64-encoded ciphertext
    ciphertext: String,
}

/// XChaCha20-Poly1305 encrypted files, one per key, keyed to this machine
pub struct EncryptedFileStorage {
    dir: PathBuf,
    key: [u8; 32],
}

impl EncryptedFileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let key = derive_key(&machine_id()?);
        Self::with_key(dir, key)
    }

    pub fn with_key(dir: impl Into<PathBuf>, key: [u8; 32]) -> Result<Self> {
        let dir = dir.into();
        ensure_dir(&dir)?;
        Ok(Self { dir, key })
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedData> {
        use base64::{engine::general_purpose::STANDARD, Engine};
        use chacha20poly1305::{
            aead::{Aead, KeyInit},
            XChaCha20Poly1305, XNonce,
        };
        use rand::RngCore;

        let cipher = XChaCha20Poly1305::new_from_slice(&self.key)
            .map_err(|e| anyhow!("Failed to create cipher: {}", e))?;

        let mut nonce_bytes = [0u8; 24];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = XNonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| anyhow!("Encryption failed: {}", e))?;

        Ok(EncryptedData {
            nonce: STANDARD.encode(nonce_bytes),
            ciphertext: STANDARD.encode(ciphertext),
        })
    }

    fn decrypt(&self, data: &EncryptedData) -> Result<Vec<u8>> {
        use base64::{engine::general_purpose::STANDARD, Engine};
        use chacha20poly1305::{
            aead::{Aead, KeyInit},
            XChaCha20Poly1305, XNonce,
        };

        let cipher = XChaCha20Poly1305::new_from_slice(&self.key)
            .map_err(|e| anyhow!("Failed to create cipher: {}", e))?;

        let nonce_bytes = STANDARD.decode(&data.nonce)?;
        ensure!(nonce_bytes.len() == 24, "corrupt nonce");
        let nonce = XNonce::from_slice(&nonce_bytes);
        let ciphertext = STANDARD.decode(&data.ciphertext)?;

        cipher
            .decrypt(nonce, ciphertext.as_slice())
            .map_err(|e| anyhow!("Decryption failed: {}", e))
    }
}

impl Storage for EncryptedFileStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = entry_path(&self.dir, key, "enc")?;
        if !path.exists() {
            return Ok(None);
        }

        let file_data = std::fs::read_to_string(&path)?;
        let encrypted: EncryptedData = serde_json::from_str(&file_data)?;
        let plaintext = self.decrypt(&encrypted)?;
        Ok(Some(String::from_utf8(plaintext)?))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = entry_path(&self.dir, key, "enc")?;
        let encrypted = self.encrypt(value.as_bytes())?;
        let file_data = serde_json::to_string_pretty(&encrypted)?;
        std::fs::write(&path, file_data)?;
        restrict_permissions(&path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        remove_if_exists(&entry_path(&self.dir, key, "enc")?)
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

/// Derive the storage key from a machine identifier using SHA256
fn derive_key(machine_id: &str) -> [u8; 32] {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(machine_id.as_bytes());
    hasher.update(KEY_SALT);

    let result = hasher.finalize();
    let mut key = [0u8; 32];
    key.copy_from_slice(&result);
    key
}

/// Get a machine-specific identifier
#[cfg(target_os = "macos")]
fn machine_id() -> Result<String> {
    use std::process::Command;
    let output = Command::new("ioreg")
        .args(["-rd1", "-c", "IOPlatformExpertDevice"])
        .output()?;
    let output_str = String::from_utf8_lossy(&output.stdout);
    for line in output_str.lines() {
        if line.contains("IOPlatformUUID") {
            if let Some(uuid) = line.split('"').nth(3) {
                return Ok(uuid.to_string());
            }
        }
    }
    Ok("macos-default-id".to_string())
}

#[cfg(target_os = "linux")]
fn machine_id() -> Result<String> {
    std::fs::read_to_string("/etc/machine-id")
        .or_else(|_| std::fs::read_to_string("/var/lib/dbus/machine-id"))
        .map(|s| s.trim().to_string())
        .or_else(|_| Ok("linux-default-id".to_string()))
}

#[cfg(target_os = "windows")]
fn machine_id() -> Result<String> {
    use std::process::Command;
    let output = Command::new("wmic")
        .args(["csproduct", "get", "UUID"])
        .output()?;
    let output_str = String::from_utf8_lossy(&output.stdout);
    output_str
        .lines()
        .nth(1)
        .map(|s| s.trim().to_string())
        .ok_or_else(|| anyhow!("Could not get machine ID"))
}

#[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
fn machine_id() -> Result<String> {
    Ok("unknown-platform-id".to_string())
}
