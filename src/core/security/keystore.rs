#![forbid(unsafe_code)]
#![deny(missing_docs)]
// Copyright (c) 2026 Amunchain
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! KeyStore: owns the node's long-lived Ed25519 signing key-pair (§4.1).
//!
//! On startup, if the key file is absent a new pair is generated and
//! persisted with restrictive permissions. If present and older than
//! `rotate_days`, the current key is moved to `<path>.prev` and a fresh pair
//! generated; the previous public key remains a valid verification key for
//! one rotation cycle. I/O errors on the identity path are fatal
//! (`ConfigError`/`StorageError`): the node refuses to start without a
//! usable identity. The private key material never leaves this module.
//!
//! ## Key encryption format
//! If `OVERLAY_KEY_PASSPHRASE` (or legacy `AMUNCHAIN_KEY_PASSPHRASE`) is set,
//! the key file is stored as:
//! `MAGIC(8) || SALT(16) || NONCE(12) || CIPHERTEXT+TAG(..)`
//! where the ciphertext is AES-256-GCM over the Ed25519 PKCS#8 bytes.

use ring::{
    aead,
    pbkdf2,
    rand::{SecureRandom, SystemRandom},
    signature::{Ed25519KeyPair, KeyPair, UnparsedPublicKey, ED25519},
};
use std::{
    fs,
    io::Write,
    num::NonZeroU32,
    path::{Path, PathBuf},
    sync::RwLock,
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use thiserror::Error;
use zeroize::Zeroize;

fn env_first(keys: &[&str]) -> Option<String> {
    for &k in keys {
        if let Ok(v) = std::env::var(k) {
            if !v.trim().is_empty() {
                return Some(v);
            }
        }
    }
    None
}

const KEY_FILE_MAGIC: &[u8] = b"OVLKEY1!"; // 8 bytes
const KEY_SALT_LEN: usize = 16;
const KEY_NONCE_LEN: usize = 12;
const PBKDF2_ITERS_DEFAULT: u32 = 100_000;

fn pbkdf2_iters() -> NonZeroU32 {
    let iters = env_first(&["OVERLAY_PBKDF2_ITERS", "AMUNCHAIN_PBKDF2_ITERS"])
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(PBKDF2_ITERS_DEFAULT)
        .clamp(10_000, 10_000_000);
    NonZeroU32::new(iters).unwrap_or_else(|| NonZeroU32::new(PBKDF2_ITERS_DEFAULT).expect("nonzero"))
}

/// Keystore errors.
#[derive(Debug, Error)]
pub enum KeystoreError {
    #[error("io")]
    Io,
    #[error("invalid key encoding")]
    InvalidKey,
    #[error("missing passphrase (set OVERLAY_KEY_PASSPHRASE)")]
    MissingPassphrase,
    #[error("crypto")]
    Crypto,
    #[error("bad signature")]
    BadSignature,
}

fn set_private_perms_best_effort(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o600));
    }
}

fn atomic_write_private(path: &Path, bytes: &[u8]) -> Result<(), KeystoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|_| KeystoreError::Io)?;
    }
    let mut tmp = path.to_path_buf();
    tmp.set_extension("tmp");
    {
        let mut f = fs::OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&tmp)
            .map_err(|_| KeystoreError::Io)?;
        f.write_all(bytes).map_err(|_| KeystoreError::Io)?;
        let _ = f.sync_all();
    }
    set_private_perms_best_effort(&tmp);
    fs::rename(&tmp, path).map_err(|_| KeystoreError::Io)?;
    set_private_perms_best_effort(path);
    Ok(())
}

fn derive_aes256gcm_key(passphrase: &[u8], salt: &[u8; KEY_SALT_LEN]) -> [u8; 32] {
    let mut out = [0u8; 32];
    pbkdf2::derive(pbkdf2::PBKDF2_HMAC_SHA256, pbkdf2_iters(), salt, passphrase, &mut out);
    out
}

fn encrypt_pkcs8(passphrase: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, KeystoreError> {
    let rng = SystemRandom::new();
    let mut salt = [0u8; KEY_SALT_LEN];
    rng.fill(&mut salt).map_err(|_| KeystoreError::Crypto)?;
    let mut nonce_bytes = [0u8; KEY_NONCE_LEN];
    rng.fill(&mut nonce_bytes).map_err(|_| KeystoreError::Crypto)?;
    let nonce = aead::Nonce::assume_unique_for_key(nonce_bytes);

    let mut key = derive_aes256gcm_key(passphrase, &salt);
    let unbound = aead::UnboundKey::new(&aead::AES_256_GCM, &key).map_err(|_| KeystoreError::Crypto)?;
    let less_safe = aead::LessSafeKey::new(unbound);

    let mut in_out = plaintext.to_vec();
    less_safe
        .seal_in_place_append_tag(nonce, aead::Aad::empty(), &mut in_out)
        .map_err(|_| KeystoreError::Crypto)?;
    key.zeroize();

    let mut out = Vec::with_capacity(KEY_FILE_MAGIC.len() + KEY_SALT_LEN + KEY_NONCE_LEN + in_out.len());
    out.extend_from_slice(KEY_FILE_MAGIC);
    out.extend_from_slice(&salt);
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&in_out);
    Ok(out)
}

fn decrypt_pkcs8(passphrase: &[u8], bytes: &[u8]) -> Result<Vec<u8>, KeystoreError> {
    if bytes.len() < KEY_FILE_MAGIC.len() + KEY_SALT_LEN + KEY_NONCE_LEN + 16 {
        return Err(KeystoreError::InvalidKey);
    }
    if &bytes[..KEY_FILE_MAGIC.len()] != KEY_FILE_MAGIC {
        return Ok(bytes.to_vec());
    }
    let mut salt = [0u8; KEY_SALT_LEN];
    salt.copy_from_slice(&bytes[KEY_FILE_MAGIC.len()..KEY_FILE_MAGIC.len() + KEY_SALT_LEN]);
    let mut nonce_bytes = [0u8; KEY_NONCE_LEN];
    nonce_bytes.copy_from_slice(
        &bytes[KEY_FILE_MAGIC.len() + KEY_SALT_LEN..KEY_FILE_MAGIC.len() + KEY_SALT_LEN + KEY_NONCE_LEN],
    );
    let nonce = aead::Nonce::assume_unique_for_key(nonce_bytes);

    let mut key = derive_aes256gcm_key(passphrase, &salt);
    let unbound = aead::UnboundKey::new(&aead::AES_256_GCM, &key).map_err(|_| KeystoreError::Crypto)?;
    let less_safe = aead::LessSafeKey::new(unbound);

    let mut in_out = bytes[KEY_FILE_MAGIC.len() + KEY_SALT_LEN + KEY_NONCE_LEN..].to_vec();
    let plain = less_safe
        .open_in_place(nonce, aead::Aad::empty(), &mut in_out)
        .map_err(|_| KeystoreError::Crypto)?;
    key.zeroize();
    Ok(plain.to_vec())
}

fn passphrase() -> Option<String> {
    env_first(&["OVERLAY_KEY_PASSPHRASE", "AMUNCHAIN_KEY_PASSPHRASE"])
}

fn load_keypair(path: &Path) -> Result<Ed25519KeyPair, KeystoreError> {
    let bytes = fs::read(path).map_err(|_| KeystoreError::Io)?;
    let pkcs8 = if bytes.starts_with(KEY_FILE_MAGIC) {
        let pass = passphrase().ok_or(KeystoreError::MissingPassphrase)?;
        decrypt_pkcs8(pass.as_bytes(), &bytes)?
    } else {
        bytes
    };
    Ed25519KeyPair::from_pkcs8(&pkcs8).map_err(|_| KeystoreError::InvalidKey)
}

fn generate_and_persist(path: &Path) -> Result<Ed25519KeyPair, KeystoreError> {
    let rng = SystemRandom::new();
    let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).map_err(|_| KeystoreError::InvalidKey)?;

    let mut buf = pkcs8.as_ref().to_vec();
    let on_disk = if let Some(pass) = passphrase() {
        let enc = encrypt_pkcs8(pass.as_bytes(), &buf)?;
        buf.zeroize();
        enc
    } else {
        buf.clone()
    };
    atomic_write_private(path, &on_disk)?;
    buf.zeroize();

    Ed25519KeyPair::from_pkcs8(pkcs8.as_ref()).map_err(|_| KeystoreError::InvalidKey)
}

fn file_age(path: &Path) -> Option<Duration> {
    let md = fs::metadata(path).ok()?;
    let modified = md.modified().ok()?;
    SystemTime::now().duration_since(modified).ok()
}

struct Identity {
    current: Ed25519KeyPair,
    previous_public_key: Option<[u8; 32]>,
}

/// Ed25519 identity key-pair with age-based rotation and a one-cycle
/// previous-key retention window (§3, §4.1).
pub struct KeyStore {
    identity: RwLock<Identity>,
    key_path: PathBuf,
    rotate_after: Duration,
}

impl KeyStore {
    /// Load or create the identity key at `data_dir/identity.key`, rotating
    /// if it is older than `rotate_after`.
    pub fn open(data_dir: &str, rotate_after: Duration) -> Result<Self, KeystoreError> {
        let mut key_path = PathBuf::from(data_dir);
        key_path.push("identity.key");
        let mut prev_path = key_path.clone();
        prev_path.set_extension("key.prev");

        let previous_public_key = if prev_path.exists() {
            load_keypair(&prev_path).ok().map(|kp| {
                let mut pk = [0u8; 32];
                pk.copy_from_slice(kp.public_key().as_ref());
                pk
            })
        } else {
            None
        };

        let (current, previous_public_key) = if key_path.exists() {
            let age = file_age(&key_path);
            if age.map(|a| a >= rotate_after).unwrap_or(false) {
                let existing = load_keypair(&key_path)?;
                let mut existing_pk = [0u8; 32];
                existing_pk.copy_from_slice(existing.public_key().as_ref());

                fs::rename(&key_path, &prev_path).map_err(|_| KeystoreError::Io)?;
                let fresh = generate_and_persist(&key_path)?;
                (fresh, Some(existing_pk))
            } else {
                (load_keypair(&key_path)?, previous_public_key)
            }
        } else {
            (generate_and_persist(&key_path)?, previous_public_key)
        };

        Ok(Self {
            identity: RwLock::new(Identity { current, previous_public_key }),
            key_path,
            rotate_after,
        })
    }

    /// Current public key.
    pub fn public_key(&self) -> [u8; 32] {
        let guard = self.identity.read().expect("keystore lock poisoned");
        let mut pk = [0u8; 32];
        pk.copy_from_slice(guard.current.public_key().as_ref());
        pk
    }

    /// Current + previous verification keys (valid during the rotation window).
    pub fn verification_keys(&self) -> Vec<[u8; 32]> {
        let guard = self.identity.read().expect("keystore lock poisoned");
        let mut out = vec![{
            let mut pk = [0u8; 32];
            pk.copy_from_slice(guard.current.public_key().as_ref());
            pk
        }];
        if let Some(prev) = guard.previous_public_key {
            out.push(prev);
        }
        out
    }

    /// Run the key-pair with the current signing key under the read lock,
    /// snapshotting it for the duration of the closure (§5 shared-resource
    /// policy: current key-pair is snapshotted at operation start).
    pub fn with_current<R>(&self, f: impl FnOnce(&Ed25519KeyPair) -> R) -> R {
        let guard = self.identity.read().expect("keystore lock poisoned");
        f(&guard.current)
    }

    /// Force rotation regardless of age (used by the background rotation task).
    pub fn rotate_if_due(&self) -> Result<bool, KeystoreError> {
        let due = file_age(&self.key_path).map(|a| a >= self.rotate_after).unwrap_or(false);
        if !due {
            return Ok(false);
        }
        let mut guard = self.identity.write().expect("keystore lock poisoned");
        let mut existing_pk = [0u8; 32];
        existing_pk.copy_from_slice(guard.current.public_key().as_ref());

        let mut prev_path = self.key_path.clone();
        prev_path.set_extension("key.prev");
        fs::rename(&self.key_path, &prev_path).map_err(|_| KeystoreError::Io)?;
        let fresh = generate_and_persist(&self.key_path)?;

        guard.current = fresh;
        guard.previous_public_key = Some(existing_pk);
        Ok(true)
    }
}

/// Verify a signature against raw 32-byte Ed25519 public-key bytes (HSM-free fast path).
pub fn verify_pubkey_bytes(pk_bytes: &[u8; 32], msg: &[u8], sig: &[u8]) -> Result<(), KeystoreError> {
    if sig.len() != 64 {
        return Err(KeystoreError::BadSignature);
    }
    let pk = UnparsedPublicKey::new(&ED25519, pk_bytes);
    pk.verify(msg, sig).map_err(|_| KeystoreError::BadSignature)
}
