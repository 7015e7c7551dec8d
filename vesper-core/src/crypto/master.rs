//! Master key context: passphrase → 32-byte key, probe computation and
//! per-file wrapping ciphers.
//!
//! The key is a deterministic Argon2id digest of the passphrase under a
//! fixed public salt, so the same passphrase always yields the same key and
//! nothing about the key needs to be stored.

use argon2::{Algorithm, Argon2, Params, Version};
use zeroize::ZeroizeOnDrop;

use crate::config::KdfConfig;
use crate::crypto::cipher::{BlockCipher, Iv, KEY_LEN, Region, derive_iv};
use crate::error::{Result, VesperError};

const KDF_SALT: &[u8] = b"vesper/master-key/v1";

pub(crate) fn kdf_params(cfg: &KdfConfig) -> Result<Params> {
    Params::new(cfg.m_cost, cfg.t_cost, cfg.p_cost, Some(KEY_LEN))
        .map_err(|e| VesperError::config(format!("kdf parameters: {e}")))
}

/// Key derived from the user passphrase. Zeroized on drop.
#[derive(ZeroizeOnDrop)]
pub struct MasterKey([u8; KEY_LEN]);

impl MasterKey {
    pub fn derive(passphrase: &str, kdf: &KdfConfig) -> Result<Self> {
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, kdf_params(kdf)?);
        let mut out = [0u8; KEY_LEN];
        argon2
            .hash_password_into(passphrase.as_bytes(), KDF_SALT, &mut out)
            .map_err(|e| VesperError::Crypto(format!("key derivation: {e}")))?;
        Ok(Self(out))
    }

    /// Cipher bound to (master key, `iv`).
    pub fn cipher(&self, iv: Iv) -> BlockCipher {
        BlockCipher::new(&self.0, iv)
    }

    /// Probe ciphertext: Encrypt(master, file_iv, probe_plain).
    pub fn probe(&self, file_iv: Iv, probe_plain: &str) -> Result<Vec<u8>> {
        self.cipher(file_iv).encrypt(probe_plain.as_bytes())
    }

    /// Re-encrypt the stored plaintext and compare ciphertexts. Hash equality
    /// keeps the comparison constant-time.
    pub fn probe_matches(&self, file_iv: Iv, probe_plain: &str, stored: &[u8]) -> bool {
        match self.probe(file_iv, probe_plain) {
            Ok(candidate) => blake3::hash(&candidate) == blake3::hash(stored),
            Err(_) => false,
        }
    }

    pub fn wrap(&self, file_iv: &Iv, region: Region, seq: u64, value: &[u8]) -> Result<Vec<u8>> {
        self.cipher(derive_iv(file_iv, region, seq)).encrypt(value)
    }

    pub fn unwrap(&self, file_iv: &Iv, region: Region, seq: u64, wrapped: &[u8]) -> Result<Vec<u8>> {
        self.cipher(derive_iv(file_iv, region, seq))
            .decrypt(wrapped)
            .map_err(|_| VesperError::integrity(format!("unwrap failed for chunk {seq}")))
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey([REDACTED])")
    }
}

#[cfg(test)]
pub(crate) fn test_kdf() -> KdfConfig {
    KdfConfig {
        m_cost: 64,
        t_cost: 1,
        p_cost: 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROBE: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn same_passphrase_same_probe() {
        let iv = [3u8; 16];
        let a = MasterKey::derive("lolliepop", &test_kdf()).unwrap();
        let b = MasterKey::derive("lolliepop", &test_kdf()).unwrap();
        let stored = a.probe(iv, PROBE).unwrap();
        assert!(b.probe_matches(iv, PROBE, &stored));
    }

    #[test]
    fn wrong_passphrase_fails_probe() {
        let iv = [3u8; 16];
        let a = MasterKey::derive("lolliepop", &test_kdf()).unwrap();
        let b = MasterKey::derive("wrong", &test_kdf()).unwrap();
        let stored = a.probe(iv, PROBE).unwrap();
        assert!(!b.probe_matches(iv, PROBE, &stored));
    }

    #[test]
    fn wrap_unwrap_roundtrip() {
        let k = MasterKey::derive("pw", &test_kdf()).unwrap();
        let iv = [5u8; 16];
        let wrapped = k.wrap(&iv, Region::ChunkKey, 4, PROBE.as_bytes()).unwrap();
        assert_ne!(wrapped, PROBE.as_bytes());
        let back = k.unwrap(&iv, Region::ChunkKey, 4, &wrapped).unwrap();
        assert_eq!(back, PROBE.as_bytes());
    }

    #[test]
    fn debug_redacts_key() {
        let k = MasterKey::derive("pw", &test_kdf()).unwrap();
        assert_eq!(format!("{k:?}"), "MasterKey([REDACTED])");
    }

    #[test]
    fn invalid_kdf_params_are_config_errors() {
        let bad = KdfConfig {
            m_cost: 1,
            t_cost: 0,
            p_cost: 0,
        };
        assert!(matches!(
            MasterKey::derive("pw", &bad),
            Err(VesperError::Config(_))
        ));
    }
}
