use crate::error::{Result, VesperError};
use aes::Aes256;
use blake3::Hasher;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::NoPadding};
use zeroize::Zeroizing;

/// AES block size; every plaintext handed to the cipher must be a multiple of it.
pub const BLOCK_LEN: usize = 16;
pub const KEY_LEN: usize = 32;

pub type Iv = [u8; BLOCK_LEN];

type CbcEnc = cbc::Encryptor<Aes256>;
type CbcDec = cbc::Decryptor<Aes256>;

/// AES-256-CBC bound to one (key, IV) pair. Every call starts a fresh chain
/// from the bound IV, so encrypting the same input twice is deterministic.
/// Not `Clone`: each worker builds its own.
pub struct BlockCipher {
    key: Zeroizing<[u8; KEY_LEN]>,
    iv: Iv,
}

impl BlockCipher {
    pub fn new(key: &[u8; KEY_LEN], iv: Iv) -> Self {
        Self {
            key: Zeroizing::new(*key),
            iv,
        }
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        check_aligned(plaintext.len())?;
        let enc = CbcEnc::new_from_slices(&self.key[..], &self.iv)
            .map_err(|e| VesperError::Crypto(format!("cipher init: {e}")))?;
        Ok(enc.encrypt_padded_vec_mut::<NoPadding>(plaintext))
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() % BLOCK_LEN != 0 {
            return Err(VesperError::integrity(format!(
                "ciphertext length {} is not block aligned",
                ciphertext.len()
            )));
        }
        let dec = CbcDec::new_from_slices(&self.key[..], &self.iv)
            .map_err(|e| VesperError::Crypto(format!("cipher init: {e}")))?;
        dec.decrypt_padded_vec_mut::<NoPadding>(ciphertext)
            .map_err(|_| VesperError::integrity("block decrypt failed"))
    }
}

fn check_aligned(len: usize) -> Result<()> {
    if len % BLOCK_LEN != 0 {
        return Err(VesperError::Crypto(format!(
            "plaintext length {len} is not a multiple of {BLOCK_LEN}"
        )));
    }
    Ok(())
}

/// Domain separation for IVs derived from a file IV.
#[derive(Clone, Copy, Debug)]
pub enum Region {
    ChunkKey = 1,
    ChunkName = 2,
}

/// iv = blake3(file_iv || region || seq).take(16)
pub fn derive_iv(file_iv: &Iv, region: Region, seq: u64) -> Iv {
    let mut h = Hasher::new();
    h.update(file_iv);
    h.update(&[region as u8]);
    h.update(&seq.to_le_bytes());
    let out = h.finalize();
    let mut iv = [0u8; BLOCK_LEN];
    iv.copy_from_slice(&out.as_bytes()[..BLOCK_LEN]);
    iv
}

pub fn random_iv() -> Result<Iv> {
    let mut iv = [0u8; BLOCK_LEN];
    getrandom::getrandom(&mut iv)
        .map_err(|e| VesperError::Crypto(format!("random IV: {e}")))?;
    Ok(iv)
}

/// Chunk secrets are strings; the AES key is a keyed-context digest of them.
pub fn chunk_key(secret: &[u8]) -> Zeroizing<[u8; KEY_LEN]> {
    Zeroizing::new(blake3::derive_key("vesper 2019 chunk key v1", secret))
}

/// Keyed BLAKE3 over a chunk's ciphertext, hex encoded.
pub fn chunk_checksum(key: &[u8; KEY_LEN], ciphertext: &[u8]) -> String {
    blake3::keyed_hash(key, ciphertext).to_hex().to_string()
}

/// Constant-time check of a stored checksum.
pub fn checksum_matches(key: &[u8; KEY_LEN], ciphertext: &[u8], stored: &str) -> bool {
    match blake3::Hash::from_hex(stored) {
        Ok(expected) => blake3::keyed_hash(key, ciphertext) == expected,
        Err(_) => false,
    }
}
