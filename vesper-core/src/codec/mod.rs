use crate::error::{Result, VesperError};
use serde::{Deserialize, Serialize};

#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecId {
    Raw = 0,
    #[default]
    Hex = 1,
}

impl TryFrom<u8> for CodecId {
    type Error = VesperError;

    fn try_from(v: u8) -> Result<Self> {
        match v {
            0 => Ok(CodecId::Raw),
            1 => Ok(CodecId::Hex),
            other => Err(VesperError::integrity(format!("unknown codec id {other}"))),
        }
    }
}

/// Block-safe representation of file content. The encoded stream is what
/// gets chunked, padded with [`FILLER`] and encrypted.
pub trait Encoding: Send + Sync {
    fn id(&self) -> CodecId;
    fn encode(&self, src: &[u8]) -> Vec<u8>;
    fn decode(&self, src: &[u8]) -> Result<Vec<u8>>;
}

/// Pad symbol for the tail of a final chunk. Never read back: restore trims
/// every chunk to its recorded plaintext length.
pub const FILLER: u8 = b'0';

pub fn codec_for(id: CodecId) -> &'static dyn Encoding {
    match id {
        CodecId::Raw => &raw::Raw,
        CodecId::Hex => &hex::HexText,
    }
}

pub mod hex;
pub mod raw;
