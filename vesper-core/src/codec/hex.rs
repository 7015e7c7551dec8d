use super::{CodecId, Encoding};
use crate::error::{Result, VesperError};

/// Lower-case hex text: two encoded units per source byte.
pub struct HexText;

impl Encoding for HexText {
    fn id(&self) -> CodecId {
        CodecId::Hex
    }

    fn encode(&self, src: &[u8]) -> Vec<u8> {
        hex::encode(src).into_bytes()
    }

    fn decode(&self, src: &[u8]) -> Result<Vec<u8>> {
        hex::decode(src).map_err(|e| VesperError::integrity(format!("invalid hex content: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_doubles_length() {
        let enc = HexText.encode(&[0x00, 0xab, 0xff]);
        assert_eq!(enc, b"00abff");
    }

    #[test]
    fn decode_rejects_garbage() {
        let err = HexText.decode(b"0g").unwrap_err();
        assert!(matches!(err, VesperError::Integrity(_)));
    }

    #[test]
    fn decode_rejects_odd_length() {
        assert!(HexText.decode(b"abc").is_err());
    }
}
