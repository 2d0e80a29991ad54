//! Block address math and 16-byte payload shaping for MIFARE Classic 1K.

use crate::link::AuthKey;
use thiserror::Error;

/// The fixed read/write unit of a MIFARE Classic data block.
pub type BlockPayload = [u8; BLOCK_SIZE];

pub const BLOCK_SIZE: usize = 16;
pub const BLOCKS_PER_SECTOR: u8 = 4;
pub const SECTOR_COUNT: u8 = 16;
/// Block 3 of every sector holds the keys and access bits.
pub const TRAILER_BLOCK: u8 = 3;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("sector {0} out of range for MIFARE Classic 1K (0..=15)")]
    SectorOutOfRange(u8),
    #[error("block {0} is not a data block (0..=2); block 3 is the sector trailer")]
    NotADataBlock(u8),
    #[error("key must be 12 hex digits, got {0:?}")]
    BadKey(String),
}

/// Absolute address of a data block, `sector*4 + block`.  The sector
/// trailer is rejected here so it can never become a read/write target.
pub fn data_block_address(sector: u8, block: u8) -> Result<u8, ConfigError> {
    if sector >= SECTOR_COUNT {
        return Err(ConfigError::SectorOutOfRange(sector));
    }
    if block >= TRAILER_BLOCK {
        return Err(ConfigError::NotADataBlock(block));
    }
    Ok(sector * BLOCKS_PER_SECTOR + block)
}

/// Absolute address of a sector's trailer block, the authentication
/// target for every operation inside that sector.
pub fn trailer_address(sector: u8) -> u8 {
    sector * BLOCKS_PER_SECTOR + TRAILER_BLOCK
}

/// Shape text into one block: truncate past 16 bytes, zero-pad short input.
pub fn encode(text: &str) -> BlockPayload {
    let mut payload = [0u8; BLOCK_SIZE];
    let bytes = text.as_bytes();
    let len = bytes.len().min(BLOCK_SIZE);
    payload[..len].copy_from_slice(&bytes[..len]);
    payload
}

/// Best-effort text view of a block.  Trailing zero padding is stripped
/// and invalid UTF-8 is replaced, since the raw bytes may hold
/// non-text manufacturer data.
pub fn decode(payload: &BlockPayload) -> String {
    let end = payload.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    String::from_utf8_lossy(&payload[..end]).into_owned()
}

/// Canonical lowercase hex of a block, for diagnostics.
pub fn to_hex(payload: &BlockPayload) -> String {
    hex::encode(payload)
}

/// Parse a 12-hex-digit sector key.
pub fn parse_key(text: &str) -> Result<AuthKey, ConfigError> {
    let bytes = hex::decode(text).map_err(|_| ConfigError::BadKey(text.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| ConfigError::BadKey(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_block_addresses_never_land_on_a_trailer() {
        for sector in 0..SECTOR_COUNT {
            for block in 0..TRAILER_BLOCK {
                let address = data_block_address(sector, block).unwrap();
                assert_eq!(address, sector * 4 + block);
                assert_ne!(address % 4, 3);
            }
        }
    }

    #[test]
    fn trailer_block_is_rejected() {
        assert_eq!(data_block_address(1, 3), Err(ConfigError::NotADataBlock(3)));
        assert_eq!(data_block_address(0, 7), Err(ConfigError::NotADataBlock(7)));
    }

    #[test]
    fn sector_out_of_range_is_rejected() {
        assert_eq!(
            data_block_address(16, 0),
            Err(ConfigError::SectorOutOfRange(16))
        );
    }

    #[test]
    fn trailer_address_is_block_three_of_the_sector() {
        assert_eq!(trailer_address(0), 3);
        assert_eq!(trailer_address(1), 7);
        assert_eq!(trailer_address(15), 63);
    }

    #[test]
    fn encode_passes_sixteen_byte_text_through_unchanged() {
        let payload = encode("Hello Pico RFID!");
        assert_eq!(&payload, b"Hello Pico RFID!");
    }

    #[test]
    fn encode_zero_pads_short_text() {
        let payload = encode("Hi");
        assert_eq!(&payload[..2], b"Hi");
        assert_eq!(&payload[2..], &[0u8; 14]);
        assert_eq!(to_hex(&payload), format!("4869{}", "00".repeat(14)));
    }

    #[test]
    fn encode_truncates_long_text() {
        let payload = encode("this is a lot more than sixteen bytes");
        assert_eq!(&payload, b"this is a lot mo");
    }

    #[test]
    fn decode_strips_trailing_zero_padding() {
        assert_eq!(decode(&encode("Hi")), "Hi");
        assert_eq!(decode(&encode("Hello Pico RFID!")), "Hello Pico RFID!");
    }

    #[test]
    fn decode_keeps_interior_zero_bytes() {
        let mut payload = encode("a");
        payload[2] = b'b';
        assert_eq!(decode(&payload), "a\0b");
    }

    #[test]
    fn decode_tolerates_non_utf8_manufacturer_bytes() {
        let payload = [0xff_u8; 16];
        let text = decode(&payload);
        assert_eq!(text.chars().count(), 16);
        assert!(text.chars().all(|c| c == char::REPLACEMENT_CHARACTER));
    }

    #[test]
    fn hex_view_is_lowercase_and_full_width() {
        let payload = [0xAB_u8; 16];
        assert_eq!(to_hex(&payload), "ab".repeat(16));
    }

    #[test]
    fn key_parses_from_hex() {
        assert_eq!(parse_key("ffffffffffff").unwrap(), [0xff; 6]);
        assert_eq!(parse_key("a0a1a2a3a4a5").unwrap(), [0xa0, 0xa1, 0xa2, 0xa3, 0xa4, 0xa5]);
    }

    #[test]
    fn bad_keys_are_rejected() {
        assert!(matches!(parse_key("ffff"), Err(ConfigError::BadKey(_))));
        assert!(matches!(parse_key("not hex here"), Err(ConfigError::BadKey(_))));
        assert!(matches!(
            parse_key("ffffffffffffff"),
            Err(ConfigError::BadKey(_))
        ));
    }
}
