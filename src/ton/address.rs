use base64::{engine::general_purpose, Engine as _};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::boc::decode_base64;

const TAG_BOUNCEABLE: u8 = 0x11;
const TAG_NON_BOUNCEABLE: u8 = 0x51;
const TAG_TESTNET: u8 = 0x80;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("address is empty")]
    Empty,
    #[error("'{0}' is not a raw or user-friendly TON address")]
    Malformed(String),
    #[error("address checksum mismatch for '{0}'")]
    Checksum(String),
    #[error("unknown address tag {0:#04x}")]
    Tag(u8),
}

/// Standard internal address: workchain plus 256-bit account id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    pub workchain: i8,
    pub hash: [u8; 32],
}

/// CRC16-XMODEM as used by the user-friendly address form.
fn crc16(data: &[u8]) -> u16 {
    let mut crc = 0_u16;
    for byte in data {
        crc ^= u16::from(*byte) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

impl Address {
    pub fn new(workchain: i8, hash: [u8; 32]) -> Self {
        Self { workchain, hash }
    }

    fn parse_raw(raw: &str) -> Result<Self, AddressError> {
        let malformed = || AddressError::Malformed(raw.to_string());
        let (wc, hex_part) = raw.split_once(':').ok_or_else(malformed)?;
        let workchain: i8 = wc.parse().map_err(|_| malformed())?;
        let bytes = hex::decode(hex_part).map_err(|_| malformed())?;
        let hash: [u8; 32] = bytes.try_into().map_err(|_| malformed())?;
        Ok(Self { workchain, hash })
    }

    fn parse_friendly(raw: &str) -> Result<Self, AddressError> {
        let malformed = || AddressError::Malformed(raw.to_string());
        if raw.len() != 48 {
            return Err(malformed());
        }
        let bytes = decode_base64(raw).ok_or_else(malformed)?;
        if bytes.len() != 36 {
            return Err(malformed());
        }
        let expected = u16::from_be_bytes([bytes[34], bytes[35]]);
        if crc16(&bytes[..34]) != expected {
            return Err(AddressError::Checksum(raw.to_string()));
        }
        let tag = bytes[0] & !TAG_TESTNET;
        if tag != TAG_BOUNCEABLE && tag != TAG_NON_BOUNCEABLE {
            return Err(AddressError::Tag(bytes[0]));
        }
        let mut hash = [0_u8; 32];
        hash.copy_from_slice(&bytes[2..34]);
        Ok(Self {
            workchain: bytes[1] as i8,
            hash,
        })
    }

    /// `workchain:hex` form.
    pub fn to_raw(&self) -> String {
        format!("{}:{}", self.workchain, hex::encode(self.hash))
    }

    /// URL-safe user-friendly form.
    pub fn to_friendly(&self, bounceable: bool, testnet: bool) -> String {
        let mut tag = if bounceable {
            TAG_BOUNCEABLE
        } else {
            TAG_NON_BOUNCEABLE
        };
        if testnet {
            tag |= TAG_TESTNET;
        }
        let mut bytes = Vec::with_capacity(36);
        bytes.push(tag);
        bytes.push(self.workchain as u8);
        bytes.extend_from_slice(&self.hash);
        let crc = crc16(&bytes);
        bytes.extend_from_slice(&crc.to_be_bytes());
        general_purpose::URL_SAFE.encode(bytes)
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(AddressError::Empty);
        }
        if trimmed.contains(':') {
            Self::parse_raw(trimmed)
        } else {
            Self::parse_friendly(trimmed)
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_friendly(true, false))
    }
}

impl serde::Serialize for Address {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}
