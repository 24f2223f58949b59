use blake2::Blake2b;
use blake2::digest::consts::U32;
use groestl::Groestl256;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};
use std::fmt;

use crate::error::{ChainError, Result};

type Blake2b256 = Blake2b<U32>;

/// A 32-byte digest produced by [`digest`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a 64-character hex string.
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s)
            .map_err(|e| ChainError::MalformedInput(format!("digest hex {s:?}: {e}")))?;
        let arr: [u8; 32] = bytes.try_into().map_err(|v: Vec<u8>| {
            ChainError::MalformedInput(format!("digest must be 32 bytes, got {}", v.len()))
        })?;
        Ok(Self(arr))
    }

    /// Number of leading `'0'` characters in the hex rendering.
    pub fn leading_zero_nibbles(&self) -> u32 {
        let mut count = 0;
        for byte in self.0 {
            if byte == 0 {
                count += 2;
                continue;
            }
            if byte >> 4 == 0 {
                count += 1;
            }
            break;
        }
        count
    }

    /// True when the hex form has at least `difficulty` leading zeros.
    pub fn meets_difficulty(&self, difficulty: u32) -> bool {
        self.leading_zero_nibbles() >= difficulty
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", self.to_hex())
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Hash256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Hash256::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// The chained one-way hash used for every proof in the system:
/// BLAKE2b-256, then Keccak-256, then Groestl-256, then Keccak-256.
///
/// Callers canonicalize their input before calling this.
pub fn digest(data: &[u8]) -> Hash256 {
    let a = Blake2b256::digest(data);
    let b = Keccak256::digest(a);
    let c = Groestl256::digest(b);
    let d = Keccak256::digest(c);

    let mut out = [0u8; 32];
    out.copy_from_slice(&d[..]);
    Hash256(out)
}

/// Hex-encoded [`digest`].
pub fn digest_hex(data: &[u8]) -> String {
    digest(data).to_hex()
}
