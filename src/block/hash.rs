use serde::{Serialize, Deserialize, Serializer, Deserializer};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HashError {
    #[error(transparent)]
    HexDecode(#[from] hex::FromHexError),

    #[error("Invalid hash length. 32 bytes expected, got {0}")]
    InvalidHashLength(usize)
}

/// SHA-256 digest value.
///
/// All external representations (ledger file, PRD, JSON artifacts)
/// encode hashes as 64 lowercase hex characters.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Hash([u8; 32]);

impl Hash {
    /// Minimal possible hash value (64 zero hex digits).
    pub const MIN: Hash = Hash([0; 32]);

    /// Maximal possible hash value.
    pub const MAX: Hash = Hash([255; 32]);

    #[inline]
    pub(crate) const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    #[inline]
    pub fn as_bytes(&self) -> [u8; 32] {
        self.0
    }

    #[inline]
    /// Calculate SHA-256 digest of the given bytes.
    pub fn digest(data: impl AsRef<[u8]>) -> Self {
        Self(Sha256::digest(data.as_ref()).into())
    }

    #[inline]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(hash: impl AsRef<str>) -> Result<Self, HashError> {
        let hash = hex::decode(hash.as_ref().trim())?;

        if hash.len() != 32 {
            return Err(HashError::InvalidHashLength(hash.len()));
        }

        let mut hash_slice = [0; 32];

        hash_slice.copy_from_slice(&hash);

        Ok(Self(hash_slice))
    }

    /// Amount of leading zero hex digits.
    pub fn leading_zero_digits(&self) -> usize {
        let mut digits = 0;

        for byte in self.0 {
            if byte == 0 {
                digits += 2;
            }

            else {
                if byte >> 4 == 0 {
                    digits += 1;
                }

                break;
            }
        }

        digits
    }

    #[inline]
    /// Check that the hex digest starts with `difficulty` zero digits.
    pub fn meets_difficulty(&self, difficulty: u32) -> bool {
        self.leading_zero_digits() >= difficulty as usize
    }
}

impl std::fmt::Display for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hash = String::deserialize(deserializer)?;

        Self::from_hex(&hash).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_encoding() -> Result<(), HashError> {
        assert_eq!(Hash::MIN.to_hex(), "0".repeat(64));

        let hash = Hash::digest(b"Hello, World!");

        assert_eq!(Hash::from_hex(hash.to_hex())?, hash);

        assert_eq!(
            hash.to_hex(),
            "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f"
        );

        Ok(())
    }

    #[test]
    fn invalid_hex() {
        assert!(Hash::from_hex("deadbeef").is_err());
        assert!(Hash::from_hex("not a hash").is_err());
    }

    #[test]
    fn difficulty() -> Result<(), HashError> {
        assert_eq!(Hash::MIN.leading_zero_digits(), 64);
        assert_eq!(Hash::MAX.leading_zero_digits(), 0);

        let hash = Hash::from_hex(format!("000a{}", "1".repeat(60)))?;

        assert_eq!(hash.leading_zero_digits(), 3);

        assert!(hash.meets_difficulty(0));
        assert!(hash.meets_difficulty(3));
        assert!(!hash.meets_difficulty(4));

        Ok(())
    }

    #[test]
    fn serialize() -> Result<(), serde_json::Error> {
        let hash = Hash::digest(b"test");

        let json = serde_json::to_string(&hash)?;

        assert_eq!(json, format!("\"{}\"", hash.to_hex()));
        assert_eq!(serde_json::from_str::<Hash>(&json)?, hash);

        Ok(())
    }
}
