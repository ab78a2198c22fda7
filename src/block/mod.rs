use serde::{Serialize, Deserialize};
use serde_json::Value as Json;

use chrono::{DateTime, Utc};

pub(crate) mod hash;
pub(crate) mod miner;
pub(crate) mod builder;

pub use hash::*;
pub use miner::*;
pub use builder::*;

/// Story id recorded in the synthetic block 0.
pub const GENESIS_STORY_ID: &str = "GENESIS";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BlockValidationResult {
    /// Stored hash differs from the recomputed proof hash.
    InvalidHash {
        stored: Hash,
        calculated: Hash
    },

    /// Hash doesn't carry the amount of leading zero
    /// digits its proof claims.
    InvalidDifficulty {
        hash: Hash,
        difficulty: u32
    },

    Valid
}

impl BlockValidationResult {
    #[inline]
    pub fn is_valid(&self) -> bool {
        self == &Self::Valid
    }
}

/// Serialize completion data with object keys in sorted order.
///
/// Proof hashes are computed over this canonical form, so the
/// same data always produces the same preimage.
pub(crate) fn canonical_json(completion_data: &Json) -> Result<String, serde_json::Error> {
    serde_json::to_string(completion_data)
}

/// Preimage of a block's proof-of-work hash.
pub(crate) fn proof_preimage(
    story_id: &str,
    previous_hash: &Hash,
    completion_data: &Json,
    nonce: u64
) -> Result<String, serde_json::Error> {
    let data = canonical_json(completion_data)?;

    Ok(format!("{story_id}{previous_hash}{data}{nonce}"))
}

/// A single ledger entry certifying completion of one user story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub(crate) index: u64,
    pub(crate) story_id: String,
    pub(crate) timestamp: DateTime<Utc>,
    pub(crate) previous_hash: Hash,
    pub(crate) proof: Proof,
    pub(crate) completion_data: Json,
    pub(crate) hash: Hash
}

impl Block {
    #[inline]
    /// Number of the block in the chain, starting from 0.
    pub fn index(&self) -> u64 {
        self.index
    }

    #[inline]
    /// Id of the user story this block certifies.
    pub fn story_id(&self) -> &str {
        &self.story_id
    }

    #[inline]
    /// UTC time when this block was made.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    #[inline]
    /// Hash of the previous block.
    pub fn previous_hash(&self) -> Hash {
        self.previous_hash
    }

    #[inline]
    /// Proof-of-work result this block was sealed with.
    pub fn proof(&self) -> &Proof {
        &self.proof
    }

    #[inline]
    /// Free-form description of what was accomplished.
    pub fn completion_data(&self) -> &Json {
        &self.completion_data
    }

    #[inline]
    /// Get hash stored in the block.
    ///
    /// This method will not validate this hash so
    /// you should treat its value as insecure.
    pub fn get_hash(&self) -> Hash {
        self.hash
    }

    #[inline]
    /// Check if this is the synthetic block 0.
    pub fn is_genesis(&self) -> bool {
        self.index == 0 && self.story_id == GENESIS_STORY_ID
    }

    /// Recompute the proof-of-work hash of the block.
    pub fn calculate_hash(&self) -> Result<Hash, serde_json::Error> {
        let preimage = proof_preimage(
            &self.story_id,
            &self.previous_hash,
            &self.completion_data,
            self.proof.nonce
        )?;

        Ok(Hash::digest(preimage))
    }

    /// Validate block.
    ///
    /// This method will:
    ///
    /// 1. Recompute the proof hash and compare it
    ///    with the stored value.
    ///
    /// 2. Verify that the hash carries the leading zero
    ///    digits its proof claims.
    ///
    /// The genesis block carries a preset, non-computed proof
    /// hash and is always reported valid.
    pub fn validate(&self) -> Result<BlockValidationResult, serde_json::Error> {
        if self.is_genesis() {
            return Ok(BlockValidationResult::Valid);
        }

        let calculated = self.calculate_hash()?;

        if self.hash != calculated {
            return Ok(BlockValidationResult::InvalidHash {
                stored: self.hash,
                calculated
            });
        }

        if !self.hash.meets_difficulty(self.proof.difficulty) {
            return Ok(BlockValidationResult::InvalidDifficulty {
                hash: self.hash,
                difficulty: self.proof.difficulty
            });
        }

        Ok(BlockValidationResult::Valid)
    }
}

pub mod prelude {
    pub use super::{
        Block,
        BlockBuilder,
        BlockValidationResult,
        Hash,
        HashError,
        Miner,
        MiningError,
        Proof,
        GENESIS_STORY_ID
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize() -> Result<(), serde_json::Error> {
        let block = builder::tests::get_chained();

        assert_eq!(serde_json::from_str::<Block>(&serde_json::to_string(&block)?)?, block);

        Ok(())
    }

    #[test]
    fn validate() -> Result<(), serde_json::Error> {
        let block = builder::tests::get_chained();

        assert!(block.validate()?.is_valid());

        // Tampering with the data invalidates the stored hash.
        let mut tampered = block.clone();

        tampered.completion_data = serde_json::json!({
            "task": "something else entirely"
        });

        assert!(matches!(
            tampered.validate()?,
            BlockValidationResult::InvalidHash { .. }
        ));

        Ok(())
    }

    #[test]
    fn validate_genesis() -> Result<(), serde_json::Error> {
        let genesis = BlockBuilder::genesis();

        assert!(genesis.validate()?.is_valid());

        Ok(())
    }

    #[test]
    fn canonical_ordering() -> Result<(), serde_json::Error> {
        let a = serde_json::from_str::<Json>(r#"{"b": 1, "a": 2}"#)?;
        let b = serde_json::from_str::<Json>(r#"{"a": 2, "b": 1}"#)?;

        assert_eq!(canonical_json(&a)?, canonical_json(&b)?);

        Ok(())
    }
}
