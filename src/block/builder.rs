use serde_json::Value as Json;

use chrono::{DateTime, Utc};

use super::{Block, Hash, Proof, GENESIS_STORY_ID};

/// Preset proof hash of the genesis block ("0000" + 60 ones).
const GENESIS_PROOF_HASH: Hash = Hash::from_bytes({
    let mut bytes = [0x11; 32];

    bytes[0] = 0;
    bytes[1] = 0;

    bytes
});

#[derive(Debug, Clone, PartialEq)]
pub struct BlockBuilder {
    index: u64,
    story_id: String,
    timestamp: DateTime<Utc>,
    previous_hash: Hash,
    completion_data: Json
}

impl BlockBuilder {
    pub fn new(story_id: impl Into<String>) -> Self {
        Self {
            index: 0,
            story_id: story_id.into(),
            timestamp: Utc::now(),
            previous_hash: Hash::MIN,
            completion_data: Json::Null
        }
    }

    /// Set number of the block in the chain.
    pub fn with_index(self, index: u64) -> Self {
        Self {
            index,
            ..self
        }
    }

    /// Set reference to the previous block.
    pub fn with_previous(self, previous_hash: Hash) -> Self {
        Self {
            previous_hash,
            ..self
        }
    }

    /// Change creation timestamp of the block.
    pub fn with_timestamp(self, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            ..self
        }
    }

    /// Change block's completion data.
    pub fn with_completion_data(self, completion_data: impl Into<Json>) -> Self {
        Self {
            completion_data: completion_data.into(),
            ..self
        }
    }

    /// Build block by sealing stored content with a mined proof.
    ///
    /// The proof's hash becomes the block's own identity.
    pub fn seal(self, proof: Proof) -> Block {
        Block {
            index: self.index,
            story_id: self.story_id,
            timestamp: self.timestamp,
            previous_hash: self.previous_hash,
            hash: proof.hash,
            proof,
            completion_data: self.completion_data
        }
    }

    /// Build the synthetic block 0 seeding the chain.
    ///
    /// Its proof hash is preset rather than mined and only exists
    /// to give block 1 a previous hash to reference.
    pub fn genesis() -> Block {
        Block {
            index: 0,
            story_id: GENESIS_STORY_ID.to_string(),
            timestamp: Utc::now(),
            previous_hash: Hash::MIN,
            proof: Proof {
                nonce: 0,
                hash: GENESIS_PROOF_HASH,
                difficulty: 0,
                mining_time_seconds: 0.0
            },
            completion_data: Json::String(String::from("System Initialized")),
            hash: GENESIS_PROOF_HASH
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use crate::block::Miner;

    use super::*;

    pub fn get_chained() -> Block {
        let genesis = BlockBuilder::genesis();

        let completion_data = serde_json::json!({
            "task": "Create cryptographically verified document index",
            "indexed_file_count": 3
        });

        let proof = Miner::new(1)
            .mine("US-001", &genesis.get_hash(), &completion_data)
            .unwrap();

        BlockBuilder::new("US-001")
            .with_index(1)
            .with_previous(genesis.get_hash())
            .with_completion_data(completion_data)
            .seal(proof)
    }

    #[test]
    fn genesis() {
        let genesis = BlockBuilder::genesis();

        assert_eq!(genesis.index(), 0);
        assert_eq!(genesis.story_id(), GENESIS_STORY_ID);
        assert_eq!(genesis.previous_hash(), Hash::MIN);
        assert_eq!(genesis.previous_hash().to_hex(), "0".repeat(64));

        assert_eq!(
            genesis.get_hash().to_hex(),
            format!("0000{}", "1".repeat(60))
        );

        assert_eq!(
            genesis.completion_data(),
            &Json::String(String::from("System Initialized"))
        );
    }

    #[test]
    fn build() {
        let block = get_chained();

        assert_eq!(block.index(), 1);
        assert_eq!(block.story_id(), "US-001");
        assert_eq!(block.previous_hash(), BlockBuilder::genesis().get_hash());
        assert_eq!(block.get_hash(), block.proof().hash);

        assert!(block.validate().unwrap().is_valid());
    }
}
