use std::time::Instant;

use serde::{Serialize, Deserialize};
use serde_json::Value as Json;

use super::{Hash, canonical_json};

/// Nonce interval at which mining progress is reported.
const REPORT_INTERVAL: u64 = 250_000;

#[derive(Debug, thiserror::Error)]
pub enum MiningError {
    #[error("Nonce space exhausted after {max_nonce} attempts")]
    NonceExhausted {
        max_nonce: u64
    },

    #[error(transparent)]
    Serialize(#[from] serde_json::Error)
}

/// Proof-of-work result a block is sealed with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proof {
    pub nonce: u64,
    pub hash: Hash,
    pub difficulty: u32,
    pub mining_time_seconds: f64
}

/// Brute-force proof-of-work search.
///
/// Hashes `story_id + previous_hash + completion_data + nonce` for
/// `nonce = 0, 1, 2, ...` until the hex digest starts with `difficulty`
/// zero digits. Expected iteration count is `16 ^ difficulty`, so
/// difficulty values above 5-6 make the search impractically long.
///
/// The search is unbounded by default. It blocks the calling thread
/// until a proof is found; set a nonce cap for unattended runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Miner {
    difficulty: u32,
    max_nonce: Option<u64>
}

impl Miner {
    #[inline]
    pub fn new(difficulty: u32) -> Self {
        Self {
            difficulty,
            max_nonce: None
        }
    }

    /// Abort the search with [`MiningError::NonceExhausted`]
    /// once this many nonces were tried.
    pub fn with_max_nonce(self, max_nonce: u64) -> Self {
        Self {
            max_nonce: Some(max_nonce),
            ..self
        }
    }

    #[inline]
    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    /// Mine a proof-of-work for a completed story.
    pub fn mine(
        &self,
        story_id: &str,
        previous_hash: &Hash,
        completion_data: &Json
    ) -> Result<Proof, MiningError> {
        let data = canonical_json(completion_data)?;
        let previous_hash = previous_hash.to_hex();

        tracing::info!(
            story_id,
            difficulty = self.difficulty,
            "mining proof"
        );

        let started = Instant::now();
        let mut nonce = 0;

        loop {
            if let Some(max_nonce) = self.max_nonce {
                if nonce >= max_nonce {
                    return Err(MiningError::NonceExhausted { max_nonce });
                }
            }

            let hash = Hash::digest(format!("{story_id}{previous_hash}{data}{nonce}"));

            if hash.meets_difficulty(self.difficulty) {
                let proof = Proof {
                    nonce,
                    hash,
                    difficulty: self.difficulty,
                    mining_time_seconds: started.elapsed().as_secs_f64()
                };

                tracing::info!(
                    hash = %proof.hash,
                    nonce = proof.nonce,
                    seconds = proof.mining_time_seconds,
                    "proof found"
                );

                return Ok(proof);
            }

            nonce += 1;

            if nonce % REPORT_INTERVAL == 0 {
                tracing::debug!(nonce, "still mining");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::proof_preimage;

    #[test]
    fn mine() -> Result<(), MiningError> {
        let completion_data = serde_json::json!({
            "task": "Generate Merkle Tree for Document Integrity"
        });

        let proof = Miner::new(2).mine("US-002", &Hash::MIN, &completion_data)?;

        assert_eq!(proof.difficulty, 2);
        assert!(proof.hash.meets_difficulty(2));
        assert!(proof.hash.to_hex().starts_with("00"));

        // The proof hash reproduces from the preimage.
        let preimage = proof_preimage("US-002", &Hash::MIN, &completion_data, proof.nonce)?;

        assert_eq!(Hash::digest(preimage), proof.hash);

        Ok(())
    }

    #[test]
    fn deterministic() -> Result<(), MiningError> {
        let completion_data = serde_json::json!("System Initialized");

        let miner = Miner::new(1);

        let first = miner.mine("US-001", &Hash::MAX, &completion_data)?;
        let second = miner.mine("US-001", &Hash::MAX, &completion_data)?;

        assert_eq!(first.nonce, second.nonce);
        assert_eq!(first.hash, second.hash);

        Ok(())
    }

    #[test]
    fn nonce_exhausted() {
        let completion_data = serde_json::json!(null);

        let result = Miner::new(16)
            .with_max_nonce(100)
            .mine("US-001", &Hash::MIN, &completion_data);

        assert!(matches!(
            result,
            Err(MiningError::NonceExhausted { max_nonce: 100 })
        ));
    }
}
