use serde::{Serialize, Deserialize};
use serde_json::{Map, Value as Json};

use crate::block::{
    Block,
    BlockBuilder,
    BlockValidationResult,
    Hash,
    Miner,
    MiningError,
    Proof,
    proof_preimage
};

pub(crate) mod text;
pub(crate) mod sqlite;

pub use text::*;
pub use sqlite::*;

/// Default proof-of-work difficulty when the PRD doesn't set one.
pub const DEFAULT_DIFFICULTY: u32 = 2;

/// Mining rules carried by the PRD's `consensus_rules` object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusRules {
    #[serde(default = "default_difficulty")]
    pub difficulty: u32,

    #[serde(flatten)]
    pub extra: Map<String, Json>
}

fn default_difficulty() -> u32 {
    DEFAULT_DIFFICULTY
}

impl Default for ConsensusRules {
    fn default() -> Self {
        Self {
            difficulty: DEFAULT_DIFFICULTY,
            extra: Map::new()
        }
    }
}

/// Index and hash of the most recent block.
///
/// This is all the state a store has to recover for
/// the ledger to keep chaining after a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChainTip {
    pub index: u64,
    pub hash: Hash
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainValidationResult {
    /// Block numbers are not exactly `0, 1, 2, ...`.
    InvalidIndex {
        expected: u64,
        got: u64
    },

    /// Block doesn't reference its predecessor's hash.
    InvalidChainLink {
        index: u64,
        expected_previous: Hash,
        got_previous: Hash
    },

    /// Block's own proof doesn't hold.
    InvalidBlock {
        index: u64,
        result: BlockValidationResult
    },

    /// Ledger is valid.
    Valid
}

impl ChainValidationResult {
    #[inline]
    pub fn is_valid(&self) -> bool {
        self == &Self::Valid
    }
}

/// Append-only block persistence.
///
/// The ledger assumes exactly one writer process; stores don't
/// implement any cross-process locking.
#[async_trait::async_trait]
pub trait LedgerStore {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Recover the most recent block's index and hash,
    /// or `None` if nothing was persisted yet.
    async fn load_tip(&self) -> Result<Option<ChainTip>, Self::Error>;

    /// Read the whole chain back, in index order.
    async fn load_blocks(&self) -> Result<Vec<Block>, Self::Error>;

    /// Persist a block. Must be append-only.
    async fn append_block(&self, block: &Block) -> Result<(), Self::Error>;

    /// Check if nothing was persisted yet.
    async fn is_empty(&self) -> Result<bool, Self::Error> {
        Ok(self.load_tip().await?.is_none())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError<E: std::error::Error> {
    #[error("Ledger store error: {0}")]
    Store(#[source] E),

    #[error(transparent)]
    Mining(#[from] MiningError),

    #[error(transparent)]
    Serialize(#[from] serde_json::Error),

    #[error("Proof {hash} for {story_id} does not extend the current chain tip")]
    InvalidProof {
        story_id: String,
        hash: Hash
    }
}

/// The hash-chained ledger.
///
/// Owns the chain tip and consensus rules, drives proof-of-work
/// mining and delegates persistence to a [`LedgerStore`].
#[derive(Debug)]
pub struct Ledger<S: LedgerStore> {
    store: S,
    rules: ConsensusRules,
    max_nonce: Option<u64>,
    tip: ChainTip
}

impl<S: LedgerStore> Ledger<S> {
    /// Open an existing ledger or create a new one.
    ///
    /// When the store is empty the genesis block is synthesized
    /// and persisted. Otherwise only the most recent block's index
    /// and hash are recovered; use [`Ledger::verify`] for a full
    /// chain validation.
    pub async fn open(store: S, rules: ConsensusRules) -> Result<Self, LedgerError<S::Error>> {
        let tip = match store.load_tip().await.map_err(LedgerError::Store)? {
            Some(tip) => {
                tracing::debug!(index = tip.index, hash = %tip.hash, "ledger tip recovered");

                tip
            }

            None => {
                let genesis = BlockBuilder::genesis();

                store.append_block(&genesis).await.map_err(LedgerError::Store)?;

                tracing::info!(hash = %genesis.get_hash(), "ledger initialized with genesis block");

                ChainTip {
                    index: genesis.index(),
                    hash: genesis.get_hash()
                }
            }
        };

        Ok(Self {
            store,
            rules,
            max_nonce: None,
            tip
        })
    }

    /// Abort proof-of-work searches after this many nonces.
    ///
    /// Unbounded by default.
    pub fn with_max_nonce(self, max_nonce: u64) -> Self {
        Self {
            max_nonce: Some(max_nonce),
            ..self
        }
    }

    #[inline]
    pub fn store(&self) -> &S {
        &self.store
    }

    #[inline]
    pub fn rules(&self) -> &ConsensusRules {
        &self.rules
    }

    #[inline]
    /// Index and hash of the most recent block.
    pub fn tip(&self) -> ChainTip {
        self.tip
    }

    #[inline]
    /// Hash of the most recent block.
    pub fn last_hash(&self) -> Hash {
        self.tip.hash
    }

    /// Mine a proof-of-work for a completed story
    /// against the current chain tip.
    ///
    /// Blocking and CPU-bound; see [`Miner::mine`].
    pub fn mine_proof(
        &self,
        story_id: &str,
        completion_data: &Json
    ) -> Result<Proof, MiningError> {
        let mut miner = Miner::new(self.rules.difficulty);

        if let Some(max_nonce) = self.max_nonce {
            miner = miner.with_max_nonce(max_nonce);
        }

        miner.mine(story_id, &self.tip.hash, completion_data)
    }

    /// Append a new block to the ledger.
    ///
    /// The proof must have been mined against the current chain
    /// tip; it is recomputed and rejected otherwise. There is no
    /// rollback path once the block is persisted.
    pub async fn add_block(
        &mut self,
        story_id: impl Into<String>,
        proof: Proof,
        completion_data: Json
    ) -> Result<Block, LedgerError<S::Error>> {
        let story_id = story_id.into();

        let preimage = proof_preimage(&story_id, &self.tip.hash, &completion_data, proof.nonce)?;
        let calculated = Hash::digest(preimage);

        if calculated != proof.hash || !calculated.meets_difficulty(proof.difficulty) {
            return Err(LedgerError::InvalidProof {
                story_id,
                hash: proof.hash
            });
        }

        let block = BlockBuilder::new(story_id)
            .with_index(self.tip.index + 1)
            .with_previous(self.tip.hash)
            .with_completion_data(completion_data)
            .seal(proof);

        self.store.append_block(&block).await.map_err(LedgerError::Store)?;

        self.tip = ChainTip {
            index: block.index(),
            hash: block.get_hash()
        };

        tracing::info!(
            index = block.index(),
            story_id = block.story_id(),
            hash = %block.get_hash(),
            "block appended"
        );

        Ok(block)
    }

    /// Validate the whole persisted chain.
    ///
    /// This method will:
    ///
    /// 1. Verify that block numbers are exactly `0, 1, 2, ...`
    ///    with no gaps or repeats.
    ///
    /// 2. Verify that every block references its predecessor's
    ///    hash.
    ///
    /// 3. Recompute every non-genesis block's proof.
    ///
    /// The legacy loader never did this on startup; it is kept as
    /// a separate operation so opening a long ledger stays cheap.
    pub async fn verify(&self) -> Result<ChainValidationResult, LedgerError<S::Error>> {
        let blocks = self.store.load_blocks().await.map_err(LedgerError::Store)?;

        let mut expected_index = 0;
        let mut previous_hash = Hash::MIN;

        for block in &blocks {
            if block.index() != expected_index {
                return Ok(ChainValidationResult::InvalidIndex {
                    expected: expected_index,
                    got: block.index()
                });
            }

            if block.previous_hash() != previous_hash {
                return Ok(ChainValidationResult::InvalidChainLink {
                    index: block.index(),
                    expected_previous: previous_hash,
                    got_previous: block.previous_hash()
                });
            }

            let result = block.validate()?;

            if !result.is_valid() {
                return Ok(ChainValidationResult::InvalidBlock {
                    index: block.index(),
                    result
                });
            }

            previous_hash = block.get_hash();
            expected_index += 1;
        }

        Ok(ChainValidationResult::Valid)
    }
}

pub mod prelude {
    pub use super::{
        ChainTip,
        ChainValidationResult,
        ConsensusRules,
        Ledger,
        LedgerError,
        LedgerStore,
        SqliteLedger,
        SqliteLedgerError,
        TextLedger,
        TextLedgerError,
        DEFAULT_DIFFICULTY
    };
}
