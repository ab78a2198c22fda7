pub mod block;
pub mod ledger;
pub mod merkle;
pub mod index;
pub mod prd;
pub mod agent;
pub mod config;

pub mod prelude {
    pub use super::block::prelude::*;
    pub use super::ledger::prelude::*;

    pub use super::merkle::{
        MerkleArtifact,
        MerkleError,
        MerkleTree,
        build_merkle_tree,
        hash_pair
    };

    pub use super::index::{
        DocumentIndex,
        IndexError
    };

    pub use super::prd::{
        Prd,
        PrdError,
        StoryProof,
        UserStory
    };

    pub use super::agent::{
        AgentError,
        CryptoRalphAgent,
        CycleOutcome
    };

    pub use super::config::{
        Project,
        RalphConfig
    };
}
