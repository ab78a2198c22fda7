use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Serialize, Deserialize};
use serde_json::{Map, Value as Json, json};

use chrono::{DateTime, Utc};

use crate::block::Hash;
use crate::index::{DocumentIndex, IndexError};

#[derive(Debug, thiserror::Error)]
pub enum MerkleError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("No document hashes found in the index at {path}")]
    EmptyIndex {
        path: PathBuf
    },

    #[error("Merkle tree artifact not found at {path}")]
    ArtifactMissing {
        path: PathBuf
    }
}

/// Combine a pair of hex-encoded hashes into their parent hash.
///
/// The two inputs are sorted lexicographically before concatenation,
/// so `hash_pair(a, b) == hash_pair(b, a)`. As a consequence the
/// resulting Merkle root authenticates the *set* of leaves rather
/// than their order, unlike a canonical Merkle tree. Kept for
/// compatibility with existing artifacts.
pub fn hash_pair(first: &str, second: &str) -> String {
    let (first, second) = if first <= second {
        (first, second)
    } else {
        (second, first)
    };

    Hash::digest(format!("{first}{second}")).to_hex()
}

/// Merkle tree built from a list of leaf hashes.
///
/// Ephemeral, derived structure; rebuilt from the leaves
/// whenever needed.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct MerkleTree {
    leaves: Vec<String>,
    levels: Vec<Vec<String>>,
    root: Option<String>
}

impl MerkleTree {
    #[inline]
    /// The original input hashes, order-significant.
    pub fn leaves(&self) -> &[String] {
        &self.leaves
    }

    #[inline]
    /// Intermediate levels, bottom-up, excluding the leaves.
    pub fn levels(&self) -> &[Vec<String>] {
        &self.levels
    }

    #[inline]
    /// The single hash remaining at the top level,
    /// or `None` if the tree was built from no leaves.
    pub fn root(&self) -> Option<&str> {
        self.root.as_deref()
    }

    /// Render the tree in the legacy artifact layout:
    /// `leaves`, `level_1` .. `level_N` and `root` keys.
    pub fn to_json(&self) -> Json {
        if self.leaves.is_empty() {
            return Json::Object(Map::new());
        }

        let mut tree = Map::new();

        tree.insert(String::from("leaves"), json!(self.leaves));

        for (level, nodes) in self.levels.iter().enumerate() {
            tree.insert(format!("level_{}", level + 1), json!(nodes));
        }

        tree.insert(String::from("root"), json!(self.root));

        Json::Object(tree)
    }
}

/// Construct a Merkle tree from a list of hex-encoded hashes.
///
/// Returns the root hash and the full tree structure. The empty
/// input yields `(None, empty tree)`; a single leaf is its own
/// root. Odd-sized levels duplicate their last element before
/// pairing.
pub fn build_merkle_tree(hash_list: &[String]) -> (Option<String>, MerkleTree) {
    if hash_list.is_empty() {
        return (None, MerkleTree::default());
    }

    let mut tree = MerkleTree {
        leaves: hash_list.to_vec(),
        levels: Vec::new(),
        root: None
    };

    let mut nodes = hash_list.to_vec();

    while nodes.len() > 1 {
        if nodes.len() % 2 != 0 {
            if let Some(last) = nodes.last().cloned() {
                nodes.push(last);
            }
        }

        let next_level = nodes.chunks(2)
            .map(|pair| hash_pair(&pair[0], &pair[1]))
            .collect::<Vec<_>>();

        tree.levels.push(next_level.clone());

        nodes = next_level;
    }

    let root = nodes.first().cloned();

    tree.root = root.clone();

    (root, tree)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MerkleMetadata {
    pub generation_utc: DateTime<Utc>,
    pub source_index_file: String,
    pub total_leaves: usize,
    pub tree_height: usize,
    pub generation_time_seconds: f64
}

/// The persisted Merkle tree artifact (`merkle_tree.json`).
///
/// Produced by the indexing pipeline and consumed by the mining
/// step, which records `merkle_root` in a block's completion data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MerkleArtifact {
    pub metadata: MerkleMetadata,
    pub merkle_root: Option<String>,
    pub tree: Json
}

impl MerkleArtifact {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, MerkleError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(MerkleError::ArtifactMissing {
                path: path.to_path_buf()
            });
        }

        let content = tokio::fs::read_to_string(path).await?;

        Ok(serde_json::from_str(&content)?)
    }
}

/// Build the Merkle tree over a document index and persist
/// the artifact.
pub async fn generate_artifact(
    index_file: impl AsRef<Path>,
    output_file: impl AsRef<Path>
) -> Result<MerkleArtifact, MerkleError> {
    let index_file = index_file.as_ref();
    let output_file = output_file.as_ref();

    let index = DocumentIndex::load(index_file).await?;
    let hashes = index.document_hashes();

    if hashes.is_empty() {
        return Err(MerkleError::EmptyIndex {
            path: index_file.to_path_buf()
        });
    }

    tracing::info!(leaves = hashes.len(), "building merkle tree");

    let started = Instant::now();

    let (merkle_root, tree) = build_merkle_tree(&hashes);

    let artifact = MerkleArtifact {
        metadata: MerkleMetadata {
            generation_utc: Utc::now(),
            source_index_file: index_file.display().to_string(),
            total_leaves: hashes.len(),
            tree_height: tree.levels().len(),
            generation_time_seconds: started.elapsed().as_secs_f64()
        },
        merkle_root,
        tree: tree.to_json()
    };

    if let Some(parent) = output_file.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    tokio::fs::write(output_file, serde_json::to_string_pretty(&artifact)?).await?;

    tracing::info!(
        root = artifact.merkle_root.as_deref().unwrap_or("none"),
        path = %output_file.display(),
        "merkle artifact written"
    );

    Ok(artifact)
}
