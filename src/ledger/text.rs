use std::path::PathBuf;

use serde_json::Value as Json;

use chrono::{DateTime, Utc};

use tokio::io::AsyncWriteExt;

use crate::block::{Block, Hash, HashError, Proof};

use super::{ChainTip, LedgerStore};

const STANZA_FOOTER: &str = "------------------------------------------------------------";
const HEADER_RULE: &str = "============================================================";

#[derive(Debug, thiserror::Error)]
pub enum TextLedgerError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    Hash(#[from] HashError),

    #[error(transparent)]
    Timestamp(#[from] chrono::ParseError),

    #[error("Malformed ledger stanza for block {index}")]
    MalformedStanza {
        index: u64
    }
}

/// The legacy human-readable ledger file (`progress.txt`).
///
/// Every block is appended as a fixed-format text stanza:
///
/// ```text
/// Block <index>: <story_id>
///   Timestamp: <iso8601>
///   Previous Hash: <hex64>
///   Proof: <json>
///   Data: <json>
///   Block Hash: <hex64>
/// ------------------------------------------------------------
/// ```
///
/// Tip recovery scans the file in reverse for the `Block Hash:`
/// and `Block ` markers, exactly like the original loader did;
/// the whole chain is only parsed back on explicit verification.
#[derive(Debug, Clone)]
pub struct TextLedger {
    path: PathBuf
}

impl TextLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into()
        }
    }

    #[inline]
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn render_header() -> String {
        format!(
            "# Crypto-Ralph Blockchain Ledger\n# Initialized: {}\n{HEADER_RULE}\n\n",
            Utc::now().to_rfc3339()
        )
    }

    fn render_stanza(block: &Block) -> Result<String, serde_json::Error> {
        let mut stanza = format!("Block {}: {}\n", block.index(), block.story_id());

        stanza.push_str(&format!("  Timestamp: {}\n", block.timestamp().to_rfc3339()));
        stanza.push_str(&format!("  Previous Hash: {}\n", block.previous_hash()));
        stanza.push_str(&format!("  Proof: {}\n", serde_json::to_string(block.proof())?));
        stanza.push_str(&format!("  Data: {}\n", serde_json::to_string(block.completion_data())?));
        stanza.push_str(&format!("  Block Hash: {}\n", block.get_hash()));
        stanza.push_str(STANZA_FOOTER);
        stanza.push('\n');

        Ok(stanza)
    }

    async fn read_content(&self) -> Result<Option<String>, std::io::Error> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(Some(content)),

            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),

            Err(err) => Err(err)
        }
    }

    fn parse_blocks(content: &str) -> Result<Vec<Block>, TextLedgerError> {
        let mut blocks = Vec::new();
        let mut lines = content.lines();

        while let Some(line) = lines.next() {
            let Some(rest) = line.strip_prefix("Block ") else {
                continue;
            };

            let Some((number, story_id)) = rest.split_once(':') else {
                continue;
            };

            let Ok(index) = number.trim().parse::<u64>() else {
                continue;
            };

            let story_id = story_id.trim().to_string();

            let mut timestamp = None;
            let mut previous_hash = None;
            let mut proof = None;
            let mut completion_data = None;
            let mut hash = None;

            for field_line in lines.by_ref() {
                if field_line.starts_with(STANZA_FOOTER) {
                    break;
                }

                let Some((key, value)) = field_line.trim_start().split_once(':') else {
                    continue;
                };

                let value = value.trim();

                match key {
                    "Timestamp" => {
                        timestamp = Some(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc));
                    }

                    "Previous Hash" => previous_hash = Some(Hash::from_hex(value)?),

                    "Proof" => proof = Some(serde_json::from_str::<Proof>(value)?),

                    "Data" => completion_data = Some(serde_json::from_str::<Json>(value)?),

                    "Block Hash" => hash = Some(Hash::from_hex(value)?),

                    _ => continue
                }
            }

            let (
                Some(timestamp),
                Some(previous_hash),
                Some(proof),
                Some(completion_data),
                Some(hash)
            ) = (timestamp, previous_hash, proof, completion_data, hash) else {
                return Err(TextLedgerError::MalformedStanza { index });
            };

            blocks.push(Block {
                index,
                story_id,
                timestamp,
                previous_hash,
                proof,
                completion_data,
                hash
            });
        }

        Ok(blocks)
    }
}

#[async_trait::async_trait]
impl LedgerStore for TextLedger {
    type Error = TextLedgerError;

    async fn load_tip(&self) -> Result<Option<ChainTip>, Self::Error> {
        let Some(content) = self.read_content().await? else {
            return Ok(None);
        };

        let mut last_hash = Hash::MIN;

        for line in content.lines().rev() {
            if let Some(value) = line.trim_start().strip_prefix("Block Hash:") {
                if let Ok(hash) = Hash::from_hex(value) {
                    last_hash = hash;
                }
            }

            if let Some(rest) = line.strip_prefix("Block ") {
                let Some((number, _)) = rest.split_once(':') else {
                    continue;
                };

                if let Ok(index) = number.trim().parse::<u64>() {
                    return Ok(Some(ChainTip {
                        index,
                        hash: last_hash
                    }));
                }
            }
        }

        Ok(None)
    }

    async fn load_blocks(&self) -> Result<Vec<Block>, Self::Error> {
        match self.read_content().await? {
            Some(content) => Self::parse_blocks(&content),
            None => Ok(Vec::new())
        }
    }

    async fn append_block(&self, block: &Block) -> Result<(), Self::Error> {
        let stanza = Self::render_stanza(block)?;
        let fresh = !self.path.exists();

        let mut file = tokio::fs::File::options()
            .append(true)
            .create(true)
            .open(&self.path)
            .await?;

        if fresh {
            file.write_all(Self::render_header().as_bytes()).await?;
        }

        file.write_all(stanza.as_bytes()).await?;

        // Appends are the only writes; losing one to a crash must not
        // leave a half-written stanza behind.
        file.sync_all().await?;

        Ok(())
    }
}
