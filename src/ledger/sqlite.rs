use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use serde_json::Value as Json;

use chrono::{DateTime, Utc};

use rusqlite::{Connection, OptionalExtension, params};

use crate::block::{Block, Hash, HashError, Proof};

use super::{ChainTip, LedgerStore};

#[derive(Debug, thiserror::Error)]
pub enum SqliteLedgerError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    Hash(#[from] HashError),

    #[error(transparent)]
    Timestamp(#[from] chrono::ParseError),

    #[error("Ledger connection lock poisoned")]
    Poisoned
}

/// Structured ledger store, one row per block.
///
/// Cleaner alternative to the legacy text format: tip recovery is
/// a single indexed query instead of a reverse text scan. Ledgers
/// written by this store are not readable by the legacy tooling.
#[derive(Debug)]
pub struct SqliteLedger {
    connection: Mutex<Connection>
}

impl SqliteLedger {
    /// Open existing database or create a new one.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SqliteLedgerError> {
        let connection = Connection::open(path.as_ref())?;

        connection.execute_batch("
            create table if not exists blocks (
                idx             INTEGER PRIMARY KEY,
                story_id        TEXT NOT NULL,
                timestamp       TEXT NOT NULL,
                previous_hash   TEXT NOT NULL,
                proof           TEXT NOT NULL,
                completion_data TEXT NOT NULL,
                hash            TEXT NOT NULL
            );
        ")?;

        Ok(Self {
            connection: Mutex::new(connection)
        })
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>, SqliteLedgerError> {
        self.connection.lock()
            .map_err(|_| SqliteLedgerError::Poisoned)
    }
}

#[async_trait::async_trait]
impl LedgerStore for SqliteLedger {
    type Error = SqliteLedgerError;

    async fn load_tip(&self) -> Result<Option<ChainTip>, Self::Error> {
        let connection = self.connection()?;

        let row = connection
            .query_row(
                "select idx, hash from blocks order by idx desc limit 1",
                [],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            )
            .optional()?;

        match row {
            Some((index, hash)) => Ok(Some(ChainTip {
                index: index as u64,
                hash: Hash::from_hex(hash)?
            })),

            None => Ok(None)
        }
    }

    async fn load_blocks(&self) -> Result<Vec<Block>, Self::Error> {
        let connection = self.connection()?;

        let mut query = connection.prepare("
            select idx, story_id, timestamp, previous_hash, proof, completion_data, hash
            from blocks order by idx asc
        ")?;

        let rows = query
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut blocks = Vec::with_capacity(rows.len());

        for (index, story_id, timestamp, previous_hash, proof, completion_data, hash) in rows {
            blocks.push(Block {
                index: index as u64,
                story_id,
                timestamp: DateTime::parse_from_rfc3339(&timestamp)?.with_timezone(&Utc),
                previous_hash: Hash::from_hex(previous_hash)?,
                proof: serde_json::from_str::<Proof>(&proof)?,
                completion_data: serde_json::from_str::<Json>(&completion_data)?,
                hash: Hash::from_hex(hash)?
            });
        }

        Ok(blocks)
    }

    async fn append_block(&self, block: &Block) -> Result<(), Self::Error> {
        let proof = serde_json::to_string(block.proof())?;
        let completion_data = serde_json::to_string(block.completion_data())?;

        let connection = self.connection()?;

        connection.execute(
            "insert into blocks (idx, story_id, timestamp, previous_hash, proof, completion_data, hash)
             values (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                block.index() as i64,
                block.story_id(),
                block.timestamp().to_rfc3339(),
                block.previous_hash().to_hex(),
                proof,
                completion_data,
                block.get_hash().to_hex()
            ]
        )?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::block::{BlockBuilder, Miner};
    use crate::ledger::{ChainValidationResult, ConsensusRules, Ledger, LedgerError};

    use super::*;

    async fn fresh_store(name: &str) -> Result<SqliteLedger, SqliteLedgerError> {
        let path = std::env::temp_dir().join(name);

        if path.exists() {
            tokio::fs::remove_file(&path).await.unwrap();
        }

        SqliteLedger::open(path)
    }

    #[tokio::test]
    async fn blocks() -> Result<(), SqliteLedgerError> {
        let store = fresh_store(".crypto-ralph.sqlite-test.blocks").await?;

        assert!(store.load_tip().await?.is_none());
        assert!(store.is_empty().await?);

        let genesis = BlockBuilder::genesis();

        let data = serde_json::json!({
            "task": "Create cryptographically verified document index"
        });

        let proof = Miner::new(1)
            .mine("US-001", &genesis.get_hash(), &data)
            .unwrap();

        let block = BlockBuilder::new("US-001")
            .with_index(1)
            .with_previous(genesis.get_hash())
            .with_completion_data(data)
            .seal(proof);

        store.append_block(&genesis).await?;
        store.append_block(&block).await?;

        assert_eq!(store.load_tip().await?, Some(ChainTip {
            index: 1,
            hash: block.get_hash()
        }));

        assert_eq!(store.load_blocks().await?, vec![genesis, block]);

        Ok(())
    }

    #[tokio::test]
    async fn ledger_over_sqlite() -> Result<(), LedgerError<SqliteLedgerError>> {
        let store = fresh_store(".crypto-ralph.sqlite-test.ledger").await
            .map_err(LedgerError::Store)?;

        let rules = ConsensusRules {
            difficulty: 2,
            ..ConsensusRules::default()
        };

        let mut ledger = Ledger::open(store, rules).await?;

        let data = serde_json::json!({ "task": "Task A" });

        let proof = ledger.mine_proof("US-001", &data)?;

        ledger.add_block("US-001", proof, data).await?;

        assert_eq!(ledger.tip().index, 1);
        assert_eq!(ledger.verify().await?, ChainValidationResult::Valid);

        Ok(())
    }
}
