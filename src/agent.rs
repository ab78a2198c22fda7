use serde_json::{Map, Value as Json, json};

use crate::block::Block;
use crate::config::Project;
use crate::ledger::{Ledger, LedgerError, LedgerStore, TextLedger, TextLedgerError};
use crate::merkle::{MerkleArtifact, MerkleError};
use crate::prd::{Prd, PrdError, UserStory};

#[derive(Debug, thiserror::Error)]
pub enum AgentError<E: std::error::Error> {
    #[error(transparent)]
    Prd(#[from] PrdError),

    #[error(transparent)]
    Ledger(#[from] LedgerError<E>),

    #[error(transparent)]
    Merkle(#[from] MerkleError)
}

/// Result of one agent cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// No pending stories remain; nothing was mined.
    Idle,

    /// One block was mined and appended for the selected story.
    Completed {
        block: Block
    }
}

/// The autonomous agent driving the task-completion loop.
///
/// Owns the loaded PRD and the ledger and carries every path
/// decision through its [`Project`] context; operations receive
/// everything explicitly instead of reaching for process-wide
/// state.
#[derive(Debug)]
pub struct CryptoRalphAgent<S: LedgerStore> {
    project: Project,
    prd: Prd,
    ledger: Ledger<S>,
    sync_prd: bool
}

impl CryptoRalphAgent<TextLedger> {
    /// Load the PRD and open the text ledger of the given project.
    pub async fn open(project: Project) -> Result<Self, AgentError<TextLedgerError>> {
        let prd = Prd::load(project.prd_file()).await?;

        let store = TextLedger::new(project.ledger_file());

        let mut ledger = Ledger::open(store, prd.consensus_rules.clone()).await?;

        if let Some(max_nonce) = project.config().mining.max_nonce {
            ledger = ledger.with_max_nonce(max_nonce);
        }

        let sync_prd = project.config().agent.update_prd;

        Ok(Self {
            project,
            prd,
            ledger,
            sync_prd
        })
    }
}

impl<S: LedgerStore> CryptoRalphAgent<S> {
    pub fn new(project: Project, prd: Prd, ledger: Ledger<S>) -> Self {
        let sync_prd = project.config().agent.update_prd;

        Self {
            project,
            prd,
            ledger,
            sync_prd
        }
    }

    /// Mark stories complete in the PRD after their block
    /// is appended.
    pub fn with_prd_sync(self, sync_prd: bool) -> Self {
        Self {
            sync_prd,
            ..self
        }
    }

    #[inline]
    pub fn prd(&self) -> &Prd {
        &self.prd
    }

    #[inline]
    pub fn ledger(&self) -> &Ledger<S> {
        &self.ledger
    }

    #[inline]
    /// Find the next user story to execute.
    pub fn next_task(&self) -> Option<&UserStory> {
        self.prd.next_pending_story()
    }

    /// Package the completion data recorded in the story's block.
    ///
    /// When the project's Merkle artifact exists its root is
    /// included, tying the block to the indexed documents;
    /// otherwise the data stays purely descriptive.
    async fn completion_data(&self, story: &UserStory) -> Result<Json, MerkleError> {
        let mut data = Map::new();

        data.insert(String::from("task"), json!(story.title));

        let merkle_file = self.project.merkle_file();

        if merkle_file.exists() {
            let artifact = MerkleArtifact::load(&merkle_file).await?;

            data.insert(String::from("merkle_root_hash"), json!(artifact.merkle_root));
            data.insert(String::from("source_file"), json!(merkle_file.display().to_string()));
        }

        else {
            data.insert(
                String::from("description"),
                json!("Task executed by the Crypto-Ralph agent.")
            );
        }

        Ok(Json::Object(data))
    }

    /// Execute one full cycle.
    ///
    /// Selects the highest-priority pending story, mines a proof
    /// against the chain tip and appends exactly one block. When
    /// PRD sync is enabled the story is then marked complete with
    /// the block's hash as proof.
    ///
    /// With no pending stories this is an idempotent no-op. The
    /// loop is designed to be invoked repeatedly from outside,
    /// not to cycle internally.
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome, AgentError<S::Error>> {
        let tip = self.ledger.tip();

        tracing::info!(index = tip.index, hash = %tip.hash, "starting cycle at chain tip");

        let Some(story) = self.prd.next_pending_story() else {
            tracing::info!("all user stories complete, loop paused");

            return Ok(CycleOutcome::Idle);
        };

        let story_id = story.id.clone();

        tracing::info!(story_id = %story_id, title = %story.title, "next task selected");

        let completion_data = self.completion_data(story).await?;

        let proof = self.ledger.mine_proof(&story_id, &completion_data)
            .map_err(LedgerError::Mining)?;

        let block = self.ledger.add_block(story_id.clone(), proof, completion_data).await?;

        if self.sync_prd {
            self.prd.mark_story_complete(&story_id, block.get_hash())?;
            self.prd.save(self.project.prd_file()).await?;
        }

        tracing::info!(index = block.index(), "cycle complete");

        Ok(CycleOutcome::Completed { block })
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    async fn fresh_project(name: &str, update_prd: bool) -> PathBuf {
        let dir = std::env::temp_dir().join(name);

        if dir.exists() {
            tokio::fs::remove_dir_all(&dir).await.unwrap();
        }

        tokio::fs::create_dir_all(&dir).await.unwrap();

        let prd = serde_json::json!({
            "userStories": [
                { "id": "A", "title": "Task A", "priority": 2, "passes": false },
                { "id": "B", "title": "Task B", "priority": 1, "passes": false }
            ],
            "consensus_rules": {
                "difficulty": 2
            }
        });

        tokio::fs::write(
            dir.join("PRD.json"),
            serde_json::to_string_pretty(&prd).unwrap()
        ).await.unwrap();

        if update_prd {
            tokio::fs::write(
                dir.join(crate::config::CONFIG_FILE),
                "[agent]\nupdate_prd = true\n"
            ).await.unwrap();
        }

        dir
    }

    #[tokio::test]
    async fn full_cycle() -> Result<(), AgentError<TextLedgerError>> {
        let dir = fresh_project(".crypto-ralph.agent-test.cycle", false).await;

        let mut agent = CryptoRalphAgent::open(Project::open(&dir)).await?;

        assert_eq!(agent.next_task().map(|story| story.id.as_str()), Some("B"));

        let outcome = agent.run_cycle().await?;

        let CycleOutcome::Completed { block } = outcome else {
            panic!("expected a completed cycle");
        };

        assert_eq!(block.index(), 1);
        assert_eq!(block.story_id(), "B");
        assert!(block.get_hash().meets_difficulty(2));
        assert!(block.validate().map_err(LedgerError::Serialize)?.is_valid());

        assert_eq!(agent.ledger().last_hash(), block.get_hash());

        assert!(agent.ledger().verify().await?.is_valid());

        Ok(())
    }

    #[tokio::test]
    async fn cycle_with_prd_sync() -> Result<(), AgentError<TextLedgerError>> {
        let dir = fresh_project(".crypto-ralph.agent-test.sync", true).await;

        let project = Project::open(&dir);
        let mut agent = CryptoRalphAgent::open(project.clone()).await?;

        let outcome = agent.run_cycle().await?;

        let CycleOutcome::Completed { block } = outcome else {
            panic!("expected a completed cycle");
        };

        // The PRD on disk now carries the block hash as proof.
        let prd = Prd::load(project.prd_file()).await?;
        let story = prd.story("B").unwrap();

        assert!(story.passes);
        assert_eq!(story.verification_hash, Some(block.get_hash()));
        assert_eq!(story.proof.as_ref().unwrap().verified_by, crate::prd::VERIFIED_BY);

        // The next cycle picks the remaining story.
        assert_eq!(agent.next_task().map(|story| story.id.as_str()), Some("A"));

        Ok(())
    }

    #[tokio::test]
    async fn idle_when_all_complete() -> Result<(), AgentError<TextLedgerError>> {
        let dir = fresh_project(".crypto-ralph.agent-test.idle", true).await;

        let mut agent = CryptoRalphAgent::open(Project::open(&dir)).await?;

        assert!(matches!(agent.run_cycle().await?, CycleOutcome::Completed { .. }));
        assert!(matches!(agent.run_cycle().await?, CycleOutcome::Completed { .. }));

        // Both stories pass; further cycles append nothing.
        let tip = agent.ledger().tip();

        assert_eq!(agent.run_cycle().await?, CycleOutcome::Idle);
        assert_eq!(agent.ledger().tip(), tip);

        Ok(())
    }
}
