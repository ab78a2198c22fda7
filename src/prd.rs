use std::path::{Path, PathBuf};

use serde::{Serialize, Deserialize};
use serde_json::{Map, Value as Json};

use crate::block::Hash;
use crate::ledger::ConsensusRules;

/// Verifier tag attached to completed stories.
pub const VERIFIED_BY: &str = "CryptoRalph_v1.0";

#[derive(Debug, thiserror::Error)]
pub enum PrdError {
    #[error("PRD document not found at {path}")]
    NotFound {
        path: PathBuf
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Parse(#[from] serde_json::Error),

    #[error("User story '{story_id}' not found in the PRD")]
    StoryNotFound {
        story_id: String
    }
}

/// Completion proof attached to a user story.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryProof {
    pub hash: Hash,
    pub verified_by: String
}

/// One unit of work listed in the PRD.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserStory {
    pub id: String,

    #[serde(default)]
    pub title: String,

    /// Lower number means higher urgency. Stories without
    /// a priority sort last.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,

    #[serde(default)]
    pub passes: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<StoryProof>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_hash: Option<Hash>,

    #[serde(flatten)]
    pub extra: Map<String, Json>
}

/// The project requirements document (`PRD.json`).
///
/// The document is owned by external tooling; fields this
/// subsystem doesn't know about are carried through
/// read-modify-write untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prd {
    #[serde(rename = "userStories", default)]
    pub user_stories: Vec<UserStory>,

    #[serde(default)]
    pub consensus_rules: ConsensusRules,

    #[serde(flatten)]
    pub extra: Map<String, Json>
}

impl Prd {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, PrdError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(PrdError::NotFound {
                path: path.to_path_buf()
            });
        }

        let content = tokio::fs::read_to_string(path).await?;

        Ok(serde_json::from_str(&content)?)
    }

    /// Rewrite the document in place, atomically.
    ///
    /// The content is written to a sidecar file which then
    /// replaces the original, so a crash mid-write can't leave
    /// a truncated document behind.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), PrdError> {
        let path = path.as_ref();

        let sidecar = path.with_extension("json.tmp");

        tokio::fs::write(&sidecar, serde_json::to_string_pretty(self)?).await?;
        tokio::fs::rename(&sidecar, path).await?;

        Ok(())
    }

    /// Find a story by its id.
    pub fn story(&self, story_id: &str) -> Option<&UserStory> {
        self.user_stories.iter()
            .find(|story| story.id == story_id)
    }

    /// Find the next story to execute.
    ///
    /// Stories that don't pass yet, ordered by ascending
    /// priority; ties keep the document order. This is the
    /// entire scheduling policy.
    pub fn next_pending_story(&self) -> Option<&UserStory> {
        let mut pending = self.user_stories.iter()
            .filter(|story| !story.passes)
            .collect::<Vec<_>>();

        pending.sort_by_key(|story| story.priority.unwrap_or(u32::MAX));

        pending.first().copied()
    }

    /// Mark a user story complete and record the proof hash.
    ///
    /// Idempotent for a fixed proof hash. Fails without touching
    /// the document if the story id is unknown.
    pub fn mark_story_complete(
        &mut self,
        story_id: &str,
        proof_hash: Hash
    ) -> Result<(), PrdError> {
        let story = self.user_stories.iter_mut()
            .find(|story| story.id == story_id)
            .ok_or_else(|| PrdError::StoryNotFound {
                story_id: story_id.to_string()
            })?;

        story.passes = true;

        story.proof = Some(StoryProof {
            hash: proof_hash,
            verified_by: VERIFIED_BY.to_string()
        });

        story.verification_hash = Some(proof_hash);

        tracing::info!(story_id, hash = %proof_hash, "user story marked complete");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get_prd() -> Prd {
        serde_json::from_value(serde_json::json!({
            "userStories": [
                { "id": "A", "title": "Task A", "priority": 2, "passes": false },
                { "id": "B", "title": "Task B", "priority": 1, "passes": false },
                { "id": "C", "title": "Task C", "priority": 1, "passes": true }
            ],
            "consensus_rules": {
                "difficulty": 2
            }
        })).unwrap()
    }

    #[test]
    fn task_selection() {
        let prd = get_prd();

        // Lowest priority among incomplete stories wins.
        assert_eq!(prd.next_pending_story().map(|story| story.id.as_str()), Some("B"));
    }

    #[test]
    fn selection_tie_keeps_document_order() {
        let mut prd = get_prd();

        prd.user_stories[2].passes = false;

        // B and C tie on priority; B comes first in the document.
        assert_eq!(prd.next_pending_story().map(|story| story.id.as_str()), Some("B"));
    }

    #[test]
    fn all_complete() {
        let mut prd = get_prd();

        for story in &mut prd.user_stories {
            story.passes = true;
        }

        assert!(prd.next_pending_story().is_none());
    }

    #[test]
    fn mark_complete_idempotent() -> Result<(), PrdError> {
        let mut prd = get_prd();
        let hash = Hash::digest(b"proof");

        prd.mark_story_complete("B", hash)?;

        let once = serde_json::to_string(&prd)?;

        prd.mark_story_complete("B", hash)?;

        let twice = serde_json::to_string(&prd)?;

        assert_eq!(once, twice);

        let story = prd.story("B").unwrap();

        assert!(story.passes);
        assert_eq!(story.verification_hash, Some(hash));

        let proof = story.proof.as_ref().unwrap();

        assert_eq!(proof.hash, hash);
        assert_eq!(proof.verified_by, VERIFIED_BY);

        Ok(())
    }

    #[test]
    fn story_not_found() {
        let mut prd = get_prd();

        let result = prd.mark_story_complete("US-999", Hash::MIN);

        assert!(matches!(result, Err(PrdError::StoryNotFound { .. })));
    }

    #[test]
    fn unknown_fields_preserved() -> Result<(), PrdError> {
        let raw = serde_json::json!({
            "project": "business-plan",
            "userStories": [
                { "id": "A", "title": "Task A", "priority": 1, "owner": "ralph" }
            ],
            "consensus_rules": {
                "difficulty": 4,
                "quorum": 1
            }
        });

        let mut prd = serde_json::from_value::<Prd>(raw)?;

        assert_eq!(prd.consensus_rules.difficulty, 4);

        prd.mark_story_complete("A", Hash::MIN)?;

        let rewritten = serde_json::to_value(&prd)?;

        assert_eq!(rewritten["project"], "business-plan");
        assert_eq!(rewritten["userStories"][0]["owner"], "ralph");
        assert_eq!(rewritten["consensus_rules"]["quorum"], 1);
        assert_eq!(rewritten["userStories"][0]["passes"], true);

        Ok(())
    }

    #[test]
    fn default_difficulty() -> Result<(), serde_json::Error> {
        let prd = serde_json::from_value::<Prd>(serde_json::json!({
            "userStories": []
        }))?;

        assert_eq!(prd.consensus_rules.difficulty, crate::ledger::DEFAULT_DIFFICULTY);

        Ok(())
    }

    #[tokio::test]
    async fn load_missing() {
        let result = Prd::load(
            std::env::temp_dir().join(".crypto-ralph.prd-test.does-not-exist.json")
        ).await;

        assert!(matches!(result, Err(PrdError::NotFound { .. })));
    }

    #[tokio::test]
    async fn save_and_load() -> Result<(), PrdError> {
        let path = std::env::temp_dir().join(".crypto-ralph.prd-test.roundtrip.json");

        let prd = get_prd();

        prd.save(&path).await?;

        assert_eq!(Prd::load(&path).await?, prd);

        Ok(())
    }
}
