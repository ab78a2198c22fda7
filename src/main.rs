//! Crypto-Ralph proof-of-work task ledger.
//!
//! Certifies completion of PRD user stories in an append-only
//! hash-chained ledger, with a Merkle tree over the project's
//! documents for aggregate integrity checking.
//!
//! Usage:
//!   crypto-ralph index                      # hash documents into the index
//!   crypto-ralph merkle                     # build the merkle tree artifact
//!   crypto-ralph mine <story-id>            # mine a block for a story
//!   crypto-ralph update-prd <id> <hash>     # mark a story complete
//!   crypto-ralph run                        # one agent cycle
//!   crypto-ralph verify                     # validate the whole ledger

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use serde_json::json;

use crypto_ralph::prelude::*;

/// Crypto-Ralph proof-of-work task ledger.
#[derive(Parser, Debug)]
#[command(
    name = "crypto-ralph",
    version,
    about = "Proof-of-work ledger certifying PRD task completion"
)]
struct Cli {
    /// Project directory containing PRD.json and the ledger.
    #[arg(long, default_value = ".", global = true)]
    project_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan the document directory and build the hash index.
    Index,

    /// Build the Merkle tree artifact from the document index.
    Merkle,

    /// Mine a proof-of-work block certifying a user story.
    Mine {
        story_id: String,
    },

    /// Mark a user story complete in the PRD with a known proof hash.
    UpdatePrd {
        story_id: String,
        proof_hash: String,
    },

    /// Run one agent cycle: select the next story, mine, append.
    Run {
        /// Also mark the story complete in the PRD.
        #[arg(long)]
        update_prd: bool,
    },

    /// Validate the whole ledger chain.
    Verify,
}

async fn open_ledger(project: &Project) -> Result<Ledger<TextLedger>, Box<dyn std::error::Error>> {
    // Verification doesn't need consensus rules, so a missing PRD
    // falls back to defaults instead of failing.
    let rules = match Prd::load(project.prd_file()).await {
        Ok(prd) => prd.consensus_rules,
        Err(_) => ConsensusRules::default(),
    };

    let mut ledger = Ledger::open(TextLedger::new(project.ledger_file()), rules).await?;

    if let Some(max_nonce) = project.config().mining.max_nonce {
        ledger = ledger.with_max_nonce(max_nonce);
    }

    Ok(ledger)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let project = Project::open(cli.project_dir);

    match cli.command {
        Command::Index => {
            let index = DocumentIndex::build(
                project.scan_directory(),
                project.scan_extension(),
            ).await?;

            index.save(project.index_file()).await?;

            tracing::info!(
                indexed = index.documents.len(),
                path = %project.index_file().display(),
                "document index saved"
            );
        }

        Command::Merkle => {
            crypto_ralph::merkle::generate_artifact(
                project.index_file(),
                project.merkle_file(),
            ).await?;
        }

        Command::Mine { story_id } => {
            let prd = Prd::load(project.prd_file()).await?;

            let Some(story) = prd.story(&story_id) else {
                return Err(PrdError::StoryNotFound { story_id }.into());
            };

            let artifact = MerkleArtifact::load(project.merkle_file()).await?;

            let completion_data = json!({
                "task": format!("{}: {}", story.id, story.title),
                "merkle_root_hash": artifact.merkle_root,
                "source_file": project.merkle_file().display().to_string(),
            });

            let mut ledger = open_ledger(&project).await?;

            let proof = ledger.mine_proof(&story_id, &completion_data)?;
            let block = ledger.add_block(story_id, proof, completion_data).await?;

            println!("{}", block.get_hash());
        }

        Command::UpdatePrd { story_id, proof_hash } => {
            let proof_hash = Hash::from_hex(proof_hash)?;

            let mut prd = Prd::load(project.prd_file()).await?;

            prd.mark_story_complete(&story_id, proof_hash)?;
            prd.save(project.prd_file()).await?;
        }

        Command::Run { update_prd } => {
            let mut agent = CryptoRalphAgent::open(project).await?;

            if update_prd {
                agent = agent.with_prd_sync(true);
            }

            match agent.run_cycle().await? {
                CycleOutcome::Idle => println!("all user stories complete"),

                CycleOutcome::Completed { block } => {
                    println!("block {} appended: {}", block.index(), block.get_hash());
                }
            }
        }

        Command::Verify => {
            let ledger = open_ledger(&project).await?;

            let result = ledger.verify().await?;

            if result.is_valid() {
                let tip = ledger.tip();

                println!("ledger valid up to block {} ({})", tip.index, tip.hash);
            }

            else {
                tracing::error!(?result, "ledger validation failed");

                std::process::exit(1);
            }
        }
    }

    Ok(())
}
