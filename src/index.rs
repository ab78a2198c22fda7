use std::path::{Path, PathBuf};

use serde::{Serialize, Deserialize};

use sha2::{Digest, Sha256};

use chrono::{DateTime, Utc};

use tokio::io::AsyncReadExt;

const INDEX_VERSION: &str = "1.0.0";

/// File read chunk size for streamed hashing.
const HASH_CHUNK_SIZE: usize = 4096;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialize(#[from] serde_json::Error),

    #[error("Scan directory not found at {path}")]
    ScanDirectoryMissing {
        path: PathBuf
    }
}

/// One indexed document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub filename: String,
    pub path: String,
    pub size_bytes: u64,
    pub modified_utc: DateTime<Utc>,
    pub sha256_hash: String
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub index_creation_utc: DateTime<Utc>,
    pub scan_directory: String,
    pub total_documents_indexed: usize,
    pub version: String,
    pub description: String
}

/// Content-hash index over a directory of documents
/// (`document_index.json`).
///
/// The documents' hashes are the leaves the Merkle tree
/// is built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentIndex {
    pub metadata: IndexMetadata,
    pub documents: Vec<DocumentRecord>
}

impl DocumentIndex {
    /// Scan a directory and hash every file with the given
    /// extension.
    ///
    /// Unreadable files are reported and skipped. Documents are
    /// sorted by filename so repeated scans of unchanged content
    /// produce identical indexes.
    pub async fn build(
        scan_directory: impl AsRef<Path>,
        extension: &str
    ) -> Result<Self, IndexError> {
        let scan_directory = scan_directory.as_ref();

        if !scan_directory.is_dir() {
            return Err(IndexError::ScanDirectoryMissing {
                path: scan_directory.to_path_buf()
            });
        }

        tracing::info!(path = %scan_directory.display(), "scanning directory");

        let mut documents = Vec::new();
        let mut entries = tokio::fs::read_dir(scan_directory).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();

            if !path.is_file() {
                continue;
            }

            if path.extension().and_then(|ext| ext.to_str()) != Some(extension) {
                continue;
            }

            match Self::index_file(&path).await {
                Ok(document) => {
                    tracing::debug!(filename = %document.filename, "indexed");

                    documents.push(document);
                }

                Err(err) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %err,
                        "could not process file, skipping"
                    );
                }
            }
        }

        documents.sort_by(|a, b| a.filename.cmp(&b.filename));

        tracing::info!(indexed = documents.len(), "scan complete");

        Ok(Self {
            metadata: IndexMetadata {
                index_creation_utc: Utc::now(),
                scan_directory: scan_directory.display().to_string(),
                total_documents_indexed: documents.len(),
                version: String::from(INDEX_VERSION),
                description: String::from("Cryptographically verified document index.")
            },
            documents
        })
    }

    async fn index_file(path: &Path) -> Result<DocumentRecord, IndexError> {
        let metadata = tokio::fs::metadata(path).await?;

        let filename = path.file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();

        Ok(DocumentRecord {
            filename,
            path: path.display().to_string(),
            size_bytes: metadata.len(),
            modified_utc: DateTime::<Utc>::from(metadata.modified()?),
            sha256_hash: Self::hash_file(path).await?
        })
    }

    /// Calculate the SHA-256 hash of a file's content,
    /// reading it in small chunks.
    pub async fn hash_file(path: impl AsRef<Path>) -> Result<String, IndexError> {
        let mut file = tokio::fs::File::open(path.as_ref()).await?;

        let mut hasher = Sha256::new();
        let mut chunk = [0; HASH_CHUNK_SIZE];

        loop {
            let read = file.read(&mut chunk).await?;

            if read == 0 {
                break;
            }

            hasher.update(&chunk[..read]);
        }

        Ok(hex::encode(hasher.finalize()))
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self, IndexError> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;

        Ok(serde_json::from_str(&content)?)
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), IndexError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::write(path, serde_json::to_string_pretty(self)?).await?;

        Ok(())
    }

    /// Content hashes of all indexed documents, in index order.
    pub fn document_hashes(&self) -> Vec<String> {
        self.documents.iter()
            .map(|document| document.sha256_hash.clone())
            .collect()
    }
}
