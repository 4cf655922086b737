//! Batch artifact discovery, loading and writing

use super::batch::{validate_chain, MigrationBatch};
use crate::error::MigrationError;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};

/// A discovered batch artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFile {
    pub path: PathBuf,
    pub sequence: u32,
    pub name: String,
}

impl BatchFile {
    /// Identifier the file name promises: `NNNN_name`
    pub fn identifier(&self) -> String {
        format!("{:04}_{}", self.sequence, self.name)
    }

    /// Parse a batch file name into sequence and name
    ///
    /// Expected format: `{NNNN}_{name}.json`
    ///
    /// # Example
    /// - `0002_add_books.json` → sequence: 2, name: "add_books"
    pub fn parse_filename(filename: &str) -> Result<(u32, String), MigrationError> {
        let re = Regex::new(r"^(\d{4})_(\w+)\.json$")
            .map_err(|e| MigrationError::InvalidArtifact(format!("invalid regex: {e}")))?;

        let invalid = || {
            MigrationError::InvalidArtifact(format!(
                "file name '{filename}' does not match the pattern NNNN_name.json"
            ))
        };
        let caps = re.captures(filename).ok_or_else(invalid)?;
        let (Some(sequence), Some(name)) = (caps.get(1), caps.get(2)) else {
            return Err(invalid());
        };
        let sequence = sequence.as_str().parse::<u32>().map_err(|_| invalid())?;
        Ok((sequence, name.as_str().to_string()))
    }
}

/// Discover all batch files in a directory, sorted by sequence
///
/// Files that are not `.json` are ignored; `.json` files with a malformed
/// name are an error. A missing directory holds no batches.
pub fn discover_batches(dir: &Path) -> Result<Vec<BatchFile>, MigrationError> {
    if !dir.exists() {
        log::debug!("migrations directory {} does not exist yet", dir.display());
        return Ok(Vec::new());
    }
    if !dir.is_dir() {
        return Err(MigrationError::InvalidArtifact(format!(
            "path is not a directory: {}",
            dir.display()
        )));
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| MigrationError::InvalidArtifact(format!("invalid filename: {}", path.display())))?;
        let (sequence, name) = BatchFile::parse_filename(filename)?;
        files.push(BatchFile { path, sequence, name });
    }

    files.sort_by_key(|f| f.sequence);
    Ok(files)
}

/// Load, verify and chain-check every batch in `dir`
///
/// # Errors
///
/// Returns `MigrationError::InvalidArtifact` for malformed JSON, a file
/// name that disagrees with the identifier inside, or a broken parent
/// chain, and `MigrationError::ChecksumMismatch` for an edited artifact.
pub fn load_batches(dir: &Path) -> Result<Vec<MigrationBatch>, MigrationError> {
    let mut batches = Vec::new();
    for file in discover_batches(dir)? {
        let batch = MigrationBatch::from_json(&fs::read_to_string(&file.path)?)?;
        if batch.identifier != file.identifier() {
            return Err(MigrationError::InvalidArtifact(format!(
                "{} holds batch '{}'",
                file.path.display(),
                batch.identifier
            )));
        }
        batch.verify_checksum()?;
        batches.push(batch);
    }
    validate_chain(&batches)?;
    Ok(batches)
}

/// Write `batch` to `dir/<identifier>.json`, refusing to overwrite
pub fn write_batch(dir: &Path, batch: &MigrationBatch) -> Result<PathBuf, MigrationError> {
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}.json", batch.identifier));
    if path.exists() {
        return Err(MigrationError::InvalidArtifact(format!(
            "{} already exists",
            path.display()
        )));
    }
    fs::write(&path, batch.to_json()?)?;
    log::info!("wrote {}", path.display());
    Ok(path)
}
