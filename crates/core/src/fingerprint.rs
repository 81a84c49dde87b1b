use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

/// Maps absolute file path to the fingerprint of the bytes last ingested from it.
pub type FileManifest = BTreeMap<String, String>;

/// Fingerprints of every chunk ever accepted into the index.
pub type ChunkRegistry = BTreeSet<String>;

pub fn content_fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub fn digest_file(path: &Path) -> Result<String, std::io::Error> {
    let bytes = fs::read(path)?;
    Ok(content_fingerprint(&bytes))
}

pub fn should_skip_file(path: &str, current_fingerprint: &str, manifest: &FileManifest) -> bool {
    manifest
        .get(path)
        .is_some_and(|recorded| recorded == current_fingerprint)
}

pub fn should_skip_chunk(fingerprint: &str, registry: &ChunkRegistry) -> bool {
    registry.contains(fingerprint)
}
