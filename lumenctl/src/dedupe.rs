use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use lumen_core::duplicates::{DuplicateDetector, DuplicatesConfig, FileFingerprint, MatchReason};
use serde::Serialize;

#[derive(Debug, Serialize, PartialEq)]
pub struct PairReport {
    pub left: PathBuf,
    pub right: PathBuf,
    pub reason: MatchReason,
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

pub fn fingerprint(path: &Path) -> Result<FileFingerprint> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(FileFingerprint::from_bytes(display_name(path), &bytes))
}

/// Fingerprint every file and list the duplicate pairs among them.
pub fn scan(files: &[PathBuf], config: DuplicatesConfig) -> Result<Vec<PairReport>> {
    let fingerprints = files
        .iter()
        .map(|path| fingerprint(path))
        .collect::<Result<Vec<_>>>()?;

    let detector = DuplicateDetector::new(config);
    Ok(detector
        .find_pairs(&fingerprints)
        .into_iter()
        .map(|pair| PairReport {
            left: files[pair.left].clone(),
            right: files[pair.right].clone(),
            reason: pair.reason,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_identical_content_under_different_names() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("sunset.jpg");
        let b = dir.path().join("IMG_0042.jpg");
        let c = dir.path().join("receipt.pdf");
        std::fs::write(&a, b"same bytes").unwrap();
        std::fs::write(&b, b"same bytes").unwrap();
        std::fs::write(&c, b"other bytes entirely").unwrap();

        let pairs = scan(&[a.clone(), b.clone(), c], DuplicatesConfig::default()).unwrap();
        assert_eq!(
            pairs,
            vec![PairReport {
                left: a,
                right: b,
                reason: MatchReason::Hash,
            }]
        );
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = scan(&[dir.path().join("nope.jpg")], DuplicatesConfig::default())
            .unwrap_err();
        assert!(err.to_string().contains("nope.jpg"));
    }
}
