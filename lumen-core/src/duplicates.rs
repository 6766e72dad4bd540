//! Pre-upload duplicate detection.
//!
//! Checks run strongest first: identical content hash, then the same
//! normalized filename with the same byte size, then fuzzy filename
//! similarity. Nothing here touches the cache.

use std::collections::HashMap;
use std::path::Path;

use fuzzy_matcher::FuzzyMatcher;
use fuzzy_matcher::skim::SkimMatcherV2;
use lumen_contracts::{BackendResult, upload::MediaRecords};
use lumen_model::MediaRecord;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

// Trailing " (1)", " copy", " - Copy 2", "_2" style suffixes.
static COPY_SUFFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:\s*\(\d+\)|[\s_\-]+copy(?:[\s_\-]*\d+)?|_\d)$")
        .expect("copy suffix regex should compile")
});

static SEPARATORS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\s_\-.]+").expect("separator regex should compile"));

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DuplicatesConfig {
    /// Minimum fuzzy filename similarity in `[0, 1]`.
    pub similarity_threshold: f64,
    /// Recent records compared by name when querying the backend.
    pub recent_window: usize,
    pub check_similar_names: bool,
}

impl Default for DuplicatesConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
            recent_window: 200,
            check_similar_names: true,
        }
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Split `name` into a lowercase stem without copy suffixes and its
/// lowercase extension.
pub fn normalize_filename(name: &str) -> (String, String) {
    let path = Path::new(name.trim());
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();

    let mut stem = stem.to_lowercase();
    loop {
        let stripped = COPY_SUFFIX.replace(&stem, "").into_owned();
        if stripped == stem || stripped.is_empty() {
            break;
        }
        stem = stripped;
    }
    let stem = SEPARATORS.replace_all(stem.trim(), " ").trim().to_string();
    (stem, ext)
}

/// What is known about a file before upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFingerprint {
    pub filename: String,
    pub size_bytes: u64,
    /// Lowercase SHA-256 hex of the content.
    pub content_hash: Option<String>,
}

impl FileFingerprint {
    pub fn from_bytes(filename: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            filename: filename.into(),
            size_bytes: bytes.len() as u64,
            content_hash: Some(sha256_hex(bytes)),
        }
    }

    pub fn from_metadata(filename: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            filename: filename.into(),
            size_bytes,
            content_hash: None,
        }
    }

    pub fn normalized_name(&self) -> (String, String) {
        normalize_filename(&self.filename)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "reason", content = "score", rename_all = "snake_case")]
pub enum MatchReason {
    Hash,
    NameAndSize,
    SimilarName(f64),
}

impl MatchReason {
    fn rank(self) -> u8 {
        match self {
            MatchReason::Hash => 0,
            MatchReason::NameAndSize => 1,
            MatchReason::SimilarName(_) => 2,
        }
    }

    fn score(self) -> f64 {
        match self {
            MatchReason::SimilarName(score) => score,
            _ => 1.0,
        }
    }

    /// Whether `self` is a stronger signal than `other`.
    pub fn stronger_than(self, other: MatchReason) -> bool {
        self.rank() < other.rank()
            || (self.rank() == other.rank() && self.score() > other.score())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateMatch {
    pub record: MediaRecord,
    pub reason: MatchReason,
}

/// A duplicate pair among local files, by index into the scanned slice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DuplicatePair {
    pub left: usize,
    pub right: usize,
    pub reason: MatchReason,
}

pub struct DuplicateDetector {
    config: DuplicatesConfig,
    matcher: SkimMatcherV2,
}

impl std::fmt::Debug for DuplicateDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuplicateDetector")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for DuplicateDetector {
    fn default() -> Self {
        Self::new(DuplicatesConfig::default())
    }
}

impl DuplicateDetector {
    pub fn new(config: DuplicatesConfig) -> Self {
        Self {
            config,
            matcher: SkimMatcherV2::default().ignore_case(),
        }
    }

    pub fn config(&self) -> &DuplicatesConfig {
        &self.config
    }

    /// Fuzzy similarity of two filenames in `[0, 1]`.
    ///
    /// The skim score of the shorter normalized stem inside the longer one is
    /// divided by the shorter stem's self-match score, then scaled by the
    /// length ratio so that a short name buried in a long one stays low.
    pub fn name_similarity(&self, a: &str, b: &str) -> f64 {
        let (a, a_ext) = normalize_filename(a);
        let (b, b_ext) = normalize_filename(b);
        if a.is_empty() || b.is_empty() {
            return 0.0;
        }
        if a == b {
            return if a_ext == b_ext { 1.0 } else { 0.95 };
        }

        let (short, long) = if a.chars().count() <= b.chars().count() {
            (a, b)
        } else {
            (b, a)
        };
        let Some(best) = self.matcher.fuzzy_match(&short, &short).filter(|s| *s > 0)
        else {
            return 0.0;
        };
        let Some(score) = self.matcher.fuzzy_match(&long, &short) else {
            return 0.0;
        };

        let coverage = (score as f64 / best as f64).clamp(0.0, 1.0);
        let length_ratio = short.chars().count() as f64 / long.chars().count() as f64;
        coverage * length_ratio
    }

    fn classify(
        &self,
        fp: &FileFingerprint,
        filename: &str,
        size_bytes: u64,
        content_hash: Option<&str>,
    ) -> Option<MatchReason> {
        if let (Some(mine), Some(theirs)) = (fp.content_hash.as_deref(), content_hash)
            && mine.eq_ignore_ascii_case(theirs)
        {
            return Some(MatchReason::Hash);
        }

        if fp.size_bytes == size_bytes
            && fp.normalized_name() == normalize_filename(filename)
        {
            return Some(MatchReason::NameAndSize);
        }

        if self.config.check_similar_names {
            let score = self.name_similarity(&fp.filename, filename);
            if score >= self.config.similarity_threshold {
                return Some(MatchReason::SimilarName(score));
            }
        }
        None
    }

    /// Records that duplicate `fp`, strongest first.
    pub fn find_matches(
        &self,
        fp: &FileFingerprint,
        records: &[MediaRecord],
    ) -> Vec<DuplicateMatch> {
        let mut matches: Vec<DuplicateMatch> = records
            .iter()
            .filter_map(|record| {
                self.classify(
                    fp,
                    &record.filename,
                    record.size_bytes,
                    record.content_hash.as_deref(),
                )
                .map(|reason| DuplicateMatch {
                    record: record.clone(),
                    reason,
                })
            })
            .collect();
        sort_matches(&mut matches);
        matches
    }

    /// Query the backend by hash, then by name and size, then compare names
    /// against recent uploads.
    pub async fn check_remote(
        &self,
        fp: &FileFingerprint,
        records: &dyn MediaRecords,
    ) -> BackendResult<Vec<DuplicateMatch>> {
        let mut found: HashMap<Uuid, DuplicateMatch> = HashMap::new();
        let mut merge = |batch: Vec<DuplicateMatch>| {
            for candidate in batch {
                match found.get(&candidate.record.id) {
                    Some(existing) if !candidate.reason.stronger_than(existing.reason) => {}
                    _ => {
                        found.insert(candidate.record.id, candidate);
                    }
                }
            }
        };

        if let Some(hash) = fp.content_hash.as_deref() {
            let by_hash = records.find_by_hash(hash).await?;
            merge(self.find_matches(fp, &by_hash));
        }

        let by_name = records
            .find_by_name_and_size(&fp.filename, fp.size_bytes)
            .await?;
        merge(self.find_matches(fp, &by_name));

        if self.config.check_similar_names && self.config.recent_window > 0 {
            let recent = records.recent(self.config.recent_window).await?;
            merge(self.find_matches(fp, &recent));
        }

        let mut matches: Vec<DuplicateMatch> = found.into_values().collect();
        sort_matches(&mut matches);
        debug!(
            filename = %fp.filename,
            matches = matches.len(),
            "duplicate check complete"
        );
        Ok(matches)
    }

    /// Every duplicate pair among local files.
    pub fn find_pairs(&self, files: &[FileFingerprint]) -> Vec<DuplicatePair> {
        let mut pairs = Vec::new();
        for (left, a) in files.iter().enumerate() {
            for (offset, b) in files[left + 1..].iter().enumerate() {
                if let Some(reason) =
                    self.classify(a, &b.filename, b.size_bytes, b.content_hash.as_deref())
                {
                    pairs.push(DuplicatePair {
                        left,
                        right: left + 1 + offset,
                        reason,
                    });
                }
            }
        }
        pairs
    }
}

fn sort_matches(matches: &mut [DuplicateMatch]) {
    matches.sort_by(|a, b| {
        a.reason
            .rank()
            .cmp(&b.reason.rank())
            .then(b.reason.score().total_cmp(&a.reason.score()))
            .then_with(|| b.record.created_at.cmp(&a.record.created_at))
    });
}
