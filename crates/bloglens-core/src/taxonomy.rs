//! Taxonomy seed file and the category/tag resolver.
//!
//! The seed file (`config/taxonomy.yaml`) defines the category tree and the
//! tag vocabulary. Matching of model-produced strings against the taxonomy is
//! pure: [`TaxonomyIndex::lookup`] resolves a key through exact, normalised,
//! and fuzzy tiers, and the `resolve_*` functions handle ordering and
//! de-duplication. Database writes live in `bloglens-db`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Minimum similarity for a fuzzy match to count.
pub const FUZZY_CUTOFF: f64 = 0.8;

// ---------------------------------------------------------------------------
// Seed file types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagGroup {
    Content,
    Personal,
    Professional,
    Commercial,
    Audience,
    Marketing,
}

impl std::fmt::Display for TagGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TagGroup::Content => write!(f, "content"),
            TagGroup::Personal => write!(f, "personal"),
            TagGroup::Professional => write!(f, "professional"),
            TagGroup::Commercial => write!(f, "commercial"),
            TagGroup::Audience => write!(f, "audience"),
            TagGroup::Marketing => write!(f, "marketing"),
        }
    }
}

/// One top-level category with its machine code and child subcategories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryDef {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub children: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct TaxonomyFile {
    pub categories: Vec<CategoryDef>,
    pub tags: BTreeMap<TagGroup, Vec<String>>,
}

/// Load and validate the taxonomy seed from a YAML file.
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed, or fails validation.
pub fn load_taxonomy(path: &Path) -> Result<TaxonomyFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::TaxonomyFileIo {
        path: path.display().to_string(),
        source: e,
    })?;

    let taxonomy: TaxonomyFile =
        serde_yaml::from_str(&content).map_err(ConfigError::TaxonomyFileParse)?;

    validate_taxonomy(&taxonomy)?;

    Ok(taxonomy)
}

fn validate_taxonomy(taxonomy: &TaxonomyFile) -> Result<(), ConfigError> {
    if taxonomy.categories.is_empty() {
        return Err(ConfigError::Validation(
            "taxonomy has no categories".to_string(),
        ));
    }

    let mut codes = HashSet::new();
    for category in &taxonomy.categories {
        if category.code.trim().is_empty() || category.name.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "category with empty code or name: {category:?}"
            )));
        }
        if !codes.insert(category.code.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate category code: {}",
                category.code
            )));
        }
    }

    for (group, names) in &taxonomy.tags {
        let mut seen = HashSet::new();
        for name in names {
            if name.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "empty tag name in group {group}"
                )));
            }
            if !seen.insert(name.to_lowercase()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate tag \"{name}\" in group {group}"
                )));
            }
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Key normalisation and similarity
// ---------------------------------------------------------------------------

/// Normalise a lookup key: lowercase, drop `&` and `-`, collapse whitespace runs.
#[must_use]
pub fn normalize_key(key: &str) -> String {
    let lowered = key.to_lowercase();
    let stripped: String = lowered
        .chars()
        .map(|c| if c == '&' || c == '-' { ' ' } else { c })
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Similarity ratio of two strings in `0.0..=1.0`.
///
/// `2 · LCS(a, b) / (|a| + |b|)` over characters, so transpositions and small
/// typos stay close to 1.0 while unrelated strings fall near 0.
#[must_use]
pub fn similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();

    // One-row LCS dynamic program.
    let mut prev = vec![0usize; b_chars.len() + 1];
    let mut current = vec![0usize; b_chars.len() + 1];
    for &ac in &a_chars {
        for (j, &bc) in b_chars.iter().enumerate() {
            current[j + 1] = if ac == bc {
                prev[j] + 1
            } else {
                prev[j + 1].max(current[j])
            };
        }
        std::mem::swap(&mut prev, &mut current);
    }
    let lcs = prev[b_chars.len()];

    #[allow(clippy::cast_precision_loss)]
    {
        (2 * lcs) as f64 / (a_chars.len() + b_chars.len()) as f64
    }
}

// ---------------------------------------------------------------------------
// Index and lookup
// ---------------------------------------------------------------------------

/// An in-memory key → id index over one slice of the taxonomy.
///
/// Built per use from database rows and treated as an immutable snapshot.
/// Category indices are keyed by top-level `code` and by lowercase child
/// `name`; tag indices by lowercase tag name.
#[derive(Debug, Default, Clone)]
pub struct TaxonomyIndex {
    by_key: HashMap<String, i64>,
}

impl TaxonomyIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, id: i64) {
        self.by_key.insert(key.into(), id);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Resolve `key` to an id: exact match, then normalised match, then the
    /// closest key with similarity ≥ [`FUZZY_CUTOFF`].
    #[must_use]
    pub fn lookup(&self, key: &str) -> Option<i64> {
        self.lookup_with_cutoff(key, FUZZY_CUTOFF)
    }

    #[must_use]
    pub fn lookup_with_cutoff(&self, key: &str, cutoff: f64) -> Option<i64> {
        if let Some(&id) = self.by_key.get(key) {
            return Some(id);
        }

        let normalized = normalize_key(key);
        if let Some(&id) = self.by_key.get(&normalized) {
            return Some(id);
        }

        // Score ties break toward the lexicographically first key, so the
        // same input always resolves to the same id regardless of map
        // iteration order.
        let mut best: Option<(f64, &str, i64)> = None;
        for (candidate, &id) in &self.by_key {
            let score = similarity(&normalized, candidate);
            if score < cutoff {
                continue;
            }
            let wins = match best {
                None => true,
                Some((best_score, best_key, _)) => match score.partial_cmp(&best_score) {
                    Some(std::cmp::Ordering::Greater) => true,
                    Some(std::cmp::Ordering::Equal) => candidate.as_str() < best_key,
                    _ => false,
                },
            };
            if wins {
                best = Some((score, candidate.as_str(), id));
            }
        }
        best.map(|(_, _, id)| id)
    }
}

// ---------------------------------------------------------------------------
// Category and tag resolution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedCategory {
    pub category_id: i64,
    pub is_primary: bool,
}

#[derive(Debug, Default)]
pub struct CategoryResolution {
    pub resolved: Vec<ResolvedCategory>,
    pub unresolved: Vec<String>,
}

/// Resolve model-produced category codes and subcategory names to ids.
///
/// Primary codes are resolved in order; the first success becomes the primary
/// categorisation. Secondary topic names resolve against the same index and
/// never override the primary flag. Duplicate ids are suppressed across both
/// lists, and every string that fails to resolve is reported back so the
/// caller can log the vocabulary gap.
#[must_use]
pub fn resolve_categories(
    primary_codes: &[String],
    secondary_topics: &[String],
    index: &TaxonomyIndex,
) -> CategoryResolution {
    let mut out = CategoryResolution::default();
    let mut seen: HashSet<i64> = HashSet::new();
    let mut primary_assigned = false;

    for code in primary_codes {
        match index.lookup(code) {
            Some(id) => {
                if seen.insert(id) {
                    out.resolved.push(ResolvedCategory {
                        category_id: id,
                        is_primary: !primary_assigned,
                    });
                    primary_assigned = true;
                }
            }
            None => out.unresolved.push(code.clone()),
        }
    }

    for topic in secondary_topics {
        match index.lookup(topic) {
            Some(id) => {
                if seen.insert(id) {
                    out.resolved.push(ResolvedCategory {
                        category_id: id,
                        is_primary: false,
                    });
                }
            }
            None => out.unresolved.push(topic.clone()),
        }
    }

    out
}

#[derive(Debug, Default)]
pub struct TagResolution {
    pub tag_ids: Vec<i64>,
    pub unresolved: Vec<String>,
}

/// Resolve model-produced tag strings to tag ids, suppressing duplicates.
#[must_use]
pub fn resolve_tags(tags: &[String], index: &TaxonomyIndex) -> TagResolution {
    let mut out = TagResolution::default();
    let mut seen: HashSet<i64> = HashSet::new();

    for tag in tags {
        match index.lookup(tag) {
            Some(id) => {
                if seen.insert(id) {
                    out.tag_ids.push(id);
                }
            }
            None => out.unresolved.push(tag.clone()),
        }
    }

    out
}

#[cfg(test)]
#[path = "taxonomy_test.rs"]
mod taxonomy_test;
