use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tracing::{debug, info, warn};

use crate::error::{CatalogError, Result};
use crate::types::{Catalog, ImageDescriptor};

const WEIGHT_KEYWORD_TOKEN: u32 = 10;
const WEIGHT_KEYWORD_SUBSTRING: u32 = 5;
const WEIGHT_CATEGORY_TOKEN: u32 = 3;
const WEIGHT_TITLE_SUBSTRING: u32 = 15;
const WEIGHT_ID_SUBSTRING: u32 = 30;

/// Translates abstract image references from the LLM into concrete
/// catalogue descriptors via deterministic keyword scoring.
///
/// The loaded catalogue generation is immutable; `reload` swaps in a new
/// generation atomically and in-flight resolutions keep the one they started
/// with.
pub struct ImageResolver {
    catalog: RwLock<Arc<Catalog>>,
    path: PathBuf,
    fallback_sample: usize,
}

/// Outcome of one resolution. `fallback` marks a zero-score input that was
/// served a randomised catalogue entry instead of a scored match.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub descriptor: ImageDescriptor,
    pub fallback: bool,
}

impl ImageResolver {
    /// Load the catalogue document once at startup.
    pub fn load(path: impl AsRef<Path>, fallback_sample: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let text = std::fs::read_to_string(&path)?;
        let catalog = Catalog::parse(&text)?;
        info!(path = %path.display(), entries = catalog.len(), "catalogue loaded");
        Ok(Self {
            catalog: RwLock::new(Arc::new(catalog)),
            path,
            fallback_sample: fallback_sample.max(1),
        })
    }

    /// Wrap an already-parsed catalogue (used by tests and embedded setups).
    pub fn from_catalog(catalog: Catalog, fallback_sample: usize) -> Self {
        Self {
            catalog: RwLock::new(Arc::new(catalog)),
            path: PathBuf::new(),
            fallback_sample: fallback_sample.max(1),
        }
    }

    /// Re-read the catalogue document and swap the generation atomically.
    pub fn reload(&self) -> Result<usize> {
        let text = std::fs::read_to_string(&self.path)?;
        let catalog = Catalog::parse(&text)?;
        let count = catalog.len();
        *self.catalog.write().unwrap() = Arc::new(catalog);
        info!(entries = count, "catalogue reloaded");
        Ok(count)
    }

    pub fn entry_count(&self) -> usize {
        self.snapshot().len()
    }

    /// Resolve a search string to the best-scoring catalogue entry.
    ///
    /// Zero-score inputs fall back to a randomised sample; the caller can
    /// tell from `Resolution::fallback` and downgrade the event to a warning.
    pub fn resolve(&self, query: &str) -> Result<Resolution> {
        let catalog = self.snapshot();
        if catalog.is_empty() {
            return Err(CatalogError::Empty);
        }

        let query_lower = query.to_lowercase();
        let tokens = tokenize(&query_lower);

        let mut best: Option<(&ImageDescriptor, u32)> = None;
        for entry in catalog.entries() {
            let s = score(entry, &query_lower, &tokens);
            // Strictly-greater keeps the earliest entry on ties.
            if s > 0 && best.map_or(true, |(_, b)| s > b) {
                best = Some((entry, s));
            }
        }

        if let Some((entry, s)) = best {
            debug!(query, id = %entry.id, score = s, "image resolved");
            return Ok(Resolution {
                descriptor: entry.clone(),
                fallback: false,
            });
        }

        let sample = self.fallback_entries(&catalog);
        warn!(query, candidates = sample.len(), "no catalogue match, using fallback");
        Ok(Resolution {
            descriptor: sample[0].clone(),
            fallback: true,
        })
    }

    /// Draw up to `fallback_sample` entries starting at a pseudo-random
    /// offset, wrapping around the catalogue.
    fn fallback_entries<'a>(&self, catalog: &'a Catalog) -> Vec<&'a ImageDescriptor> {
        let entries = catalog.entries();
        let k = self.fallback_sample.min(entries.len());
        let start = random_index(entries.len());
        (0..k).map(|i| &entries[(start + i) % entries.len()]).collect()
    }

    fn snapshot(&self) -> Arc<Catalog> {
        self.catalog.read().unwrap().clone()
    }
}

/// Lowercased alphanumeric tokens of the search string.
fn tokenize(query_lower: &str) -> Vec<&str> {
    query_lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Deterministic per-entry score, weights per the resolver contract.
fn score(entry: &ImageDescriptor, query_lower: &str, tokens: &[&str]) -> u32 {
    let mut total = 0;

    for keyword in &entry.keywords {
        let kw = keyword.to_lowercase();
        if tokens.iter().any(|t| *t == kw) {
            total += WEIGHT_KEYWORD_TOKEN;
        } else if query_lower.contains(&kw) {
            total += WEIGHT_KEYWORD_SUBSTRING;
        }
    }

    let category = entry.category.to_lowercase();
    if !category.is_empty() && tokens.iter().any(|t| *t == category) {
        total += WEIGHT_CATEGORY_TOKEN;
    }

    if query_lower.contains(&entry.title.to_lowercase()) {
        total += WEIGHT_TITLE_SUBSTRING;
    }

    if query_lower.contains(&entry.id.to_lowercase()) {
        total += WEIGHT_ID_SUBSTRING;
    }

    total
}

/// Pseudo-random index derived from the current timestamp, avoiding a rand
/// dependency.
fn random_index(len: usize) -> usize {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos as usize) % len.max(1)
}
