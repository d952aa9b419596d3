use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, Result};

/// A concrete, preloadable image the resolver can hand to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDescriptor {
    pub id: String,
    pub title: String,
    pub cdn_url: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub era: Option<String>,
    /// Filled from the enclosing collection key when the entry omits it.
    #[serde(default)]
    pub category: String,
}

/// One loaded generation of the catalogue.
///
/// Entries are kept in document order — scoring ties break on that order,
/// so the flattening must be deterministic (serde_json's preserve_order
/// feature keeps collection keys in file order).
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: Vec<ImageDescriptor>,
}

/// On-disk shape: `{ "collections": { "<category>": [entry, ...], ... } }`.
#[derive(Deserialize)]
struct CatalogDoc {
    collections: serde_json::Map<String, serde_json::Value>,
}

impl Catalog {
    /// Parse a catalogue document from its JSON text.
    pub fn parse(text: &str) -> Result<Self> {
        let doc: CatalogDoc = serde_json::from_str(text)?;
        let mut entries = Vec::new();
        for (category, value) in doc.collections {
            let items: Vec<ImageDescriptor> = serde_json::from_value(value).map_err(|e| {
                CatalogError::Malformed(format!("collection '{category}': {e}"))
            })?;
            for mut item in items {
                if item.category.is_empty() {
                    item.category = category.clone();
                }
                entries.push(item);
            }
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[ImageDescriptor] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
