//! Static label and reference tables

use crate::error::{ServingError, ServingResult};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Class labels of the bundled fabric classifier, in model output order
pub const DEFAULT_LABELS: [&str; 4] = [
    "Mien_pattern_01",
    "Mien_pattern_02",
    "Mien_pattern_03",
    "Mien_pattern_04",
];

/// Reference video for each bundled label
pub const DEFAULT_LINKS: [(&str, &str); 4] = [
    ("Mien_pattern_01", "https://youtu.be/zkrltLG0r9w"),
    ("Mien_pattern_02", "https://youtu.be/example_for_02"),
    ("Mien_pattern_03", "https://youtu.be/example_for_03"),
    ("Mien_pattern_04", "https://youtu.be/example_for_04"),
];

/// Ordered class names, addressed by the model's output index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSet(Vec<String>);

impl LabelSet {
    pub fn new(labels: Vec<String>) -> Self {
        Self(labels)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.0.get(index).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

/// Class name to informational link
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceTable(HashMap<String, String>);

impl ReferenceTable {
    pub fn new(links: HashMap<String, String>) -> Self {
        Self(links)
    }

    pub fn get(&self, label: &str) -> Option<&str> {
        self.0.get(label).map(String::as_str)
    }
}

/// One entry of a catalog file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassEntry {
    pub label: String,
    pub link: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CatalogFile {
    classes: Vec<ClassEntry>,
}

/// Validated pairing of a [`LabelSet`] with its [`ReferenceTable`].
///
/// Construction fails unless every label is unique and has a non-empty link.
#[derive(Debug, Clone)]
pub struct ClassCatalog {
    labels: LabelSet,
    references: ReferenceTable,
}

impl ClassCatalog {
    pub fn new(labels: LabelSet, references: ReferenceTable) -> ServingResult<Self> {
        if labels.is_empty() {
            return Err(ServingError::config("label set is empty"));
        }

        let mut seen = HashSet::new();
        for label in labels.iter() {
            if label.trim().is_empty() {
                return Err(ServingError::config("label set contains an empty label"));
            }
            if !seen.insert(label) {
                return Err(ServingError::config(format!(
                    "label '{label}' appears more than once"
                )));
            }
            match references.get(label) {
                Some(link) if !link.trim().is_empty() => {}
                Some(_) => {
                    return Err(ServingError::config(format!(
                        "reference link for label '{label}' is empty"
                    )));
                }
                None => {
                    return Err(ServingError::config(format!(
                        "label '{label}' has no reference link"
                    )));
                }
            }
        }

        Ok(Self { labels, references })
    }

    pub fn from_entries(entries: Vec<ClassEntry>) -> ServingResult<Self> {
        let labels = LabelSet::new(entries.iter().map(|e| e.label.clone()).collect());
        let references = ReferenceTable::new(
            entries
                .into_iter()
                .map(|e| (e.label, e.link))
                .collect(),
        );
        Self::new(labels, references)
    }

    /// Reads a `{"classes": [{"label": .., "link": ..}]}` file
    pub fn from_json_file(path: &Path) -> ServingResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ServingError::config(format!(
                "failed to read class catalog '{}': {e}",
                path.display()
            ))
        })?;
        let file: CatalogFile = serde_json::from_str(&raw).map_err(|e| {
            ServingError::config(format!(
                "failed to parse class catalog '{}': {e}",
                path.display()
            ))
        })?;
        Self::from_entries(file.classes)
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    pub fn references(&self) -> &ReferenceTable {
        &self.references
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Checks that the model's output width equals the number of labels
    pub fn ensure_output_width(&self, width: usize) -> ServingResult<()> {
        if width != self.len() {
            return Err(ServingError::config(format!(
                "model produces {width} scores but the label set has {} entries",
                self.len()
            )));
        }
        Ok(())
    }
}

impl Default for ClassCatalog {
    fn default() -> Self {
        let labels = LabelSet::new(DEFAULT_LABELS.iter().map(|l| l.to_string()).collect());
        let references = ReferenceTable::new(
            DEFAULT_LINKS
                .iter()
                .map(|(label, link)| (label.to_string(), link.to_string()))
                .collect(),
        );
        Self { labels, references }
    }
}
