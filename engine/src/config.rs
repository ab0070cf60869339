use serde::{Deserialize, Serialize};

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Engine settings, supplied as JSON by the host. Every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Prefix joined in front of every relative path before fetching
    pub base_url: String,
    pub manifest_path: String,
    /// Per-folder metadata declaration
    pub metadata_filename: String,
    /// Per-folder virtual collection declaration
    pub collection_sets_filename: String,
    /// Sub-area whose documents keep their sentences under `entries`
    pub examples_area: String,
    /// Areas under a top-level folder that take part in sentence association
    pub association_areas: Vec<String>,
    /// Fields indexed as surface forms, in priority order
    pub surface_keys: Vec<String>,
    /// Fields tried in order to derive an entry's study key
    pub identity_keys: Vec<String>,
    /// Fields counted by the richness score
    pub descriptive_keys: Vec<String>,
    /// Filter field prefix resolved against the progress lookup
    pub progress_prefix: String,
    /// Label of the virtual "tag" pseudo-folder
    pub sets_label: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            base_url: String::new(),
            manifest_path: "manifest.json".to_string(),
            metadata_filename: "_metadata.json".to_string(),
            collection_sets_filename: "_collectionSets.json".to_string(),
            examples_area: "examples".to_string(),
            association_areas: strings(&["words", "sentences", "examples"]),
            surface_keys: strings(&["kanji", "word", "text", "kana", "reading"]),
            identity_keys: strings(&["kanji", "word", "text", "reading", "kana"]),
            descriptive_keys: strings(&[
                "meaning", "meanings", "english", "reading", "kana", "onyomi", "kunyomi",
                "notes", "type", "tags", "jlpt", "strokes",
            ]),
            progress_prefix: "kanji_progress.".to_string(),
            sets_label: "Tags".to_string(),
        }
    }
}

impl EngineConfig {
    /// URL for a relative path
    pub fn url_for(&self, path: &str) -> String {
        if self.base_url.is_empty() {
            return path.to_string();
        }
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Filenames that are fetchable but never listed as collections
    pub fn is_reserved(&self, filename: &str) -> bool {
        filename == self.metadata_filename || filename == self.collection_sets_filename
    }
}
