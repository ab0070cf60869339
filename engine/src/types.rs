use fnv::FnvHasher;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};

/// Normalized relative path of a real document, or `<folder>/__collectionSets/<setId>`
/// for a virtual one
pub type CollectionKey = String;

/// Open bag of fields on an entry or sentence
pub type Fields = Map<String, Value>;

/// One column of a collection's field schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub field_type: Option<String>,
}

/// Metadata declared by a folder and inherited by everything below it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FolderMetadata {
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// Resolved metadata of a loaded collection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
    /// Any other keys the document declared, carried through untouched
    #[serde(flatten)]
    pub extra: Fields,
}

impl CollectionMetadata {
    /// Add inherited fields whose key the collection does not already declare,
    /// and inherit category/language when unset locally.
    pub fn inherit(&mut self, folder: &FolderMetadata) {
        let local: HashSet<String> = self.fields.iter().map(|f| f.key.clone()).collect();
        for field in &folder.fields {
            if !local.contains(&field.key) {
                self.fields.push(field.clone());
            }
        }
        if self.category.is_none() {
            self.category = folder.category.clone();
        }
        if self.language.is_none() {
            self.language = folder.language.clone();
        }
    }
}

/// Example sentence embedded in a document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sentence {
    /// Stable `documentKey#ordinal` identity, assigned on load
    #[serde(default, rename = "sourceId", skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(flatten)]
    pub fields: Fields,
}

impl Sentence {
    /// Key used to suppress duplicate attachment: the source identity, or a
    /// content hash of the text fields when no identity is known.
    pub fn dedup_key(&self) -> String {
        if let Some(id) = &self.source_id {
            return id.clone();
        }
        let mut hasher = FnvHasher::default();
        for (name, value) in &self.fields {
            if let Value::String(text) = value {
                name.hash(&mut hasher);
                text.hash(&mut hasher);
            }
        }
        format!("hash:{:016x}", hasher.finish())
    }

    /// Reference keys named by the sentence's structured chunks
    /// (`chunks[].ref` or `chunks[].refs[]`)
    pub fn reference_keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        let Some(Value::Array(chunks)) = self.fields.get("chunks") else {
            return keys;
        };
        for chunk in chunks {
            let Value::Object(chunk) = chunk else {
                continue;
            };
            if let Some(Value::String(r)) = chunk.get("ref") {
                keys.push(r.clone());
            }
            if let Some(Value::Array(refs)) = chunk.get("refs") {
                keys.extend(refs.iter().filter_map(|r| r.as_str()).map(str::to_string));
            }
        }
        keys.retain(|k| !k.trim().is_empty());
        keys
    }
}

/// One study item. Identity comes from its fields, not a dedicated id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    #[serde(flatten)]
    pub fields: Fields,
    /// Example sentences linked by the association build
    #[serde(
        default,
        rename = "attachedSentences",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub sentences: Vec<Sentence>,
}

impl Entry {
    /// Minimal entry standing in for a term that has no data yet
    pub fn synthetic(term: &str) -> Self {
        let mut fields = Fields::new();
        fields.insert("kanji".to_string(), Value::String(term.to_string()));
        fields.insert("text".to_string(), Value::String(term.to_string()));
        Entry {
            fields,
            sentences: Vec::new(),
        }
    }

    /// Non-empty string value of a field
    pub fn text(&self, key: &str) -> Option<&str> {
        match self.fields.get(key) {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.as_str()),
            _ => None,
        }
    }

    /// Whether a field carries anything worth showing
    pub fn is_populated(&self, key: &str) -> bool {
        match self.fields.get(key) {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.trim().is_empty(),
            Some(Value::Array(a)) => !a.is_empty(),
            Some(Value::Object(o)) => !o.is_empty(),
            Some(_) => true,
        }
    }

    /// First populated field among `keys`, used as the entry's study key
    pub fn study_key(&self, keys: &[String]) -> Option<&str> {
        keys.iter().find_map(|k| self.text(k))
    }

    /// Whether any of `sentences` is not attached yet
    pub fn lacks_any(&self, sentences: &[Sentence]) -> bool {
        let seen: HashSet<String> = self.sentences.iter().map(Sentence::dedup_key).collect();
        sentences.iter().any(|s| !seen.contains(&s.dedup_key()))
    }

    /// Attach sentences not already present; returns how many were added
    pub fn attach_sentences<'a, I>(&mut self, sentences: I) -> usize
    where
        I: IntoIterator<Item = &'a Sentence>,
    {
        let mut seen: HashSet<String> = self.sentences.iter().map(Sentence::dedup_key).collect();
        let mut added = 0;
        for sentence in sentences {
            if seen.insert(sentence.dedup_key()) {
                self.sentences.push(sentence.clone());
                added += 1;
            }
        }
        added
    }
}

/// Resolution state of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    /// Virtual record registered but not resolved yet
    Pending,
    Ready,
}

/// A loaded (or virtual) collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionRecord {
    pub key: CollectionKey,
    pub status: RecordStatus,
    pub entries: Vec<Entry>,
    pub metadata: CollectionMetadata,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sentences: Vec<Sentence>,
}

/// One named virtual collection declared in a collection-set file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSetDef {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kanji_filter: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kanji: Option<Vec<String>>,
}

/// Per-folder declaration of virtual collections
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionSetFile {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: Value,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub sets: Vec<CollectionSetDef>,
}

/// Display hints for a collection that has not been loaded
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathHint {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub entries: Option<usize>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawManifest {
    Paths(Vec<String>),
    Object {
        #[serde(default, alias = "files")]
        paths: Vec<String>,
        #[serde(default, rename = "folderMetadata")]
        folder_metadata: HashMap<String, String>,
        #[serde(default)]
        hints: HashMap<String, PathHint>,
    },
}

/// Startup manifest: every available path plus optional folder metadata
/// mapping and display hints
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Manifest {
    pub paths: Vec<String>,
    /// folder -> metadata file path
    pub folder_metadata: HashMap<String, String>,
    pub hints: HashMap<String, PathHint>,
}

impl<'de> Deserialize<'de> for Manifest {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match RawManifest::deserialize(deserializer)? {
            RawManifest::Paths(paths) => Manifest {
                paths,
                ..Manifest::default()
            },
            RawManifest::Object {
                paths,
                folder_metadata,
                hints,
            } => Manifest {
                paths,
                folder_metadata,
                hints,
            },
        })
    }
}

/// Subfolder row in a directory listing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DirFolder {
    pub path: String,
    pub label: String,
    /// True for the virtual "tag" pseudo-folder
    #[serde(rename = "isVirtual")]
    pub is_virtual: bool,
}

/// File row in a directory listing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DirFile {
    pub key: CollectionKey,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "entryCount", skip_serializing_if = "Option::is_none")]
    pub entry_count: Option<usize>,
    pub loaded: bool,
}

/// Immediate children of a folder
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DirListing {
    pub folders: Vec<DirFolder>,
    pub files: Vec<DirFile>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sentence(value: Value) -> Sentence {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_manifest_shapes() {
        let bare: Manifest = serde_json::from_value(json!(["a/b.json"])).unwrap();
        assert_eq!(bare.paths, vec!["a/b.json"]);

        let full: Manifest = serde_json::from_value(json!({
            "files": ["a/b.json"],
            "folderMetadata": {"a": "a/meta.json"},
            "hints": {"a/b.json": {"name": "B", "entries": 3}}
        }))
        .unwrap();
        assert_eq!(full.folder_metadata["a"], "a/meta.json");
        assert_eq!(full.hints["a/b.json"].entries, Some(3));
    }

    #[test]
    fn test_inherit_keeps_local_fields() {
        let mut meta = CollectionMetadata {
            fields: vec![FieldSpec {
                key: "kanji".into(),
                label: Some("Local".into()),
                field_type: None,
            }],
            ..Default::default()
        };
        let folder: FolderMetadata = serde_json::from_value(json!({
            "fields": [{"key": "kanji", "label": "Inherited"}, {"key": "meaning"}],
            "category": "japanese"
        }))
        .unwrap();
        meta.inherit(&folder);
        assert_eq!(meta.fields.len(), 2);
        assert_eq!(meta.fields[0].label.as_deref(), Some("Local"));
        assert_eq!(meta.category.as_deref(), Some("japanese"));
    }

    #[test]
    fn test_reference_keys() {
        let s = sentence(json!({
            "text": "火が強い",
            "chunks": [{"text": "火", "ref": "火"}, {"text": "が"}, {"refs": ["強い", ""]}]
        }));
        assert_eq!(s.reference_keys(), vec!["火", "強い"]);
    }

    #[test]
    fn test_attach_sentences_dedups() {
        let mut entry = Entry::synthetic("火");
        let with_id = Sentence {
            source_id: Some("s.json#0".into()),
            ..sentence(json!({"text": "a"}))
        };
        let anonymous = sentence(json!({"text": "b"}));
        assert_eq!(entry.attach_sentences([&with_id, &anonymous]), 2);
        assert_eq!(entry.attach_sentences([&with_id, &anonymous]), 0);
        assert_eq!(entry.sentences.len(), 2);
    }

    #[test]
    fn test_study_key_priority() {
        let entry: Entry =
            serde_json::from_value(json!({"kanji": "", "word": "火山", "reading": "かざん"}))
                .unwrap();
        let keys = vec!["kanji".to_string(), "word".to_string(), "reading".to_string()];
        assert_eq!(entry.study_key(&keys), Some("火山"));
    }
}
