use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::entry_index::invalidate_covering;
use crate::path::{
    file_name, is_under, join, normalize_path, parent_folder, parse_virtual_key,
    title_from_filename, top_folder,
};
use crate::types::{
    CollectionMetadata, CollectionRecord, Entry, FolderMetadata, RecordStatus, Sentence,
};
use futures::future::join_all;
use serde_json::{Map, Value};
use std::rc::Rc;

/// How a load reports back to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    /// Fire the change signal once the record is available
    pub notify: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        LoadOptions { notify: true }
    }
}

impl LoadOptions {
    /// Background loads: no per-item change signal
    pub fn quiet() -> Self {
        LoadOptions { notify: false }
    }
}

impl Engine {
    /// Load one collection, or return it if already registered.
    ///
    /// Concurrent calls for the same key share a single fetch. Failures are
    /// not cached, so a later call retries.
    pub async fn load_collection(&self, key: &str) -> Result<Rc<CollectionRecord>> {
        self.load_collection_with(key, LoadOptions::default()).await
    }

    pub async fn load_collection_with(
        &self,
        key: &str,
        options: LoadOptions,
    ) -> Result<Rc<CollectionRecord>> {
        let key = normalize_path(key);
        if let Some(record) = self.collection(&key) {
            return Ok(record);
        }
        if let Some((base, set_id)) = parse_virtual_key(&key) {
            return self.resolve_collection_set(&base, &set_id).await;
        }
        let record = self.fetch_once(key).await?;
        if options.notify {
            self.notify();
        }
        Ok(record)
    }

    /// Fetch a real collection again and replace its record in place
    pub async fn reload_collection(&self, key: &str) -> Result<Rc<CollectionRecord>> {
        let key = normalize_path(key);
        let record = self.fetch_once(key).await?;
        self.notify();
        Ok(record)
    }

    async fn fetch_once(&self, key: String) -> Result<Rc<CollectionRecord>> {
        if !self.inner.tree.contains_file(&key) {
            return Err(EngineError::UnknownCollection(key));
        }
        let engine = self.clone();
        let flight_key = key.clone();
        self.inner
            .loads
            .run(key, move || async move { engine.fetch_collection(flight_key).await })
            .await
    }

    async fn fetch_collection(&self, key: String) -> Result<Rc<CollectionRecord>> {
        let url = self.inner.config.url_for(&key);
        let text = self
            .inner
            .fetcher
            .fetch_text(&url)
            .await
            .map_err(|source| EngineError::Load {
                key: key.clone(),
                source,
            })?;
        let document: Value = serde_json::from_str(&text).map_err(|e| EngineError::InvalidJson {
            key: key.clone(),
            message: e.to_string(),
        })?;
        let inherited = self.resolve_folder_metadata(parent_folder(&key)).await;
        let record = build_record(&key, document, inherited.as_ref(), &self.inner.config)?;
        log::debug!(
            "loaded '{}' entries={} sentences={}",
            key,
            record.entries.len(),
            record.sentences.len()
        );

        let record = self.register(record);
        self.maybe_start_association(&key);
        Ok(record)
    }

    /// Insert a record and drop every cached entry index that covers it.
    /// Runs synchronously at the end of a load so no reader sees a stale index.
    fn register(&self, record: CollectionRecord) -> Rc<CollectionRecord> {
        let key = record.key.clone();
        let record = Rc::new(record);
        let mut state = self.inner.state.borrow_mut();
        state.records.insert(key.clone(), Rc::clone(&record));
        invalidate_covering(&mut state, parent_folder(&key));
        record
    }

    /// Start the top-level association build the first time a document in
    /// one of its association areas is loaded
    fn maybe_start_association(&self, key: &str) {
        let top = top_folder(key);
        if top == key {
            return;
        }
        let relevant = self
            .inner
            .config
            .association_areas
            .iter()
            .any(|area| is_under(key, &join(top, area)));
        if !relevant {
            return;
        }
        let first = self
            .inner
            .state
            .borrow_mut()
            .associations_started
            .insert(top.to_string());
        if first {
            let engine = self.clone();
            let top = top.to_string();
            self.spawn(async move { engine.ensure_association(&top, false).await });
        }
    }

    /// Quietly load every collection below `folder`; failures are logged
    pub(crate) async fn prefetch_folder(&self, folder: &str) {
        let keys: Vec<String> = self.inner.tree.files_under(folder).cloned().collect();
        self.prefetch(keys).await;
    }

    pub(crate) async fn prefetch(&self, keys: Vec<String>) {
        let loads = keys
            .iter()
            .map(|key| self.load_collection_with(key, LoadOptions::quiet()));
        for (key, result) in keys.iter().zip(join_all(loads).await) {
            if let Err(e) = result {
                log::warn!("background load of '{}' failed: {}", key, e);
            }
        }
    }
}

/// Whether documents at `key` keep their sentences under `entries`
fn in_examples_area(key: &str, config: &EngineConfig) -> bool {
    parent_folder(key)
        .split('/')
        .any(|seg| seg == config.examples_area)
}

/// Normalize a parsed document into a record
pub(crate) fn build_record(
    key: &str,
    document: Value,
    inherited: Option<&FolderMetadata>,
    config: &EngineConfig,
) -> Result<CollectionRecord> {
    let invalid = |message: String| EngineError::InvalidJson {
        key: key.to_string(),
        message,
    };
    let mut document = match document {
        Value::Array(items) => {
            let mut wrapped = Map::new();
            wrapped.insert("metadata".to_string(), Value::Object(Map::new()));
            wrapped.insert("sentences".to_string(), Value::Array(items));
            wrapped
        }
        Value::Object(map) => map,
        _ => return Err(invalid("expected an object or an array".to_string())),
    };

    let mut metadata: CollectionMetadata = match document.remove("metadata") {
        None | Some(Value::Null) => CollectionMetadata::default(),
        Some(value) => serde_json::from_value(value).map_err(|e| invalid(e.to_string()))?,
    };
    let mut entries: Vec<Entry> = match document.remove("entries") {
        None | Some(Value::Null) => Vec::new(),
        Some(value) => serde_json::from_value(value).map_err(|e| invalid(e.to_string()))?,
    };
    let mut sentences: Vec<Sentence> = match document.remove("sentences") {
        None | Some(Value::Null) => Vec::new(),
        Some(value) => serde_json::from_value(value).map_err(|e| invalid(e.to_string()))?,
    };

    if sentences.is_empty() && !entries.is_empty() && in_examples_area(key, config) {
        sentences = entries
            .drain(..)
            .map(|entry| Sentence {
                source_id: None,
                fields: entry.fields,
            })
            .collect();
    }
    for (ordinal, sentence) in sentences.iter_mut().enumerate() {
        if sentence.source_id.is_none() {
            sentence.source_id = Some(format!("{}#{}", key, ordinal));
        }
    }

    if metadata.name.trim().is_empty() {
        metadata.name = title_from_filename(file_name(key));
    }
    if let Some(folder) = inherited {
        metadata.inherit(folder);
    }

    Ok(CollectionRecord {
        key: key.to_string(),
        status: RecordStatus::Ready,
        entries,
        metadata,
        sentences,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::FetchError;
    use crate::testing::{drive, harness};
    use futures::future::join;
    use serde_json::json;

    #[test]
    fn test_bare_array_becomes_sentences() {
        let record = build_record(
            "ja/sentences/s.json",
            json!([{"text": "a"}, {"text": "b", "sourceId": "custom"}]),
            None,
            &EngineConfig::default(),
        )
        .unwrap();
        assert!(record.entries.is_empty());
        assert_eq!(record.sentences.len(), 2);
        assert_eq!(
            record.sentences[0].source_id.as_deref(),
            Some("ja/sentences/s.json#0")
        );
        assert_eq!(record.sentences[1].source_id.as_deref(), Some("custom"));
        assert_eq!(record.metadata.name, "S");
    }

    #[test]
    fn test_examples_area_reuses_entries() {
        let config = EngineConfig::default();
        let doc = json!({"entries": [{"text": "火事だ"}]});
        let record = build_record("ja/examples/e.json", doc.clone(), None, &config).unwrap();
        assert!(record.entries.is_empty());
        assert_eq!(record.sentences.len(), 1);

        let record = build_record("ja/words/e.json", doc, None, &config).unwrap();
        assert_eq!(record.entries.len(), 1);
        assert!(record.sentences.is_empty());
    }

    #[test]
    fn test_rejects_scalar_document() {
        let err = build_record("a.json", json!(3), None, &EngineConfig::default()).unwrap_err();
        assert!(matches!(err, EngineError::InvalidJson { .. }));
    }

    #[test]
    fn test_concurrent_loads_fetch_once() {
        let mut h = harness(&["ja/words/a.json"]);
        h.fetcher
            .serve("ja/words/a.json", json!({"entries": [{"kanji": "火"}]}));

        let (a, b) = drive(
            &mut h.pool,
            join(
                h.engine.load_collection("ja/words/a.json"),
                h.engine.load_collection("./ja/words/a.json"),
            ),
        );
        assert!(Rc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(h.fetcher.calls("ja/words/a.json"), 1);

        drive(&mut h.pool, h.engine.load_collection("ja/words/a.json")).unwrap();
        assert_eq!(h.fetcher.calls("ja/words/a.json"), 1);
    }

    #[test]
    fn test_failed_load_is_retried() {
        let mut h = harness(&["a.json"]);
        h.fetcher.fail("a.json", 404);

        let err = drive(&mut h.pool, h.engine.load_collection("a.json")).unwrap_err();
        assert_eq!(
            err,
            EngineError::Load {
                key: "a.json".to_string(),
                source: FetchError::Status {
                    url: "a.json".to_string(),
                    status: 404
                }
            }
        );

        h.fetcher.serve("a.json", json!({"entries": [{"word": "水"}]}));
        let record = drive(&mut h.pool, h.engine.load_collection("a.json")).unwrap();
        assert_eq!(record.entries.len(), 1);
        assert_eq!(h.fetcher.calls("a.json"), 2);
    }

    #[test]
    fn test_invalid_json_and_unknown_key() {
        let mut h = harness(&["a.json"]);
        h.fetcher.serve_raw("a.json", "{not json");
        let err = drive(&mut h.pool, h.engine.load_collection("a.json")).unwrap_err();
        assert!(matches!(err, EngineError::InvalidJson { .. }));

        let err = drive(&mut h.pool, h.engine.load_collection("missing.json")).unwrap_err();
        assert_eq!(err, EngineError::UnknownCollection("missing.json".to_string()));
        assert_eq!(h.fetcher.calls("missing.json"), 0);
    }

    #[test]
    fn test_load_merges_folder_metadata() {
        let mut h = harness(&["ja/_metadata.json", "ja/words/a.json"]);
        h.fetcher.serve(
            "ja/_metadata.json",
            json!({"category": "japanese", "fields": [{"key": "kanji"}, {"key": "meaning"}]}),
        );
        h.fetcher.serve(
            "ja/words/a.json",
            json!({"metadata": {"fields": [{"key": "meaning", "label": "English"}]}, "entries": []}),
        );
        let record = drive(&mut h.pool, h.engine.load_collection("ja/words/a.json")).unwrap();
        let keys: Vec<&str> = record.metadata.fields.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(keys, vec!["meaning", "kanji"]);
        assert_eq!(record.metadata.fields[0].label.as_deref(), Some("English"));
        assert_eq!(record.metadata.category.as_deref(), Some("japanese"));
        assert_eq!(record.metadata.name, "A");
    }

    #[test]
    fn test_load_notifies_unless_quiet() {
        let mut h = harness(&["a.json", "b.json"]);
        h.fetcher.serve("a.json", json!({"entries": []}));
        h.fetcher.serve("b.json", json!({"entries": []}));
        let count = Rc::new(std::cell::Cell::new(0));
        let seen = Rc::clone(&count);
        h.engine.subscribe(move || seen.set(seen.get() + 1));

        drive(
            &mut h.pool,
            h.engine.load_collection_with("a.json", LoadOptions::quiet()),
        )
        .unwrap();
        assert_eq!(count.get(), 0);
        drive(&mut h.pool, h.engine.load_collection("b.json")).unwrap();
        assert_eq!(count.get(), 1);
    }
}
