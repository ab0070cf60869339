use crate::engine::Engine;
use crate::path::{join, normalize_path, parent_folder, parse_virtual_key};
use crate::types::FolderMetadata;
use futures::future::{self, FutureExt, LocalBoxFuture};
use serde_json::Value;

impl Engine {
    /// Effective metadata of `folder`: its own declaration, else the nearest
    /// ancestor's, else `None`. Results (including `None`) are cached per
    /// folder; concurrent callers share one resolution.
    pub fn resolve_folder_metadata(
        &self,
        folder: &str,
    ) -> LocalBoxFuture<'static, Option<FolderMetadata>> {
        let folder = normalize_path(folder);
        let cached = {
            let state = self.inner.state.borrow();
            state.folder_metadata.get(&folder).cloned()
        };
        if let Some(resolved) = cached {
            return future::ready(resolved).boxed_local();
        }
        let engine = self.clone();
        let flight_folder = folder.clone();
        self.inner
            .metadata_loads
            .run(folder, move || async move {
                engine.resolve_uncached(flight_folder).await
            })
            .boxed_local()
    }

    async fn resolve_uncached(&self, folder: String) -> Option<FolderMetadata> {
        let own = match self.declaration_path(&folder) {
            Some(path) => self.fetch_declaration(&path).await,
            None => None,
        };
        let resolved = match own {
            Some(metadata) => Some(metadata),
            None if folder.is_empty() => None,
            None => self.resolve_folder_metadata(parent_folder(&folder)).await,
        };
        self.inner
            .state
            .borrow_mut()
            .folder_metadata
            .insert(folder, resolved.clone());
        resolved
    }

    /// Where `folder` declares its metadata, if it does
    fn declaration_path(&self, folder: &str) -> Option<String> {
        if let Some(path) = self.inner.manifest.folder_metadata.get(folder) {
            return Some(path.clone());
        }
        let path = join(folder, &self.inner.config.metadata_filename);
        self.inner.tree.is_available(&path).then_some(path)
    }

    /// A declaration that cannot be fetched or parsed counts as absent
    async fn fetch_declaration(&self, path: &str) -> Option<FolderMetadata> {
        let url = self.inner.config.url_for(path);
        let text = match self.inner.fetcher.fetch_text(&url).await {
            Ok(text) => text,
            Err(e) => {
                log::warn!("metadata declaration '{}' unavailable: {}", path, e);
                return None;
            }
        };
        let parsed: serde_json::Result<FolderMetadata> =
            serde_json::from_str::<Value>(&text).and_then(|value| match value {
                Value::Object(mut map) if matches!(map.get("metadata"), Some(Value::Object(_))) => {
                    serde_json::from_value(map.remove("metadata").unwrap_or_default())
                }
                other => serde_json::from_value(other),
            });
        match parsed {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                log::warn!("malformed metadata declaration '{}': {}", path, e);
                None
            }
        }
    }

    /// Folder whose metadata applies to a collection key or folder path
    fn metadata_folder(&self, key_or_folder: &str) -> String {
        let path = normalize_path(key_or_folder);
        if let Some((base, _)) = parse_virtual_key(&path) {
            return base;
        }
        if self.inner.tree.contains_file(&path) {
            return parent_folder(&path).to_string();
        }
        path
    }

    /// Inherited metadata for a collection key or a folder
    pub async fn inherited_metadata(&self, key_or_folder: &str) -> Option<FolderMetadata> {
        let folder = self.metadata_folder(key_or_folder);
        self.resolve_folder_metadata(&folder).await
    }

    /// Already-resolved inherited metadata, without fetching
    pub fn cached_metadata(&self, key_or_folder: &str) -> Option<FolderMetadata> {
        let folder = self.metadata_folder(key_or_folder);
        let state = self.inner.state.borrow();
        state.folder_metadata.get(&folder).cloned().flatten()
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::{drive, harness, harness_with_manifest};
    use futures::future::join;
    use serde_json::json;

    #[test]
    fn test_inherits_from_nearest_ancestor() {
        let mut h = harness(&["ja/_metadata.json", "ja/words/n5/a.json"]);
        h.fetcher
            .serve("ja/_metadata.json", json!({"category": "japanese", "fields": []}));

        let deep = drive(&mut h.pool, h.engine.resolve_folder_metadata("ja/words/n5"));
        let top = drive(&mut h.pool, h.engine.resolve_folder_metadata("ja"));
        assert_eq!(deep, top);
        assert_eq!(deep.unwrap().category.as_deref(), Some("japanese"));
        assert_eq!(h.fetcher.calls("ja/_metadata.json"), 1);
        assert_eq!(
            h.engine.cached_metadata("ja/words/n5/a.json").unwrap().category.as_deref(),
            Some("japanese")
        );
    }

    #[test]
    fn test_no_declaration_anywhere_is_none() {
        let mut h = harness(&["x/y/a.json"]);
        assert_eq!(
            drive(&mut h.pool, h.engine.resolve_folder_metadata("x/y")),
            None
        );
        assert_eq!(h.fetcher.total_calls(), 0);
    }

    #[test]
    fn test_malformed_declaration_falls_through() {
        let mut h = harness(&["_metadata.json", "ja/_metadata.json", "ja/a.json"]);
        h.fetcher.serve("_metadata.json", json!({"category": "root"}));
        h.fetcher.serve_raw("ja/_metadata.json", "{ broken");

        let meta = drive(&mut h.pool, h.engine.resolve_folder_metadata("ja")).unwrap();
        assert_eq!(meta.category.as_deref(), Some("root"));
    }

    #[test]
    fn test_missing_declaration_falls_through() {
        let mut h = harness(&["_metadata.json", "ja/_metadata.json", "ja/a.json"]);
        h.fetcher.serve("_metadata.json", json!({"category": "root"}));
        h.fetcher.fail("ja/_metadata.json", 500);

        let meta = drive(&mut h.pool, h.engine.inherited_metadata("ja/a.json")).unwrap();
        assert_eq!(meta.category.as_deref(), Some("root"));
    }

    #[test]
    fn test_concurrent_resolution_and_null_cache() {
        let mut h = harness_with_manifest(json!({
            "paths": ["ja/a.json"],
            "folderMetadata": {"ja": "meta/ja.json"}
        }));
        h.fetcher.serve(
            "meta/ja.json",
            json!({"metadata": {"language": "ja", "fields": [{"key": "kanji"}]}}),
        );

        let (a, b) = drive(
            &mut h.pool,
            join(
                h.engine.resolve_folder_metadata("ja"),
                h.engine.resolve_folder_metadata("ja/"),
            ),
        );
        assert_eq!(a, b);
        assert_eq!(a.unwrap().language.as_deref(), Some("ja"));
        assert_eq!(h.fetcher.calls("meta/ja.json"), 1);

        // a folder with nothing above it resolves to None and stays cached
        assert_eq!(drive(&mut h.pool, h.engine.resolve_folder_metadata("other")), None);
        assert_eq!(drive(&mut h.pool, h.engine.resolve_folder_metadata("other")), None);
        assert_eq!(h.fetcher.total_calls(), 1);
    }
}
