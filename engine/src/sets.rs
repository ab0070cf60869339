use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::filter::{Filter, FilterContext};
use crate::path::{join, normalize_path, top_folder, virtual_key};
use crate::types::{
    CollectionMetadata, CollectionRecord, CollectionSetDef, CollectionSetFile, Entry, RecordStatus,
};
use std::rc::Rc;

impl Engine {
    /// Collection-set declaration of `folder`, `None` when it has none.
    /// Cached per folder; fetch failures are returned, not cached.
    pub async fn collection_sets(&self, folder: &str) -> Result<Option<Rc<CollectionSetFile>>> {
        let folder = normalize_path(folder);
        let cached = {
            let state = self.inner.state.borrow();
            state.set_files.get(&folder).cloned()
        };
        if let Some(declaration) = cached {
            return Ok(declaration);
        }
        let path = join(&folder, &self.inner.config.collection_sets_filename);
        if !self.inner.tree.is_available(&path) {
            self.inner.state.borrow_mut().set_files.insert(folder, None);
            return Ok(None);
        }
        let engine = self.clone();
        let flight_folder = folder.clone();
        self.inner
            .set_loads
            .run(folder, move || async move {
                engine.fetch_collection_sets(flight_folder, path).await
            })
            .await
    }

    async fn fetch_collection_sets(
        &self,
        folder: String,
        path: String,
    ) -> Result<Option<Rc<CollectionSetFile>>> {
        let url = self.inner.config.url_for(&path);
        let text = self
            .inner
            .fetcher
            .fetch_text(&url)
            .await
            .map_err(|source| EngineError::Load {
                key: path.clone(),
                source,
            })?;
        let declaration: CollectionSetFile =
            serde_json::from_str(&text).map_err(|e| EngineError::InvalidJson {
                key: path.clone(),
                message: e.to_string(),
            })?;
        let declaration = Some(Rc::new(declaration));
        self.inner
            .state
            .borrow_mut()
            .set_files
            .insert(folder, declaration.clone());
        Ok(declaration)
    }

    /// Register the virtual collection `set_id` of `base_folder` and return it
    /// right away with `Pending` status. Its entries are resolved in the
    /// background; the record turns `Ready` and listeners are notified.
    pub async fn resolve_collection_set(
        &self,
        base_folder: &str,
        set_id: &str,
    ) -> Result<Rc<CollectionRecord>> {
        let base = normalize_path(base_folder);
        let key = virtual_key(&base, set_id);
        if let Some(record) = self.collection(&key) {
            return Ok(record);
        }
        let not_found = || EngineError::SetNotFound {
            folder: base.clone(),
            id: set_id.to_string(),
        };
        let declaration = self.collection_sets(&base).await?.ok_or_else(not_found)?;
        let def = declaration
            .sets
            .iter()
            .find(|set| set.id == set_id)
            .cloned()
            .ok_or_else(not_found)?;

        let placeholder = {
            let mut state = self.inner.state.borrow_mut();
            // another caller may have registered it while we awaited
            if let Some(existing) = state.records.get(&key) {
                return Ok(Rc::clone(existing));
            }
            let record = Rc::new(CollectionRecord {
                key: key.clone(),
                status: RecordStatus::Pending,
                entries: Vec::new(),
                metadata: CollectionMetadata {
                    name: if def.label.is_empty() {
                        def.id.clone()
                    } else {
                        def.label.clone()
                    },
                    description: Some(def.description.clone()).filter(|d| !d.is_empty()),
                    ..CollectionMetadata::default()
                },
                sentences: Vec::new(),
            });
            state.records.insert(key.clone(), Rc::clone(&record));
            state.virtual_order.push(key);
            record
        };
        self.notify();

        let engine = self.clone();
        self.spawn(async move { engine.complete_collection_set(base, def).await });
        Ok(placeholder)
    }

    /// Fill in a pending virtual record
    pub(crate) async fn complete_collection_set(&self, base: String, def: CollectionSetDef) {
        self.prefetch_folder(&base).await;
        let inherited = self.resolve_folder_metadata(&base).await;

        let entries = match (&def.kanji, &def.kanji_filter) {
            (Some(terms), _) if !terms.is_empty() => self.entries_for_terms(&base, terms),
            (_, Some(filters)) if !filters.is_empty() => {
                self.entries_matching(top_folder(&base), &Filter::parse(filters))
            }
            _ => Vec::new(),
        };

        let key = virtual_key(&base, &def.id);
        {
            let mut state = self.inner.state.borrow_mut();
            let Some(record) = state.records.get_mut(&key) else {
                return;
            };
            let record = Rc::make_mut(record);
            record.entries = entries;
            if let Some(folder) = &inherited {
                record.metadata.inherit(folder);
            }
            record.status = RecordStatus::Ready;
            log::debug!("resolved set '{}' entries={}", key, record.entries.len());
        }
        self.notify();
    }

    /// One entry per term, in order; unknown terms become synthetic entries
    fn entries_for_terms(&self, base: &str, terms: &[String]) -> Vec<Entry> {
        let index = self.entry_index(base);
        let state = self.inner.state.borrow();
        terms
            .iter()
            .map(|term| {
                index
                    .get(term)
                    .and_then(|slot| {
                        state
                            .records
                            .get(&slot.collection)?
                            .entries
                            .get(slot.position)
                            .cloned()
                    })
                    .unwrap_or_else(|| Entry::synthetic(term))
            })
            .collect()
    }

    /// Loaded entries below `folder` satisfying every clause, in manifest order
    fn entries_matching(&self, folder: &str, filter: &Filter) -> Vec<Entry> {
        let config = &self.inner.config;
        let progress = self.inner.progress.borrow().clone();
        let ctx = FilterContext {
            progress: progress.as_deref(),
            progress_prefix: &config.progress_prefix,
            identity_keys: &config.identity_keys,
        };

        let state = self.inner.state.borrow();
        self.inner
            .tree
            .files_under(folder)
            .filter_map(|key| state.records.get(key))
            .flat_map(|record| record.entries.iter())
            .filter(|entry| filter.matches(entry, &ctx))
            .cloned()
            .collect()
    }
}
