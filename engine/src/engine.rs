use crate::association::SentenceRefIndex;
use crate::config::EngineConfig;
use crate::entry_index::EntryIndex;
use crate::error::{EngineError, Result};
use crate::host::{Fetcher, ProgressLookup, RouteSync};
use crate::path::{
    file_name, join, normalize_path, parent_folder, title_from_filename, virtual_key, PathTree,
    SETS_SEGMENT,
};
use crate::single_flight::SingleFlight;
use crate::types::{
    CollectionRecord, CollectionSetFile, DirFile, DirFolder, DirListing, FolderMetadata, Manifest,
    RecordStatus,
};
use futures::task::{LocalSpawn, LocalSpawnExt};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::rc::Rc;

/// Mutable engine state. Only touched between awaits, never across one.
#[derive(Default)]
pub(crate) struct State {
    pub records: HashMap<String, Rc<CollectionRecord>>,
    /// Virtual keys in registration order
    pub virtual_order: Vec<String>,
    /// folder -> resolved metadata (None cached too)
    pub folder_metadata: HashMap<String, Option<FolderMetadata>>,
    /// folder -> collection-set declaration (None when the folder has none)
    pub set_files: HashMap<String, Option<Rc<CollectionSetFile>>>,
    pub entry_indices: HashMap<String, Rc<EntryIndex>>,
    /// top-level folder -> sentence references
    pub sentence_refs: HashMap<String, SentenceRefIndex>,
    pub associations_started: HashSet<String>,
    pub associations_finalized: HashSet<String>,
    pub active: Option<String>,
}

pub(crate) struct Inner {
    pub config: EngineConfig,
    pub manifest: Manifest,
    pub tree: PathTree,
    pub fetcher: Rc<dyn Fetcher>,
    pub spawner: Rc<dyn LocalSpawn>,
    pub route: RefCell<Option<Rc<dyn RouteSync>>>,
    pub progress: RefCell<Option<Rc<dyn ProgressLookup>>>,
    pub listeners: RefCell<Vec<Rc<dyn Fn()>>>,
    pub state: RefCell<State>,
    pub loads: SingleFlight<String, Result<Rc<CollectionRecord>>>,
    pub metadata_loads: SingleFlight<String, Option<FolderMetadata>>,
    pub set_loads: SingleFlight<String, Result<Option<Rc<CollectionSetFile>>>>,
    pub associations: SingleFlight<String, ()>,
}

/// Collection index and resolution engine.
///
/// Cheap to clone; clones share the same state. Each constructed engine owns
/// its own caches, so several can live side by side.
#[derive(Clone)]
pub struct Engine {
    pub(crate) inner: Rc<Inner>,
}

/// Parse a manifest document
pub fn parse_manifest(json: &str) -> Result<Manifest> {
    serde_json::from_str(json).map_err(|e| EngineError::Manifest(e.to_string()))
}

impl Engine {
    pub fn new(
        manifest: Manifest,
        config: EngineConfig,
        fetcher: Rc<dyn Fetcher>,
        spawner: Rc<dyn LocalSpawn>,
    ) -> Self {
        let tree = PathTree::build(&manifest.paths, |name| config.is_reserved(name));
        let manifest = Manifest {
            folder_metadata: manifest
                .folder_metadata
                .into_iter()
                .map(|(folder, file)| (normalize_path(&folder), normalize_path(&file)))
                .collect(),
            hints: manifest
                .hints
                .into_iter()
                .map(|(path, hint)| (normalize_path(&path), hint))
                .collect(),
            paths: manifest.paths,
        };
        log::debug!("engine ready with {} collections", tree.files().len());

        Engine {
            inner: Rc::new(Inner {
                config,
                manifest,
                tree,
                fetcher,
                spawner,
                route: RefCell::new(None),
                progress: RefCell::new(None),
                listeners: RefCell::new(Vec::new()),
                state: RefCell::new(State::default()),
                loads: SingleFlight::default(),
                metadata_loads: SingleFlight::default(),
                set_loads: SingleFlight::default(),
                associations: SingleFlight::default(),
            }),
        }
    }

    /// Fetch the manifest named by the config and build an engine from it
    pub async fn bootstrap(
        config: EngineConfig,
        fetcher: Rc<dyn Fetcher>,
        spawner: Rc<dyn LocalSpawn>,
    ) -> Result<Self> {
        let url = config.url_for(&config.manifest_path);
        let text = fetcher
            .fetch_text(&url)
            .await
            .map_err(|e| EngineError::Manifest(e.to_string()))?;
        let manifest = parse_manifest(&text)?;
        Ok(Engine::new(manifest, config, fetcher, spawner))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn tree(&self) -> &PathTree {
        &self.inner.tree
    }

    pub fn set_progress_lookup(&self, lookup: Option<Rc<dyn ProgressLookup>>) {
        *self.inner.progress.borrow_mut() = lookup;
    }

    pub fn set_route_sync(&self, route: Option<Rc<dyn RouteSync>>) {
        *self.inner.route.borrow_mut() = route;
    }

    /// Register a no-argument change listener
    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn() + 'static,
    {
        self.inner.listeners.borrow_mut().push(Rc::new(listener));
    }

    /// Tell every listener to re-read state
    pub fn notify(&self) {
        let listeners: Vec<Rc<dyn Fn()>> = self.inner.listeners.borrow().clone();
        for listener in listeners {
            listener();
        }
    }

    /// Run a fire-and-forget task on the host's event loop
    pub(crate) fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + 'static,
    {
        if let Err(e) = self.inner.spawner.spawn_local(task) {
            log::warn!("failed to spawn background task: {}", e);
        }
    }

    /// A registered record by key
    pub fn collection(&self, key: &str) -> Option<Rc<CollectionRecord>> {
        let key = normalize_path(key);
        let state = self.inner.state.borrow();
        state.records.get(&key).cloned()
    }

    /// Every registered record: real ones in manifest order, then virtual
    /// ones in registration order
    pub fn collections(&self) -> Vec<Rc<CollectionRecord>> {
        let state = self.inner.state.borrow();
        let real = self
            .inner
            .tree
            .files()
            .iter()
            .filter_map(|key| state.records.get(key).cloned());
        let virtual_records = state
            .virtual_order
            .iter()
            .filter_map(|key| state.records.get(key).cloned());
        real.chain(virtual_records).collect()
    }

    /// Immediate children of `folder` for browsing. Folders and files are
    /// each sorted case-insensitively by their label.
    pub fn list_collection_dir(&self, folder: &str) -> DirListing {
        let folder = normalize_path(folder);
        let mut listing = if file_name(&folder) == SETS_SEGMENT {
            self.list_sets_dir(&folder)
        } else {
            self.list_real_dir(&folder)
        };
        listing
            .folders
            .sort_by_cached_key(|f| f.label.to_lowercase());
        listing.files.sort_by_cached_key(|f| f.title.to_lowercase());
        listing
    }

    fn list_real_dir(&self, folder: &str) -> DirListing {
        let mut listing = DirListing::default();
        let Some((folders, files)) = self.inner.tree.children(folder) else {
            return listing;
        };
        listing.folders = folders
            .into_iter()
            .map(|name| DirFolder {
                path: join(folder, name),
                label: name.to_string(),
                is_virtual: false,
            })
            .collect();
        let sets_path = join(folder, &self.inner.config.collection_sets_filename);
        if self.inner.tree.is_available(&sets_path) {
            listing.folders.push(DirFolder {
                path: join(folder, SETS_SEGMENT),
                label: self.inner.config.sets_label.clone(),
                is_virtual: true,
            });
        }

        let state = self.inner.state.borrow();
        listing.files = files
            .iter()
            .map(|key| match state.records.get(key) {
                Some(record) => DirFile {
                    key: key.clone(),
                    title: record.metadata.name.clone(),
                    description: record.metadata.description.clone(),
                    entry_count: Some(record.entries.len()),
                    loaded: true,
                },
                None => {
                    let hint = self.inner.manifest.hints.get(key);
                    DirFile {
                        key: key.clone(),
                        title: hint
                            .and_then(|h| h.name.clone())
                            .unwrap_or_else(|| title_from_filename(file_name(key))),
                        description: hint.and_then(|h| h.description.clone()),
                        entry_count: hint.and_then(|h| h.entries),
                        loaded: false,
                    }
                }
            })
            .collect();
        listing
    }

    fn list_sets_dir(&self, folder: &str) -> DirListing {
        let base = parent_folder(folder).to_string();
        let cached = {
            let state = self.inner.state.borrow();
            state.set_files.get(&base).cloned()
        };
        let Some(declaration) = cached else {
            let engine = self.clone();
            self.spawn(async move {
                match engine.collection_sets(&base).await {
                    Ok(_) => engine.notify(),
                    Err(e) => log::warn!("collection sets for '{}' unavailable: {}", base, e),
                }
            });
            return DirListing::default();
        };
        let Some(declaration) = declaration else {
            return DirListing::default();
        };

        let state = self.inner.state.borrow();
        let files = declaration
            .sets
            .iter()
            .map(|set| {
                let key = virtual_key(&base, &set.id);
                let record = state.records.get(&key);
                let ready = record.filter(|r| r.status == RecordStatus::Ready);
                DirFile {
                    title: if set.label.is_empty() {
                        set.id.clone()
                    } else {
                        set.label.clone()
                    },
                    description: Some(set.description.clone()).filter(|d| !d.is_empty()),
                    entry_count: ready
                        .map(|r| r.entries.len())
                        .or_else(|| set.kanji.as_ref().map(Vec::len)),
                    loaded: record.is_some(),
                    key,
                }
            })
            .collect();
        DirListing {
            folders: Vec::new(),
            files,
        }
    }
}
