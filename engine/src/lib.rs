use serde::Serialize;
use std::cell::RefCell;
use std::rc::Rc;
use wasm_bindgen::prelude::*;

pub mod active;
pub mod association;
pub mod config;
pub mod console;
pub mod engine;
pub mod entry_index;
pub mod error;
pub mod filter;
pub mod host;
pub mod loader;
pub mod metadata;
pub mod path;
pub mod sets;
pub mod single_flight;
pub mod types;

#[cfg(test)]
mod testing;

pub use config::EngineConfig;
pub use engine::{parse_manifest, Engine};
pub use error::EngineError;
pub use filter::{Clause, Filter, FilterContext, Op};
pub use host::{FetchError, Fetcher, ProgressLookup, RouteSync};
pub use loader::LoadOptions;
pub use path::PathTree;
pub use types::{CollectionRecord, DirListing, Entry, FolderMetadata, Manifest, RecordStatus};

use crate::host::{
    collection_from_hash, BrowserFetcher, BrowserSpawner, HashRoute, JsProgressLookup,
};

// Use thread_local with RefCell for lazy initialization from JS
thread_local! {
    static ENGINE: RefCell<Option<Engine>> = const { RefCell::new(None) };
}

const NOT_INITIALIZED: &str =
    "Engine not initialized. Call init_engine(manifest_json, config_json) first.";

/// Handle to the installed engine; clones share state
fn current() -> Result<Engine, JsError> {
    ENGINE
        .with(|engine| engine.borrow().clone())
        .ok_or_else(|| JsError::new(NOT_INITIALIZED))
}

fn install(engine: Engine) {
    engine.set_route_sync(Some(Rc::new(HashRoute)));
    ENGINE.with(|slot| *slot.borrow_mut() = Some(engine));
}

fn parse_config(config_json: &str) -> Result<EngineConfig, JsError> {
    if config_json.trim().is_empty() {
        return Ok(EngineConfig::default());
    }
    serde_json::from_str(config_json)
        .map_err(|e| JsError::new(&format!("Failed to parse config: {}", e)))
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String, JsError> {
    serde_json::to_string(value).map_err(|e| JsError::new(&format!("Failed to serialize: {}", e)))
}

fn js_error(e: EngineError) -> JsError {
    JsError::new(&e.to_string())
}

/// Route `log` output to the browser console at `level` ("info", "debug", ...)
#[wasm_bindgen]
pub fn set_log_level(level: &str) {
    console::init(level.parse().unwrap_or(log::LevelFilter::Info));
}

/// Initialize the engine from an already-fetched manifest.
/// manifest_json: either an array of paths or `{paths, folderMetadata, hints}`
/// config_json: partial EngineConfig, or an empty string for defaults
#[wasm_bindgen]
pub fn init_engine(manifest_json: &str, config_json: &str) -> Result<(), JsError> {
    let config = parse_config(config_json)?;
    let manifest = parse_manifest(manifest_json)
        .map_err(|e| JsError::new(&format!("Failed to parse manifest: {}", e)))?;
    install(Engine::new(
        manifest,
        config,
        Rc::new(BrowserFetcher),
        Rc::new(BrowserSpawner),
    ));
    Ok(())
}

/// Fetch the manifest named by the config, then initialize
#[wasm_bindgen]
pub async fn bootstrap_engine(config_json: String) -> Result<(), JsError> {
    let config = parse_config(&config_json)?;
    let engine = Engine::bootstrap(config, Rc::new(BrowserFetcher), Rc::new(BrowserSpawner))
        .await
        .map_err(js_error)?;
    install(engine);
    Ok(())
}

/// Check if the engine has been initialized
#[wasm_bindgen]
pub fn is_engine_ready() -> bool {
    ENGINE.with(|engine| engine.borrow().is_some())
}

/// Every loaded record as a JSON array
#[wasm_bindgen]
pub fn get_collections() -> Result<String, JsError> {
    let records = current()?.collections();
    let records: Vec<&CollectionRecord> = records.iter().map(|r| &**r).collect();
    to_json(&records)
}

/// One loaded record as JSON, `null` when not loaded
#[wasm_bindgen]
pub fn get_collection(key: &str) -> Result<String, JsError> {
    let record = current()?.collection(key);
    to_json(&record.as_deref())
}

/// Directory listing of `folder` as JSON `{folders, files}`
#[wasm_bindgen]
pub fn list_collection_dir(folder: &str) -> Result<String, JsError> {
    to_json(&current()?.list_collection_dir(folder))
}

#[wasm_bindgen]
pub fn get_active_collection() -> Result<Option<String>, JsError> {
    Ok(current()?.active_collection())
}

#[wasm_bindgen]
pub fn set_active_collection(id: Option<String>) -> Result<(), JsError> {
    current()?.set_active_collection(id.as_deref());
    Ok(())
}

/// Load a collection and make it active; resolves to the record JSON
#[wasm_bindgen]
pub async fn activate_collection(key: String) -> Result<String, JsError> {
    let record = current()?.activate_collection(&key).await.map_err(js_error)?;
    to_json(&*record)
}

/// Activate the collection named in `location.hash`, if any.
/// Resolves to the activated key.
#[wasm_bindgen]
pub async fn restore_route() -> Result<Option<String>, JsError> {
    let engine = current()?;
    let hash = web_sys::window()
        .and_then(|window| window.location().hash().ok())
        .unwrap_or_default();
    let id = match collection_from_hash(&hash) {
        Some(encoded) => js_sys::decode_uri_component(encoded)
            .map(String::from)
            .map_err(|_| JsError::new("Malformed collection route"))?,
        None => return Ok(None),
    };
    let record = engine
        .restore_from_route(Some(&id))
        .await
        .map_err(js_error)?;
    Ok(record.map(|r| r.key.clone()))
}

#[wasm_bindgen]
pub async fn load_collection(key: String) -> Result<String, JsError> {
    let record = current()?.load_collection(&key).await.map_err(js_error)?;
    to_json(&*record)
}

#[wasm_bindgen]
pub async fn reload_collection(key: String) -> Result<String, JsError> {
    let record = current()?.reload_collection(&key).await.map_err(js_error)?;
    to_json(&*record)
}

/// Register a virtual collection; resolves to its (possibly pending) record
#[wasm_bindgen]
pub async fn resolve_collection_set(
    folder: String,
    set_id: String,
) -> Result<String, JsError> {
    let record = current()?
        .resolve_collection_set(&folder, &set_id)
        .await
        .map_err(js_error)?;
    to_json(&*record)
}

/// Inherited metadata of a collection key or folder as JSON, `null` if none
#[wasm_bindgen]
pub async fn get_folder_metadata(key_or_folder: String) -> Result<String, JsError> {
    let metadata = current()?.inherited_metadata(&key_or_folder).await;
    to_json(&metadata)
}

/// Best entry for `term` among collections under `folder`, as JSON or `null`
#[wasm_bindgen]
pub fn lookup_entry(folder: &str, term: &str) -> Result<String, JsError> {
    to_json(&current()?.lookup_entry(folder, term))
}

#[wasm_bindgen]
pub async fn ensure_association(folder: String, force: bool) -> Result<(), JsError> {
    current()?.ensure_association(&folder, force).await;
    Ok(())
}

/// Call `callback()` whenever engine state changes
#[wasm_bindgen]
pub fn on_change(callback: js_sys::Function) -> Result<(), JsError> {
    current()?.subscribe(move || {
        if let Err(e) = callback.call0(&JsValue::NULL) {
            log::warn!("change listener threw: {:?}", e);
        }
    });
    Ok(())
}

/// Install `(studyKey) => record | null` as the progress source for filters
#[wasm_bindgen]
pub fn set_progress_lookup(callback: Option<js_sys::Function>) -> Result<(), JsError> {
    let lookup = callback.map(|f| Rc::new(JsProgressLookup::new(f)) as Rc<dyn ProgressLookup>);
    current()?.set_progress_lookup(lookup);
    Ok(())
}
