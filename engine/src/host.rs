use async_trait::async_trait;
use futures::task::{LocalFutureObj, LocalSpawn, SpawnError};
use serde_json::Value;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;

/// Failure of a single fetch
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("Network failure for {url}: {message}")]
    Network { url: String, message: String },
}

/// Retrieves documents by URL
#[async_trait(?Send)]
pub trait Fetcher {
    async fn fetch_text(&self, url: &str) -> Result<String, FetchError>;
}

/// Mirrors the active collection id into a shareable route
pub trait RouteSync {
    fn sync_collection(&self, id: Option<&str>);
}

/// Host-owned per-entry study progress, read by filter predicates
pub trait ProgressLookup {
    fn lookup_progress(&self, study_key: &str) -> Option<Value>;
}

impl<F> ProgressLookup for F
where
    F: Fn(&str) -> Option<Value>,
{
    fn lookup_progress(&self, study_key: &str) -> Option<Value> {
        self(study_key)
    }
}

fn js_message(value: &JsValue) -> String {
    value
        .as_string()
        .or_else(|| {
            value
                .dyn_ref::<js_sys::Error>()
                .map(|e| String::from(e.message()))
        })
        .unwrap_or_else(|| format!("{:?}", value))
}

/// `window.fetch`-backed fetcher for the browser build
pub struct BrowserFetcher;

#[async_trait(?Send)]
impl Fetcher for BrowserFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        let network = |e: JsValue| FetchError::Network {
            url: url.to_string(),
            message: js_message(&e),
        };
        let window = web_sys::window().ok_or_else(|| FetchError::Network {
            url: url.to_string(),
            message: "no window".to_string(),
        })?;
        let response: web_sys::Response = JsFuture::from(window.fetch_with_str(url))
            .await
            .map_err(network)?
            .dyn_into()
            .map_err(network)?;
        if !response.ok() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status(),
            });
        }
        let text = JsFuture::from(response.text().map_err(network)?)
            .await
            .map_err(network)?;
        text.as_string().ok_or_else(|| FetchError::Network {
            url: url.to_string(),
            message: "response body is not text".to_string(),
        })
    }
}

/// Runs background tasks on the browser event loop
pub struct BrowserSpawner;

impl LocalSpawn for BrowserSpawner {
    fn spawn_local_obj(&self, future: LocalFutureObj<'static, ()>) -> Result<(), SpawnError> {
        wasm_bindgen_futures::spawn_local(future);
        Ok(())
    }
}

/// Writes `#collection=<id>` into `location.hash`
pub struct HashRoute;

impl RouteSync for HashRoute {
    fn sync_collection(&self, id: Option<&str>) {
        let Some(window) = web_sys::window() else {
            return;
        };
        let hash = match id {
            Some(id) => format!(
                "collection={}",
                String::from(js_sys::encode_uri_component(id))
            ),
            None => String::new(),
        };
        if let Err(e) = window.location().set_hash(&hash) {
            log::warn!("failed to sync route: {}", js_message(&e));
        }
    }
}

/// Collection id carried by a `#collection=<id>` route, still URI-encoded
pub fn collection_from_hash(hash: &str) -> Option<&str> {
    hash.trim_start_matches('#')
        .split('&')
        .find_map(|part| part.strip_prefix("collection="))
        .filter(|id| !id.is_empty())
}

/// Progress lookup backed by a JS callback `(studyKey) => record | null`
pub struct JsProgressLookup {
    callback: js_sys::Function,
}

impl JsProgressLookup {
    pub fn new(callback: js_sys::Function) -> Self {
        JsProgressLookup { callback }
    }
}

impl ProgressLookup for JsProgressLookup {
    fn lookup_progress(&self, study_key: &str) -> Option<Value> {
        let result = self
            .callback
            .call1(&JsValue::NULL, &JsValue::from_str(study_key))
            .ok()?;
        if result.is_null() || result.is_undefined() {
            return None;
        }
        let json = js_sys::JSON::stringify(&result).ok()?.as_string()?;
        serde_json::from_str(&json).ok()
    }
}

/// HTTP fetcher for native hosts; must be polled inside a tokio runtime
#[cfg(feature = "native")]
pub struct HttpFetcher {
    client: reqwest::Client,
}

#[cfg(feature = "native")]
impl HttpFetcher {
    pub fn new() -> Self {
        HttpFetcher {
            client: reqwest::Client::new(),
        }
    }
}

#[cfg(feature = "native")]
impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "native")]
#[async_trait(?Send)]
impl Fetcher for HttpFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        let network = |e: reqwest::Error| FetchError::Network {
            url: url.to_string(),
            message: e.to_string(),
        };
        let response = self.client.get(url).send().await.map_err(network)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        response.text().await.map_err(network)
    }
}
