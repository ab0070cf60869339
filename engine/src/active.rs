use crate::engine::Engine;
use crate::error::Result;
use crate::path::{normalize_path, parse_virtual_key, top_folder};
use crate::types::CollectionRecord;
use std::rc::Rc;

impl Engine {
    /// Id of the collection the UI is showing
    pub fn active_collection(&self) -> Option<String> {
        self.inner.state.borrow().active.clone()
    }

    /// Set (or clear) the active id, mirror it into the route, and start the
    /// association build for its top-level folder in the background
    pub fn set_active_collection(&self, id: Option<&str>) {
        let id = id.map(normalize_path).filter(|id| !id.is_empty());
        self.inner.state.borrow_mut().active = id.clone();

        let route = self.inner.route.borrow().clone();
        if let Some(route) = route {
            route.sync_collection(id.as_deref());
        }
        if let Some(id) = &id {
            let folder = match parse_virtual_key(id) {
                Some((base, _)) => base,
                None => id.clone(),
            };
            let top = top_folder(&folder).to_string();
            if !top.is_empty() && top != *id {
                let engine = self.clone();
                self.spawn(async move { engine.ensure_association(&top, false).await });
            }
        }
        self.notify();
    }

    /// User-initiated switch: load, then make active. On failure the previous
    /// active collection stays and the error goes back to the caller.
    pub async fn activate_collection(&self, key: &str) -> Result<Rc<CollectionRecord>> {
        let record = self.load_collection(key).await?;
        self.set_active_collection(Some(&record.key));
        Ok(record)
    }

    /// Activate the collection named by the route at startup, if any
    pub async fn restore_from_route(
        &self,
        id: Option<&str>,
    ) -> Result<Option<Rc<CollectionRecord>>> {
        match id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => self.activate_collection(id).await.map(Some),
            None => Ok(None),
        }
    }
}
