use crate::engine::{Engine, State};
use crate::path::{ancestors, is_under, normalize_path, top_folder};
use crate::types::Entry;
use serde_json::Value;
use std::collections::hash_map::Entry as Slot;
use std::collections::HashMap;
use std::rc::Rc;

/// Where an indexed entry lives, and how rich it was when indexed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedEntry {
    pub collection: String,
    pub position: usize,
    pub score: usize,
}

/// Surface form -> best entry for one folder
#[derive(Debug, Default, Clone, PartialEq)]
pub struct EntryIndex {
    terms: HashMap<String, IndexedEntry>,
}

impl EntryIndex {
    /// Offer `candidate` for `term`: a strictly richer entry replaces the
    /// current one, ties keep the first indexed
    pub fn offer(&mut self, term: &str, candidate: IndexedEntry) {
        match self.terms.entry(term.to_string()) {
            Slot::Vacant(slot) => {
                slot.insert(candidate);
            }
            Slot::Occupied(mut slot) => {
                if candidate.score > slot.get().score {
                    slot.insert(candidate);
                }
            }
        }
    }

    pub fn get(&self, term: &str) -> Option<&IndexedEntry> {
        self.terms.get(term)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &IndexedEntry)> {
        self.terms.iter()
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

/// Populated descriptive fields, plus one when sentences are attached
pub fn richness_score(entry: &Entry, descriptive_keys: &[String]) -> usize {
    let populated = descriptive_keys
        .iter()
        .filter(|key| entry.is_populated(key))
        .count();
    populated + usize::from(!entry.sentences.is_empty())
}

/// Values of `keys` usable as index terms
pub fn surface_forms<'a>(entry: &'a Entry, keys: &[String]) -> Vec<&'a str> {
    let mut forms = Vec::new();
    for key in keys {
        match entry.fields.get(key) {
            Some(Value::String(s)) => forms.push(s.as_str()),
            Some(Value::Array(items)) => forms.extend(items.iter().filter_map(Value::as_str)),
            _ => {}
        }
    }
    forms.retain(|form| !form.trim().is_empty());
    forms
}

/// Drop cached indices for `folder` and every folder above it
pub(crate) fn invalidate_covering(state: &mut State, folder: &str) {
    for ancestor in ancestors(folder) {
        state.entry_indices.remove(ancestor);
    }
}

impl Engine {
    /// Surface-form index over every loaded real collection below `folder`,
    /// rebuilt lazily after a load under the folder invalidates it
    pub fn entry_index(&self, folder: &str) -> Rc<EntryIndex> {
        let folder = normalize_path(folder);
        let cached = {
            let state = self.inner.state.borrow();
            state.entry_indices.get(&folder).cloned()
        };
        if let Some(index) = cached {
            return index;
        }
        let index = Rc::new(self.build_entry_index(&folder));
        self.inner
            .state
            .borrow_mut()
            .entry_indices
            .insert(folder, Rc::clone(&index));
        index
    }

    fn build_entry_index(&self, folder: &str) -> EntryIndex {
        let config = &self.inner.config;
        let mut index = EntryIndex::default();
        {
            let state = self.inner.state.borrow();
            for key in self.inner.tree.files_under(folder) {
                let Some(record) = state.records.get(key) else {
                    continue;
                };
                for (position, entry) in record.entries.iter().enumerate() {
                    let score = richness_score(entry, &config.descriptive_keys);
                    for term in surface_forms(entry, &config.surface_keys) {
                        index.offer(
                            term,
                            IndexedEntry {
                                collection: key.clone(),
                                position,
                                score,
                            },
                        );
                    }
                }
            }
        }
        self.attach_indexed_sentences(folder, &index);
        log::debug!("indexed folder '{}' terms={}", folder, index.len());
        index
    }

    /// Copy sentences already known for the folder's top-level area onto
    /// the indexed entries
    fn attach_indexed_sentences(&self, folder: &str, index: &EntryIndex) {
        let top = top_folder(folder);
        let mut guard = self.inner.state.borrow_mut();
        let state = &mut *guard;
        let Some(refs) = state.sentence_refs.get(top) else {
            return;
        };
        for (term, slot) in index.iter() {
            let Some(sentences) = refs.sentences(term) else {
                continue;
            };
            let Some(record) = state.records.get_mut(&slot.collection) else {
                continue;
            };
            let needed = record
                .entries
                .get(slot.position)
                .is_some_and(|entry| entry.lacks_any(sentences));
            if needed {
                let record = Rc::make_mut(record);
                record.entries[slot.position].attach_sentences(sentences);
            }
        }
    }

    /// Best entry for `term` among collections loaded below `folder`
    pub fn lookup_entry(&self, folder: &str, term: &str) -> Option<Entry> {
        let index = self.entry_index(folder);
        let slot = index.get(term)?;
        let state = self.inner.state.borrow();
        state
            .records
            .get(&slot.collection)?
            .entries
            .get(slot.position)
            .cloned()
    }

    /// Drop every cached index at or below `folder`, and those above it
    pub(crate) fn invalidate_entry_indices(&self, folder: &str) {
        let mut state = self.inner.state.borrow_mut();
        state
            .entry_indices
            .retain(|cached, _| cached != folder && !is_under(cached, folder));
        invalidate_covering(&mut state, folder);
    }
}
