use crate::engine::Engine;
use crate::path::{is_under, join, normalize_path};
use crate::types::Sentence;
use std::collections::{HashMap, HashSet};

/// Reference key -> sentences naming it, for one top-level folder.
/// Append-only; a `(ref, source)` pair is only ever recorded once.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SentenceRefIndex {
    refs: HashMap<String, Vec<Sentence>>,
    seen: HashSet<(String, String)>,
}

impl SentenceRefIndex {
    /// Record `sentence` under `ref_key` unless that pair is already known
    pub fn insert(&mut self, ref_key: &str, sentence: &Sentence) -> bool {
        if !self
            .seen
            .insert((ref_key.to_string(), sentence.dedup_key()))
        {
            return false;
        }
        self.refs
            .entry(ref_key.to_string())
            .or_default()
            .push(sentence.clone());
        true
    }

    pub fn sentences(&self, ref_key: &str) -> Option<&[Sentence]> {
        self.refs.get(ref_key).map(Vec::as_slice)
    }

    /// Number of distinct reference keys
    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }
}

impl Engine {
    /// Link example sentences under `top_folder` to the entries they
    /// reference. Runs at most once per folder unless `force` is set;
    /// concurrent callers share the running build. Never fails: load errors
    /// are logged and skipped.
    pub async fn ensure_association(&self, top_folder: &str, force: bool) {
        let top = normalize_path(top_folder);
        let finalized = self
            .inner
            .state
            .borrow()
            .associations_finalized
            .contains(&top);
        if finalized && !force {
            return;
        }
        let engine = self.clone();
        let flight_top = top.clone();
        self.inner
            .associations
            .run(top, move || async move { engine.build_association(flight_top).await })
            .await
    }

    async fn build_association(&self, top: String) {
        let areas: Vec<String> = self
            .inner
            .config
            .association_areas
            .iter()
            .map(|area| join(&top, area))
            .collect();
        let keys: Vec<String> = self
            .inner
            .tree
            .files_under(&top)
            .filter(|key| areas.iter().any(|area| is_under(key, area)))
            .cloned()
            .collect();
        self.prefetch(keys).await;

        let (documents, added) = {
            let mut guard = self.inner.state.borrow_mut();
            let state = &mut *guard;
            let index = state.sentence_refs.entry(top.clone()).or_default();
            let mut documents = 0;
            let mut added = 0;
            for key in self.inner.tree.files_under(&top) {
                let Some(record) = state.records.get(key) else {
                    continue;
                };
                if record.sentences.is_empty() {
                    continue;
                }
                documents += 1;
                // source ids were assigned when the record was built
                for sentence in &record.sentences {
                    for ref_key in sentence.reference_keys() {
                        if index.insert(&ref_key, sentence) {
                            added += 1;
                        }
                    }
                }
            }
            (documents, added)
        };

        self.invalidate_entry_indices(&top);
        let index = self.entry_index(&top);
        self.inner
            .state
            .borrow_mut()
            .associations_finalized
            .insert(top.clone());
        log::info!(
            "[assoc] folder='{}' documents={} new_refs={} indexed_terms={}",
            top,
            documents,
            added,
            index.len()
        );
        self.notify();
    }

    /// Sentences referencing `ref_key` under a top-level folder
    pub fn sentences_for(&self, top_folder: &str, ref_key: &str) -> Vec<Sentence> {
        let top = normalize_path(top_folder);
        let state = self.inner.state.borrow();
        state
            .sentence_refs
            .get(&top)
            .and_then(|index| index.sentences(ref_key))
            .map(<[Sentence]>::to_vec)
            .unwrap_or_default()
    }
}
