use crate::manual::beam::{BeamParams, RetrievedDocument, beam_search};
use crate::manual::config::ManualConfig;
use crate::manual::llm::{Generator, RetryingGenerator};
use crate::manual::select::get_relevant_files;
use crate::manual::store::TreeStore;
use crate::manual::tree::Node;
use crate::manual::warn;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub const RESULT_HEADER: &str = "Retrieved assignment documents";

/// Per-process retrieval state: the tree cache and the generation call
/// counter. Cached trees are never invalidated; build a new session to pick
/// up rewritten tree files.
pub struct RetrievalSession {
    store: Box<dyn TreeStore>,
    llm: RetryingGenerator,
    cache: HashMap<String, Arc<Node>>,
    selection_delay: Duration,
    temperature: f32,
}

impl RetrievalSession {
    pub fn new(store: Box<dyn TreeStore>, generator: Box<dyn Generator>, config: &ManualConfig) -> Self {
        Self {
            store,
            llm: RetryingGenerator::new(
                generator,
                Duration::from_millis(config.retrieval.retry_delay_ms),
            ),
            cache: HashMap::new(),
            selection_delay: Duration::from_millis(config.retrieval.selection_delay_ms),
            temperature: config.llm.temperature,
        }
    }

    pub fn provider(&self) -> &str {
        self.llm.label()
    }

    pub fn cached_trees(&self) -> usize {
        self.cache.len()
    }

    fn load_trees(&mut self, file_names: &[String]) -> Vec<(String, Arc<Node>)> {
        let mut out = Vec::with_capacity(file_names.len());
        for file_name in file_names {
            if let Some(tree) = self.cache.get(file_name) {
                out.push((file_name.clone(), Arc::clone(tree)));
                continue;
            }
            match self.store.load_tree(file_name) {
                Ok(tree) => {
                    let tree = Arc::new(tree);
                    self.cache.insert(file_name.clone(), Arc::clone(&tree));
                    out.push((file_name.clone(), tree));
                }
                Err(err) => warn::emit(
                    "W040",
                    "load",
                    "skip",
                    file_name,
                    &format!("unreadable tree in {}", self.store.describe()),
                    &format!("{err:#}"),
                ),
            }
        }
        out
    }

    /// Beam search over the named trees. Trees that cannot be loaded are
    /// skipped; with none left the result is empty.
    pub fn beam_search_across_trees(
        &mut self,
        question: &str,
        file_names: &[String],
        beam_width: usize,
        final_doc_count: usize,
    ) -> Vec<RetrievedDocument> {
        let trees = self.load_trees(file_names);
        if trees.is_empty() {
            return Vec::new();
        }
        let params = BeamParams {
            beam_width,
            final_doc_count,
            selection_delay: self.selection_delay,
            temperature: self.temperature,
        };
        beam_search(&mut self.llm, question, &trees, &params)
    }

    /// Answer `question` end to end. Returns the formatted documents and the
    /// number of generation calls made by this call. Never fails: a missing
    /// table of contents yields an empty string and zero calls.
    pub fn manual_retrieval(
        &mut self,
        question: &str,
        beam_width: usize,
        final_doc_count: usize,
    ) -> (String, usize) {
        self.llm.reset_calls();

        let toc = match self.store.load_toc() {
            Ok(toc) => toc,
            Err(err) => {
                warn::emit(
                    "W041",
                    "retrieve",
                    "abort",
                    &self.store.describe(),
                    "table of contents unavailable",
                    &format!("{err:#}"),
                );
                return (String::new(), 0);
            }
        };

        let files = get_relevant_files(&mut self.llm, question, &toc, self.temperature);
        let docs = self.beam_search_across_trees(question, &files, beam_width, final_doc_count);
        (format_documents(&docs), self.llm.calls())
    }
}

pub fn format_documents(docs: &[RetrievedDocument]) -> String {
    let body = serde_json::to_string_pretty(docs).unwrap_or_else(|_| "[]".to_string());
    format!("{RESULT_HEADER}\n{}\n{body}", "=".repeat(42))
}
