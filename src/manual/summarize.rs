use crate::manual::llm::{ChatMessage, RetryingGenerator};
use crate::manual::tree::LeafNode;
use crate::manual::warn;

pub const EMPTY_SUMMARY: &str = "Summary unavailable";

const SUMMARY_PROMPT: &str = "You are an expert at extracting concise summaries and keywords from \
sections of course assignment documents. Extract a summary containing all keywords and key \
concepts from the given text. Name the assignment only if it is obviously present. Always \
extract question numbers together with descriptions of the questions when available, and \
prefer them over anything else when space is limited. Use no more than 6 syntactically \
accurate English sentences. Output only the summary.";

pub fn summary_messages(text: &str) -> Vec<ChatMessage> {
    vec![ChatMessage::system(SUMMARY_PROMPT), ChatMessage::user(text)]
}

/// Summarization used while building trees. Generation failures are retried
/// by the wrapped [`RetryingGenerator`]; an empty reply degrades to
/// [`EMPTY_SUMMARY`].
pub struct Summarizer {
    llm: RetryingGenerator,
    temperature: f32,
}

impl Summarizer {
    pub fn new(llm: RetryingGenerator, temperature: f32) -> Self {
        Self { llm, temperature }
    }

    pub fn provider(&self) -> &str {
        self.llm.label()
    }

    /// Successful generation calls so far.
    pub fn calls(&self) -> usize {
        self.llm.calls()
    }

    pub fn summarize(&mut self, text: &str) -> String {
        let out = self.llm.generate(&summary_messages(text), self.temperature);
        if out.trim().is_empty() {
            warn::emit(
                "W002",
                "summarize",
                "fallback",
                self.llm.label(),
                "empty summary generated",
                "",
            );
            return EMPTY_SUMMARY.to_string();
        }
        out.trim().to_string()
    }

    pub fn leaf_nodes(&mut self, chunks: &[String]) -> Vec<LeafNode> {
        chunks
            .iter()
            .map(|chunk| LeafNode::new(self.summarize(chunk), chunk.clone()))
            .collect()
    }
}

/// Keep only chunks with non-whitespace content, in order.
pub fn non_blank_chunks(chunks: Vec<String>) -> Vec<String> {
    chunks
        .into_iter()
        .filter(|chunk| !chunk.trim().is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manual::mock::ScriptedGenerator;
    use crate::manual::tree::build_balanced_tree;
    use std::time::Duration;

    fn summarizer(generator: &ScriptedGenerator) -> Summarizer {
        Summarizer::new(
            RetryingGenerator::new(Box::new(generator.clone()), Duration::ZERO),
            0.1,
        )
    }

    #[test]
    fn summarize_trims_and_falls_back_on_empty_output() {
        let generator = ScriptedGenerator::new(vec![Ok("  Q1 asks for a mean.  "), Ok("   ")]);
        let mut summarizer = summarizer(&generator);

        assert_eq!(summarizer.summarize("a"), "Q1 asks for a mean.");
        assert_eq!(summarizer.summarize("b"), EMPTY_SUMMARY);
        assert_eq!(summarizer.calls(), 2);
    }

    #[test]
    fn transient_failures_are_retried_instead_of_stored() {
        let generator = ScriptedGenerator::new(vec![
            Ok("s1"),
            Err("429 rate limited"),
            Ok("s2"),
            Ok("root"),
        ]);
        let mut summarizer = summarizer(&generator);

        let leaves = summarizer.leaf_nodes(&["c1".to_string(), "c2".to_string()]);
        let tree = build_balanced_tree(leaves, 2, &mut |text: &str| summarizer.summarize(text))
            .expect("build");

        assert_eq!(
            serde_json::to_value(&tree).expect("json"),
            serde_json::json!({"root": {"s1": "c1", "s2": "c2"}})
        );
        assert_eq!(generator.attempts(), 4);
        assert_eq!(summarizer.calls(), 3);
    }

    #[test]
    fn leaf_nodes_pair_each_chunk_with_its_summary_in_order() {
        let generator = ScriptedGenerator::replies(&["sum one", "sum two"]);
        let mut summarizer = summarizer(&generator);
        let leaves = summarizer.leaf_nodes(&["chunk one".to_string(), "chunk two".to_string()]);
        assert_eq!(
            leaves,
            vec![
                LeafNode::new("sum one", "chunk one"),
                LeafNode::new("sum two", "chunk two"),
            ]
        );

        let prompts = generator.prompts();
        assert_eq!(prompts[0][1].content, "chunk one");
    }

    #[test]
    fn non_blank_chunks_drops_whitespace_only_entries() {
        let chunks = vec!["a".to_string(), "  \n".to_string(), String::new(), "b".to_string()];
        assert_eq!(non_blank_chunks(chunks), vec!["a".to_string(), "b".to_string()]);
    }
}
