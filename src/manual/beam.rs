//! LLM-guided beam search over one or more summary trees.
//!
//! Each round pools the children of every internal node on the frontier,
//! across all trees, and asks the model to keep a bounded number of them.
//! Leaves already on the frontier are carried forward untouched. The search
//! ends once the frontier holds no internal node, which takes at most as
//! many rounds as the deepest tree has levels.

use crate::manual::literal::parse_index_list;
use crate::manual::llm::{ChatMessage, RetryingGenerator};
use crate::manual::tree::Node;
use crate::manual::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievedDocument {
    pub source_id: String,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct BeamParams {
    pub beam_width: usize,
    pub final_doc_count: usize,
    pub selection_delay: Duration,
    pub temperature: f32,
}

#[derive(Debug, Clone, Copy)]
struct Candidate<'a> {
    source_id: &'a str,
    node: &'a Node,
}

pub fn candidate_selection_messages(question: &str, keys: &[&str], count: usize) -> Vec<ChatMessage> {
    let example = (1..=count)
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    let system = format!(
        "You are an expert at relevant document selection. Select the top {count} most \
         relevant document keys for answering the student question. Output ONLY a list of the \
         keys as natural numbers, like this: [{example}]"
    );
    let listing = keys
        .iter()
        .enumerate()
        .map(|(i, key)| format!("{}: {}", i + 1, key.replace('\n', " ")))
        .collect::<Vec<_>>()
        .join("\n");
    let user = format!("Student question:\n\"{question}\"\n\nCandidate document keys:\n{listing}");
    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

/// Map a reply onto zero-based pool positions: 1-based, in range, first
/// occurrence only, at most `count`. Anything unusable falls back to the
/// first `count` positions.
pub fn select_positions(reply: &str, pool_len: usize, count: usize) -> Vec<usize> {
    let fallback = || (0..count.min(pool_len)).collect::<Vec<_>>();
    let parsed = match parse_index_list(reply) {
        Ok(indices) => indices,
        Err(err) => {
            warn::emit(
                "W030",
                "beam",
                "fallback",
                "selection",
                &format!("top-{count}"),
                &err.to_string(),
            );
            return fallback();
        }
    };

    let mut seen = BTreeSet::new();
    let picked: Vec<usize> = parsed
        .into_iter()
        .filter(|idx| (1..=pool_len).contains(idx))
        .filter(|idx| seen.insert(*idx))
        .take(count)
        .map(|idx| idx - 1)
        .collect();
    if picked.is_empty() {
        warn::emit(
            "W031",
            "beam",
            "fallback",
            "selection",
            &format!("top-{count}"),
            "no usable index in reply",
        );
        return fallback();
    }
    picked
}

pub fn beam_search(
    llm: &mut RetryingGenerator,
    question: &str,
    trees: &[(String, Arc<Node>)],
    params: &BeamParams,
) -> Vec<RetrievedDocument> {
    let mut frontier: Vec<Candidate<'_>> = trees
        .iter()
        .map(|(source_id, node)| Candidate {
            source_id: source_id.as_str(),
            node: node.as_ref(),
        })
        .collect();

    loop {
        let (expandable, terminals): (Vec<Candidate<'_>>, Vec<Candidate<'_>>) =
            frontier.iter().copied().partition(|c| !c.node.is_leaf());
        if expandable.is_empty() {
            break;
        }

        let pool: Vec<Candidate<'_>> = expandable
            .iter()
            .flat_map(|parent| {
                parent.node.children().iter().map(move |child| Candidate {
                    source_id: parent.source_id,
                    node: child,
                })
            })
            .collect();
        if pool.is_empty() {
            // only childless internal nodes were left to expand
            frontier = terminals;
            break;
        }

        let count = if pool.iter().all(|c| c.node.is_leaf()) {
            params.final_doc_count
        } else {
            params.beam_width
        };
        let keys: Vec<&str> = pool.iter().map(|c| c.node.summary()).collect();

        thread::sleep(params.selection_delay);
        let reply = llm.generate(
            &candidate_selection_messages(question, &keys, count),
            params.temperature,
        );
        let picked = select_positions(&reply, pool.len(), count);

        frontier = picked
            .into_iter()
            .map(|pos| pool[pos])
            .chain(terminals)
            .collect();
    }

    frontier
        .into_iter()
        .filter_map(|c| match c.node {
            Node::Leaf { content, .. } => Some(RetrievedDocument {
                source_id: c.source_id.to_string(),
                text: content.clone(),
            }),
            Node::Internal { .. } => None,
        })
        .collect()
}
