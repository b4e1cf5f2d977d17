//! Summary trees: the in-memory node type, its persisted single-key JSON
//! shape, and the balanced bottom-up builder.
//!
//! On disk every node is an object with exactly one key, its summary. A leaf
//! maps that key to the original chunk text; an internal node maps it to an
//! object holding its children, each of which follows the same shape when
//! the child entries are read back one key at a time.

use crate::error::TreeError;
use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;

/// A chunk paired with its generated summary, before any grouping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafNode {
    pub summary: String,
    pub content: String,
}

impl LeafNode {
    pub fn new(summary: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Leaf { summary: String, content: String },
    Internal { summary: String, children: Vec<Node> },
}

impl Node {
    pub fn summary(&self) -> &str {
        match self {
            Node::Leaf { summary, .. } | Node::Internal { summary, .. } => summary,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf { .. })
    }

    pub fn children(&self) -> &[Node] {
        match self {
            Node::Leaf { .. } => &[],
            Node::Internal { children, .. } => children,
        }
    }

    /// Number of edges on the longest root-to-leaf path.
    pub fn depth(&self) -> usize {
        match self {
            Node::Leaf { .. } => 0,
            Node::Internal { children, .. } => {
                1 + children.iter().map(Node::depth).max().unwrap_or(0)
            }
        }
    }

    pub fn leaf_contents(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Node::Leaf { content, .. } => out.push(content),
            Node::Internal { children, .. } => {
                for child in children {
                    child.collect_leaves(out);
                }
            }
        }
    }

    pub fn internal_count(&self) -> usize {
        match self {
            Node::Leaf { .. } => 0,
            Node::Internal { children, .. } => {
                1 + children.iter().map(Node::internal_count).sum::<usize>()
            }
        }
    }

    pub fn from_json_str(raw: &str) -> Result<Node, TreeError> {
        serde_json::from_str(raw).map_err(|err| TreeError::Malformed(err.to_string()))
    }
}

/// Value side of a `summary -> value` entry.
struct NodeBody<'a>(&'a Node);

impl Serialize for NodeBody<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            Node::Leaf { content, .. } => serializer.serialize_str(content),
            Node::Internal { children, .. } => {
                let mut map = serializer.serialize_map(Some(children.len()))?;
                for child in children {
                    map.serialize_entry(child.summary(), &NodeBody(child))?;
                }
                map.end()
            }
        }
    }
}

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(self.summary(), &NodeBody(self))?;
        map.end()
    }
}

enum OwnedBody {
    Content(String),
    Children(Vec<(String, OwnedBody)>),
}

impl OwnedBody {
    fn into_node(self, summary: String) -> Node {
        match self {
            OwnedBody::Content(content) => Node::Leaf { summary, content },
            OwnedBody::Children(entries) => Node::Internal {
                summary,
                children: entries
                    .into_iter()
                    .map(|(key, body)| body.into_node(key))
                    .collect(),
            },
        }
    }
}

struct BodyVisitor;

impl<'de> Visitor<'de> for BodyVisitor {
    type Value = OwnedBody;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a content string or an object of child summaries")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<OwnedBody, E> {
        Ok(OwnedBody::Content(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<OwnedBody, E> {
        Ok(OwnedBody::Content(v))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<OwnedBody, A::Error> {
        let mut entries = Vec::new();
        while let Some((key, body)) = access.next_entry::<String, OwnedBody>()? {
            entries.push((key, body));
        }
        Ok(OwnedBody::Children(entries))
    }
}

impl<'de> Deserialize<'de> for OwnedBody {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(BodyVisitor)
    }
}

struct NodeVisitor;

impl<'de> Visitor<'de> for NodeVisitor {
    type Value = Node;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an object with exactly one summary key")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Node, A::Error> {
        let Some((summary, body)) = access.next_entry::<String, OwnedBody>()? else {
            return Err(de::Error::invalid_length(0, &self));
        };
        if access.next_key::<de::IgnoredAny>()?.is_some() {
            return Err(de::Error::invalid_length(2, &self));
        }
        Ok(body.into_node(summary))
    }
}

impl<'de> Deserialize<'de> for Node {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(NodeVisitor)
    }
}

/// Renames later duplicates within one sibling group (`x`, `x (2)`, `x (3)`)
/// so every child key survives the JSON object encoding.
fn dedupe_sibling_summaries(children: &mut [Node]) {
    let mut seen: HashMap<String, usize> = HashMap::new();
    for child in children.iter_mut() {
        let base = child.summary().to_string();
        let count = seen.entry(base.clone()).or_insert(0);
        *count += 1;
        if *count == 1 {
            continue;
        }
        let mut suffix = *count;
        let mut candidate = format!("{base} ({suffix})");
        while seen.contains_key(&candidate) {
            suffix += 1;
            candidate = format!("{base} ({suffix})");
        }
        seen.insert(candidate.clone(), 1);
        match child {
            Node::Leaf { summary, .. } | Node::Internal { summary, .. } => *summary = candidate,
        }
    }
}

fn combine<F>(mut children: Vec<Node>, summarize: &mut F) -> Node
where
    F: FnMut(&str) -> String,
{
    let combined_text = children
        .iter()
        .map(Node::summary)
        .collect::<Vec<_>>()
        .join("\n\n");
    let summary = summarize(&combined_text);
    dedupe_sibling_summaries(&mut children);
    Node::Internal { summary, children }
}

/// Split `len` items into `groups` contiguous ranges whose sizes differ by at
/// most one, larger ranges first.
pub fn partition_sizes(len: usize, groups: usize) -> Vec<usize> {
    let base = len / groups;
    let remainder = len % groups;
    (0..groups)
        .map(|i| base + usize::from(i < remainder))
        .collect()
}

/// Build a balanced summary tree over `nodes`, calling `summarize` exactly
/// once per internal node with the `\n\n`-joined summaries of its children.
pub fn build_balanced_tree<F>(
    nodes: Vec<LeafNode>,
    branch_factor: usize,
    summarize: &mut F,
) -> Result<Node, TreeError>
where
    F: FnMut(&str) -> String,
{
    if branch_factor < 2 {
        return Err(TreeError::BranchFactor(branch_factor));
    }
    if nodes.is_empty() {
        return Err(TreeError::EmptyInput);
    }
    Ok(build_level(nodes, branch_factor, summarize))
}

fn build_level<F>(mut nodes: Vec<LeafNode>, branch_factor: usize, summarize: &mut F) -> Node
where
    F: FnMut(&str) -> String,
{
    if nodes.len() == 1 {
        let leaf = nodes.remove(0);
        return Node::Leaf {
            summary: leaf.summary,
            content: leaf.content,
        };
    }

    if nodes.len() <= branch_factor {
        let children = nodes
            .into_iter()
            .map(|leaf| Node::Leaf {
                summary: leaf.summary,
                content: leaf.content,
            })
            .collect();
        return combine(children, summarize);
    }

    let sizes = partition_sizes(nodes.len(), branch_factor);
    let mut rest = nodes.into_iter();
    let mut subtrees = Vec::with_capacity(branch_factor);
    for size in sizes {
        let group: Vec<LeafNode> = rest.by_ref().take(size).collect();
        subtrees.push(build_level(group, branch_factor, summarize));
    }
    combine(subtrees, summarize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn leaves(n: usize) -> Vec<LeafNode> {
        (1..=n)
            .map(|i| LeafNode::new(format!("s{i}"), format!("c{i}")))
            .collect()
    }

    fn counting_summarizer(calls: &mut usize) -> impl FnMut(&str) -> String + '_ {
        move |text: &str| {
            *calls += 1;
            format!("sum#{}[{}]", calls, text.replace("\n\n", "|"))
        }
    }

    fn assert_single_key(value: &Value) {
        let obj = value.as_object().expect("node must be an object");
        assert_eq!(obj.len(), 1, "node must have exactly one key: {value}");
    }

    fn ceil_log(n: usize, b: usize) -> usize {
        let mut depth = 0;
        let mut reach = 1;
        while reach < n {
            reach *= b;
            depth += 1;
        }
        depth
    }

    #[test]
    fn single_leaf_needs_no_summary_call() {
        let mut calls = 0;
        let tree = build_balanced_tree(leaves(1), 3, &mut counting_summarizer(&mut calls))
            .expect("build");
        assert_eq!(calls, 0);
        assert_eq!(serde_json::to_value(&tree).expect("json"), json!({"s1": "c1"}));
    }

    #[test]
    fn rejects_empty_input_and_small_branch_factor() {
        let mut summarize = |_: &str| String::new();
        assert_eq!(
            build_balanced_tree(Vec::new(), 2, &mut summarize),
            Err(TreeError::EmptyInput)
        );
        assert_eq!(
            build_balanced_tree(leaves(2), 1, &mut summarize),
            Err(TreeError::BranchFactor(1))
        );
    }

    #[test]
    fn four_leaves_with_branch_two_form_two_pairs_under_one_root() {
        let mut calls = 0;
        let tree = build_balanced_tree(leaves(4), 2, &mut counting_summarizer(&mut calls))
            .expect("build");
        assert_eq!(calls, 3);

        let value = serde_json::to_value(&tree).expect("json");
        assert_eq!(
            value,
            json!({
                "sum#3[sum#1[s1|s2]|sum#2[s3|s4]]": {
                    "sum#1[s1|s2]": {"s1": "c1", "s2": "c2"},
                    "sum#2[s3|s4]": {"s3": "c3", "s4": "c4"}
                }
            })
        );
    }

    #[test]
    fn partition_sizes_front_load_the_remainder() {
        assert_eq!(partition_sizes(7, 3), vec![3, 2, 2]);
        assert_eq!(partition_sizes(6, 3), vec![2, 2, 2]);
        assert_eq!(partition_sizes(4, 3), vec![2, 1, 1]);
    }

    #[test]
    fn every_subtree_is_single_keyed_and_leaves_are_preserved() {
        for branch_factor in 2..=5 {
            for n in 1..=40 {
                let mut summarize = |text: &str| format!("p:{}", text.len());
                let tree = build_balanced_tree(leaves(n), branch_factor, &mut summarize)
                    .expect("build");

                let contents = tree.leaf_contents();
                assert_eq!(contents.len(), n);
                for i in 1..=n {
                    assert!(contents.contains(&format!("c{i}").as_str()));
                }

                let depth = tree.depth();
                let bound = ceil_log(n, branch_factor);
                assert!(
                    depth <= bound + 1 && depth + 1 >= bound,
                    "n={n} b={branch_factor} depth={depth} bound={bound}"
                );

                let raw = serde_json::to_string(&tree).expect("json");
                assert_eq!(Node::from_json_str(&raw).expect("reload"), tree);
                let mut stack = vec![serde_json::from_str::<Value>(&raw).expect("value")];
                while let Some(value) = stack.pop() {
                    assert_single_key(&value);
                    let (_, body) = value.as_object().and_then(|o| o.iter().next()).expect("entry");
                    if let Some(children) = body.as_object() {
                        for (k, v) in children {
                            let mut entry = serde_json::Map::new();
                            entry.insert(k.clone(), v.clone());
                            stack.push(Value::Object(entry));
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn internal_node_count_matches_summary_calls() {
        let mut calls = 0;
        let tree = build_balanced_tree(leaves(10), 3, &mut counting_summarizer(&mut calls))
            .expect("build");
        assert_eq!(tree.internal_count(), calls);
    }

    #[test]
    fn duplicate_sibling_summaries_are_suffixed_not_overwritten() {
        let nodes = vec![
            LeafNode::new("same", "a"),
            LeafNode::new("same", "b"),
            LeafNode::new("same (2)", "c"),
        ];
        let mut summarize = |_: &str| "root".to_string();
        let tree = build_balanced_tree(nodes, 3, &mut summarize).expect("build");
        let keys: Vec<&str> = tree.children().iter().map(Node::summary).collect();
        assert_eq!(keys, vec!["same", "same (2)", "same (2) (2)"]);

        let value = serde_json::to_value(&tree).expect("json");
        assert_eq!(value["root"].as_object().expect("children").len(), 3);
        assert_eq!(tree.leaf_contents(), vec!["a", "b", "c"]);
    }

    #[test]
    fn deserialize_preserves_sibling_order_and_rejects_multi_key_roots() {
        let raw = r#"{"root": {"zeta": "z", "alpha": {"inner": "i"}}}"#;
        let tree = Node::from_json_str(raw).expect("parse");
        let keys: Vec<&str> = tree.children().iter().map(Node::summary).collect();
        assert_eq!(keys, vec!["zeta", "alpha"]);
        assert_eq!(tree.depth(), 2);

        assert!(Node::from_json_str(r#"{"a": "x", "b": "y"}"#).is_err());
        assert!(Node::from_json_str(r#"{}"#).is_err());
        assert!(Node::from_json_str(r#"["a"]"#).is_err());
    }
}
