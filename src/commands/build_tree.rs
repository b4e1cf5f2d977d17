use anyhow::{Context, Result};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::commands::CommandReport;
use crate::manual::audit;
use crate::manual::config::load_config;
use crate::manual::llm::{RetryingGenerator, resolve_generator};
use crate::manual::paths::{ManualPaths, resolve_paths};
use crate::manual::store::LocalTreeStore;
use crate::manual::summarize::{Summarizer, non_blank_chunks};
use crate::manual::toc::create_toc;
use crate::manual::tree::build_balanced_tree;
use crate::manual::util::file_hash;

#[derive(Debug, Clone)]
pub struct BuildTreeOptions {
    pub chunks: PathBuf,
    pub name: Option<String>,
    pub branch_factor: Option<usize>,
    pub skip_toc: bool,
    pub dry_run: bool,
}

/// A bare file name that is not found as given is looked up in the chunks dir.
fn resolve_chunks_path(paths: &ManualPaths, given: &Path) -> PathBuf {
    if given.exists() || given.is_absolute() {
        return given.to_path_buf();
    }
    let candidate = paths.chunks_dir.join(given);
    if candidate.exists() {
        candidate
    } else {
        given.to_path_buf()
    }
}

fn parse_chunks(raw: &str) -> std::result::Result<Vec<String>, String> {
    let value: Value = serde_json::from_str(raw).map_err(|err| format!("invalid json: {err}"))?;
    let Value::Array(items) = value else {
        return Err("chunks file must hold a JSON list of strings".to_string());
    };
    items
        .into_iter()
        .enumerate()
        .map(|(idx, item)| match item {
            Value::String(text) => Ok(text),
            _ => Err(format!("chunk {idx} is not a string")),
        })
        .collect()
}

fn tree_file_name(opts: &BuildTreeOptions, chunks_path: &Path) -> String {
    let base = opts.name.clone().unwrap_or_else(|| {
        chunks_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("tree")
            .to_string()
    });
    if base.ends_with(".json") {
        base
    } else {
        format!("{base}.json")
    }
}

pub fn run(opts: &BuildTreeOptions) -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let cfg = load_config()?;
    let mut report = CommandReport::new("build-tree");

    let chunks_path = resolve_chunks_path(&paths, &opts.chunks);
    report.detail(format!("chunks={}", chunks_path.display()));
    if !chunks_path.exists() {
        report.issue("chunks file does not exist");
        return Ok(report);
    }
    report.detail(format!("source_sha256={}", file_hash(&chunks_path)?));

    let raw = fs::read_to_string(&chunks_path)
        .with_context(|| format!("failed to read {}", chunks_path.display()))?;
    let chunks = match parse_chunks(&raw) {
        Ok(chunks) => non_blank_chunks(chunks),
        Err(reason) => {
            report.issue(reason);
            return Ok(report);
        }
    };
    if chunks.is_empty() {
        report.issue("chunks file holds no non-blank chunk");
        return Ok(report);
    }
    report.detail(format!("leaves={}", chunks.len()));

    let branch_factor = opts.branch_factor.unwrap_or(cfg.build.branch_factor);
    if branch_factor < 2 {
        report.issue(format!("branch factor must be >= 2, got {branch_factor}"));
        return Ok(report);
    }
    report.detail(format!("branch_factor={branch_factor}"));

    let file_name = tree_file_name(opts, &chunks_path);
    if file_name.contains("table_of_contents") {
        report.issue(format!("tree name {file_name} collides with the table of contents"));
        return Ok(report);
    }
    let store = LocalTreeStore::new(&paths.trees_dir);
    match store.tree_path(&file_name) {
        Ok(path) => report.detail(format!("tree={}", path.display())),
        Err(err) => {
            report.issue(err.to_string());
            return Ok(report);
        }
    }

    if opts.dry_run {
        report.detail("dry-run: summarization and tree write skipped");
        return Ok(report);
    }

    let llm = RetryingGenerator::new(
        resolve_generator()?,
        Duration::from_millis(cfg.retrieval.retry_delay_ms),
    );
    let mut summarizer = Summarizer::new(llm, cfg.llm.temperature);
    report.detail(format!("provider={}", summarizer.provider()));
    let leaves = summarizer.leaf_nodes(&chunks);
    let tree = build_balanced_tree(leaves, branch_factor, &mut |text: &str| {
        summarizer.summarize(text)
    })?;
    report.detail(format!("tree_leaves={}", tree.leaf_contents().len()));
    report.detail(format!("depth={}", tree.depth()));
    report.detail(format!("internal_nodes={}", tree.internal_count()));
    report.detail(format!("summary_calls={}", summarizer.calls()));

    store.write_tree(&file_name, &tree)?;

    if opts.skip_toc {
        report.detail("toc refresh skipped");
    } else {
        let built = create_toc(&paths.trees_dir)?;
        report.detail(format!("toc={} entries={}", built.path.display(), built.toc.len()));
        for name in &built.skipped {
            report.issue(format!("toc skipped unreadable tree {name}"));
        }
    }

    let status = if report.ok { "ok" } else { "degraded" };
    audit::append_event(
        &paths,
        "build-tree",
        status,
        &format!(
            "tree={file_name} leaves={} summary_calls={}",
            chunks.len(),
            summarizer.calls()
        ),
    )?;
    Ok(report)
}
