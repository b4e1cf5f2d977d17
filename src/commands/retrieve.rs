use anyhow::Result;

use crate::commands::CommandReport;
use crate::manual::audit;
use crate::manual::config::load_config;
use crate::manual::llm::resolve_generator;
use crate::manual::paths::resolve_paths;
use crate::manual::retrieval::RetrievalSession;
use crate::manual::store::resolve_store;

#[derive(Debug, Clone)]
pub struct RetrieveOptions {
    pub question: String,
    pub beam_width: Option<usize>,
    pub final_doc_count: Option<usize>,
}

pub fn run(opts: &RetrieveOptions) -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let mut report = CommandReport::new("retrieve");

    let question = opts.question.trim();
    if question.is_empty() {
        report.issue("question must not be empty");
        return Ok(report);
    }

    let cfg = load_config()?;
    let beam_width = opts.beam_width.unwrap_or(cfg.retrieval.beam_width);
    let final_doc_count = opts.final_doc_count.unwrap_or(cfg.retrieval.final_doc_count);
    if beam_width == 0 || final_doc_count == 0 {
        report.issue("beam width and final doc count must be >= 1");
        return Ok(report);
    }

    let store = resolve_store(&paths.trees_dir)?;
    report.detail(format!("store={}", store.describe()));
    let mut session = RetrievalSession::new(store, resolve_generator()?, &cfg);
    report.detail(format!("provider={}", session.provider()));
    report.detail(format!("beam_width={beam_width} final_doc_count={final_doc_count}"));

    let (result, calls) = session.manual_retrieval(question, beam_width, final_doc_count);
    report.detail(format!("llm_calls={calls}"));
    report.detail(format!("trees_loaded={}", session.cached_trees()));
    if result.is_empty() {
        report.issue("retrieval produced no result; is the table of contents built?");
    } else {
        report.output = Some(result);
    }

    let status = if report.ok { "ok" } else { "failed" };
    audit::append_event(&paths, "retrieve", status, &format!("llm_calls={calls}"))?;
    Ok(report)
}
