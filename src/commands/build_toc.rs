use anyhow::Result;

use crate::commands::CommandReport;
use crate::manual::audit;
use crate::manual::paths::resolve_paths;
use crate::manual::toc::create_toc;

pub fn run() -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let mut report = CommandReport::new("build-toc");
    report.detail(format!("manual_home={}", paths.manual_home.display()));
    report.detail(format!("trees_dir={}", paths.trees_dir.display()));

    let built = create_toc(&paths.trees_dir)?;
    report.detail(format!("toc={}", built.path.display()));
    report.detail(format!("entries={}", built.toc.len()));
    if built.toc.is_empty() {
        report.detail("no tree files found; wrote an empty table of contents");
    }
    for name in &built.skipped {
        report.issue(format!("skipped unreadable tree {name}"));
    }

    let status = if report.ok { "ok" } else { "degraded" };
    audit::append_event(
        &paths,
        "build-toc",
        status,
        &format!("entries={} skipped={}", built.toc.len(), built.skipped.len()),
    )?;
    Ok(report)
}
