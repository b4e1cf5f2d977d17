use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::commands::{self, CommandReport};

#[derive(Debug, Parser)]
#[command(
    name = "manual-retrieval",
    version,
    about = "Summary-tree index and beam-search retrieval over assignment documents"
)]
pub struct Cli {
    /// Print the command report as JSON.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Summarize a chunk list into a balanced tree and refresh the TOC.
    BuildTree {
        #[arg(long)]
        chunks: PathBuf,
        /// Tree file name; defaults to the chunks file name.
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        branch_factor: Option<usize>,
        #[arg(long)]
        skip_toc: bool,
        #[arg(long)]
        dry_run: bool,
    },
    /// Rebuild table_of_contents.json from the trees dir.
    BuildToc,
    /// Answer a question with the documents found by beam search.
    Retrieve {
        #[arg(long)]
        question: String,
        #[arg(long)]
        beam_width: Option<usize>,
        #[arg(long)]
        final_doc_count: Option<usize>,
    },
}

fn render_text(report: &CommandReport) -> String {
    let mut lines = vec![format!(
        "{}: {}",
        report.command,
        if report.ok { "ok" } else { "failed" }
    )];
    lines.extend(report.details.iter().map(|d| format!("  {d}")));
    lines.extend(report.issues.iter().map(|i| format!("  ! {i}")));
    if let Some(output) = &report.output {
        lines.push(String::new());
        lines.push(output.clone());
    }
    lines.join("\n")
}

fn dispatch(command: Command) -> Result<CommandReport> {
    match command {
        Command::BuildTree {
            chunks,
            name,
            branch_factor,
            skip_toc,
            dry_run,
        } => commands::build_tree::run(&commands::build_tree::BuildTreeOptions {
            chunks,
            name,
            branch_factor,
            skip_toc,
            dry_run,
        }),
        Command::BuildToc => commands::build_toc::run(),
        Command::Retrieve {
            question,
            beam_width,
            final_doc_count,
        } => commands::retrieve::run(&commands::retrieve::RetrieveOptions {
            question,
            beam_width,
            final_doc_count,
        }),
    }
}

/// Parse arguments, run the command and print its report. Returns whether
/// the report came back ok.
pub fn run() -> Result<bool> {
    let cli = Cli::parse();
    let report = dispatch(cli.command)?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", render_text(&report));
    }
    Ok(report.ok)
}
