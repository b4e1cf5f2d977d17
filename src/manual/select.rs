use crate::manual::literal::parse_string_list;
use crate::manual::llm::{ChatMessage, RetryingGenerator};
use crate::manual::store::TableOfContents;
use crate::manual::warn;

pub const SELECTED_FILE_COUNT: usize = 3;

pub fn file_selection_messages(question: &str, toc: &TableOfContents) -> Vec<ChatMessage> {
    let toc_json = serde_json::to_string_pretty(toc).unwrap_or_else(|_| "{}".to_string());
    let system = format!(
        "You route student questions to course assignment files. Select the \
         {SELECTED_FILE_COUNT} file names whose content is most likely to answer the question. \
         Output ONLY a list of exactly {SELECTED_FILE_COUNT} file names, like so: \
         ['hw4.json', 'lab8.json', 'projA1.json']"
    );
    let user = format!("Student question: \"{question}\"\n\nTable of contents:\n{toc_json}");
    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

fn first_files(toc: &TableOfContents) -> Vec<String> {
    toc.file_names()
        .take(SELECTED_FILE_COUNT)
        .map(str::to_string)
        .collect()
}

/// Choose the files to search for `question`. Never fails: any reply that is
/// not a list of exactly three names falls back to the first three TOC
/// entries, or to every entry when the TOC is shorter.
pub fn get_relevant_files(
    llm: &mut RetryingGenerator,
    question: &str,
    toc: &TableOfContents,
    temperature: f32,
) -> Vec<String> {
    if toc.len() < SELECTED_FILE_COUNT {
        warn::emit(
            "W011",
            "select",
            "accept-fewer",
            "toc",
            &format!("toc has {} entries", toc.len()),
            "",
        );
    }

    let reply = llm.generate(&file_selection_messages(question, toc), temperature);
    match parse_string_list(&reply) {
        Ok(files) if files.len() == SELECTED_FILE_COUNT => {
            for name in files.iter().filter(|name| toc.get(name).is_none()) {
                warn::emit("W012", "select", "keep", name, "file not listed in toc", "");
            }
            files
        }
        Ok(files) => {
            warn::emit(
                "W010",
                "select",
                "fallback",
                "toc",
                &format!("expected {SELECTED_FILE_COUNT} file names, got {}", files.len()),
                "",
            );
            first_files(toc)
        }
        Err(err) => {
            warn::emit(
                "W010",
                "select",
                "fallback",
                "toc",
                "unparseable file list",
                &err.to_string(),
            );
            first_files(toc)
        }
    }
}
