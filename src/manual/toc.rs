use crate::manual::paths::TOC_FILE_NAME;
use crate::manual::store::{LocalTreeStore, TableOfContents};
use crate::manual::util::write_atomic;
use crate::manual::warn;
use anyhow::{Context, Result};
use fs2::FileExt;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

const TOC_LOCK_FILE: &str = ".table_of_contents.lock";

#[derive(Debug, Clone)]
pub struct TocBuild {
    pub path: PathBuf,
    pub toc: TableOfContents,
    pub skipped: Vec<String>,
}

/// The lexicographically greatest top-level key of a persisted tree.
fn representative_key(path: &Path) -> Result<String> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let data: Map<String, Value> = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    data.keys()
        .max()
        .cloned()
        .with_context(|| format!("{} has no top-level key", path.display()))
}

/// Rebuild `table_of_contents.json` for every tree in `tree_dir`, replacing
/// the previous file. Unreadable trees are skipped with a warning.
pub fn create_toc(tree_dir: &Path) -> Result<TocBuild> {
    fs::create_dir_all(tree_dir)
        .with_context(|| format!("failed to create {}", tree_dir.display()))?;
    let lock_path = tree_dir.join(TOC_LOCK_FILE);
    let lock = fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)
        .with_context(|| format!("failed to open {}", lock_path.display()))?;
    lock.lock_exclusive()
        .with_context(|| format!("failed to lock {}", lock_path.display()))?;

    let store = LocalTreeStore::new(tree_dir);
    let mut toc = TableOfContents::new();
    let mut skipped = Vec::new();
    for file_name in store.list_tree_files()? {
        match representative_key(&tree_dir.join(&file_name)) {
            Ok(key) => toc.insert(file_name, key),
            Err(err) => {
                warn::emit(
                    "W020",
                    "toc",
                    "skip",
                    &file_name,
                    "tree unreadable",
                    &format!("{err:#}"),
                );
                skipped.push(file_name);
            }
        }
    }

    let path = tree_dir.join(TOC_FILE_NAME);
    let data = serde_json::to_string_pretty(&toc)?;
    write_atomic(&path, &format!("{data}\n"))?;
    FileExt::unlock(&lock).with_context(|| format!("failed to unlock {}", lock_path.display()))?;

    Ok(TocBuild {
        path,
        toc,
        skipped,
    })
}
