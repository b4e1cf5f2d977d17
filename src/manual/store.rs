use crate::error::ManualError;
use crate::manual::paths::TOC_FILE_NAME;
use crate::manual::tree::Node;
use crate::manual::util::write_atomic;
use anyhow::{Context, Result};
use reqwest::Url;
use reqwest::blocking::Client;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::env;
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

const REQUEST_TIMEOUT_SECS: u64 = 45;

/// File name to representative key, in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableOfContents {
    entries: Vec<(String, String)>,
}

impl TableOfContents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, file_name: impl Into<String>, key: impl Into<String>) {
        let file_name = file_name.into();
        let key = key.into();
        match self.entries.iter_mut().find(|(name, _)| *name == file_name) {
            Some(entry) => entry.1 = key,
            None => self.entries.push((file_name, key)),
        }
    }

    pub fn get(&self, file_name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(name, _)| name == file_name)
            .map(|(_, key)| key.as_str())
    }

    pub fn file_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TableOfContents {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut toc = TableOfContents::new();
        for (name, key) in iter {
            toc.insert(name, key);
        }
        toc
    }
}

impl Serialize for TableOfContents {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, key) in &self.entries {
            map.serialize_entry(name, key)?;
        }
        map.end()
    }
}

struct TocVisitor;

impl<'de> Visitor<'de> for TocVisitor {
    type Value = TableOfContents;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an object mapping file names to keys")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<TableOfContents, A::Error> {
        let mut toc = TableOfContents::new();
        while let Some((name, key)) = access.next_entry::<String, String>()? {
            toc.insert(name, key);
        }
        Ok(toc)
    }
}

impl<'de> Deserialize<'de> for TableOfContents {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(TocVisitor)
    }
}

/// Accept `file_name` only when it names an entry directly inside the store.
pub fn checked_file_name(file_name: &str) -> Result<&str, ManualError> {
    let invalid = || ManualError::InvalidFileName(file_name.to_string());
    if file_name.is_empty() || file_name.contains(['/', '\\', '\0']) {
        return Err(invalid());
    }
    let mut components = Path::new(file_name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(file_name),
        _ => Err(invalid()),
    }
}

/// Read side of tree persistence, used by retrieval.
pub trait TreeStore {
    fn describe(&self) -> String;
    fn load_tree(&self, file_name: &str) -> Result<Node>;
    fn load_toc(&self) -> Result<TableOfContents>;
}

#[derive(Debug, Clone)]
pub struct LocalTreeStore {
    dir: PathBuf,
}

impl LocalTreeStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn tree_path(&self, file_name: &str) -> Result<PathBuf, ManualError> {
        Ok(self.dir.join(checked_file_name(file_name)?))
    }

    pub fn write_tree(&self, file_name: &str, tree: &Node) -> Result<PathBuf> {
        let path = self.tree_path(file_name)?;
        let data = serde_json::to_string_pretty(tree)?;
        write_atomic(&path, &format!("{data}\n"))?;
        Ok(path)
    }

    /// Tree file names in lexicographic order, excluding the TOC itself.
    pub fn list_tree_files(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let entries = fs::read_dir(&self.dir)
            .with_context(|| format!("failed to list {}", self.dir.display()))?;
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.ends_with(".json") && !name.contains("table_of_contents") {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}

impl TreeStore for LocalTreeStore {
    fn describe(&self) -> String {
        self.dir.display().to_string()
    }

    fn load_tree(&self, file_name: &str) -> Result<Node> {
        let path = self.tree_path(file_name)?;
        let raw =
            fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))?;
        Node::from_json_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
    }

    fn load_toc(&self) -> Result<TableOfContents> {
        let path = self.dir.join(TOC_FILE_NAME);
        let raw =
            fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
    }
}

/// Read-only object store reached over HTTP (`GET <base>/<file>[?query]`),
/// for example a blob container with a SAS token as `query`.
pub struct HttpTreeStore {
    base_url: String,
    query: Option<String>,
    client: Client,
}

impl HttpTreeStore {
    pub fn new(base_url: impl Into<String>, query: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            base_url: base_url.into(),
            query,
            client,
        })
    }

    /// The file name becomes one percent-encoded path segment.
    fn url_for(&self, file_name: &str) -> Result<Url> {
        let file_name = checked_file_name(file_name)?;
        let mut url = Url::parse(&self.base_url)
            .with_context(|| format!("invalid tree store url {}", self.base_url))?;
        url.path_segments_mut()
            .map_err(|()| anyhow::anyhow!("tree store url {} cannot hold a path", self.base_url))?
            .pop_if_empty()
            .push(file_name);
        match self.query.as_deref().map(|q| q.trim_start_matches('?')) {
            Some(q) if !q.is_empty() => url.set_query(Some(q)),
            _ => url.set_query(None),
        }
        Ok(url)
    }

    fn fetch(&self, file_name: &str) -> Result<String> {
        let response = self
            .client
            .get(self.url_for(file_name)?)
            .send()
            .with_context(|| format!("failed to fetch {file_name}"))?;
        if !response.status().is_success() {
            anyhow::bail!("fetching {file_name} failed with status {}", response.status());
        }
        Ok(response.text()?)
    }
}

impl TreeStore for HttpTreeStore {
    fn describe(&self) -> String {
        self.base_url.clone()
    }

    fn load_tree(&self, file_name: &str) -> Result<Node> {
        let raw = self.fetch(file_name)?;
        Node::from_json_str(&raw).with_context(|| format!("failed to parse {file_name}"))
    }

    fn load_toc(&self) -> Result<TableOfContents> {
        let raw = self.fetch(TOC_FILE_NAME)?;
        serde_json::from_str(&raw).with_context(|| format!("failed to parse {TOC_FILE_NAME}"))
    }
}

/// Retrieval reads from `MANUAL_TREE_URL` when set, otherwise from the local
/// trees directory.
pub fn resolve_store(trees_dir: &Path) -> Result<Box<dyn TreeStore>> {
    match env::var("MANUAL_TREE_URL") {
        Ok(url) if !url.trim().is_empty() => {
            let query = env::var("MANUAL_TREE_URL_QUERY")
                .ok()
                .filter(|q| !q.trim().is_empty());
            Ok(Box::new(HttpTreeStore::new(url.trim(), query)?))
        }
        _ => Ok(Box::new(LocalTreeStore::new(trees_dir))),
    }
}
