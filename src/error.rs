use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManualError {
    #[error("config file invalid or unreadable: {0}")]
    InvalidConfig(String),
    #[error("generation provider misconfigured: {0}")]
    ProviderConfig(String),
    #[error("tree file name must be a single plain path component: `{0}`")]
    InvalidFileName(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TreeError {
    #[error("cannot build a tree from zero leaf nodes")]
    EmptyInput,
    #[error("branch factor must be >= 2, got {0}")]
    BranchFactor(usize),
    #[error("malformed tree json: {0}")]
    Malformed(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LiteralError {
    #[error("response contains no list literal")]
    NoList,
    #[error("list literal could not be parsed: {0}")]
    Syntax(String),
    #[error("list item {index} has the wrong type")]
    ItemType { index: usize },
}
