pub mod audit;
pub mod beam;
pub mod config;
pub mod literal;
pub mod llm;
#[cfg(test)]
pub mod mock;
pub mod paths;
pub mod retrieval;
pub mod select;
pub mod store;
pub mod summarize;
pub mod toc;
pub mod tree;
pub mod util;
pub mod warn;
