use anyhow::Result;
use std::env;
use std::path::PathBuf;

pub const TOC_FILE_NAME: &str = "table_of_contents.json";

#[derive(Debug, Clone)]
pub struct ManualPaths {
    pub manual_home: PathBuf,
    pub trees_dir: PathBuf,
    pub chunks_dir: PathBuf,
    pub logs_dir: PathBuf,
}

fn required_home_dir() -> Result<PathBuf> {
    if let Some(home) = dirs::home_dir() {
        return Ok(home);
    }
    Err(anyhow::anyhow!("HOME directory could not be resolved"))
}

fn env_or_default_path(var: &str, fallback: PathBuf) -> PathBuf {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => fallback,
    }
}

pub fn resolve_paths() -> Result<ManualPaths> {
    let manual_home = match env::var("MANUAL_HOME") {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => required_home_dir()?.join("manual"),
    };

    let trees_dir = env_or_default_path("MANUAL_TREES_DIR", manual_home.join("trees"));
    let chunks_dir = env_or_default_path("MANUAL_CHUNKS_DIR", manual_home.join("chunks"));
    let logs_dir = env_or_default_path("MANUAL_LOGS_DIR", manual_home.join("logs"));

    Ok(ManualPaths {
        manual_home,
        trees_dir,
        chunks_dir,
        logs_dir,
    })
}
