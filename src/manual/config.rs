use crate::error::ManualError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    #[serde(default = "default_branch_factor")]
    pub branch_factor: usize,
}

fn default_branch_factor() -> usize {
    3
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            branch_factor: default_branch_factor(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_beam_width")]
    pub beam_width: usize,
    #[serde(default = "default_final_doc_count")]
    pub final_doc_count: usize,
    #[serde(default = "default_selection_delay_ms")]
    pub selection_delay_ms: u64,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_beam_width() -> usize {
    3
}

fn default_final_doc_count() -> usize {
    1
}

fn default_selection_delay_ms() -> u64 {
    1_000
}

fn default_retry_delay_ms() -> u64 {
    1_000
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            beam_width: default_beam_width(),
            final_doc_count: default_final_doc_count(),
            selection_delay_ms: default_selection_delay_ms(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_temperature() -> f32 {
    0.1
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ManualConfig {
    pub build: BuildConfig,
    pub retrieval: RetrievalConfig,
    pub llm: LlmConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialManualConfig {
    build: Option<BuildConfig>,
    retrieval: Option<RetrievalConfig>,
    llm: Option<LlmConfig>,
}

fn env_or_usize(var: &str, fallback: usize) -> usize {
    match env::var(var) {
        Ok(v) => v.trim().parse::<usize>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_u64(var: &str, fallback: u64) -> u64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_f32(var: &str, fallback: f32) -> f32 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<f32>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

pub fn validate(cfg: &ManualConfig) -> Result<(), ManualError> {
    if cfg.build.branch_factor < 2 {
        return Err(ManualError::InvalidConfig(
            "branch factor must be >= 2".to_string(),
        ));
    }
    if cfg.retrieval.beam_width == 0 {
        return Err(ManualError::InvalidConfig(
            "beam width must be >= 1".to_string(),
        ));
    }
    if cfg.retrieval.final_doc_count == 0 {
        return Err(ManualError::InvalidConfig(
            "final doc count must be >= 1".to_string(),
        ));
    }
    let t = cfg.llm.temperature;
    if !(0.0..=2.0).contains(&t) {
        return Err(ManualError::InvalidConfig(
            "temperature must be within 0.0..=2.0".to_string(),
        ));
    }
    Ok(())
}

fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(custom) = env::var("MANUAL_CONFIG_PATH") {
        let trimmed = custom.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }

    let home = dirs::home_dir()?;
    Some(home.join(".manual").join("manual.toml"))
}

fn merge_file_config(base: &mut ManualConfig) -> Result<()> {
    let Some(path) = resolve_config_path() else {
        return Ok(());
    };
    if !path.exists() {
        return Ok(());
    }

    let raw = fs::read_to_string(&path)?;
    let parsed: PartialManualConfig = toml::from_str(&raw).map_err(|err| {
        ManualError::InvalidConfig(format!("failed to parse {}: {err}", path.display()))
    })?;
    if let Some(build) = parsed.build {
        base.build = build;
    }
    if let Some(retrieval) = parsed.retrieval {
        base.retrieval = retrieval;
    }
    if let Some(llm) = parsed.llm {
        base.llm = llm;
    }
    Ok(())
}

pub fn load_config() -> Result<ManualConfig> {
    let mut cfg = ManualConfig::default();
    merge_file_config(&mut cfg)?;

    cfg.build.branch_factor = env_or_usize("MANUAL_BRANCH_FACTOR", cfg.build.branch_factor);
    cfg.retrieval.beam_width = env_or_usize("MANUAL_BEAM_WIDTH", cfg.retrieval.beam_width);
    cfg.retrieval.final_doc_count =
        env_or_usize("MANUAL_FINAL_DOC_COUNT", cfg.retrieval.final_doc_count);
    cfg.retrieval.selection_delay_ms = env_or_u64(
        "MANUAL_SELECTION_DELAY_MS",
        cfg.retrieval.selection_delay_ms,
    );
    cfg.retrieval.retry_delay_ms =
        env_or_u64("MANUAL_RETRY_DELAY_MS", cfg.retrieval.retry_delay_ms);
    cfg.llm.temperature = env_or_f32("MANUAL_TEMPERATURE", cfg.llm.temperature);

    validate(&cfg)?;
    Ok(cfg)
}
