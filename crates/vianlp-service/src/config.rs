//! Configuration loading for vianlp-service.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use vianlp_core::{
    ExtractorOptions, TableDetectorConfig, DEFAULT_CONTEXT_CHARS, DEFAULT_ENTITY_LABELS,
    DEFAULT_NER_MODEL,
};

/// Model id or local model directory
pub const NER_MODEL_ENV: &str = "VIANLP_NER_MODEL";

/// Page worker count
pub const WORKERS_ENV: &str = "VIANLP_WORKERS";

/// Default maximum decoded document size in MB
pub const DEFAULT_MAX_PAYLOAD_MB: u64 = 100;

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    pub model: Option<ModelConfig>,
    pub extraction: Option<ExtractionConfig>,
    pub tables: Option<TablesConfig>,
    pub service: Option<ServiceConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct ModelConfig {
    /// Hugging Face model id
    pub id: Option<String>,
    /// Local model directory; wins over `id`
    pub path: Option<PathBuf>,
    pub enabled: Option<bool>,
    pub labels: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct ExtractionConfig {
    pub workers: Option<usize>,
    pub context_chars: Option<usize>,
    pub tables: Option<bool>,
    pub max_payload_mb: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct TablesConfig {
    pub row_tolerance: Option<f32>,
    pub col_tolerance: Option<f32>,
    pub min_cells: Option<usize>,
    pub min_rows: Option<usize>,
    pub min_cols: Option<usize>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct ServiceConfig {
    /// Write lifecycle notices to stdout
    pub announce: Option<bool>,
    pub log_file: Option<PathBuf>,
}

impl Config {
    /// Model to load: local path, then configured id, then the default model
    pub fn model_source(&self) -> String {
        let model = self.model.as_ref();
        model
            .and_then(|m| m.path.as_ref())
            .map(|p| p.display().to_string())
            .or_else(|| model.and_then(|m| m.id.clone()))
            .unwrap_or_else(|| DEFAULT_NER_MODEL.to_string())
    }

    pub fn ner_enabled(&self) -> bool {
        self.model.as_ref().and_then(|m| m.enabled).unwrap_or(true)
    }

    pub fn entity_labels(&self) -> Vec<String> {
        self.model
            .as_ref()
            .and_then(|m| m.labels.clone())
            .unwrap_or_else(|| DEFAULT_ENTITY_LABELS.iter().map(|l| l.to_string()).collect())
    }

    /// Page workers; 0 means the available parallelism
    pub fn workers(&self) -> usize {
        self.extraction
            .as_ref()
            .and_then(|e| e.workers)
            .unwrap_or(0)
    }

    pub fn context_chars(&self) -> usize {
        self.extraction
            .as_ref()
            .and_then(|e| e.context_chars)
            .unwrap_or(DEFAULT_CONTEXT_CHARS)
    }

    pub fn tables_enabled(&self) -> bool {
        self.extraction
            .as_ref()
            .and_then(|e| e.tables)
            .unwrap_or(true)
    }

    /// Get maximum decoded document size in bytes.
    /// Returns configured value or default (100MB).
    pub fn max_payload_bytes(&self) -> usize {
        let mb = self
            .extraction
            .as_ref()
            .and_then(|e| e.max_payload_mb)
            .unwrap_or(DEFAULT_MAX_PAYLOAD_MB);
        usize::try_from(mb.saturating_mul(1024 * 1024)).unwrap_or(usize::MAX)
    }

    pub fn table_detector(&self) -> TableDetectorConfig {
        let defaults = TableDetectorConfig::default();
        let Some(tables) = self.tables.as_ref() else {
            return defaults;
        };
        TableDetectorConfig {
            row_tolerance: tables.row_tolerance.unwrap_or(defaults.row_tolerance),
            col_tolerance: tables.col_tolerance.unwrap_or(defaults.col_tolerance),
            min_cells: tables.min_cells.unwrap_or(defaults.min_cells),
            min_rows: tables.min_rows.unwrap_or(defaults.min_rows),
            min_cols: tables.min_cols.unwrap_or(defaults.min_cols),
        }
    }

    pub fn announce(&self) -> bool {
        self.service
            .as_ref()
            .and_then(|s| s.announce)
            .unwrap_or(true)
    }

    pub fn log_file(&self) -> Option<PathBuf> {
        self.service.as_ref().and_then(|s| s.log_file.clone())
    }

    pub fn extractor_options(&self) -> ExtractorOptions {
        ExtractorOptions {
            workers: self.workers(),
            context_chars: self.context_chars(),
            extract_tables: self.tables_enabled(),
            entity_labels: self.entity_labels(),
            tables: self.table_detector(),
            max_payload_bytes: self.max_payload_bytes(),
        }
    }

    /// Apply `VIANLP_*` overrides from the process environment
    pub fn apply_env(&mut self) {
        self.apply_overrides(
            std::env::var(NER_MODEL_ENV).ok(),
            std::env::var(WORKERS_ENV).ok(),
        );
    }

    fn apply_overrides(&mut self, model: Option<String>, workers: Option<String>) {
        if let Some(model) = model.filter(|m| !m.trim().is_empty()) {
            self.set_model(&model);
        }

        if let Some(raw) = workers {
            match raw.trim().parse::<usize>() {
                Ok(n) => self.extraction.get_or_insert_with(Default::default).workers = Some(n),
                Err(_) => tracing::warn!("Ignoring invalid {}={:?}", WORKERS_ENV, raw),
            }
        }
    }

    /// Point at a model id, or a local directory when `model` is one
    pub fn set_model(&mut self, model: &str) {
        let entry = self.model.get_or_insert_with(Default::default);
        if Path::new(model).is_dir() {
            entry.path = Some(PathBuf::from(model));
        } else {
            entry.path = None;
            entry.id = Some(model.to_string());
        }
    }
}

pub fn default_config_path() -> Result<PathBuf> {
    let dirs =
        ProjectDirs::from("", "", "vianlp").context("Could not determine config directory")?;
    Ok(dirs.config_dir().join("config.toml"))
}

pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: Config =
        toml::from_str(&contents).context("Failed to parse config file as TOML")?;
    Ok(config)
}
