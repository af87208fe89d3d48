//! TOML configuration.
//!
//! One [`Config`] is loaded at startup and passed by reference to every
//! component. Every section has defaults, so an empty file is a valid
//! configuration that ingests `./source_data` into `./data`.
//!
//! ```toml
//! [input]
//! dir = "./source_data"
//!
//! [state]
//! path = "./data/ingest_state.json"
//!
//! [store]
//! path = "./data/vectors.sqlite"
//! collection = "documents"
//!
//! [chunking]
//! chunk_size = 1500
//! chunk_overlap = 150
//!
//! [embedding]
//! provider = "ollama"
//! model = "nomic-embed-text"
//! dims = 768
//!
//! [converter]
//! backend = "builtin"
//! do_ocr = true
//! do_table_structure = true
//! device = "auto"
//! ```

use anyhow::{Context, Result};
use docsync_core::capability::Acquired;
use docsync_core::chunk::{ChunkerConfig, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub converter: ConverterConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InputConfig {
    #[serde(default = "default_input_dir")]
    pub dir: PathBuf,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            dir: default_input_dir(),
        }
    }
}

fn default_input_dir() -> PathBuf {
    PathBuf::from("./source_data")
}

#[derive(Debug, Deserialize, Clone)]
pub struct StateConfig {
    #[serde(default = "default_state_path")]
    pub path: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: default_state_path(),
        }
    }
}

fn default_state_path() -> PathBuf {
    PathBuf::from("./data/ingest_state.json")
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    #[serde(default = "default_collection")]
    pub collection: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            collection: default_collection(),
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("./data/vectors.sqlite")
}
fn default_collection() -> String {
    "documents".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl ChunkingConfig {
    pub fn chunker(&self) -> ChunkerConfig {
        ChunkerConfig {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
        }
    }
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}
fn default_chunk_overlap() -> usize {
    DEFAULT_CHUNK_OVERLAP
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for HTTP providers. Falls back to `OLLAMA_BASE_URL` for Ollama.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Device hint forwarded to backends that accept one. Ollama only acts
    /// on an explicit `Cpu`.
    #[serde(default)]
    pub device: Device,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            device: Device::Auto,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    /// Configured model, or the provider's default.
    pub fn model_name(&self) -> String {
        match (&self.model, self.provider.as_str()) {
            (Some(m), _) => m.clone(),
            (None, "local") => "all-minilm-l6-v2".to_string(),
            (None, "disabled") => "disabled".to_string(),
            (None, "hash") => "hash".to_string(),
            (None, _) => "nomic-embed-text".to_string(),
        }
    }
}

fn default_provider() -> String {
    "ollama".to_string()
}
fn default_batch_size() -> usize {
    16
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    60
}

/// Preferred compute device for converters and embedders.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    /// Use CUDA when present, otherwise the CPU.
    #[default]
    Auto,
    Cpu,
    Cuda,
}

impl Device {
    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Auto => "auto",
            Device::Cpu => "cpu",
            Device::Cuda => "cuda",
        }
    }

    /// Resolve against the host. An explicit CUDA request on a host without
    /// a visible NVIDIA device degrades to the CPU instead of failing.
    pub fn resolve(self) -> Acquired<Device> {
        match self {
            Device::Cpu => Acquired::Ready(Device::Cpu),
            Device::Auto if cuda_available() => Acquired::Ready(Device::Cuda),
            Device::Auto => Acquired::Ready(Device::Cpu),
            Device::Cuda if cuda_available() => Acquired::Ready(Device::Cuda),
            Device::Cuda => Acquired::Degraded {
                value: Device::Cpu,
                reason: "CUDA requested but no device is visible; using CPU".to_string(),
            },
        }
    }
}

/// Whether an NVIDIA device is visible to this process.
pub fn cuda_available() -> bool {
    if let Ok(visible) = std::env::var("CUDA_VISIBLE_DEVICES") {
        let visible = visible.trim();
        if visible.is_empty() || visible == "-1" {
            return false;
        }
    }
    Path::new("/dev/nvidiactl").exists() || Path::new("/dev/nvidia0").exists()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConverterConfig {
    /// `builtin` (pdf-extract text layer) or `command` (external converter).
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_true")]
    pub do_ocr: bool,
    #[serde(default = "default_true")]
    pub do_table_structure: bool,
    #[serde(default)]
    pub device: Device,
    #[serde(default = "default_num_threads")]
    pub num_threads: usize,
    /// Argv of the external converter; `{input}` is replaced by the file path.
    #[serde(default)]
    pub command: Vec<String>,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            do_ocr: true,
            do_table_structure: true,
            device: Device::Auto,
            num_threads: default_num_threads(),
            command: Vec::new(),
        }
    }
}

fn default_backend() -> String {
    "builtin".to_string()
}
fn default_true() -> bool {
    true
}
fn default_num_threads() -> usize {
    9
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PipelineConfig {
    /// Drop state entries and vectors for files no longer in the input directory.
    #[serde(default)]
    pub prune_missing: bool,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        anyhow::bail!("chunking.chunk_overlap must be smaller than chunking.chunk_size");
    }

    if config.store.collection.trim().is_empty() {
        anyhow::bail!("store.collection must not be empty");
    }

    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "ollama" | "openai" | "local" | "hash" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, ollama, openai, local, or hash.",
            other
        ),
    }

    if config.embedding.provider == "openai" {
        if config.embedding.model.is_none() {
            anyhow::bail!("embedding.model must be specified when provider is 'openai'");
        }
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!("embedding.dims must be > 0 when provider is 'openai'");
        }
    }

    match config.converter.backend.as_str() {
        "builtin" => {}
        "command" => {
            if config.converter.command.is_empty() {
                anyhow::bail!("converter.command must be set when backend is 'command'");
            }
        }
        other => anyhow::bail!(
            "Unknown converter backend: '{}'. Must be builtin or command.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        validate(&config).unwrap();
        assert_eq!(config.input.dir, PathBuf::from("./source_data"));
        assert_eq!(config.store.collection, "documents");
        assert_eq!(config.chunking.chunk_size, 1500);
        assert_eq!(config.chunking.chunk_overlap, 150);
        assert_eq!(config.embedding.provider, "ollama");
        assert_eq!(config.embedding.model_name(), "nomic-embed-text");
        assert!(config.converter.do_ocr);
        assert!(config.converter.do_table_structure);
        assert_eq!(config.converter.device, Device::Auto);
        assert_eq!(config.converter.num_threads, 9);
        assert!(!config.pipeline.prune_missing);
    }

    #[test]
    fn example_config_is_valid() {
        let config: Config =
            toml::from_str(include_str!("../config/docsync.example.toml")).unwrap();
        validate(&config).unwrap();
        assert_eq!(config.embedding.model_name(), "nomic-embed-text");
        assert_eq!(config.embedding.device, Device::Auto);
    }

    #[test]
    fn overlap_must_be_below_size() {
        let config: Config =
            toml::from_str("[chunking]\nchunk_size = 100\nchunk_overlap = 100\n").unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn command_backend_requires_command() {
        let config: Config = toml::from_str("[converter]\nbackend = \"command\"\n").unwrap();
        assert!(validate(&config).is_err());

        let config: Config = toml::from_str(
            "[converter]\nbackend = \"command\"\ncommand = [\"convert\", \"{input}\"]\n",
        )
        .unwrap();
        validate(&config).unwrap();
    }

    #[test]
    fn unknown_provider_rejected() {
        let config: Config = toml::from_str("[embedding]\nprovider = \"magic\"\n").unwrap();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("magic"));
    }

    #[test]
    fn cpu_device_is_always_ready() {
        let resolved = Device::Cpu.resolve();
        assert!(!resolved.is_degraded());
        assert_eq!(resolved.into_inner(), Device::Cpu);
    }

    #[test]
    fn cuda_request_never_fails() {
        let resolved = Device::Cuda.resolve();
        if cuda_available() {
            assert_eq!(*resolved.get(), Device::Cuda);
        } else {
            assert!(resolved.is_degraded());
            assert_eq!(*resolved.get(), Device::Cpu);
        }
    }

    #[test]
    fn device_parses_lowercase() {
        let config: Config = toml::from_str("[converter]\ndevice = \"cuda\"\n").unwrap();
        assert_eq!(config.converter.device, Device::Cuda);
    }
}
