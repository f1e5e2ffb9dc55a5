//! Runtime settings, from defaults, an optional TOML file, and environment
//! variable overrides.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::inference::SamplingParameters;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// GGUF model weights for the inference backend.
    pub model_path: PathBuf,
    pub context_size: usize,
    pub gpu_layers: usize,
    pub batch_size: usize,

    /// Directory for the persisted retrieval store snapshot.
    pub data_dir: PathBuf,

    /// Optional ONNX embedding model; absent means keyword-fallback retrieval.
    pub embedding_model_path: Option<PathBuf>,
    pub embedding_tokenizer_path: Option<PathBuf>,

    pub system_prompt: Option<String>,
    pub sampling: SamplingParameters,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("./models/model.gguf"),
            context_size: 4096,
            gpu_layers: 0,
            batch_size: 512,
            data_dir: PathBuf::from("./data"),
            embedding_model_path: None,
            embedding_tokenizer_path: None,
            system_prompt: None,
            sampling: SamplingParameters::default(),
        }
    }
}

impl Settings {
    /// Loads settings from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Applies environment variable overrides on top of the current values.
    pub fn apply_env(mut self) -> Self {
        if let Ok(path) = env::var("MODEL_PATH") {
            self.model_path = PathBuf::from(path);
        }
        if let Ok(path) = env::var("DATA_DIR") {
            self.data_dir = PathBuf::from(path);
        }
        if let Ok(path) = env::var("EMBEDDING_MODEL_PATH") {
            self.embedding_model_path = Some(PathBuf::from(path));
        }
        if let Ok(path) = env::var("EMBEDDING_TOKENIZER_PATH") {
            self.embedding_tokenizer_path = Some(PathBuf::from(path));
        }
        self.context_size = env_parse("CONTEXT_SIZE", self.context_size);
        self.gpu_layers = env_parse("GPU_LAYERS", self.gpu_layers);
        self.batch_size = env_parse("LLAMA_BATCH_SIZE", self.batch_size);
        self.sampling.max_tokens = env_parse("MAX_TOKENS", self.sampling.max_tokens);
        self.sampling.temperature = env_parse("TEMPERATURE", self.sampling.temperature);
        self
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}
