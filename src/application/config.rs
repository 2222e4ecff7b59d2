use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Configuration {
    #[clap(short, long, default_value_os_t = default_data_dir())]
    #[serde(default = "default_data_dir")]
    /// Directory for all persistent state: the database, search indexes,
    /// cloned repositories and logs
    pub data_dir: PathBuf,

    #[clap(long)]
    #[serde(default)]
    /// Path of the sqlite database file. Defaults to `<data_dir>/quarry.db`
    pub db_path: Option<PathBuf>,

    #[clap(long, default_value_t = default_host())]
    #[serde(default = "default_host")]
    /// Bind the webserver to `<host>`
    pub host: String,

    #[clap(long, default_value_t = default_port())]
    #[serde(default = "default_port")]
    /// Bind the webserver to `<port>`
    pub port: u16,

    #[clap(long, default_value_t = default_workers())]
    #[serde(default = "default_workers")]
    /// Number of queue workers
    pub workers: usize,

    #[clap(long)]
    #[serde(default)]
    /// Base URL of an OpenAI-compatible chat endpoint for enrichment
    pub llm_api_base: Option<String>,

    #[clap(long)]
    #[serde(default)]
    pub llm_api_key: Option<String>,

    #[clap(long, default_value_t = default_llm_model())]
    #[serde(default = "default_llm_model")]
    pub llm_model: String,

    #[clap(long)]
    #[serde(default)]
    /// Base URL of an OpenAI-compatible embeddings endpoint
    pub embedding_api_base: Option<String>,

    #[clap(long)]
    #[serde(default)]
    pub embedding_api_key: Option<String>,

    #[clap(long, default_value_t = default_embedding_model())]
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    #[clap(long, default_value_t = default_embedding_dimensions())]
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: usize,

    #[clap(long)]
    #[serde(default)]
    /// Bearer tokens accepted by the HTTP API. Auth is disabled when empty
    pub api_keys: Vec<String>,
}

impl Configuration {
    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("quarry.db"))
    }

    /// Working copies live under `<data_dir>/repos/<sanitized_url>`, with
    /// path separators flattened out of the directory name.
    pub fn clone_dir(&self) -> PathBuf {
        self.data_dir.join("repos")
    }

    pub fn clone_target(&self, sanitized_url: &str) -> PathBuf {
        self.clone_dir().join(sanitized_url.replace('/', "_"))
    }

    pub fn index_dir(&self) -> PathBuf {
        self.data_dir.join("index")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            db_path: None,
            host: default_host(),
            port: default_port(),
            workers: default_workers(),
            llm_api_base: None,
            llm_api_key: None,
            llm_model: default_llm_model(),
            embedding_api_base: None,
            embedding_api_key: None,
            embedding_model: default_embedding_model(),
            embedding_dimensions: default_embedding_dimensions(),
            api_keys: vec![],
        }
    }
}

fn default_data_dir() -> PathBuf {
    match directories::ProjectDirs::from("dev", "quarry", "quarry") {
        Some(dirs) => dirs.data_dir().to_owned(),
        None => "quarry_data".into(),
    }
}

fn default_host() -> String {
    "127.0.0.1".to_owned()
}

fn default_port() -> u16 {
    47820
}

fn default_workers() -> usize {
    1
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_owned()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_owned()
}

fn default_embedding_dimensions() -> usize {
    1536
}
