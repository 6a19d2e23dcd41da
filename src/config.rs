//! TOML configuration.
//!
//! Every section except `[db]` has defaults, so a minimal file is:
//!
//! ```toml
//! [db]
//! path = "./data/gctx.sqlite"
//! ```
//!
//! [`load_config`] parses the file and rejects settings the rest of the
//! program cannot run with (zero limits, an authorization schema with a
//! cycle, a retrieval relation the schema does not declare).

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use gated_context_core::retrieval::RetrievalSettings;
use gated_context_core::schema::RelationSchema;
use gated_context_core::timing::RetryPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub authz: AuthzConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthzConfig {
    #[serde(default = "default_document_type")]
    pub document_type: String,
    #[serde(default = "default_viewer_relation")]
    pub viewer_relation: String,
    #[serde(default = "default_owner_relation")]
    pub owner_relation: String,
    #[serde(default = "default_authz_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_write_retries")]
    pub write_retries: u32,
    /// Omitted means the built-in `document` schema.
    #[serde(default)]
    pub types: Option<RelationSchema>,
}

impl Default for AuthzConfig {
    fn default() -> Self {
        Self {
            document_type: default_document_type(),
            viewer_relation: default_viewer_relation(),
            owner_relation: default_owner_relation(),
            timeout_ms: default_authz_timeout_ms(),
            write_retries: default_write_retries(),
            types: None,
        }
    }
}

fn default_document_type() -> String {
    "document".to_string()
}
fn default_viewer_relation() -> String {
    "viewer".to_string()
}
fn default_owner_relation() -> String {
    "owner".to_string()
}
fn default_authz_timeout_ms() -> u64 {
    5000
}
fn default_write_retries() -> u32 {
    3
}

impl AuthzConfig {
    pub fn schema(&self) -> RelationSchema {
        self.types.clone().unwrap_or_default()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.write_retries, Duration::from_millis(100))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_max_tokens() -> usize {
    700
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_retrieval_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            timeout_ms: default_retrieval_timeout_ms(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_retrieval_timeout_ms() -> u64 {
    10_000
}

impl RetrievalConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the `ollama` provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

impl Config {
    pub fn retrieval_settings(&self) -> RetrievalSettings {
        RetrievalSettings {
            resource_type: self.authz.document_type.clone(),
            viewer_relation: self.authz.viewer_relation.clone(),
            owner_relation: self.authz.owner_relation.clone(),
            embed_timeout: self.retrieval.timeout(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate config text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }

    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.timeout_ms == 0 {
        anyhow::bail!("retrieval.timeout_ms must be > 0");
    }
    if config.authz.timeout_ms == 0 {
        anyhow::bail!("authz.timeout_ms must be > 0");
    }
    if config.embedding.timeout_secs == 0 {
        anyhow::bail!("embedding.timeout_secs must be > 0");
    }

    // Cycles and dangling implications were rejected while deserializing.
    let schema = config.authz.schema();
    for relation in [&config.authz.viewer_relation, &config.authz.owner_relation] {
        schema
            .validate(&config.authz.document_type, relation)
            .with_context(|| {
                format!(
                    "authz: relation '{}' must be declared on '{}'",
                    relation, config.authz.document_type
                )
            })?;
    }

    if config.embedding.is_enabled() && config.embedding.dims.unwrap_or(0) == 0 {
        anyhow::bail!(
            "embedding.dims must be > 0 when provider is '{}'",
            config.embedding.provider
        );
    }

    match config.embedding.provider.as_str() {
        "disabled" | "hash" => {}
        "openai" | "ollama" => {
            if config.embedding.model.is_none() {
                anyhow::bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, hash, openai, or ollama.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse_config("[db]\npath = \"/tmp/x.sqlite\"\n").unwrap();
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.authz.document_type, "document");
        assert_eq!(config.server.bind, "127.0.0.1:7341");
        assert!(!config.embedding.is_enabled());
        assert!(config
            .authz
            .schema()
            .granting_relations("document", "viewer")
            .unwrap()
            .contains("owner"));
    }

    #[test]
    fn test_custom_schema() {
        let config = parse_config(
            r#"
[db]
path = "/tmp/x.sqlite"

[authz.types.document]
relations = ["owner", "editor", "viewer"]
implies = { owner = ["editor"], editor = ["viewer"] }
"#,
        )
        .unwrap();
        let granting = config
            .authz
            .schema()
            .granting_relations("document", "viewer")
            .unwrap()
            .clone();
        assert_eq!(granting.len(), 3);
    }

    #[test]
    fn test_cyclic_schema_rejected() {
        let err = parse_config(
            r#"
[db]
path = "/tmp/x.sqlite"

[authz.types.document]
relations = ["owner", "viewer"]
implies = { owner = ["viewer"], viewer = ["owner"] }
"#,
        )
        .unwrap_err();
        assert!(format!("{:#}", err).contains("cycle"), "{:#}", err);
    }

    #[test]
    fn test_undeclared_viewer_relation_rejected() {
        let err = parse_config(
            r#"
[db]
path = "/tmp/x.sqlite"

[authz]
viewer_relation = "reader"
"#,
        )
        .unwrap_err();
        assert!(format!("{:#}", err).contains("reader"));
    }

    #[test]
    fn test_zero_embedding_timeout_rejected() {
        let err = parse_config(
            "[db]\npath = \"x\"\n[embedding]\nprovider = \"hash\"\ndims = 8\ntimeout_secs = 0\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("embedding.timeout_secs"));
    }

    #[test]
    fn test_zero_top_k_rejected() {
        let err = parse_config("[db]\npath = \"x\"\n[retrieval]\ntop_k = 0\n").unwrap_err();
        assert!(err.to_string().contains("top_k"));
    }

    #[test]
    fn test_enabled_provider_needs_dims() {
        let err =
            parse_config("[db]\npath = \"x\"\n[embedding]\nprovider = \"hash\"\n").unwrap_err();
        assert!(err.to_string().contains("dims"));

        let err = parse_config(
            "[db]\npath = \"x\"\n[embedding]\nprovider = \"magic\"\ndims = 8\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }
}
