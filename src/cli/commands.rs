//! CLI command definitions and handlers

use anyhow::Context;
use clap::Subcommand;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::core::config::ServerConfig;
use crate::core::registry::ModelRegistry;
use crate::core::service::TranslationService;

/// Bind address used when none is given
pub const DEFAULT_HOST: &str = "0.0.0.0";
/// Listen port used when none is given
pub const DEFAULT_PORT: u16 = 8008;

/// Commands for the Marian translation service
#[derive(Subcommand, Debug, PartialEq)]
pub enum Commands {
    /// Start HTTP API server (default)
    Serve {
        /// Bind address
        #[arg(long, default_value = DEFAULT_HOST)]
        host: String,

        /// Listen port
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,
    },

    /// Translate text or a file once, without starting the server
    Translate {
        /// Language pair identifier, e.g. en-fr
        #[arg(long)]
        pair: String,

        /// Text to translate
        #[arg(long, conflicts_with = "file", required_unless_present = "file")]
        text: Option<String>,

        /// UTF-8 text file to translate
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Write the translation here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List the configured pairs that loaded
    Pairs,
}

/// Input for a one-shot translation
#[derive(Debug, Clone, PartialEq)]
pub enum OneShotInput {
    /// Text given on the command line
    Text(String),
    /// Path of a UTF-8 file
    File(PathBuf),
}

/// Handle server command
pub async fn handle_serve(host: String, port: u16) -> anyhow::Result<()> {
    use crate::server::api::run_server;

    let config = ServerConfig::load()?;
    let registry = load_registry(&config).await?;

    println!("🚀 Server starting on http://{}:{}", host, port);
    println!("📄 OpenAPI document: http://{}:{}/openapi.json", host, port);

    run_server(&config, registry, &host, port).await?;

    Ok(())
}

/// Handle one-shot translate command
pub async fn handle_translate(
    pair: String,
    text: Option<String>,
    file: Option<PathBuf>,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let input = match (text, file) {
        (Some(text), _) => OneShotInput::Text(text),
        (None, Some(file)) => OneShotInput::File(file),
        (None, None) => anyhow::bail!("either --text or --file is required"),
    };

    let config = ServerConfig::load()?;
    let registry = load_registry(&config).await?;
    let service = TranslationService::from_config(Arc::new(registry), &config);

    let translation = translate_once(&service, &pair, input).await?;

    match output {
        Some(path) => {
            tokio::fs::write(&path, translation.as_bytes())
                .await
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("✅ Translation written to {}", path.display());
        }
        None => println!("{}", translation),
    }

    Ok(())
}

/// Handle pairs command
pub async fn handle_pairs() -> anyhow::Result<()> {
    let config = ServerConfig::load()?;
    let registry = load_registry(&config).await?;

    for pair in &config.model_pairs {
        let marker = if registry.contains(pair) { "✅" } else { "❌" };
        println!("{} {}", marker, pair);
    }
    println!(
        "\n{} of {} configured pairs loaded",
        registry.len(),
        config.model_pairs.len()
    );

    Ok(())
}

/// Run one translation through the service, turning a failure into the same
/// message the HTTP layer would return
pub async fn translate_once(
    service: &TranslationService,
    pair: &str,
    input: OneShotInput,
) -> anyhow::Result<String> {
    let result = match input {
        OneShotInput::Text(text) => service
            .translate(pair, text)
            .await
            .map_err(|e| anyhow::anyhow!(e.user_message("Translation failed"))),
        OneShotInput::File(path) => {
            let content = read_input_file(&path).await?;
            service
                .translate_upload(pair, content)
                .await
                .map_err(|e| anyhow::anyhow!(e.user_message("File translation failed")))
        }
    }?;

    Ok(result.text)
}

async fn read_input_file(path: &Path) -> anyhow::Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))
}

/// Load every configured pair off the async runtime
async fn load_registry(config: &ServerConfig) -> anyhow::Result<ModelRegistry> {
    let pairs = config.model_pairs.clone();
    let base_path = config.model_base_path.clone();

    info!(
        "Loading {} model(s) from {}",
        pairs.len(),
        base_path.display()
    );

    tokio::task::spawn_blocking(move || {
        let loader = crate::engines::default_loader();
        ModelRegistry::load(&pairs, &base_path, loader.as_ref())
    })
    .await
    .context("model loading was interrupted")
}
