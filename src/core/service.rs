//! Translation service over the model registry

use std::any::Any;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::core::config::ServerConfig;
use crate::core::engine::TranslationEngine;
use crate::core::errors::{Result, TranslateError};
use crate::core::models::Translation;
use crate::core::registry::ModelRegistry;

/// Translates text with the engine registered for a language pair.
///
/// Cheap to clone; all clones share one registry.
#[derive(Debug, Clone)]
pub struct TranslationService {
    registry: Arc<ModelRegistry>,
    max_text_length: usize,
    max_file_size: usize,
}

impl TranslationService {
    /// Service over `registry` with the given token and upload limits
    pub fn new(registry: Arc<ModelRegistry>, max_text_length: usize, max_file_size: usize) -> Self {
        Self {
            registry,
            max_text_length,
            max_file_size,
        }
    }

    /// Service with the limits from `config`
    pub fn from_config(registry: Arc<ModelRegistry>, config: &ServerConfig) -> Self {
        Self::new(registry, config.max_text_length, config.max_file_size)
    }

    /// Shared model registry
    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Upload limit in bytes
    pub fn max_file_size(&self) -> usize {
        self.max_file_size
    }

    /// Fails with `UnsupportedPair` unless a model is loaded for `pair`
    pub fn ensure_supported(&self, pair: &str) -> Result<()> {
        self.engine_for(pair).map(|_| ())
    }

    /// Fails with `PayloadTooLarge` when `len` exceeds the upload limit
    pub fn check_upload_size(&self, len: usize) -> Result<()> {
        if len > self.max_file_size {
            return Err(TranslateError::PayloadTooLarge {
                limit_bytes: self.max_file_size,
            });
        }
        Ok(())
    }

    /// Translate `text` with the model for `pair`.
    ///
    /// Generation runs on the blocking pool; engine errors and panics both come
    /// back as `GenerationFailure`.
    pub async fn translate(&self, pair: &str, text: String) -> Result<Translation> {
        let engine = self.engine_for(pair)?;
        let max_length = self.max_text_length;

        debug!("Translating {} chars with {}", text.chars().count(), pair);
        let outcome =
            tokio::task::spawn_blocking(move || engine.translate(&text, max_length)).await;

        match outcome {
            Ok(Ok(translation)) => {
                if translation.truncated {
                    warn!(
                        "Input for {} truncated to {} tokens before generation",
                        pair, max_length
                    );
                }
                Ok(translation)
            }
            Ok(Err(e)) => {
                warn!("Translation with {} failed: {:#}", pair, e);
                Err(TranslateError::generation(format!("{:#}", e)))
            }
            Err(join_error) => {
                let message = if join_error.is_panic() {
                    panic_message(join_error.into_panic())
                } else {
                    join_error.to_string()
                };
                warn!("Translation with {} aborted: {}", pair, message);
                Err(TranslateError::generation(message))
            }
        }
    }

    /// Translate an uploaded file: pair check, size check, UTF-8 decode, then
    /// the same generation path as inline text
    pub async fn translate_upload(&self, pair: &str, content: Vec<u8>) -> Result<Translation> {
        self.ensure_supported(pair)?;
        self.check_upload_size(content.len())?;

        let text = String::from_utf8(content)
            .map_err(|e| TranslateError::decode(e.utf8_error().to_string()))?;

        self.translate(pair, text).await
    }

    fn engine_for(&self, pair: &str) -> Result<Arc<dyn TranslationEngine>> {
        self.registry
            .get(pair)
            .ok_or_else(|| TranslateError::UnsupportedPair {
                pair: pair.to_string(),
                available: self.registry.available_pairs(),
            })
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "generation panicked".to_string()
    }
}
