//! Startup-built registry of loaded translation models

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::core::engine::{ModelLoader, TranslationEngine};
use crate::core::models::LanguagePair;

/// Immutable mapping from language pair to loaded engine.
///
/// Built once before the server starts and shared behind an `Arc`; a pair is
/// only present if its tokenizer and model both loaded.
pub struct ModelRegistry {
    entries: Vec<(LanguagePair, Arc<dyn TranslationEngine>)>,
}

impl ModelRegistry {
    /// Registry with no pairs; every lookup misses
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Load one engine per pair from `base_path/<pair>`.
    ///
    /// Failures are logged and the pair is skipped; loading always continues
    /// with the next pair.
    pub fn load(pairs: &[String], base_path: &Path, loader: &dyn ModelLoader) -> Self {
        let mut entries: Vec<(LanguagePair, Arc<dyn TranslationEngine>)> = Vec::new();

        for pair in pairs {
            let pair = LanguagePair::new(pair.as_str());
            if entries.iter().any(|(existing, _)| *existing == pair) {
                continue;
            }

            let model_dir = Self::model_dir(base_path, &pair);
            info!("Loading model for {} from {} ...", pair, model_dir.display());

            match loader.load(&model_dir) {
                Ok(engine) => {
                    info!("Successfully loaded model for {} ({})", pair, engine.name());
                    entries.push((pair, engine));
                }
                Err(e) => {
                    warn!("Failed to load model for {}: {:#}", pair, e);
                }
            }
        }

        let registry = Self { entries };
        info!(
            "All models loaded. Available pairs: {:?}",
            registry.available_pairs()
        );
        registry
    }

    /// Absolute directory holding the artifacts for `pair`
    pub fn model_dir(base_path: &Path, pair: &LanguagePair) -> PathBuf {
        let joined = base_path.join(pair.as_str());
        std::path::absolute(&joined).unwrap_or(joined)
    }

    /// Engine loaded for `pair`, if any
    pub fn get(&self, pair: &str) -> Option<Arc<dyn TranslationEngine>> {
        self.entries
            .iter()
            .find(|(key, _)| key.as_str() == pair)
            .map(|(_, engine)| engine.clone())
    }

    /// Whether a model is loaded for `pair`
    pub fn contains(&self, pair: &str) -> bool {
        self.entries.iter().any(|(key, _)| key.as_str() == pair)
    }

    /// Loaded pairs in configuration order
    pub fn available_pairs(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|(key, _)| key.as_str().to_string())
            .collect()
    }

    /// Loaded pairs in configuration order
    pub fn pairs(&self) -> impl Iterator<Item = &LanguagePair> {
        self.entries.iter().map(|(key, _)| key)
    }

    /// Number of loaded pairs
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no pair loaded
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("pairs", &self.available_pairs())
            .finish()
    }
}
