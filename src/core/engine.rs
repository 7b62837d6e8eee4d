//! Seam between the service and the model library

use std::path::Path;
use std::sync::Arc;

use crate::core::models::Translation;

/// A loaded tokenizer + model able to translate one direction.
///
/// Implementations are blocking; the service runs them on the blocking pool.
pub trait TranslationEngine: Send + Sync {
    /// Translate `text`, truncating its encoding to `max_length` tokens
    fn translate(&self, text: &str, max_length: usize) -> anyhow::Result<Translation>;

    /// Short name used in logs
    fn name(&self) -> &str;
}

/// Loads an engine from the artifacts in a local directory.
///
/// Loaders must never reach out to the network.
pub trait ModelLoader: Send + Sync {
    fn load(&self, model_dir: &Path) -> anyhow::Result<Arc<dyn TranslationEngine>>;
}

impl<F> ModelLoader for F
where
    F: Fn(&Path) -> anyhow::Result<Arc<dyn TranslationEngine>> + Send + Sync,
{
    fn load(&self, model_dir: &Path) -> anyhow::Result<Arc<dyn TranslationEngine>> {
        self(model_dir)
    }
}
