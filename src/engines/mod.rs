//! Model engines backing the translation service

pub mod marian;

use crate::core::engine::ModelLoader;

/// Loader used by the binary for every configured pair
#[cfg(feature = "marian")]
pub fn default_loader() -> Box<dyn ModelLoader> {
    Box::new(marian::MarianLoader)
}

/// Without the `marian` feature every pair fails to load and is skipped
#[cfg(not(feature = "marian"))]
pub fn default_loader() -> Box<dyn ModelLoader> {
    use std::path::Path;
    use std::sync::Arc;

    use crate::core::engine::TranslationEngine;

    tracing::warn!("Built without the `marian` feature, no model can be loaded");
    Box::new(
        |dir: &Path| -> anyhow::Result<Arc<dyn TranslationEngine>> {
            anyhow::bail!(
                "cannot load {}: built without the `marian` feature",
                dir.display()
            )
        },
    )
}
