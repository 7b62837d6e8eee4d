//! Marian Translator - HTTP translation service over pretrained MarianMT models
//!
//! Models are loaded once per configured language pair at startup and served
//! through a JSON endpoint and a file upload endpoint.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod core;
pub mod engines;
pub mod server;

// Re-export key types for convenience
pub use core::{
    config::ServerConfig,
    engine::{ModelLoader, TranslationEngine},
    errors::TranslateError,
    models::{LanguagePair, Translation},
    registry::ModelRegistry,
    service::TranslationService,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
