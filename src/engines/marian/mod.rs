//! MarianMT engine: sentencepiece segmentation, `vocab.json` ids and a candle
//! encoder/decoder

pub mod vocab;

#[cfg(feature = "marian")]
mod model;

#[cfg(feature = "marian")]
pub use model::{MarianEngine, MarianLoader};

pub use vocab::{EncodedInput, MarianVocab};
