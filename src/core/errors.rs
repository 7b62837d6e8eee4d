//! Error types for translation requests

use thiserror::Error;

/// Reasons a translation request can fail.
///
/// The set is closed: the HTTP layer maps every variant to an in-band
/// `{"error": ...}` payload and exposes [`TranslateError::kind`] so callers can
/// branch without parsing the message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TranslateError {
    /// No model is loaded for the requested pair
    #[error(
        "Language pair '{pair}' not supported. Available pairs: {}",
        format_pair_list(.available)
    )]
    UnsupportedPair {
        /// Identifier from the request
        pair: String,
        /// Pairs that did load
        available: Vec<String>,
    },

    /// Upload exceeded the configured byte limit
    #[error("File too large. Maximum size: {}MB", .limit_bytes / 1024 / 1024)]
    PayloadTooLarge {
        /// Configured limit
        limit_bytes: usize,
    },

    /// Request payload could not be decoded (bad multipart, invalid UTF-8)
    #[error("{message}")]
    DecodeFailure {
        /// What could not be decoded
        message: String,
    },

    /// Tokenization, generation or detokenization failed
    #[error("{message}")]
    GenerationFailure {
        /// Error reported by the engine
        message: String,
    },
}

impl TranslateError {
    /// `DecodeFailure` with `message`
    pub fn decode(message: impl Into<String>) -> Self {
        TranslateError::DecodeFailure {
            message: message.into(),
        }
    }

    /// `GenerationFailure` with `message`
    pub fn generation(message: impl Into<String>) -> Self {
        TranslateError::GenerationFailure {
            message: message.into(),
        }
    }

    /// Stable machine-readable name of the variant
    pub fn kind(&self) -> &'static str {
        match self {
            TranslateError::UnsupportedPair { .. } => "unsupported_pair",
            TranslateError::PayloadTooLarge { .. } => "payload_too_large",
            TranslateError::DecodeFailure { .. } => "decode_failure",
            TranslateError::GenerationFailure { .. } => "generation_failure",
        }
    }

    /// Message shown to API callers.
    ///
    /// Pair and size errors are reported as-is; decode and generation failures
    /// are prefixed with the endpoint's failure label, e.g.
    /// `"File translation failed: invalid utf-8 sequence ..."`.
    pub fn user_message(&self, failure_label: &str) -> String {
        match self {
            TranslateError::UnsupportedPair { .. } | TranslateError::PayloadTooLarge { .. } => {
                self.to_string()
            }
            TranslateError::DecodeFailure { message }
            | TranslateError::GenerationFailure { message } => {
                format!("{}: {}", failure_label, message)
            }
        }
    }
}

/// Renders pairs the way the API has always listed them: `['en-fr', 'de-en']`
fn format_pair_list(pairs: &[String]) -> String {
    let quoted: Vec<String> = pairs.iter().map(|p| format!("'{}'", p)).collect();
    format!("[{}]", quoted.join(", "))
}

/// Result type for translation operations
pub type Result<T> = std::result::Result<T, TranslateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_pair_message() {
        let err = TranslateError::UnsupportedPair {
            pair: "de-en".to_string(),
            available: vec!["en-fr".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Language pair 'de-en' not supported. Available pairs: ['en-fr']"
        );
        assert_eq!(err.kind(), "unsupported_pair");
    }

    #[test]
    fn test_unsupported_pair_lists_several_and_none() {
        let err = TranslateError::UnsupportedPair {
            pair: "xx-yy".to_string(),
            available: vec!["en-fr".to_string(), "fr-en".to_string()],
        };
        assert!(err.to_string().ends_with("Available pairs: ['en-fr', 'fr-en']"));

        let err = TranslateError::UnsupportedPair {
            pair: "en-fr".to_string(),
            available: vec![],
        };
        assert!(err.to_string().ends_with("Available pairs: []"));
    }

    #[test]
    fn test_payload_too_large_reports_mib() {
        let err = TranslateError::PayloadTooLarge {
            limit_bytes: 10_485_760,
        };
        assert_eq!(err.to_string(), "File too large. Maximum size: 10MB");

        // Integer division, same as the limit was always reported
        let err = TranslateError::PayloadTooLarge {
            limit_bytes: 1_500_000,
        };
        assert_eq!(err.to_string(), "File too large. Maximum size: 1MB");
    }

    #[test]
    fn test_user_message_prefixes_failures_only() {
        let err = TranslateError::generation("model exploded");
        assert_eq!(
            err.user_message("Translation failed"),
            "Translation failed: model exploded"
        );

        let err = TranslateError::decode("invalid utf-8 sequence");
        assert_eq!(
            err.user_message("File translation failed"),
            "File translation failed: invalid utf-8 sequence"
        );
        assert_eq!(err.kind(), "decode_failure");

        let err = TranslateError::PayloadTooLarge { limit_bytes: 2 * 1024 * 1024 };
        assert_eq!(
            err.user_message("File translation failed"),
            "File too large. Maximum size: 2MB"
        );
    }
}
