//! Core data models for translation

use std::fmt;

/// Identifier of a translation direction, e.g. `en-fr`.
///
/// The identifier doubles as the name of the directory holding the model
/// artifacts, so it is kept verbatim rather than split into codes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LanguagePair(String);

impl LanguagePair {
    /// Wrap an identifier as given
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Source and target codes when the identifier has the usual `src-tgt` shape
    pub fn codes(&self) -> Option<(&str, &str)> {
        let (source, target) = self.0.split_once('-')?;
        if source.is_empty() || target.is_empty() {
            return None;
        }
        Some((source, target))
    }
}

impl fmt::Display for LanguagePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LanguagePair {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Output of a single generation call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translation {
    /// Translated text
    pub text: String,
    /// Input was cut to the token limit before generation
    pub truncated: bool,
    /// Source tokens fed to the model, end-of-sequence included
    pub input_tokens: usize,
}

impl Translation {
    /// Untruncated translation of `text`
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            truncated: false,
            input_tokens: 0,
        }
    }

    /// Set the truncation flag
    pub fn with_truncation(mut self, truncated: bool) -> Self {
        self.truncated = truncated;
        self
    }

    /// Set the source token count
    pub fn with_input_tokens(mut self, input_tokens: usize) -> Self {
        self.input_tokens = input_tokens;
        self
    }
}

/// Name of the attachment returned for an uploaded file
pub fn translated_file_name(original: Option<&str>) -> String {
    let name = original
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or("upload.txt");
    format!("translated_{}", name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_pair_codes() {
        assert_eq!(LanguagePair::from("en-fr").codes(), Some(("en", "fr")));
        assert_eq!(LanguagePair::from("en-ROMANCE").codes(), Some(("en", "ROMANCE")));
        assert_eq!(LanguagePair::from("enfr").codes(), None);
        assert_eq!(LanguagePair::from("-fr").codes(), None);
        assert_eq!(LanguagePair::from("en-fr").to_string(), "en-fr");
    }

    #[test]
    fn test_translation_builder() {
        let t = Translation::new("bonjour")
            .with_truncation(true)
            .with_input_tokens(512);
        assert_eq!(t.text, "bonjour");
        assert!(t.truncated);
        assert_eq!(t.input_tokens, 512);
    }

    #[test]
    fn test_translated_file_name() {
        assert_eq!(translated_file_name(Some("notes.txt")), "translated_notes.txt");
        assert_eq!(translated_file_name(Some("  ")), "translated_upload.txt");
        assert_eq!(translated_file_name(None), "translated_upload.txt");
    }
}
