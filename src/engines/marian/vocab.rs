//! Marian `vocab.json` handling: piece ↔ id mapping, truncation and detokenization

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use regex::Regex;

const EOS_TOKEN: &str = "</s>";
const UNK_TOKEN: &str = "<unk>";
const PAD_TOKEN: &str = "<pad>";

/// Sentencepiece word-boundary marker
const WORD_BOUNDARY: char = '\u{2581}';

/// Target-language selector of multi-target checkpoints, e.g. `>>fra<<`
const LANGUAGE_CODE_PATTERN: &str = r"^>>[^<>]+<<";

/// Source ids ready for the encoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedInput {
    /// Piece ids followed by `</s>`
    pub ids: Vec<u32>,
    /// Pieces were dropped to fit `max_length`
    pub truncated: bool,
}

/// Piece ↔ id mapping of a Marian checkpoint
#[derive(Debug, Clone)]
pub struct MarianVocab {
    token_to_id: HashMap<String, u32>,
    id_to_token: HashMap<u32, String>,
    eos_id: u32,
    unk_id: u32,
    pad_id: u32,
    language_code: Regex,
}

impl MarianVocab {
    /// Read a `vocab.json` object of `piece: id` entries
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let map: HashMap<String, u32> = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Self::from_map(map)
    }

    /// Build from a piece → id map; `</s>`, `<unk>` and `<pad>` must be present
    pub fn from_map(token_to_id: HashMap<String, u32>) -> anyhow::Result<Self> {
        let special = |token: &str| {
            token_to_id
                .get(token)
                .copied()
                .with_context(|| format!("vocabulary has no {} token", token))
        };
        let eos_id = special(EOS_TOKEN)?;
        let unk_id = special(UNK_TOKEN)?;
        let pad_id = special(PAD_TOKEN)?;

        let id_to_token = token_to_id
            .iter()
            .map(|(token, id)| (*id, token.clone()))
            .collect();

        Ok(Self {
            token_to_id,
            id_to_token,
            eos_id,
            unk_id,
            pad_id,
            language_code: Regex::new(LANGUAGE_CODE_PATTERN)?,
        })
    }

    /// Id of `</s>`
    pub fn eos_id(&self) -> u32 {
        self.eos_id
    }

    /// Id of `<pad>`
    pub fn pad_id(&self) -> u32 {
        self.pad_id
    }

    /// Number of pieces
    pub fn len(&self) -> usize {
        self.token_to_id.len()
    }

    /// True when the vocabulary has no pieces
    pub fn is_empty(&self) -> bool {
        self.token_to_id.is_empty()
    }

    /// Split a leading `>>xx<<` target-language token off `text`.
    ///
    /// Only codes present in the vocabulary are split; anything else is left
    /// in the text for sentencepiece.
    pub fn split_language_code<'a>(&self, text: &'a str) -> (Option<&'a str>, &'a str) {
        match self.language_code.find(text) {
            Some(m) if self.token_to_id.contains_key(m.as_str()) => {
                (Some(m.as_str()), &text[m.end()..])
            }
            _ => (None, text),
        }
    }

    /// Map sentencepiece pieces to ids and append `</s>`, keeping at most
    /// `max_length` ids in total. Unknown pieces map to `<unk>`.
    pub fn encode_pieces<S: AsRef<str>>(&self, pieces: &[S], max_length: usize) -> EncodedInput {
        let budget = max_length.saturating_sub(1);
        let truncated = pieces.len() > budget;

        let mut ids: Vec<u32> = pieces
            .iter()
            .take(budget)
            .map(|piece| {
                self.token_to_id
                    .get(piece.as_ref())
                    .copied()
                    .unwrap_or(self.unk_id)
            })
            .collect();
        ids.push(self.eos_id);

        EncodedInput { ids, truncated }
    }

    /// Turn generated ids back into text, skipping special tokens
    pub fn decode(&self, ids: &[u32]) -> String {
        let text: String = ids
            .iter()
            .filter(|&&id| id != self.pad_id && id != self.eos_id && id != self.unk_id)
            .filter_map(|id| self.id_to_token.get(id))
            .map(String::as_str)
            .collect();

        text.replace(WORD_BOUNDARY, " ").trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab() -> MarianVocab {
        let entries = [
            ("</s>", 0),
            ("<unk>", 1),
            ("▁Bonjour", 2),
            ("▁le", 3),
            ("▁monde", 4),
            (",", 5),
            ("▁hello", 6),
            ("▁world", 7),
            ("<pad>", 8),
        ];
        let map = entries
            .iter()
            .map(|(token, id)| (token.to_string(), *id))
            .collect();
        MarianVocab::from_map(map).unwrap()
    }

    #[test]
    fn test_encode_appends_eos_and_maps_unknowns() {
        let vocab = vocab();
        let encoded = vocab.encode_pieces(&["▁hello", "▁there", "▁world"], 512);

        assert_eq!(encoded.ids, vec![6, 1, 7, 0]);
        assert!(!encoded.truncated);
    }

    #[test]
    fn test_encode_truncates_to_max_length_including_eos() {
        let vocab = vocab();
        let encoded = vocab.encode_pieces(&["▁hello", "▁world", "▁hello"], 3);

        assert_eq!(encoded.ids, vec![6, 7, 0]);
        assert!(encoded.truncated);

        // Exactly at the limit is not a truncation
        let encoded = vocab.encode_pieces(&["▁hello", "▁world"], 3);
        assert!(!encoded.truncated);
    }

    #[test]
    fn test_encode_empty_input() {
        let vocab = vocab();
        let encoded = vocab.encode_pieces::<&str>(&[], 512);
        assert_eq!(encoded.ids, vec![0]);
    }

    #[test]
    fn test_language_code_is_one_token() {
        let entries = [
            ("</s>", 0),
            ("<unk>", 1),
            ("<pad>", 2),
            (">>fra<<", 3),
            ("▁hello", 4),
            ("▁world", 5),
        ];
        let map = entries
            .iter()
            .map(|(token, id)| (token.to_string(), *id))
            .collect();
        let vocab = MarianVocab::from_map(map).unwrap();

        let (code, rest) = vocab.split_language_code(">>fra<< hello world");
        assert_eq!(code, Some(">>fra<<"));
        assert_eq!(rest, " hello world");

        let pieces: Vec<&str> = code.into_iter().chain(["▁hello", "▁world"]).collect();
        let encoded = vocab.encode_pieces(&pieces, 512);
        assert_eq!(encoded.ids, vec![3, 4, 5, 0]);

        // The code counts toward the budget and survives truncation
        let encoded = vocab.encode_pieces(&pieces, 2);
        assert_eq!(encoded.ids, vec![3, 0]);
        assert!(encoded.truncated);
    }

    #[test]
    fn test_unknown_or_misplaced_language_code_stays_in_text() {
        let vocab = vocab();

        assert_eq!(vocab.split_language_code(">>xyz<< hi"), (None, ">>xyz<< hi"));
        assert_eq!(vocab.split_language_code("hi >>fra<<"), (None, "hi >>fra<<"));
        assert_eq!(vocab.split_language_code(">><< hi"), (None, ">><< hi"));
        assert_eq!(vocab.split_language_code(""), (None, ""));
    }

    #[test]
    fn test_decode_skips_special_tokens() {
        let vocab = vocab();
        assert_eq!(vocab.decode(&[8, 2, 5, 3, 4, 1, 0]), "Bonjour, le monde");
        assert_eq!(vocab.decode(&[8, 0]), "");
    }

    #[test]
    fn test_missing_special_token_is_rejected() {
        let map = [("</s>".to_string(), 0), ("<unk>".to_string(), 1)]
            .into_iter()
            .collect();
        let err = MarianVocab::from_map(map).unwrap_err();
        assert!(err.to_string().contains("<pad>"));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vocab.json");
        std::fs::write(&path, r#"{"</s>": 0, "<unk>": 1, "<pad>": 2, "▁hi": 3}"#).unwrap();

        let vocab = MarianVocab::from_file(&path).unwrap();
        assert_eq!(vocab.len(), 4);
        assert_eq!(vocab.pad_id(), 2);
        assert_eq!(vocab.eos_id(), 0);

        assert!(MarianVocab::from_file(&dir.path().join("missing.json")).is_err());
    }
}
