//! MarianMT checkpoints on candle

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::marian::{self, MTModel};
use parking_lot::Mutex;
use sentencepiece::SentencePieceProcessor;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::vocab::MarianVocab;
use crate::core::engine::{ModelLoader, TranslationEngine};
use crate::core::models::Translation;

const CONFIG_FILE: &str = "config.json";
const GENERATION_CONFIG_FILE: &str = "generation_config.json";
const VOCAB_FILE: &str = "vocab.json";
const SOURCE_SPM_FILE: &str = "source.spm";
const SAFETENSORS_FILE: &str = "model.safetensors";
const PYTORCH_FILE: &str = "pytorch_model.bin";

const DEFAULT_GENERATION_MAX_LENGTH: usize = 512;

/// Loads MarianMT checkpoints from a local directory onto the CPU
#[derive(Debug, Clone, Copy, Default)]
pub struct MarianLoader;

impl ModelLoader for MarianLoader {
    fn load(&self, model_dir: &Path) -> anyhow::Result<Arc<dyn TranslationEngine>> {
        Ok(Arc::new(MarianEngine::load(model_dir)?))
    }
}

/// Decoding settings read from the checkpoint
#[derive(Debug, Clone, PartialEq)]
struct GenerationSettings {
    decoder_start_token_id: u32,
    eos_token_id: u32,
    forced_eos_token_id: u32,
    max_length: usize,
    /// Ids the model must never emit (Marian bans its pad token)
    banned_token_ids: Vec<u32>,
    /// Beam width the checkpoint asks for; decoding is always greedy
    num_beams: usize,
}

impl GenerationSettings {
    fn new(config: &marian::Config, raw: &Value) -> Self {
        let max_length = raw
            .get("max_length")
            .and_then(Value::as_u64)
            .map(|v| v as usize)
            .unwrap_or(DEFAULT_GENERATION_MAX_LENGTH);

        // Only single-token bans matter for greedy decoding
        let banned_token_ids = raw
            .get("bad_words_ids")
            .and_then(Value::as_array)
            .map(|sequences| {
                sequences
                    .iter()
                    .filter_map(Value::as_array)
                    .filter(|seq| seq.len() == 1)
                    .filter_map(|seq| seq[0].as_u64())
                    .map(|id| id as u32)
                    .collect()
            })
            .unwrap_or_default();

        let num_beams = raw
            .get("num_beams")
            .and_then(Value::as_u64)
            .map(|v| v as usize)
            .unwrap_or(1);

        Self {
            decoder_start_token_id: config.decoder_start_token_id,
            eos_token_id: config.eos_token_id,
            forced_eos_token_id: config.forced_eos_token_id,
            max_length,
            banned_token_ids,
            num_beams,
        }
    }
}

/// Mutable inference state; the decoder keeps a KV cache between steps
struct MarianState {
    model: MTModel,
    source_spm: SentencePieceProcessor,
}

/// One MarianMT checkpoint: source sentencepiece model, `vocab.json` and the
/// candle encoder/decoder.
///
/// Decoding is greedy (argmax at every step); `num_beams` from the checkpoint
/// is not honoured. Requests are serialized on the model lock.
pub struct MarianEngine {
    name: String,
    vocab: MarianVocab,
    generation: GenerationSettings,
    device: Device,
    state: Mutex<MarianState>,
}

impl MarianEngine {
    /// Load `config.json`, `vocab.json`, `source.spm` and the weights from `model_dir`
    pub fn load(model_dir: &Path) -> anyhow::Result<Self> {
        if !model_dir.is_dir() {
            anyhow::bail!("model directory not found: {}", model_dir.display());
        }

        let raw_config = read_json(&model_dir.join(CONFIG_FILE))?;
        let config = marian_config(&raw_config)?;

        let mut generation_source = raw_config.clone();
        let generation_path = model_dir.join(GENERATION_CONFIG_FILE);
        if generation_path.is_file() {
            merge_objects(&mut generation_source, read_json(&generation_path)?);
        }
        let generation = GenerationSettings::new(&config, &generation_source);
        if generation.num_beams > 1 {
            debug!(
                "{}: num_beams = {} ignored, decoding greedily",
                model_dir.display(),
                generation.num_beams
            );
        }

        let vocab = MarianVocab::from_file(&model_dir.join(VOCAB_FILE))?;

        let spm_path = model_dir.join(SOURCE_SPM_FILE);
        let source_spm = SentencePieceProcessor::open(&spm_path)
            .map_err(|e| anyhow::anyhow!("failed to load {}: {}", spm_path.display(), e))?;

        let device = Device::Cpu;
        let vb = load_weights(model_dir, &device)?;
        let model = MTModel::new(&config, vb).context("failed to build Marian model")?;

        let name = model_dir
            .file_name()
            .map(|n| format!("marian:{}", n.to_string_lossy()))
            .unwrap_or_else(|| "marian".to_string());

        info!(
            "{} ready: {} vocab entries, generation max_length {}",
            name,
            vocab.len(),
            generation.max_length
        );

        Ok(Self {
            name,
            vocab,
            generation,
            device,
            state: Mutex::new(MarianState { model, source_spm }),
        })
    }
}

impl TranslationEngine for MarianEngine {
    fn translate(&self, text: &str, max_length: usize) -> anyhow::Result<Translation> {
        let mut state = self.state.lock();

        // A leading `>>xx<<` target code is one vocabulary token, never segmented
        let (language_code, rest) = self.vocab.split_language_code(text);
        let segmented = state
            .source_spm
            .encode(rest)
            .map_err(|e| anyhow::anyhow!("tokenization failed: {}", e))?;
        let pieces: Vec<&str> = language_code
            .into_iter()
            .chain(segmented.iter().map(|p| p.piece.as_str()))
            .collect();
        let encoded = self.vocab.encode_pieces(&pieces, max_length);

        debug!(
            "{}: {} source tokens (truncated: {})",
            self.name,
            encoded.ids.len(),
            encoded.truncated
        );

        let output_ids = generate(&mut state.model, &self.generation, &encoded.ids, &self.device)
            .context("generation failed")?;
        drop(state);

        Ok(Translation::new(self.vocab.decode(&output_ids))
            .with_truncation(encoded.truncated)
            .with_input_tokens(encoded.ids.len()))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Greedy decoding with the library's argmax sampler.
///
/// Output starts with `decoder_start_token_id` and holds at most
/// `settings.max_length` ids; it stops early on `eos` or `forced_eos`.
fn generate(
    model: &mut MTModel,
    settings: &GenerationSettings,
    input_ids: &[u32],
    device: &Device,
) -> candle_core::Result<Vec<u32>> {
    model.reset_kv_cache();

    let input = Tensor::new(input_ids, device)?.unsqueeze(0)?;
    let encoder_xs = model.encoder().forward(&input, 0)?;

    let mut sampler = LogitsProcessor::new(0, None, None);
    let mut tokens = vec![settings.decoder_start_token_id];

    for step in 0..settings.max_length.saturating_sub(1) {
        let context_size = if step == 0 { tokens.len() } else { 1 };
        let start_pos = tokens.len() - context_size;
        let decoder_input = Tensor::new(&tokens[start_pos..], device)?.unsqueeze(0)?;

        let logits = model.decode(&decoder_input, &encoder_xs, start_pos)?;
        let logits = logits.squeeze(0)?;
        let logits = logits.get(logits.dim(0)? - 1)?;
        let logits = ban_tokens(&logits, &settings.banned_token_ids, device)?;

        let next = sampler.sample(&logits)?;
        tokens.push(next);
        if next == settings.eos_token_id || next == settings.forced_eos_token_id {
            break;
        }
    }

    Ok(tokens)
}

/// Set the logits of `banned` ids to `-inf` so they can never be picked
fn ban_tokens(logits: &Tensor, banned: &[u32], device: &Device) -> candle_core::Result<Tensor> {
    if banned.is_empty() {
        return Ok(logits.clone());
    }
    let mut values = logits.to_dtype(DType::F32)?.to_vec1::<f32>()?;
    for &id in banned {
        if let Some(value) = values.get_mut(id as usize) {
            *value = f32::NEG_INFINITY;
        }
    }
    Tensor::new(values, device)
}

fn read_json(path: &Path) -> anyhow::Result<Value> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
}

/// Copy top-level keys of `extra` over `base`
fn merge_objects(base: &mut Value, extra: Value) {
    if let (Some(base), Value::Object(extra)) = (base.as_object_mut(), extra) {
        for (key, value) in extra {
            base.insert(key, value);
        }
    }
}

/// Parse `config.json`, filling keys older Marian exports leave out
fn marian_config(raw: &Value) -> anyhow::Result<marian::Config> {
    let mut raw = raw.clone();
    let obj = raw
        .as_object_mut()
        .context("config.json is not a JSON object")?;

    let eos = obj.get("eos_token_id").cloned().unwrap_or(json!(0));
    let defaults = [
        ("decoder_vocab_size", obj.get("vocab_size").cloned().unwrap_or(Value::Null)),
        ("forced_eos_token_id", eos),
        ("use_cache", json!(true)),
        ("is_encoder_decoder", json!(true)),
        ("share_encoder_decoder_embeddings", json!(true)),
        ("activation_function", json!("swish")),
        ("scale_embedding", json!(true)),
    ];
    for (key, value) in defaults {
        if obj.get(key).map_or(true, Value::is_null) {
            obj.insert(key.to_string(), value);
        }
    }

    serde_json::from_value(raw).context("config.json is not a Marian configuration")
}

fn load_weights(model_dir: &Path, device: &Device) -> anyhow::Result<VarBuilder<'static>> {
    let safetensors = model_dir.join(SAFETENSORS_FILE);
    if safetensors.is_file() {
        let tensors = candle_core::safetensors::load(&safetensors, device)
            .with_context(|| format!("failed to load {}", safetensors.display()))?;
        return Ok(VarBuilder::from_tensors(tensors, DType::F32, device));
    }

    let pytorch = model_dir.join(PYTORCH_FILE);
    if pytorch.is_file() {
        return VarBuilder::from_pth(&pytorch, DType::F32, device)
            .with_context(|| format!("failed to load {}", pytorch.display()));
    }

    anyhow::bail!(
        "no {} or {} in {}",
        SAFETENSORS_FILE,
        PYTORCH_FILE,
        model_dir.display()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opus_mt_config() -> Value {
        json!({
            "vocab_size": 59514,
            "max_position_embeddings": 512,
            "encoder_layers": 6,
            "encoder_ffn_dim": 2048,
            "encoder_attention_heads": 8,
            "decoder_layers": 6,
            "decoder_ffn_dim": 2048,
            "decoder_attention_heads": 8,
            "d_model": 512,
            "decoder_start_token_id": 59513,
            "pad_token_id": 59513,
            "eos_token_id": 0,
            "max_length": 256,
            "bad_words_ids": [[59513]]
        })
    }

    #[test]
    fn test_marian_config_fills_missing_keys() {
        let config = marian_config(&opus_mt_config()).unwrap();

        assert_eq!(config.vocab_size, 59514);
        assert_eq!(config.decoder_vocab_size, Some(59514));
        assert_eq!(config.forced_eos_token_id, 0);
        assert!(config.share_encoder_decoder_embeddings);
        assert!(matches!(
            config.activation_function,
            candle_nn::Activation::Swish
        ));
    }

    #[test]
    fn test_marian_config_rejects_non_objects() {
        assert!(marian_config(&json!([1, 2, 3])).is_err());
        assert!(marian_config(&json!({"vocab_size": 10})).is_err());
    }

    #[test]
    fn test_generation_settings() {
        let raw = opus_mt_config();
        let config = marian_config(&raw).unwrap();
        let settings = GenerationSettings::new(&config, &raw);

        assert_eq!(settings.decoder_start_token_id, 59513);
        assert_eq!(settings.eos_token_id, 0);
        assert_eq!(settings.max_length, 256);
        assert_eq!(settings.banned_token_ids, vec![59513]);
    }

    #[test]
    fn test_generation_config_overrides_config() {
        let mut raw = opus_mt_config();
        merge_objects(&mut raw, json!({"max_length": 128, "num_beams": 4}));
        let config = marian_config(&raw).unwrap();

        let settings = GenerationSettings::new(&config, &raw);
        assert_eq!(settings.max_length, 128);
        assert_eq!(settings.num_beams, 4);

        assert_eq!(GenerationSettings::new(&config, &opus_mt_config()).num_beams, 1);
    }

    const TINY_VOCAB: u32 = 16;
    const TINY_START: u32 = 15;
    const TINY_EOS: u32 = 0;

    /// Randomly initialised single-layer Marian model, enough to run the decode loop
    fn tiny_model() -> MTModel {
        let raw = json!({
            "vocab_size": TINY_VOCAB,
            "max_position_embeddings": 32,
            "encoder_layers": 1,
            "encoder_ffn_dim": 16,
            "encoder_attention_heads": 2,
            "decoder_layers": 1,
            "decoder_ffn_dim": 16,
            "decoder_attention_heads": 2,
            "d_model": 8,
            "decoder_start_token_id": TINY_START,
            "pad_token_id": TINY_START,
            "eos_token_id": TINY_EOS
        });
        let config = marian_config(&raw).unwrap();
        let varmap = candle_nn::VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        MTModel::new(&config, vb).unwrap()
    }

    fn tiny_settings(max_length: usize, banned_token_ids: Vec<u32>) -> GenerationSettings {
        GenerationSettings {
            decoder_start_token_id: TINY_START,
            eos_token_id: TINY_EOS,
            forced_eos_token_id: TINY_EOS,
            max_length,
            banned_token_ids,
            num_beams: 1,
        }
    }

    #[test]
    fn test_ban_tokens_sets_negative_infinity() {
        let logits = Tensor::new(&[1f32, 2., 3., 4.], &Device::Cpu).unwrap();

        let banned = ban_tokens(&logits, &[1, 3, 99], &Device::Cpu).unwrap();
        assert_eq!(
            banned.to_vec1::<f32>().unwrap(),
            vec![1., f32::NEG_INFINITY, 3., f32::NEG_INFINITY]
        );

        let untouched = ban_tokens(&logits, &[], &Device::Cpu).unwrap();
        assert_eq!(untouched.to_vec1::<f32>().unwrap(), vec![1., 2., 3., 4.]);
    }

    #[test]
    fn test_generate_stops_at_max_length_without_banned_ids() {
        let mut model = tiny_model();
        // With eos banned the loop can only end on max_length
        let settings = tiny_settings(3, vec![TINY_EOS, TINY_START]);

        let tokens = generate(&mut model, &settings, &[3, 4, 5, TINY_EOS], &Device::Cpu).unwrap();
        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[0], TINY_START);
        assert!(tokens[1..].iter().all(|id| !settings.banned_token_ids.contains(id)));
        assert!(tokens.iter().all(|&id| id < TINY_VOCAB));
    }

    #[test]
    fn test_generate_stops_at_eos() {
        let mut model = tiny_model();
        // Everything but eos banned: the first step must emit it
        let settings = tiny_settings(8, (1..TINY_VOCAB).collect());

        let tokens = generate(&mut model, &settings, &[3, TINY_EOS], &Device::Cpu).unwrap();
        assert_eq!(tokens, vec![TINY_START, TINY_EOS]);

        // The cache is reset between calls
        let tokens = generate(&mut model, &settings, &[4, 5, TINY_EOS], &Device::Cpu).unwrap();
        assert_eq!(tokens, vec![TINY_START, TINY_EOS]);
    }

    #[test]
    fn test_load_reports_missing_artifacts() {
        let dir = tempfile::tempdir().unwrap();

        let err = MarianEngine::load(&dir.path().join("en-fr")).err().unwrap();
        assert!(err.to_string().contains("model directory not found"));

        let err = MarianEngine::load(dir.path()).err().unwrap();
        assert!(err.to_string().contains(CONFIG_FILE));

        std::fs::write(dir.path().join(CONFIG_FILE), opus_mt_config().to_string()).unwrap();
        let err = MarianEngine::load(dir.path()).err().unwrap();
        assert!(err.to_string().contains(VOCAB_FILE));
    }
}
