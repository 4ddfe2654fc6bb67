//! BERT token-classification backend
//!
//! Runs a Hugging Face `*ForTokenClassification` checkpoint with candle: the
//! BERT encoder followed by the linear `classifier` head. Tags are argmaxed
//! per word-piece and merged into spans with [`decode_bio`].
//!
//! Default model: osiria/bert-italian-cased-ner (PER/LOC/ORG/MISC)

use anyhow::{Context, Result};
use candle_core::{DType, Device, Module, Tensor, D};
use candle_nn::{Linear, VarBuilder};
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use hf_hub::api::sync::ApiBuilder;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokenizers::Tokenizer;

use crate::ner::{decode_bio, EntityRecognizer, EntitySpan, TaggedPiece};

/// Model used when none is configured
pub const DEFAULT_NER_MODEL: &str = "osiria/bert-italian-cased-ner";

/// Word-pieces per window, leaving room for CLS and SEP
const MAX_PIECES: usize = 510;

/// The parts of config.json the classifier head needs
#[derive(Debug, Deserialize)]
struct HeadConfig {
    hidden_size: usize,
    #[serde(default)]
    id2label: HashMap<String, String>,
}

/// Named entity recogniser backed by a BERT token classifier
pub struct BertEntityRecognizer {
    model: BertModel,
    classifier: Linear,
    tokenizer: Tokenizer,
    labels: Vec<String>,
    cls_id: u32,
    sep_id: u32,
    device: Device,
    name: String,
}

impl BertEntityRecognizer {
    /// Load from a local directory or a Hugging Face model id
    pub fn from_pretrained(model_id: &str, device: &Device) -> Result<Self> {
        let path = Path::new(model_id);
        if path.is_dir() {
            tracing::info!("Loading NER model from local path: {}", model_id);
            return Self::from_dir(path, device);
        }
        if path.is_absolute() || model_id.starts_with('.') {
            anyhow::bail!("Model directory not found: {model_id}");
        }

        match Self::try_hf_hub(model_id, device) {
            Ok(recognizer) => return Ok(recognizer),
            Err(e) => {
                tracing::debug!("hf-hub download failed: {:#}, trying manual download", e);
            }
        }

        Self::try_manual_download(model_id, device)
    }

    /// Load from a directory holding config.json, a tokenizer and weights
    pub fn from_dir(dir: &Path, device: &Device) -> Result<Self> {
        let config_path = dir.join("config.json");
        if !config_path.exists() {
            anyhow::bail!(
                "config.json not found in {}. Expected files: config.json, tokenizer.json or vocab.txt, model.safetensors or pytorch_model.bin",
                dir.display()
            );
        }
        let tokenizer_path = ["tokenizer.json", "vocab.txt"]
            .iter()
            .map(|f| dir.join(f))
            .find(|p| p.exists())
            .with_context(|| format!("No tokenizer.json or vocab.txt in {}", dir.display()))?;
        let weights_path = ["model.safetensors", "pytorch_model.bin"]
            .iter()
            .map(|f| dir.join(f))
            .find(|p| p.exists())
            .with_context(|| format!("No model weights in {}", dir.display()))?;

        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| dir.display().to_string());
        Self::from_files(&name, &config_path, &tokenizer_path, &weights_path, device)
    }

    fn try_hf_hub(model_id: &str, device: &Device) -> Result<Self> {
        let api = ApiBuilder::new()
            .with_progress(true)
            .build()
            .context("Failed to create HuggingFace API")?;
        let repo = api.model(model_id.to_string());

        tracing::info!("Downloading NER model files from {}", model_id);
        let config_path = repo
            .get("config.json")
            .context("Failed to get config.json")?;
        let tokenizer_path = repo
            .get("tokenizer.json")
            .or_else(|_| repo.get("vocab.txt"))
            .context("Failed to get tokenizer.json or vocab.txt")?;
        let weights_path = repo
            .get("model.safetensors")
            .or_else(|_| repo.get("pytorch_model.bin"))
            .context("Failed to get model weights")?;

        Self::from_files(model_id, &config_path, &tokenizer_path, &weights_path, device)
    }

    fn try_manual_download(model_id: &str, device: &Device) -> Result<Self> {
        let cache_dir = dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("vianlp")
            .join("models")
            .join(model_id.replace('/', "_"));

        std::fs::create_dir_all(&cache_dir)
            .with_context(|| format!("Failed to create {}", cache_dir.display()))?;

        let base_url = format!("https://huggingface.co/{model_id}/resolve/main");

        let config_path = fetch_first(&base_url, &cache_dir, &["config.json"])?;
        let tokenizer_path = fetch_first(&base_url, &cache_dir, &["tokenizer.json", "vocab.txt"])?;
        let weights_path = fetch_first(
            &base_url,
            &cache_dir,
            &["model.safetensors", "pytorch_model.bin"],
        )?;

        Self::from_files(model_id, &config_path, &tokenizer_path, &weights_path, device)
    }

    /// Load from explicit file paths
    pub fn from_files(
        name: &str,
        config_path: &Path,
        tokenizer_path: &Path,
        weights_path: &Path,
        device: &Device,
    ) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config: {}", config_path.display()))?;
        let config: BertConfig =
            serde_json::from_str(&config_str).context("Failed to parse BERT config")?;
        let head: HeadConfig =
            serde_json::from_str(&config_str).context("Failed to parse classifier config")?;
        let labels = label_table(&head.id2label)?;

        let tokenizer = load_tokenizer(tokenizer_path)?;
        let cls_id = special_id(&tokenizer, &["[CLS]", "<s>"])?;
        let sep_id = special_id(&tokenizer, &["[SEP]", "</s>"])?;

        let vb = if weights_path.extension().is_some_and(|e| e == "safetensors") {
            unsafe {
                VarBuilder::from_mmaped_safetensors(&[weights_path], DType::F32, device)
                    .context("Failed to load safetensors weights")?
            }
        } else {
            VarBuilder::from_pth(weights_path, DType::F32, device)
                .context("Failed to load pytorch weights")?
        };

        // Token classification checkpoints keep the encoder under "bert"
        let model = BertModel::load(vb.pp("bert"), &config)
            .or_else(|_| BertModel::load(vb.clone(), &config))
            .context("Failed to load BERT encoder")?;
        let classifier = candle_nn::linear(head.hidden_size, labels.len(), vb.pp("classifier"))
            .context("Failed to load classifier head")?;

        tracing::info!(
            model = name,
            labels = labels.len(),
            "Loaded NER model"
        );

        Ok(Self {
            model,
            classifier,
            tokenizer,
            labels,
            cls_id,
            sep_id,
            device: device.clone(),
            name: name.to_string(),
        })
    }

    /// Labels indexed by class id
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Predict a class id for every piece of one window
    fn classify_window(&self, ids: &[u32]) -> Result<Vec<u32>> {
        let mut input = Vec::with_capacity(ids.len() + 2);
        input.push(self.cls_id);
        input.extend_from_slice(ids);
        input.push(self.sep_id);

        let input_ids = Tensor::new(&input[..], &self.device)?.unsqueeze(0)?;
        let token_type_ids = Tensor::zeros((1, input.len()), DType::U32, &self.device)?;

        let hidden = self
            .model
            .forward(&input_ids, &token_type_ids, None)
            .context("BERT forward pass failed")?;
        let logits = self.classifier.forward(&hidden)?;
        let predicted = logits.argmax(D::Minus1)?.squeeze(0)?.to_vec1::<u32>()?;

        // Drop the CLS and SEP predictions
        Ok(predicted[1..predicted.len() - 1].to_vec())
    }
}

impl EntityRecognizer for BertEntityRecognizer {
    fn recognize(&self, text: &str) -> Result<Vec<EntitySpan>> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let encoding = self
            .tokenizer
            .encode_char_offsets(text, false)
            .map_err(|e| anyhow::anyhow!("Tokenization failed: {e}"))?;
        let ids = encoding.get_ids();
        let offsets = encoding.get_offsets();
        let words = encoding.get_word_ids();

        let mut pieces = Vec::with_capacity(ids.len());
        for (start, end) in window_bounds(words, MAX_PIECES) {
            let predicted = self.classify_window(&ids[start..end])?;
            for (i, class_id) in predicted.into_iter().enumerate() {
                let idx = start + i;
                let (char_start, char_end) = offsets[idx];
                if char_start == char_end {
                    continue;
                }
                let tag = self
                    .labels
                    .get(class_id as usize)
                    .cloned()
                    .unwrap_or_else(|| "O".to_string());
                pieces.push(TaggedPiece {
                    tag,
                    start: char_start,
                    end: char_end,
                    // Pieces outside any word never continue one another
                    word: words[idx].map_or(usize::MAX - idx, |w| w as usize),
                });
            }
        }

        let spans = decode_bio(text, &pieces);
        tracing::debug!(pieces = pieces.len(), entities = spans.len(), "NER pass");
        Ok(spans)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Split pieces into windows of at most `max` without cutting a word in two
fn window_bounds(words: &[Option<u32>], max: usize) -> Vec<(usize, usize)> {
    let mut bounds = Vec::new();
    let mut start = 0;
    let max = max.max(1);

    while start < words.len() {
        let mut end = (start + max).min(words.len());
        if end < words.len() {
            let mut cut = end;
            while cut > start + 1 && words[cut].is_some() && words[cut] == words[cut - 1] {
                cut -= 1;
            }
            // A single word longer than the window is cut where it falls
            if cut > start + 1 || words[cut] != words[cut - 1] {
                end = cut;
            }
        }
        bounds.push((start, end));
        start = end;
    }

    bounds
}

/// Build the id → label table from config.json's `id2label`
fn label_table(id2label: &HashMap<String, String>) -> Result<Vec<String>> {
    if id2label.is_empty() {
        anyhow::bail!("config.json has no id2label mapping; not a token classification model");
    }
    let mut indexed: Vec<(usize, &String)> = id2label
        .iter()
        .map(|(k, v)| {
            k.parse::<usize>()
                .map(|i| (i, v))
                .with_context(|| format!("Invalid id2label key: {k}"))
        })
        .collect::<Result<_>>()?;
    indexed.sort_by_key(|(i, _)| *i);

    let size = indexed.last().map_or(0, |(i, _)| i + 1);
    let mut labels = vec!["O".to_string(); size];
    for (i, label) in indexed {
        labels[i] = label.clone();
    }
    Ok(labels)
}

fn load_tokenizer(path: &Path) -> Result<Tokenizer> {
    let mut tokenizer = if path.extension().is_some_and(|e| e == "json") {
        Tokenizer::from_file(path).map_err(|e| anyhow::anyhow!("Failed to load tokenizer: {e}"))?
    } else {
        wordpiece_tokenizer(path)?
    };

    // Windows are cut by hand; the tokenizer must see the whole page
    tokenizer
        .with_truncation(None)
        .map_err(|e| anyhow::anyhow!("Failed to disable truncation: {e}"))?;
    tokenizer.with_padding(None);
    Ok(tokenizer)
}

/// Cased BERT tokenizer built from a bare vocab.txt
fn wordpiece_tokenizer(vocab_path: &Path) -> Result<Tokenizer> {
    use tokenizers::models::wordpiece::WordPiece;
    use tokenizers::normalizers::bert::BertNormalizer;
    use tokenizers::pre_tokenizers::bert::BertPreTokenizer;

    let vocab = vocab_path
        .to_str()
        .with_context(|| format!("Non UTF-8 vocab path: {}", vocab_path.display()))?;
    let wordpiece = WordPiece::from_file(vocab)
        .unk_token("[UNK]".to_string())
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to load WordPiece vocab: {e}"))?;

    let mut tokenizer = Tokenizer::new(wordpiece);
    tokenizer.with_normalizer(Some(BertNormalizer::new(true, true, Some(false), false)));
    tokenizer.with_pre_tokenizer(Some(BertPreTokenizer));
    Ok(tokenizer)
}

fn special_id(tokenizer: &Tokenizer, candidates: &[&str]) -> Result<u32> {
    candidates
        .iter()
        .find_map(|t| tokenizer.token_to_id(t))
        .with_context(|| format!("Tokenizer has none of {candidates:?}"))
}

/// Download the first of `files` that the repository serves
fn fetch_first(base_url: &str, cache_dir: &Path, files: &[&str]) -> Result<PathBuf> {
    if let Some(cached) = files.iter().map(|f| cache_dir.join(f)).find(|p| p.exists()) {
        tracing::debug!("Using cached {}", cached.display());
        return Ok(cached);
    }

    let mut last_err = None;
    for file in files {
        let url = format!("{base_url}/{file}");
        tracing::info!("Downloading {}...", file);
        match ureq::get(&url).call() {
            Ok(response) => {
                let local_path = cache_dir.join(file);
                let partial = cache_dir.join(format!("{file}.part"));
                let mut out = std::fs::File::create(&partial)
                    .with_context(|| format!("Failed to create {}", partial.display()))?;
                std::io::copy(&mut response.into_reader(), &mut out)
                    .with_context(|| format!("Failed to download {file}"))?;
                std::fs::rename(&partial, &local_path)?;
                tracing::info!("Downloaded {}", file);
                return Ok(local_path);
            }
            Err(e) => last_err = Some(anyhow::Error::new(e).context(format!("Failed to download {file}"))),
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("No files requested")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_table() {
        let map: HashMap<String, String> = [("0", "O"), ("2", "I-LOC"), ("1", "B-LOC")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert_eq!(label_table(&map).unwrap(), vec!["O", "B-LOC", "I-LOC"]);
    }

    #[test]
    fn test_label_table_rejects_empty_and_bad_keys() {
        assert!(label_table(&HashMap::new()).is_err());
        let bad: HashMap<String, String> =
            [("x".to_string(), "O".to_string())].into_iter().collect();
        assert!(label_table(&bad).is_err());
    }

    #[test]
    fn test_window_bounds_short_input() {
        let words = vec![Some(0), Some(1), Some(2)];
        assert_eq!(window_bounds(&words, 510), vec![(0, 3)]);
        assert!(window_bounds(&[], 510).is_empty());
    }

    #[test]
    fn test_window_bounds_keeps_words_whole() {
        // word 1 spans pieces 1..4; a window of 3 would cut it
        let words = vec![Some(0), Some(1), Some(1), Some(1), Some(2)];
        assert_eq!(window_bounds(&words, 3), vec![(0, 1), (1, 4), (4, 5)]);
    }

    #[test]
    fn test_window_bounds_overlong_word() {
        let words = vec![Some(0), Some(0), Some(0), Some(0)];
        assert_eq!(window_bounds(&words, 2), vec![(0, 2), (2, 4)]);
    }

    #[test]
    fn test_head_config_parse() {
        let json = r#"{"hidden_size": 768, "id2label": {"0": "O", "1": "B-LOC"}, "vocab_size": 31102}"#;
        let head: HeadConfig = serde_json::from_str(json).unwrap();
        assert_eq!(head.hidden_size, 768);
        assert_eq!(head.id2label.len(), 2);
    }

    #[test]
    fn test_missing_local_model() {
        let err = BertEntityRecognizer::from_pretrained("/nonexistent/it-ner", &Device::Cpu)
            .err()
            .unwrap();
        assert!(err.to_string().contains("not found"));

        let empty = tempfile::tempdir().unwrap();
        let err = BertEntityRecognizer::from_dir(empty.path(), &Device::Cpu)
            .err()
            .unwrap();
        assert!(err.to_string().contains("config.json not found"));
    }

    #[test]
    #[ignore = "downloads the model from Hugging Face"]
    fn test_recognize_italian_locations() {
        let recognizer =
            BertEntityRecognizer::from_pretrained(DEFAULT_NER_MODEL, &Device::Cpu).unwrap();
        let spans = recognizer
            .recognize("Il parco eolico sorgerà nel comune di Melfi, in provincia di Potenza.")
            .unwrap();
        assert!(spans.iter().any(|s| s.text == "Melfi" && s.label == "LOC"));
    }
}
