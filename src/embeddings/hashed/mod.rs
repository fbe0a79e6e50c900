
use std::hash::Hasher;

use fnv::FnvHasher;

use super::EmbeddingModel;
use super::similarity::l2_normalize;
use crate::{RagError, Result};

const UNIGRAM_WEIGHT: f32 = 1.0;
const BIGRAM_WEIGHT: f32 = 0.5;
const TRIGRAM_WEIGHT: f32 = 0.25;
/// Words this short or shorter carry no unigram feature
const MIN_UNIGRAM_CHARS: usize = 2;

/// Feature-hashing embedder that needs no external model.
///
/// The output vector is split into three equal bands: word unigrams, adjacent word
/// pairs, and character trigrams of the whitespace-stripped text. Each feature is
/// hashed with 64-bit FNV-1a, which is seedless and stable across processes, then
/// the vector is L2-normalised so cosine similarity reduces to a dot product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashedEmbedder {
    dimension: usize,
    band_width: usize,
}

impl HashedEmbedder {
    #[inline]
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension < 3 || dimension % 3 != 0 {
            return Err(RagError::Configuration(format!(
                "hashed embedding dimension must be a positive multiple of 3, got {}",
                dimension
            )));
        }

        Ok(Self {
            dimension,
            band_width: dimension / 3,
        })
    }

    /// Compute the normalised feature vector. Never fails.
    #[inline]
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut features = vec![0.0_f32; self.dimension];
        let normalized = text.trim().to_lowercase();
        if normalized.is_empty() {
            return features;
        }

        let words: Vec<&str> = normalized.split_whitespace().collect();

        for word in &words {
            if word.chars().count() > MIN_UNIGRAM_CHARS {
                features[self.bucket(0, word.as_bytes())] += UNIGRAM_WEIGHT;
            }
        }

        for pair in words.windows(2) {
            let bigram = format!("{}_{}", pair[0], pair[1]);
            features[self.bucket(1, bigram.as_bytes())] += BIGRAM_WEIGHT;
        }

        let compact: Vec<char> = words.concat().chars().collect();
        let mut trigram = String::with_capacity(12);
        for window in compact.windows(3) {
            trigram.clear();
            trigram.extend(window);
            features[self.bucket(2, trigram.as_bytes())] += TRIGRAM_WEIGHT;
        }

        l2_normalize(&mut features);
        features
    }

    fn bucket(&self, band: usize, feature: &[u8]) -> usize {
        band * self.band_width + (stable_hash(feature) % self.band_width as u64) as usize
    }
}

/// 64-bit FNV-1a over raw bytes
#[inline]
pub fn stable_hash(bytes: &[u8]) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(bytes);
    hasher.finish()
}

impl EmbeddingModel for HashedEmbedder {
    #[inline]
    fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    fn name(&self) -> String {
        "hashed".to_string()
    }

    #[inline]
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_text(text))
    }
}
