//! Deterministic feature vectors derived from content metadata.
//!
//! The first three dimensions encode duration, sample rate and channel count.
//! The remaining ones are filled from a SHA-256 stream seeded by the metadata, a
//! stand-in for real audio embeddings that keeps the same content mapped to the
//! same vector across runs, platforms and crate versions.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const DEFAULT_FEATURE_DIM: usize = 512;

const FILL_DOMAIN: &[u8] = b"clip-tagger/feature-fill/v1";
const FILL_SCALE: f64 = 0.1;

/// Audio properties known once the content has been decoded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentMetadata {
    pub duration_secs: f64,
    pub sample_rate: u32,
    pub channels: u16,
}

impl ContentMetadata {
    fn canonical_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(FILL_DOMAIN.len() + 14);
        bytes.extend_from_slice(FILL_DOMAIN);
        bytes.extend_from_slice(&self.duration_secs.to_bits().to_le_bytes());
        bytes.extend_from_slice(&self.sample_rate.to_le_bytes());
        bytes.extend_from_slice(&self.channels.to_le_bytes());
        bytes
    }
}

pub trait FeatureExtractor: Send + Sync {
    fn dim(&self) -> usize;

    /// Must return the same vector for the same metadata, every time.
    fn extract(&self, metadata: &ContentMetadata) -> Vec<f64>;
}

#[derive(Debug, Clone)]
pub struct MetadataFeatureExtractor {
    dim: usize,
}

impl MetadataFeatureExtractor {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl Default for MetadataFeatureExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_FEATURE_DIM)
    }
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

impl FeatureExtractor for MetadataFeatureExtractor {
    fn dim(&self) -> usize {
        self.dim
    }

    fn extract(&self, metadata: &ContentMetadata) -> Vec<f64> {
        let mut features = Vec::with_capacity(self.dim);
        let header = [
            finite_or_zero(metadata.duration_secs / 60.0),
            metadata.sample_rate as f64 / 48_000.0,
            metadata.channels as f64,
        ];
        features.extend(header.iter().take(self.dim));

        let seeded = Sha256::new().chain_update(metadata.canonical_bytes());
        let mut block: u64 = 0;
        while features.len() < self.dim {
            let digest = seeded.clone().chain_update(block.to_le_bytes()).finalize();
            for word in digest.chunks_exact(4) {
                if features.len() == self.dim {
                    break;
                }
                let raw = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
                features.push(raw as f64 / (u32::MAX as f64 + 1.0) * FILL_SCALE);
            }
            block += 1;
        }
        features
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clip() -> ContentMetadata {
        ContentMetadata {
            duration_secs: 30.0,
            sample_rate: 44_100,
            channels: 2,
        }
    }

    #[test]
    fn test_header_dimensions() {
        let features = MetadataFeatureExtractor::default().extract(&clip());
        assert_eq!(features.len(), DEFAULT_FEATURE_DIM);
        assert_eq!(features[0], 0.5);
        assert_eq!(features[1], 44_100.0 / 48_000.0);
        assert_eq!(features[2], 2.0);
    }

    #[test]
    fn test_fill_is_deterministic_and_bounded() {
        let extractor = MetadataFeatureExtractor::default();
        let first = extractor.extract(&clip());
        let second = extractor.extract(&clip());
        assert_eq!(first, second);
        assert!(first[3..].iter().all(|x| (0.0..FILL_SCALE).contains(x)));
    }

    #[test]
    fn test_different_metadata_gives_different_fill() {
        let extractor = MetadataFeatureExtractor::default();
        let mut other = clip();
        other.duration_secs = 30.5;
        assert_ne!(extractor.extract(&clip())[3..], extractor.extract(&other)[3..]);
    }

    #[test]
    fn test_small_dimensions_are_respected() {
        assert_eq!(
            MetadataFeatureExtractor::new(2).extract(&clip()),
            vec![0.5, 44_100.0 / 48_000.0]
        );
        assert!(MetadataFeatureExtractor::new(0).extract(&clip()).is_empty());
        assert_eq!(MetadataFeatureExtractor::new(13).extract(&clip()).len(), 13);
    }

    #[test]
    fn test_non_finite_duration_is_neutralized() {
        let mut broken = clip();
        broken.duration_secs = f64::NAN;
        let features = MetadataFeatureExtractor::new(8).extract(&broken);
        assert_eq!(features[0], 0.0);
        assert!(features.iter().all(|x| x.is_finite()));
    }
}
