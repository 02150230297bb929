//! Weighted-sum score fusion

use crate::config::SearchConfig;

use super::SearchError;

/// Weights for combining the two retrieval paths
///
/// Both scores arrive normalized to [0,1], and the weights must sum to at
/// most 1, so combined scores stay in [0,1]. No renormalization happens
/// after the weighted sum.
#[derive(Debug, Clone, Copy)]
pub struct FusionWeights {
    pub vector: f32,
    pub keyword: f32,
}

impl FusionWeights {
    pub fn new(vector: f32, keyword: f32) -> Result<Self, SearchError> {
        if !(0.0..=1.0).contains(&vector) || !(0.0..=1.0).contains(&keyword) {
            return Err(SearchError::InvalidParams(format!(
                "fusion weights must lie in [0,1], got vector={} keyword={}",
                vector, keyword
            )));
        }
        if vector + keyword > 1.0 + 1e-6 {
            return Err(SearchError::InvalidParams(format!(
                "fusion weights must sum to at most 1, got {}",
                vector + keyword
            )));
        }
        Ok(Self { vector, keyword })
    }

    pub fn from_config(config: &SearchConfig) -> Result<Self, SearchError> {
        Self::new(config.vector_weight, config.keyword_weight)
    }

    /// `combined = Wv * vector_score + Wk * keyword_score`
    pub fn combine(&self, vector_score: f32, keyword_score: f32) -> f32 {
        self.vector * vector_score + self.keyword * keyword_score
    }
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            vector: 0.7,
            keyword: 0.3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combine_is_exact_weighted_sum() {
        let weights = FusionWeights::default();
        let combined = weights.combine(0.8, 0.5);
        assert!((combined - (0.7 * 0.8 + 0.3 * 0.5)).abs() < 1e-7);
    }

    #[test]
    fn test_single_path_candidate_scores() {
        let weights = FusionWeights::default();
        // a candidate missing from one path contributes 0 for that path
        assert!((weights.combine(0.9, 0.0) - 0.63).abs() < 1e-6);
        assert!((weights.combine(0.0, 1.0) - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_rejects_out_of_range_weights() {
        assert!(FusionWeights::new(1.2, 0.0).is_err());
        assert!(FusionWeights::new(-0.1, 0.5).is_err());
    }

    #[test]
    fn test_rejects_weights_summing_past_one() {
        assert!(FusionWeights::new(0.8, 0.5).is_err());
        assert!(FusionWeights::new(0.7, 0.3).is_ok());
    }

    #[test]
    fn test_zero_weights_are_allowed() {
        // degenerate but legal: ranking falls back to merge order
        assert!(FusionWeights::new(0.0, 0.0).is_ok());
    }
}
