use crate::config::Config;
use crate::error::{Result, ValidationError, VitaqError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, collecting every violation
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_service(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_index(config, &mut errors);
        Self::validate_search(config, &mut errors);
        Self::validate_generation(config, &mut errors);
        Self::validate_cache(config, &mut errors);
        Self::validate_corpus(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(VitaqError::ConfigValidation { errors })
        }
    }

    fn validate_service(config: &Config, errors: &mut Vec<ValidationError>) {
        let url = &config.service.base_url;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            errors.push(ValidationError::new(
                "service.base_url",
                format!("Base URL must start with http:// or https://, got '{}'", url),
            ));
        }

        if config.service.api_key_env.is_empty() {
            errors.push(ValidationError::new(
                "service.api_key_env",
                "API key environment variable name cannot be empty",
            ));
        }

        if config.service.timeout_secs == 0 {
            errors.push(ValidationError::new(
                "service.timeout_secs",
                "Timeout must be greater than 0",
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.embedding.model.is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Model name cannot be empty",
            ));
        }

        if config.embedding.dimension == 0 {
            errors.push(ValidationError::new(
                "embedding.dimension",
                "Vector dimension must be greater than 0",
            ));
        }

        if config.embedding.max_input_tokens == 0 {
            errors.push(ValidationError::new(
                "embedding.max_input_tokens",
                "Token budget must be greater than 0",
            ));
        }

        if config.embedding.batch_size == 0 {
            errors.push(ValidationError::new(
                "embedding.batch_size",
                "Batch size must be greater than 0",
            ));
        }
    }

    fn validate_index(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.index.flat_threshold == 0 {
            errors.push(ValidationError::new(
                "index.flat_threshold",
                "Flat threshold must be greater than 0",
            ));
        }

        if config.index.max_clusters == 0 {
            errors.push(ValidationError::new(
                "index.max_clusters",
                "Cluster bound must be greater than 0",
            ));
        }

        if config.index.cluster_divisor == 0 {
            errors.push(ValidationError::new(
                "index.cluster_divisor",
                "Cluster divisor must be greater than 0",
            ));
        }

        if config.index.nprobe == 0 {
            errors.push(ValidationError::new(
                "index.nprobe",
                "nprobe must be greater than 0",
            ));
        }
    }

    fn validate_search(config: &Config, errors: &mut Vec<ValidationError>) {
        let wv = config.search.vector_weight;
        let wk = config.search.keyword_weight;

        if !(0.0..=1.0).contains(&wv) {
            errors.push(ValidationError::new(
                "search.vector_weight",
                format!("Weight must be between 0.0 and 1.0, got {}", wv),
            ));
        }

        if !(0.0..=1.0).contains(&wk) {
            errors.push(ValidationError::new(
                "search.keyword_weight",
                format!("Weight must be between 0.0 and 1.0, got {}", wk),
            ));
        }

        // Combined scores stay within [0,1] only while the weights sum to at most 1
        if wv + wk > 1.0 + 1e-6 {
            errors.push(ValidationError::new(
                "search.keyword_weight",
                format!("Weights must sum to at most 1.0, got {}", wv + wk),
            ));
        }

        if config.search.top_k == 0 {
            errors.push(ValidationError::new(
                "search.top_k",
                "top_k must be greater than 0",
            ));
        }
    }

    fn validate_generation(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.generation.model.is_empty() {
            errors.push(ValidationError::new(
                "generation.model",
                "Model name cannot be empty",
            ));
        }

        let temp = config.generation.temperature;
        if !(0.0..=2.0).contains(&temp) {
            errors.push(ValidationError::new(
                "generation.temperature",
                format!("Temperature must be between 0.0 and 2.0, got {}", temp),
            ));
        }

        if config.generation.max_tokens == 0 {
            errors.push(ValidationError::new(
                "generation.max_tokens",
                "max_tokens must be greater than 0",
            ));
        }
    }

    fn validate_cache(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.cache.answer_ttl_secs == 0 {
            errors.push(ValidationError::new(
                "cache.answer_ttl_secs",
                "Answer TTL must be greater than 0",
            ));
        }
    }

    fn validate_corpus(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.corpus.chunk_size == 0 {
            errors.push(ValidationError::new(
                "corpus.chunk_size",
                "Chunk size must be greater than 0",
            ));
        }

        if config.corpus.chunk_overlap >= config.corpus.chunk_size {
            errors.push(ValidationError::new(
                "corpus.chunk_overlap",
                format!(
                    "Overlap ({}) must be smaller than chunk size ({})",
                    config.corpus.chunk_overlap, config.corpus.chunk_size
                ),
            ));
        }
    }
}
