//! Run configuration: retry budget, ranking cut-offs, signal weights and the
//! prompt-variant table.

use std::path::Path;

use serde::{Deserialize, Serialize};

use quarry_types::{PromptVariant, QuarryError, Result, Signal};

use crate::retry::BackoffPolicy;

/// Fixed weight added to a signal's raw score when merging.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalWeights {
    pub keyword: f64,
    pub semantic: f64,
    pub fk_graph: f64,
}

impl SignalWeights {
    pub fn weight(&self, signal: Signal) -> f64 {
        match signal {
            Signal::Keyword => self.keyword,
            Signal::Semantic => self.semantic,
            Signal::FkGraph => self.fk_graph,
        }
    }
}

impl Default for SignalWeights {
    fn default() -> Self {
        Self {
            keyword: 0.35,
            semantic: 0.45,
            fk_graph: 0.20,
        }
    }
}

/// One row of the variant → sampling temperature table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VariantSpec {
    pub variant: PromptVariant,
    pub temperature: f32,
}

fn default_variants() -> Vec<VariantSpec> {
    vec![
        VariantSpec {
            variant: PromptVariant::Conservative,
            temperature: 0.3,
        },
        VariantSpec {
            variant: PromptVariant::Creative,
            temperature: 0.7,
        },
        VariantSpec {
            variant: PromptVariant::Rephrased,
            temperature: 0.5,
        },
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Candidates generated per attempt; the first `n_candidates` rows of `variants` are used.
    pub n_candidates: usize,
    /// Extra generate→validate attempts after the first one.
    pub max_retries: usize,
    /// Tables passed through the access gate.
    pub discovery_top_k: usize,
    /// Tables surviving the lexical prefilter.
    pub keyword_prefilter_top_n: usize,
    pub weights: SignalWeights,
    pub variants: Vec<VariantSpec>,
    /// Per-call retries for transient provider errors.
    pub llm_retries: usize,
    pub backoff: BackoffPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            n_candidates: 3,
            max_retries: 2,
            discovery_top_k: 10,
            keyword_prefilter_top_n: 50,
            weights: SignalWeights::default(),
            variants: default_variants(),
            llm_retries: 2,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl PipelineConfig {
    /// Read a (possibly partial) JSON config; missing fields take defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.n_candidates == 0 {
            return Err(QuarryError::Config("n_candidates must be at least 1".into()));
        }
        if self.n_candidates > self.variants.len() {
            return Err(QuarryError::Config(format!(
                "n_candidates ({}) exceeds the {} configured prompt variants",
                self.n_candidates,
                self.variants.len()
            )));
        }
        if self.discovery_top_k == 0 {
            return Err(QuarryError::Config("discovery_top_k must be at least 1".into()));
        }
        if self.keyword_prefilter_top_n == 0 {
            return Err(QuarryError::Config(
                "keyword_prefilter_top_n must be at least 1".into(),
            ));
        }
        if let Some(v) = self.variants.iter().find(|v| !(0.0..=2.0).contains(&v.temperature)) {
            return Err(QuarryError::Config(format!(
                "temperature {} for variant '{}' is outside 0.0..=2.0",
                v.temperature, v.variant
            )));
        }
        Ok(())
    }

    /// Variants used for each generation attempt.
    pub fn active_variants(&self) -> &[VariantSpec] {
        let n = self.n_candidates.min(self.variants.len());
        &self.variants[..n]
    }

    /// Upper bound on generation attempts per run.
    pub fn max_attempts(&self) -> usize {
        self.max_retries + 1
    }
}
