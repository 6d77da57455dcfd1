//! Parallel SQL candidate generation, one call per configured variant.

use std::sync::Arc;

use futures::future::join_all;

use quarry_types::{FormattedSchema, QuarryError, Result, SqlCandidate};

use crate::collaborators::TextGenerator;
use crate::config::VariantSpec;
use crate::prompts;

/// Remove Markdown code fences a model may wrap around its SQL.
pub fn strip_code_fences(raw: &str) -> String {
    let raw = raw.trim();
    if !raw.starts_with("```") {
        return raw.to_string();
    }
    raw.lines()
        .filter(|l| !l.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[derive(Clone)]
pub struct CandidateGenerator {
    generator: Arc<dyn TextGenerator>,
    variants: Vec<VariantSpec>,
}

impl CandidateGenerator {
    pub fn new(generator: Arc<dyn TextGenerator>, variants: &[VariantSpec]) -> Self {
        Self {
            generator,
            variants: variants.to_vec(),
        }
    }

    /// Candidates come back in variant order. A failed call drops only its
    /// own candidate; every call failing is an error.
    pub async fn generate(
        &self,
        schema: &FormattedSchema,
        query: &str,
        retry_guidance: Option<&str>,
    ) -> Result<Vec<SqlCandidate>> {
        tracing::info!(candidates = self.variants.len(), "Generating candidates in parallel");

        let calls = self.variants.iter().map(|spec| async move {
            let prompt = prompts::generation(schema, query, spec.variant, retry_guidance);
            let raw = self.generator.generate(&prompt, spec.temperature).await?;
            Ok::<_, QuarryError>(SqlCandidate {
                sql: strip_code_fences(&raw),
                temperature: spec.temperature,
                variant: spec.variant,
            })
        });

        let mut candidates = Vec::with_capacity(self.variants.len());
        let mut last_error = None;
        for (spec, result) in self.variants.iter().zip(join_all(calls).await) {
            match result {
                Ok(c) => candidates.push(c),
                Err(e) => {
                    tracing::warn!(variant = %spec.variant, error = %e, "Candidate generation failed");
                    last_error = Some(e);
                }
            }
        }

        if candidates.is_empty() {
            return Err(QuarryError::GenerationFailed {
                attempted: self.variants.len(),
                message: last_error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "no prompt variants configured".into()),
            });
        }
        tracing::info!(ready = candidates.len(), "Candidates ready");
        Ok(candidates)
    }
}
