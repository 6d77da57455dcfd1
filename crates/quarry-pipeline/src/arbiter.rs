//! Candidate arbitration: validate every candidate concurrently, pick the
//! best survivor, or describe why all of them failed.

use std::sync::Arc;

use futures::future::join_all;

use quarry_types::{CandidateValidation, SqlCandidate, ValidationOutcome};

use crate::checks;
use crate::collaborators::{StructuralParser, TextGenerator};

pub const RETRY_GUIDANCE_HEADER: &str = "All candidates failed. Fix these:\n";

#[derive(Clone)]
pub struct CandidateArbiter {
    parser: Arc<dyn StructuralParser>,
    validator: Arc<dyn TextGenerator>,
}

impl CandidateArbiter {
    pub fn new(parser: Arc<dyn StructuralParser>, validator: Arc<dyn TextGenerator>) -> Self {
        Self { parser, validator }
    }

    /// Run the four checks for one candidate concurrently.
    pub async fn validate_candidate(&self, candidate: SqlCandidate, query: &str) -> CandidateValidation {
        let sql = candidate.sql.as_str();
        let (access, syntax, logic, performance) = tokio::join!(
            async { checks::access_safety(sql) },
            checks::syntax(self.parser.as_ref(), self.validator.as_ref(), sql),
            checks::logic(self.validator.as_ref(), sql, query),
            checks::performance(self.validator.as_ref(), sql),
        );
        let validation =
            CandidateValidation::from_checks(candidate, vec![access, syntax, logic, performance]);
        tracing::debug!(
            variant = %validation.candidate.variant,
            total = validation.total_score,
            disqualified = validation.disqualified,
            "Candidate validated"
        );
        validation
    }

    /// Validate all candidates concurrently; results keep input order.
    pub async fn validate(&self, candidates: &[SqlCandidate], query: &str) -> ValidationOutcome {
        tracing::info!(candidates = candidates.len(), "Validating candidates x 4 checks");
        let results = join_all(
            candidates
                .iter()
                .cloned()
                .map(|c| self.validate_candidate(c, query)),
        )
        .await;
        select(results)
    }
}

/// Strictly highest total among non-disqualified candidates wins; ties go to
/// the earliest. Without a survivor the outcome carries retry guidance.
pub fn select(results: Vec<CandidateValidation>) -> ValidationOutcome {
    let mut winner: Option<usize> = None;
    for (i, r) in results.iter().enumerate() {
        if r.disqualified {
            continue;
        }
        match winner {
            Some(w) if results[w].total_score >= r.total_score => {}
            _ => winner = Some(i),
        }
    }

    match winner {
        Some(i) => {
            tracing::info!(
                variant = %results[i].candidate.variant,
                score = results[i].total_score,
                "Candidate selected"
            );
            ValidationOutcome {
                passed: true,
                winner: Some(i),
                results,
                retry_guidance: None,
            }
        }
        None => {
            let guidance = retry_guidance(&results);
            tracing::warn!(candidates = results.len(), "All candidates failed, retry needed");
            ValidationOutcome {
                passed: false,
                winner: None,
                results,
                retry_guidance: Some(guidance),
            }
        }
    }
}

/// One line per failed check across every candidate, in candidate order.
pub fn retry_guidance(results: &[CandidateValidation]) -> String {
    let lines: Vec<String> = results
        .iter()
        .flat_map(|r| {
            r.failed_checks().map(move |c| {
                format!(
                    "[{}] {}: {}",
                    r.candidate.variant,
                    c.kind,
                    c.detail.as_deref().unwrap_or("")
                )
            })
        })
        .collect();
    format!("{RETRY_GUIDANCE_HEADER}{}", lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_types::{CheckKind, CheckResult, PromptVariant};

    fn scored(variant: PromptVariant, scores: [f64; 4], hard_fail: bool) -> CandidateValidation {
        let checks = CheckKind::ALL
            .iter()
            .zip(scores)
            .map(|(k, s)| {
                if hard_fail && *k == CheckKind::AccessSafety {
                    CheckResult::fail(*k, "forbidden keyword: DELETE")
                } else {
                    CheckResult {
                        kind: *k,
                        passed: s > 0.0,
                        score: s,
                        detail: Some(format!("{k} detail")),
                    }
                }
            })
            .collect();
        CandidateValidation::from_checks(
            SqlCandidate {
                sql: format!("SELECT '{variant}'"),
                temperature: 0.3,
                variant,
            },
            checks,
        )
    }

    #[test]
    fn highest_total_wins() {
        // Totals 2.8, 3.5, 1.9.
        let outcome = select(vec![
            scored(PromptVariant::Conservative, [1.0, 1.0, 0.3, 0.5], false),
            scored(PromptVariant::Creative, [1.0, 1.0, 1.0, 0.5], false),
            scored(PromptVariant::Rephrased, [1.0, 0.4, 0.0, 0.5], false),
        ]);
        assert!(outcome.passed);
        assert_eq!(outcome.winner, Some(1));
        assert_eq!(outcome.best().unwrap().total_score, 3.5);
        assert!(outcome.retry_guidance.is_none());
    }

    #[test]
    fn ties_go_to_first_seen() {
        let outcome = select(vec![
            scored(PromptVariant::Conservative, [1.0, 1.0, 0.0, 1.0], false),
            scored(PromptVariant::Creative, [1.0, 1.0, 1.0, 0.0], false),
        ]);
        assert_eq!(outcome.winner, Some(0));
    }

    #[test]
    fn disqualified_never_wins() {
        let outcome = select(vec![
            scored(PromptVariant::Conservative, [1.0, 1.0, 1.0, 1.0], true),
            scored(PromptVariant::Creative, [1.0, 1.0, 0.0, 0.5], false),
        ]);
        assert_eq!(outcome.winner, Some(1));
        // Disqualified candidates stay in the audit trail at zero.
        assert_eq!(outcome.results[0].total_score, 0.0);
    }

    #[test]
    fn guidance_lists_every_failed_check() {
        let outcome = select(vec![
            scored(PromptVariant::Conservative, [1.0, 1.0, 0.0, 1.0], true),
            scored(PromptVariant::Creative, [1.0, 1.0, 1.0, 1.0], true),
        ]);
        assert!(!outcome.passed);
        assert!(outcome.winner.is_none());
        let guidance = outcome.retry_guidance.unwrap();
        assert_eq!(
            guidance,
            "All candidates failed. Fix these:\n\
             [conservative] access_safety: forbidden keyword: DELETE\n\
             [conservative] logic: logic detail\n\
             [creative] access_safety: forbidden keyword: DELETE"
        );
    }

    #[test]
    fn empty_candidate_set_needs_retry() {
        let outcome = select(Vec::new());
        assert!(!outcome.passed);
        assert_eq!(
            outcome.retry_guidance.as_deref(),
            Some("All candidates failed. Fix these:\n")
        );
    }
}
