//! Explanation stage: plain-English explanation, safety report and
//! optimization hints produced concurrently for the chosen candidate.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use quarry_types::{CandidateValidation, CheckResult};

use crate::collaborators::TextGenerator;
use crate::prompts;

const EXPLANATION_TEMPERATURE: f32 = 0.3;
const OPTIMIZATION_TEMPERATURE: f32 = 0.2;
const RULE: &str = "------------------------------------";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    pub explanation: String,
    pub safety_report: String,
    pub optimization_hints: String,
}

fn status_tag(check: &CheckResult) -> &'static str {
    if !check.passed {
        "[FAIL]"
    } else if check.score < 1.0 {
        "[WARN]"
    } else {
        "[PASS]"
    }
}

/// Audit text derived from the candidate's checks only.
pub fn safety_report(validation: &CandidateValidation) -> String {
    let mut checks: Vec<&CheckResult> = validation.checks.iter().collect();
    checks.sort_by_key(|c| c.kind);

    let mut lines = vec!["Security & Quality Report".to_string(), RULE.to_string()];
    for check in checks {
        lines.push(format!(
            "{} {:<14}{}",
            status_tag(check),
            check.kind.as_str().to_uppercase(),
            check.detail.as_deref().unwrap_or("")
        ));
    }
    lines.push(RULE.to_string());
    lines.push(format!("Total score: {:.1} / 4.0", validation.total_score));
    lines.join("\n")
}

#[derive(Clone)]
pub struct Explainer {
    generator: Arc<dyn TextGenerator>,
}

impl Explainer {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    /// Never fails: a model error degrades that section to placeholder text.
    pub async fn explain(&self, validation: &CandidateValidation, query: &str) -> Explanation {
        let sql = validation.candidate.sql.as_str();
        let explain_prompt = prompts::explanation(sql, query);
        let optimize_prompt = prompts::optimization(sql);
        let (explanation, report, hints) = tokio::join!(
            self.generator
                .generate(&explain_prompt, EXPLANATION_TEMPERATURE),
            async { safety_report(validation) },
            self.generator
                .generate(&optimize_prompt, OPTIMIZATION_TEMPERATURE),
        );

        Explanation {
            explanation: explanation.map(|s| s.trim().to_string()).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Explanation unavailable");
                format!("Explanation unavailable: {e}")
            }),
            safety_report: report,
            optimization_hints: hints.map(|s| s.trim().to_string()).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Optimization hints unavailable");
                format!("Optimization hints unavailable: {e}")
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::Prompt;
    use async_trait::async_trait;
    use quarry_types::{CheckKind, PromptVariant, QuarryError, Result, SqlCandidate};

    fn validation() -> CandidateValidation {
        CandidateValidation::from_checks(
            SqlCandidate {
                sql: "SELECT id FROM orders".into(),
                temperature: 0.3,
                variant: PromptVariant::Conservative,
            },
            vec![
                CheckResult::warn(CheckKind::Performance, "no LIMIT"),
                CheckResult::pass(CheckKind::AccessSafety, "read-only query"),
                CheckResult::pass(CheckKind::Syntax, "syntax valid"),
                CheckResult::pass(CheckKind::Logic, "logic correct"),
            ],
        )
    }

    #[test]
    fn report_is_in_check_order_with_total() {
        let report = safety_report(&validation());
        let lines: Vec<&str> = report.lines().collect();
        assert_eq!(lines[0], "Security & Quality Report");
        assert!(lines[2].starts_with("[PASS] ACCESS_SAFETY"));
        assert!(lines[3].starts_with("[PASS] SYNTAX"));
        assert!(lines[4].starts_with("[PASS] LOGIC"));
        assert_eq!(lines[5], "[WARN] PERFORMANCE   no LIMIT");
        assert_eq!(lines.last(), Some(&"Total score: 3.5 / 4.0"));
    }

    struct Echo;

    #[async_trait]
    impl TextGenerator for Echo {
        async fn generate(&self, prompt: &Prompt, _t: f32) -> Result<String> {
            if prompt.system.contains("tuning") {
                Err(QuarryError::Other("timeout".into()))
            } else {
                Ok("  Lists every order id.  ".into())
            }
        }
    }

    #[tokio::test]
    async fn model_failure_degrades_to_placeholder() {
        let out = Explainer::new(Arc::new(Echo))
            .explain(&validation(), "list orders")
            .await;
        assert_eq!(out.explanation, "Lists every order id.");
        assert_eq!(out.optimization_hints, "Optimization hints unavailable: timeout");
        assert!(out.safety_report.contains("Total score"));
    }

    /// Answers with the user turn it was given, so the caller can see
    /// which prompt reached which section.
    struct Mirror;

    #[async_trait]
    impl TextGenerator for Mirror {
        async fn generate(&self, prompt: &Prompt, _t: f32) -> Result<String> {
            Ok(prompt.user.clone())
        }
    }

    #[tokio::test]
    async fn both_model_sections_see_the_chosen_sql() {
        let out = Explainer::new(Arc::new(Mirror))
            .explain(&validation(), "list orders")
            .await;
        assert!(out.explanation.contains("Original question: list orders"));
        assert!(out.explanation.contains("SELECT id FROM orders"));
        assert!(out.optimization_hints.starts_with("Optimize this SQL:"));
        assert!(out.optimization_hints.contains("SELECT id FROM orders"));
    }
}
