//! The four per-candidate checks.
//!
//! Access-safety is purely lexical. Syntax runs a structural parse before
//! asking the validation model. Logic and performance are model opinions in
//! a `PASS` / `WARN: ...` / `FAIL: ...` verdict format. None of these
//! functions return errors: a collaborator failure is reported as a failing
//! [`CheckResult`].

use lazy_static::lazy_static;
use regex::Regex;

use quarry_types::{CheckKind, CheckResult, QuarryError};

use crate::collaborators::{StructuralParser, TextGenerator};
use crate::prompts;

/// Validation calls are deterministic.
const CHECK_TEMPERATURE: f32 = 0.0;

lazy_static! {
    static ref FORBIDDEN_KEYWORD: Regex = Regex::new(
        r"(?i)\b(INSERT|UPDATE|DELETE|MERGE|TRUNCATE|DROP|ALTER|CREATE|REPLACE|EXEC|EXECUTE|GRANT|REVOKE)\b"
    )
    .expect("valid keyword regex");
    static ref STACKED_STATEMENT: Regex = Regex::new(r";\s*\S").expect("valid stacked regex");
}

// ---------------------------------------------------------------------------
// Access safety (hard-fail, no collaborator)
// ---------------------------------------------------------------------------

pub fn access_safety(sql: &str) -> CheckResult {
    let kind = CheckKind::AccessSafety;
    if let Some(m) = FORBIDDEN_KEYWORD.find(sql) {
        tracing::warn!(keyword = %m.as_str(), "Access-safety check failed");
        return CheckResult::fail(
            kind,
            format!("forbidden keyword: {}", m.as_str().to_uppercase()),
        );
    }
    if sql.contains("--") {
        return CheckResult::fail(kind, "inline comments (--) are not allowed");
    }
    if STACKED_STATEMENT.is_match(sql) {
        return CheckResult::fail(kind, "stacked statements are not allowed");
    }
    let head = sql.trim_start().to_uppercase();
    if !head.starts_with("SELECT") && !head.starts_with("WITH") {
        return CheckResult::fail(kind, "query must start with SELECT or WITH");
    }
    CheckResult::pass(kind, "read-only query")
}

// ---------------------------------------------------------------------------
// Verdict parsing
// ---------------------------------------------------------------------------

/// Case-insensitive label prefix; returns the remainder without the colon.
fn strip_label<'a>(raw: &'a str, label: &str) -> Option<&'a str> {
    let head = raw.get(..label.len())?;
    if head.eq_ignore_ascii_case(label) {
        Some(raw[label.len()..].trim_start_matches(':').trim())
    } else {
        None
    }
}

fn pass_detail(kind: CheckKind) -> &'static str {
    match kind {
        CheckKind::AccessSafety => "read-only query",
        CheckKind::Syntax => "syntax valid",
        CheckKind::Logic => "logic correct",
        CheckKind::Performance => "no performance issues",
    }
}

/// Turn a model verdict into a check result. `WARN` is only meaningful for
/// the performance check; elsewhere it counts as a failure.
pub fn parse_verdict(kind: CheckKind, raw: &str) -> CheckResult {
    let raw = raw.trim();
    if strip_label(raw, "PASS").is_some() {
        return CheckResult::pass(kind, pass_detail(kind));
    }
    if kind == CheckKind::Performance {
        if let Some(detail) = strip_label(raw, "WARN") {
            return CheckResult::warn(kind, non_empty(detail, raw));
        }
    }
    let detail = strip_label(raw, "FAIL").unwrap_or(raw);
    CheckResult::fail(kind, non_empty(detail, raw))
}

fn non_empty<'a>(detail: &'a str, raw: &'a str) -> &'a str {
    if !detail.is_empty() {
        detail
    } else if !raw.is_empty() {
        raw
    } else {
        "no reason given"
    }
}

fn unavailable(kind: CheckKind, err: &QuarryError) -> CheckResult {
    tracing::warn!(check = %kind, error = %err, "Check collaborator failed");
    CheckResult::fail(kind, format!("check unavailable: {err}"))
}

// ---------------------------------------------------------------------------
// Model-backed checks
// ---------------------------------------------------------------------------

/// Structural parse first; the model is only consulted for parsable SQL.
pub async fn syntax(
    parser: &dyn StructuralParser,
    validator: &dyn TextGenerator,
    sql: &str,
) -> CheckResult {
    if let Err(detail) = parser.parse(sql) {
        return CheckResult::fail(CheckKind::Syntax, detail);
    }
    match validator
        .generate(&prompts::syntax_check(sql), CHECK_TEMPERATURE)
        .await
    {
        Ok(raw) => parse_verdict(CheckKind::Syntax, &raw),
        Err(e) => unavailable(CheckKind::Syntax, &e),
    }
}

pub async fn logic(validator: &dyn TextGenerator, sql: &str, query: &str) -> CheckResult {
    match validator
        .generate(&prompts::logic_check(sql, query), CHECK_TEMPERATURE)
        .await
    {
        Ok(raw) => parse_verdict(CheckKind::Logic, &raw),
        Err(e) => unavailable(CheckKind::Logic, &e),
    }
}

pub async fn performance(validator: &dyn TextGenerator, sql: &str) -> CheckResult {
    match validator
        .generate(&prompts::performance_check(sql), CHECK_TEMPERATURE)
        .await
    {
        Ok(raw) => parse_verdict(CheckKind::Performance, &raw),
        Err(e) => unavailable(CheckKind::Performance, &e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{Prompt, SqlparserParser};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn access_safety_accepts_select_and_cte() {
        assert!(access_safety("SELECT id FROM orders").passed);
        assert!(access_safety("  with t as (select 1) select * from t").passed);
        // Trailing semicolon is not a stacked statement.
        assert!(access_safety("SELECT 1;").passed);
        // Keywords embedded in identifiers do not trip the filter.
        assert!(access_safety("SELECT created_at, deleted FROM orders").passed);
    }

    #[test]
    fn access_safety_rejects_writes() {
        let r = access_safety("DELETE FROM orders");
        assert!(!r.passed);
        assert_eq!(r.score, 0.0);
        assert_eq!(r.detail.as_deref(), Some("forbidden keyword: DELETE"));

        assert!(!access_safety("select 1; drop table orders").passed);
        assert!(!access_safety("GRANT SELECT ON orders TO bob").passed);
    }

    #[test]
    fn access_safety_rejects_comments_stacking_and_non_select() {
        let r = access_safety("SELECT 1 -- hide");
        assert!(r.detail.unwrap().contains("comments"));
        let r = access_safety("SELECT 1; SELECT 2");
        assert!(r.detail.unwrap().contains("stacked"));
        let r = access_safety("PRAGMA table_info(orders)");
        assert!(r.detail.unwrap().contains("must start with"));
    }

    #[test]
    fn verdict_parsing() {
        let pass = parse_verdict(CheckKind::Logic, "  PASS\n");
        assert!(pass.passed);
        assert_eq!(pass.score, 1.0);

        let fail = parse_verdict(CheckKind::Logic, "FAIL: missing GROUP BY");
        assert!(!fail.passed);
        assert_eq!(fail.detail.as_deref(), Some("missing GROUP BY"));

        let warn = parse_verdict(CheckKind::Performance, "warn: no LIMIT");
        assert!(warn.passed);
        assert_eq!(warn.score, 0.5);
        assert_eq!(warn.detail.as_deref(), Some("no LIMIT"));

        // WARN is not a valid logic verdict.
        assert!(!parse_verdict(CheckKind::Logic, "WARN: hmm").passed);

        let free = parse_verdict(CheckKind::Syntax, "Looks broken to me");
        assert!(!free.passed);
        assert_eq!(free.detail.as_deref(), Some("Looks broken to me"));

        assert_eq!(
            parse_verdict(CheckKind::Logic, "").detail.as_deref(),
            Some("no reason given")
        );
    }

    struct Counting {
        calls: AtomicUsize,
        reply: std::result::Result<&'static str, ()>,
    }

    #[async_trait]
    impl TextGenerator for Counting {
        async fn generate(&self, _p: &Prompt, _t: f32) -> quarry_types::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.reply {
                Ok(s) => Ok(s.to_string()),
                Err(()) => Err(QuarryError::Other("model offline".into())),
            }
        }
    }

    #[tokio::test]
    async fn unparsable_sql_skips_model() {
        let model = Counting {
            calls: AtomicUsize::new(0),
            reply: Ok("PASS"),
        };
        let r = syntax(&SqlparserParser, &model, "SELEC FROM").await;
        assert!(!r.passed);
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);

        let r = syntax(&SqlparserParser, &model, "SELECT 1").await;
        assert!(r.passed);
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn collaborator_error_becomes_failed_check() {
        let model = Counting {
            calls: AtomicUsize::new(0),
            reply: Err(()),
        };
        let r = performance(&model, "SELECT 1").await;
        assert!(!r.passed);
        assert_eq!(r.detail.as_deref(), Some("check unavailable: model offline"));
    }
}
