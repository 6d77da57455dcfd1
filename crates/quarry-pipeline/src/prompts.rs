//! Prompt text for every LLM-backed step. Builders only; no I/O.

use quarry_types::{FormattedSchema, PromptVariant};

use crate::collaborators::Prompt;

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

const GENERATOR_SYSTEM: &str = "You are an expert SQL developer.
Given a database schema and a natural language question, write a single SQL SELECT query that answers the question.
Rules:
- Output ONLY the SQL query, no explanation.
- Use standard SQL syntax compatible with the target database.
- Only SELECT or WITH queries. No INSERT, UPDATE, DELETE, DROP, or DDL.
- Do not use -- comments.
- Use table aliases for readability.
- Handle NULLs appropriately.";

/// Lead-in line that distinguishes the candidate variants.
pub fn variant_instruction(variant: PromptVariant) -> &'static str {
    match variant {
        PromptVariant::Conservative => "Write a SQL query to answer:",
        PromptVariant::Creative => "Generate a precise SQL SELECT statement for:",
        PromptVariant::Rephrased => "Produce a SQL query that accurately answers:",
    }
}

pub fn generation(
    schema: &FormattedSchema,
    query: &str,
    variant: PromptVariant,
    retry_guidance: Option<&str>,
) -> Prompt {
    let mut user = format!(
        "Schema:\n{}\n\n{}\n{}",
        schema.content,
        variant_instruction(variant),
        query
    );
    if let Some(guidance) = retry_guidance {
        user.push_str("\n\nPrevious attempt failed.\n");
        user.push_str(guidance);
    }
    Prompt::new(GENERATOR_SYSTEM, user)
}

// ---------------------------------------------------------------------------
// Checks
// ---------------------------------------------------------------------------

const SYNTAX_SYSTEM: &str = "You are a SQL syntax expert.
Check if the given SQL is syntactically valid.
Respond with ONLY one of:
PASS
FAIL: <brief reason>";

const LOGIC_SYSTEM: &str = "You are a SQL logic reviewer.
Given a user question and a SQL query, determine if the SQL correctly and completely answers the question.
Respond with ONLY one of:
PASS
FAIL: <brief reason>";

const PERFORMANCE_SYSTEM: &str = "You are a SQL performance expert.
Review the SQL for performance issues:
- Cartesian joins or missing JOIN conditions
- Missing WHERE filters on large tables
- SELECT * usage
- Unbounded result sets (no LIMIT / FETCH FIRST)
- Functions on indexed columns in WHERE
Respond with ONLY one of:
PASS
WARN: <brief concern>
FAIL: <critical issue>";

pub fn syntax_check(sql: &str) -> Prompt {
    Prompt::new(SYNTAX_SYSTEM, format!("Check this SQL:\n\n{sql}")).with_max_tokens(100)
}

pub fn logic_check(sql: &str, query: &str) -> Prompt {
    Prompt::new(
        LOGIC_SYSTEM,
        format!("User question: {query}\n\nSQL:\n{sql}"),
    )
    .with_max_tokens(150)
}

pub fn performance_check(sql: &str) -> Prompt {
    Prompt::new(PERFORMANCE_SYSTEM, format!("Review for performance:\n\n{sql}"))
        .with_max_tokens(150)
}

// ---------------------------------------------------------------------------
// Explanation
// ---------------------------------------------------------------------------

const EXPLANATION_SYSTEM: &str = "You are a helpful data analyst explaining SQL to a business user.
Given a SQL query and the original question, explain in 2-4 plain English sentences what the query does.
Do not include SQL syntax in your explanation.";

const OPTIMIZATION_SYSTEM: &str = "You are a database performance tuning expert.
Given a SQL query, suggest 1-3 concrete optimization hints.
Be specific and actionable. If well-optimized, say so.
Keep each hint to one sentence.";

pub fn explanation(sql: &str, query: &str) -> Prompt {
    Prompt::new(
        EXPLANATION_SYSTEM,
        format!("Original question: {query}\n\nSQL:\n{sql}\n\nExplain in plain English."),
    )
    .with_max_tokens(300)
}

pub fn optimization(sql: &str) -> Prompt {
    Prompt::new(OPTIMIZATION_SYSTEM, format!("Optimize this SQL:\n\n{sql}")).with_max_tokens(200)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> FormattedSchema {
        FormattedSchema {
            content: "TABLE: main.orders\n  id INTEGER [PK]".into(),
            table_names: vec!["orders".into()],
            token_estimate: 5,
        }
    }

    #[test]
    fn generation_prompt_embeds_schema_and_variant() {
        let p = generation(&schema(), "count orders", PromptVariant::Creative, None);
        assert!(p.user.contains("TABLE: main.orders"));
        assert!(p.user.contains("Generate a precise SQL SELECT statement for:\ncount orders"));
        assert!(!p.user.contains("Previous attempt failed"));
    }

    #[test]
    fn generation_prompt_appends_guidance() {
        let guidance = "All candidates failed. Fix these:\n[conservative] syntax: bad";
        let p = generation(&schema(), "count orders", PromptVariant::Conservative, Some(guidance));
        assert!(p.user.ends_with(guidance));
    }

    #[test]
    fn variants_have_distinct_instructions() {
        let a = variant_instruction(PromptVariant::Conservative);
        let b = variant_instruction(PromptVariant::Creative);
        let c = variant_instruction(PromptVariant::Rephrased);
        assert!(a != b && b != c && a != c);
    }
}
