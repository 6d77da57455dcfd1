//! Lexical relevance: query keywords fuzzy-matched against table and column
//! names. No collaborator calls.

use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::Regex;

use quarry_types::{round4, Table};

lazy_static! {
    static ref WORD: Regex = Regex::new(r"[a-z]+").expect("valid word regex");
}

/// Filler words that never identify a table.
pub const STOP_WORDS: &[&str] = &[
    "show", "me", "get", "find", "list", "give", "the", "a", "an", "of", "for", "in", "on", "by",
    "with", "from", "where", "top", "all", "my", "this", "that", "and", "or", "is", "are", "was",
    "how", "many", "much", "what", "which", "who",
];

/// Lowercase alphabetic tokens longer than two characters, minus stop words.
pub fn extract_keywords(query: &str) -> Vec<String> {
    let lowered = query.to_lowercase();
    WORD.find_iter(&lowered)
        .map(|m| m.as_str())
        .filter(|t| t.len() > 2 && !STOP_WORDS.contains(t))
        .map(String::from)
        .collect()
}

/// Substring containment scores 1.0; otherwise normalized edit similarity.
fn fuzzy_score(keyword: &str, target: &str) -> f64 {
    if target.contains(keyword) {
        return 1.0;
    }
    strsim::normalized_levenshtein(keyword, target)
}

/// Mean over keywords of the best match against the table name or any column.
pub fn score_table(table: &Table, keywords: &[String]) -> f64 {
    if keywords.is_empty() {
        return 0.0;
    }
    let targets: Vec<String> = std::iter::once(table.name.to_lowercase())
        .chain(table.columns.iter().map(|c| c.name.to_lowercase()))
        .collect();

    let total: f64 = keywords
        .iter()
        .map(|kw| {
            targets
                .iter()
                .map(|t| fuzzy_score(kw, t))
                .fold(0.0, f64::max)
        })
        .sum();
    round4(total / keywords.len() as f64)
}

pub fn score_tables(tables: &[Table], query: &str) -> HashMap<String, f64> {
    let keywords = extract_keywords(query);
    tracing::debug!(?keywords, "Keyword extraction");
    tables
        .iter()
        .map(|t| (t.name.clone(), score_table(t, &keywords)))
        .collect()
}

/// Stable descending sort by keyword score, truncated to `top_n`.
pub fn prefilter<'a>(
    tables: &'a [Table],
    scores: &HashMap<String, f64>,
    top_n: usize,
) -> Vec<&'a Table> {
    let mut ranked: Vec<&Table> = tables.iter().collect();
    ranked.sort_by(|a, b| {
        let sa = scores.get(&a.name).copied().unwrap_or(0.0);
        let sb = scores.get(&b.name).copied().unwrap_or(0.0);
        sb.total_cmp(&sa)
    });
    ranked.truncate(top_n);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_types::Column;

    #[test]
    fn keywords_drop_stop_words_and_short_tokens() {
        let kws = extract_keywords("Show me the top 10 customers by total sales in Q3!");
        assert_eq!(kws, vec!["customers", "total", "sales"]);
    }

    #[test]
    fn no_keywords_scores_zero() {
        let t = Table::new("orders", "main");
        assert_eq!(score_table(&t, &[]), 0.0);
        assert!(extract_keywords("show me all of it").is_empty());
    }

    #[test]
    fn substring_match_is_full_credit() {
        let t = Table::new("customer_orders", "main").with_column(Column::new("id", "INTEGER"));
        assert_eq!(score_table(&t, &["order".to_string()]), 1.0);
    }

    #[test]
    fn column_names_count_as_targets() {
        let t = Table::new("tx", "main").with_column(Column::new("amount", "REAL"));
        assert_eq!(score_table(&t, &["amount".to_string()]), 1.0);
    }

    #[test]
    fn score_is_mean_over_keywords() {
        let t = Table::new("orders", "main");
        let kws = vec!["orders".to_string(), "zzzzzz".to_string()];
        let s = score_table(&t, &kws);
        assert!(s >= 0.5 && s < 1.0, "got {s}");
    }

    #[test]
    fn prefilter_is_stable_and_truncates() {
        let tables = vec![
            Table::new("a", "main"),
            Table::new("b", "main"),
            Table::new("c", "main"),
        ];
        let scores: HashMap<String, f64> =
            [("a".into(), 0.2), ("b".into(), 0.9), ("c".into(), 0.2)].into();
        let kept: Vec<&str> = prefilter(&tables, &scores, 2)
            .iter()
            .map(|t| t.name.as_str())
            .collect();
        assert_eq!(kept, vec!["b", "a"]);
    }
}
