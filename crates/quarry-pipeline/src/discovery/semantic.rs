//! Embedding similarity between the query and a short description of each
//! table.

use std::collections::HashMap;

use quarry_types::{round4, QuarryError, Result, Table};

use crate::collaborators::EmbeddingService;

/// Columns included in a table description.
const DESCRIPTION_COLUMNS: usize = 20;

pub fn describe_table(table: &Table) -> String {
    let columns: Vec<&str> = table
        .columns
        .iter()
        .take(DESCRIPTION_COLUMNS)
        .map(|c| c.name.as_str())
        .collect();
    let mut text = format!("Table {}: columns {}", table.name, columns.join(","));
    if let Some(ref comment) = table.comment {
        text.push_str(". ");
        text.push_str(comment);
    }
    text
}

/// Cosine similarity; zero when either vector has no magnitude or the
/// dimensions differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }
    let (mut dot, mut na, mut nb) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    let norm = na.sqrt() * nb.sqrt();
    if norm > 0.0 {
        dot / norm
    } else {
        0.0
    }
}

/// Embed the query and every table description in one call, then score.
/// Scores are cosine similarities clamped to `0.0..=1.0`.
pub async fn score(
    embedder: &dyn EmbeddingService,
    tables: &[Table],
    query: &str,
) -> Result<HashMap<String, f64>> {
    if tables.is_empty() {
        return Ok(HashMap::new());
    }
    let texts: Vec<String> = std::iter::once(query.to_string())
        .chain(tables.iter().map(describe_table))
        .collect();
    tracing::debug!(tables = tables.len(), "Embedding query and table descriptions");

    let vectors = embedder
        .embed(&texts)
        .await
        .map_err(|e| match e {
            QuarryError::EmbeddingFailed(_) => e,
            other => QuarryError::EmbeddingFailed(other.to_string()),
        })?;
    if vectors.len() != texts.len() {
        return Err(QuarryError::EmbeddingFailed(format!(
            "expected {} embeddings, got {}",
            texts.len(),
            vectors.len()
        )));
    }

    let (query_vec, table_vecs) = vectors.split_at(1);
    Ok(tables
        .iter()
        .zip(table_vecs)
        .map(|(t, v)| {
            let similarity = cosine_similarity(&query_vec[0], v).clamp(0.0, 1.0);
            (t.name.clone(), round4(similarity))
        })
        .collect())
}
