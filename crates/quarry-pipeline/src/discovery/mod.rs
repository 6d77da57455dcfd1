//! Table ranking.
//!
//! 1. Keyword prefilter over every table (no collaborator calls), keeping the
//!    top `keyword_prefilter_top_n`.
//! 2. Semantic similarity and FK-graph distance computed concurrently over
//!    the survivors.
//! 3. Weighted merge: each signal with an entry contributes
//!    `raw_score + signal_weight`.

pub mod graph_walk;
pub mod keyword;
pub mod semantic;

use std::collections::{BTreeSet, HashMap};

use quarry_types::{round4, Result, ScoredTable, Signal, Table};

use crate::collaborators::EmbeddingService;
use crate::config::{PipelineConfig, SignalWeights};

#[derive(Debug, Clone)]
pub struct TableRanker {
    weights: SignalWeights,
    prefilter_top_n: usize,
}

impl TableRanker {
    pub fn new(weights: SignalWeights, prefilter_top_n: usize) -> Self {
        Self {
            weights,
            prefilter_top_n,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.weights, config.keyword_prefilter_top_n)
    }

    /// Rank `tables` against `query`. Output contains only prefilter
    /// survivors, sorted by non-increasing score with ties in input order.
    pub async fn rank(
        &self,
        tables: &[Table],
        query: &str,
        embedder: &dyn EmbeddingService,
    ) -> Result<Vec<ScoredTable>> {
        let keyword_scores = keyword::score_tables(tables, query);
        let survivors: Vec<Table> = keyword::prefilter(tables, &keyword_scores, self.prefilter_top_n)
            .into_iter()
            .cloned()
            .collect();
        tracing::info!(
            before = tables.len(),
            after = survivors.len(),
            "Keyword prefilter applied"
        );

        let (semantic_scores, graph_scores) = tokio::join!(
            semantic::score(embedder, &survivors, query),
            async { graph_walk::score(&survivors, query) },
        );
        let semantic_scores = semantic_scores?;

        let ranked = merge(
            &survivors,
            &[
                (Signal::Keyword, &keyword_scores),
                (Signal::Semantic, &semantic_scores),
                (Signal::FkGraph, &graph_scores),
            ],
            &self.weights,
        );
        tracing::info!(
            ranked = ranked.len(),
            top = ?ranked.iter().take(5).map(|s| s.table.name.as_str()).collect::<Vec<_>>(),
            "Tables ranked"
        );
        Ok(ranked)
    }
}

/// Order-independent weighted merge. Names a signal reports that are not in
/// `tables` are ignored; a table with no entry in any signal is dropped.
/// Raw scores are clamped to `0.0..=1.0` before weighting.
pub fn merge(
    tables: &[Table],
    signals: &[(Signal, &HashMap<String, f64>)],
    weights: &SignalWeights,
) -> Vec<ScoredTable> {
    let mut scored: Vec<(f64, ScoredTable)> = Vec::with_capacity(tables.len());
    for table in tables {
        let mut total = 0.0;
        let mut found_by = BTreeSet::new();
        let mut seen = false;
        for (signal, scores) in signals {
            if let Some(&raw) = scores.get(&table.name) {
                let raw = raw.clamp(0.0, 1.0);
                seen = true;
                total += raw + weights.weight(*signal);
                if raw > 0.0 {
                    found_by.insert(*signal);
                }
            }
        }
        if seen {
            scored.push((
                total,
                ScoredTable {
                    table: table.clone(),
                    score: 0.0,
                    found_by,
                },
            ));
        }
    }

    // Stable: equal totals keep input order.
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    scored
        .into_iter()
        .map(|(total, mut st)| {
            st.score = round4(total);
            st
        })
        .collect()
}
