//! Access gate: intersects ranked relevance with the approved-access set.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use quarry_types::{ScoredTable, Table};

/// Result of gating one run's ranked tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateResult {
    pub passed: bool,
    pub tables: Vec<Table>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl GateResult {
    fn blocked(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            tables: Vec::new(),
            reason: Some(reason.into()),
        }
    }
}

/// Keep the ranked tables the principal may read, in ranked order, capped at
/// `top_k`. Pure: identical inputs always give identical results.
pub fn apply_gate(
    ranked: &[ScoredTable],
    approved: &HashSet<String>,
    access_error: Option<&str>,
    top_k: usize,
) -> GateResult {
    if let Some(err) = access_error {
        return GateResult::blocked(format!("security filter error: {err}"));
    }

    let tables: Vec<Table> = ranked
        .iter()
        .filter(|st| approved.contains(&st.table.name))
        .take(top_k)
        .map(|st| st.table.clone())
        .collect();

    if tables.is_empty() {
        return GateResult::blocked("no accessible tables matched");
    }

    GateResult {
        passed: true,
        tables,
        reason: None,
    }
}
